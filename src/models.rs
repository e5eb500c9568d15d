use chrono::{DateTime, Utc};
use serde::Serialize;

/// A shortened URL record, keyed by `short_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct UrlRecord {
    pub short_id: String,
    pub original_url: String,
    pub created_at: DateTime<Utc>,
    /// Seconds since the Unix epoch. `0` means the record never expires.
    pub expire_at: i64,
    pub clicks: i64,
}

impl UrlRecord {
    /// A record past its expiry at `now`. Records with `expire_at == 0` never expire.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expire_at > 0 && now.timestamp() > self.expire_at
    }

    /// Same key, target and timestamps; the click count is ignored.
    pub fn same_link(&self, other: &UrlRecord) -> bool {
        self.short_id == other.short_id
            && self.original_url == other.original_url
            && self.created_at == other.created_at
            && self.expire_at == other.expire_at
    }
}

/// Fields an update may touch. `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlPatch {
    pub original_url: Option<String>,
    pub expire_at: Option<i64>,
}

impl UrlPatch {
    pub fn is_empty(&self) -> bool {
        self.original_url.is_none() && self.expire_at.is_none()
    }
}

/// Result of a successful `create`.
#[derive(Debug, Clone, Serialize)]
pub struct Created {
    pub short_id: String,
    pub short_url: String,
    pub created_at: DateTime<Utc>,
    pub expire_at: i64,
}

/// Non-error outcome of `update` and `delete`; `success` may be `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
}

impl Outcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// One page of a paginated listing.
#[derive(Debug, Clone)]
pub struct Page {
    pub records: Vec<UrlRecord>,
    /// Resume token for the next page; `None` once the scan is exhausted.
    pub next_cursor: Option<String>,
}
