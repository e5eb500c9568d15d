use std::sync::Arc;

use axum::http::HeaderValue;

use crate::{error::ShortenerError, shortener::Shortener};

/// Resolves short keys for the redirect server and records clicks in the
/// background.
#[derive(Clone)]
pub struct RedirectResolver {
    shortener: Arc<Shortener>,
}

impl RedirectResolver {
    pub fn new(shortener: Arc<Shortener>) -> Self {
        Self { shortener }
    }

    /// Return the redirect target for `short_id`, or `None` if it is unknown,
    /// expired, not usable as a `Location` header, or the store failed.
    ///
    /// On success a detached task bumps the click counter. The redirect
    /// never waits for it, and a failed increment is only logged; a click
    /// in flight when the process stops is lost.
    pub async fn resolve(&self, short_id: &str) -> Option<String> {
        match self.shortener.resolve(short_id).await {
            Ok(url) if HeaderValue::from_str(&url).is_err() => {
                tracing::warn!(short_id, "Redirect miss: target is not a valid header value");
                None
            }
            Ok(url) => {
                self.record_click(short_id);
                Some(url)
            }
            Err(ShortenerError::NotFound(_)) => {
                tracing::debug!(short_id, "Redirect miss: unknown key");
                None
            }
            Err(ShortenerError::Expired(_)) => {
                tracing::debug!(short_id, "Redirect miss: key expired");
                None
            }
            Err(e) => {
                tracing::error!(short_id, error = %e, "Redirect lookup failed");
                None
            }
        }
    }

    fn record_click(&self, short_id: &str) {
        let shortener = self.shortener.clone();
        let short_id = short_id.to_owned();

        tokio::spawn(async move {
            match shortener.increment_clicks(&short_id).await {
                Ok(clicks) => tracing::trace!(short_id = %short_id, clicks, "Click recorded"),
                Err(e) => {
                    tracing::warn!(short_id = %short_id, error = %e, "Failed to record click")
                }
            }
        });
    }
}
