//! snip: a URL shortener with random short keys, click counting and a
//! JSON RPC API next to a plain HTTP redirect server.

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod handlers;
pub mod keygen;
pub mod models;
pub mod resolver;
pub mod shortener;
pub mod store;

use resolver::RedirectResolver;
use shortener::Shortener;

// ── Shared application state ───────────────────────────────────────────────

pub struct AppState {
    pub shortener: Arc<Shortener>,
    pub resolver: RedirectResolver,
}

impl AppState {
    pub fn new(shortener: Arc<Shortener>) -> Self {
        Self {
            resolver: RedirectResolver::new(shortener.clone()),
            shortener,
        }
    }
}
