pub mod chat;
pub mod config;
pub mod error;
pub mod models;
pub mod rag;
pub mod server;
pub mod source;
pub mod summarize;

pub use error::{RagError, RagResult};

/// Installs the `tracing` subscriber used by every binary (`RUST_LOG`, default `info`).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
