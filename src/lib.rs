pub mod config;
pub mod error;
pub mod pipeline;
pub mod publisher;
pub mod roundtrip;
pub mod security;
pub mod transport;
pub mod utils;

// Crate version exposed for runtime queries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
