pub mod api;
pub mod core;
pub mod crawlers;
pub mod features;
pub mod parsers;
pub mod tools;

// --- Primary core exports ---
pub use core::config::AppConfig;
pub use core::error::ApiError;
pub use core::types;
pub use core::AppState;

pub use api::build_router;
pub use features::{auth, history, rate_limit, sources};
