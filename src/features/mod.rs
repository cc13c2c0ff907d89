pub mod auth;
pub mod history;
pub mod rate_limit;
pub mod sources;
