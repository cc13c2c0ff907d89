pub mod auth;
pub mod common;
pub mod crawl;
pub mod export;
pub mod health;
pub mod history;
pub mod parse;
pub mod query;
pub mod sources;
