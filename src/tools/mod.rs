pub mod export;
pub mod query;
pub mod validate;
