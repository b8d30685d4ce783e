pub mod config;
pub mod lease;
pub mod status;
pub mod validate;
