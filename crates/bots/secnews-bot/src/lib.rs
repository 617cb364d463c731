pub mod compose;
pub mod config;
pub mod dedup;
pub mod entry;
pub mod error;
pub mod feed;
pub mod pipeline;
pub mod publish;
pub mod retry;
pub mod select;
pub mod sources;
pub mod store;
pub mod summarize;
pub mod timestamp;

pub const PROJECT_NAME: &str = "secnews-bot";
pub const LOG_TARGET: &str = "secnews_bot::main";

/// User agent sent with every outgoing HTTP request.
pub const USER_AGENT: &str = concat!("secnews-bot/", env!("CARGO_PKG_VERSION"));
