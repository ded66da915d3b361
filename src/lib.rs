pub mod config;
pub mod constants;
pub mod db;
pub mod dedup;
pub mod domain;
pub mod error;
pub mod intake;
pub mod logging;
pub mod metrics;
pub mod oracle;
pub mod pipeline;
pub mod rate_limiter;
pub mod server;
pub mod similarity;
pub mod storage;
