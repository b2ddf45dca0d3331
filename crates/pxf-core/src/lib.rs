pub mod config;
pub mod logging;

pub mod aggregate;
pub mod control;
pub mod export;
pub mod fetcher;
pub mod grid;
pub mod job;
pub mod job_store;
pub mod rate_limit;
pub mod retry;
pub mod scheduler;
pub mod throttle;
pub mod transport;
pub mod url_model;
