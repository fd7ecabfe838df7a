#![forbid(unsafe_code)]

pub mod cli;
pub mod comments;
pub mod config;
pub mod discovery;
pub mod extract;
pub mod fetch;
pub mod formats;
pub mod ingest;
pub mod logging;
pub mod monitor;
pub mod report;
pub mod store;
