#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod client;
pub mod config;
pub mod feed;
pub mod post;
pub mod query;
pub mod remote;
pub mod storage;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
