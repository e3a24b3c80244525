pub mod api;
pub mod cache;
pub mod config;
pub mod dedup;
pub mod domain;
pub mod error;
pub mod export;
pub mod output;
pub mod retry;
pub mod scanner;
pub mod sources;
pub mod tui;
