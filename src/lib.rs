pub mod aggregator;
pub mod app;
pub mod cli;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod executor;
pub mod headers;
pub mod limiter;
pub mod output;
pub mod runner;
pub mod utils;

#[cfg(test)]
mod tests;
