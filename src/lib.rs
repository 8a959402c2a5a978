pub mod app;
pub mod chat;
pub mod client;
pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod keys;
pub mod metrics;
pub mod middleware;
pub mod render;
pub mod sources;
pub mod store;

#[cfg(test)]
mod fakes;
