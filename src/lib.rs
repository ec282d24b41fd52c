//! Offline-resilience agent for the reading tracker: a durable queue of
//! pending reading-progress updates plus an offline-aware request
//! interceptor with a network-first, cache-fallback read strategy.

pub mod config;
pub mod db;
pub mod interceptor;
pub mod model;
pub mod sync;
pub mod upstream;
