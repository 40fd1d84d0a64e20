//! carbonapi-rs
//!
//! A Graphite-compatible query frontend. Accepts `render`, `tags`, `metrics/find`
//! and `functions` HTTP requests expressed in the Graphite functional query
//! language, fans fetches out to one or more upstream time-series backends,
//! evaluates the requested functions over the returned series, and serializes
//! the result in one of several wire formats.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod eval;
pub mod metricdata;
pub mod metrics;
pub mod parser;
pub mod registry;
pub mod serialize;
pub mod zipper;
