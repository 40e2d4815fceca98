//! HTTP API Module
//!
//! Provides the REST surface over the storage engine.

mod http;

pub use http::HttpServer;
