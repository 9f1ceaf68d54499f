//! Utility functions for the intercepting proxy

pub mod http;

pub use http::*;
