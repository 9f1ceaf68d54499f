//! Configuration for the intercepting proxy

pub mod settings;

pub use settings::*;
