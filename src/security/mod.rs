//! Security helpers for proxied traffic

pub mod sanitize;

pub use sanitize::Sanitizer;
