//! Shared services used by front-ends.

mod client;

pub use client::PropertyClient;
