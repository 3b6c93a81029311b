//! HTTP surface of the job gateway.

pub mod app;
