//! `fetchgate-core` — domain foundation for the job gateway.
//!
//! This crate contains **pure domain** types (no infrastructure concerns):
//! the job record and its status state machine, the vendor variants, the
//! sanitizer, and the domain error model.

pub mod error;
pub mod id;
pub mod job;
pub mod sanitize;

pub use error::{DomainError, DomainResult};
pub use id::JobId;
pub use job::{Job, JobStatus, VendorKind};
pub use sanitize::Sanitizer;
