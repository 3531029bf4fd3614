//! Row models and status enums for the job store.

pub mod job;
pub mod status;
