//! The two-stage generation pipeline.
//!
//! A [`producer::ProducerWorker`] claims jobs from the store and turns
//! each prompt into an image file; a [`consumer::ConsumerWorker`] uploads
//! those files. The two are connected by a bounded
//! [`handoff::HandoffQueue`] and supervised by the
//! [`coordinator::Coordinator`], which also performs crash recovery
//! before any worker starts.
//!
//! External services sit behind the traits in [`collaborators`], so the
//! loops can be driven by in-memory fakes in tests.

pub mod collaborators;
pub mod consumer;
pub mod coordinator;
pub mod error;
pub mod generation;
pub mod handoff;
pub mod producer;
pub mod progress;
pub mod repair;
pub mod upload;

pub use coordinator::{Coordinator, PipelineSettings, PipelineVariant, RunSummary};
pub use error::{GenerationError, PipelineError, UploadError};
