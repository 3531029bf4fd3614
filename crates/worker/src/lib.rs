//! `genpipe` -- batch image generation with crash-safe progress.
//!
//! The binary wires the configured theme, ComfyUI instance and Arkiv
//! gateway into a [`genpipe_pipeline::Coordinator`] and exposes a few
//! maintenance commands next to the main run.

pub mod cli;
pub mod commands;
pub mod config;
