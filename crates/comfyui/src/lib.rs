//! ComfyUI WebSocket and REST client library.
//!
//! Provides typed message parsing, a WebSocket connection handle, HTTP
//! API wrappers, and the output-collection loop that turns one queued
//! workflow into the bytes of its first output image.

pub mod api;
pub mod client;
pub mod messages;
pub mod processor;
pub mod session;

pub use api::{ComfyUIApi, ComfyUIApiError};
pub use client::{ComfyUIClient, ComfyUIClientError};
pub use messages::ImageRef;
pub use session::{GeneratedImage, ImageSession};
