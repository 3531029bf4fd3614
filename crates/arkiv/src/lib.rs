//! Client for the Arkiv storage gateway.
//!
//! Entities are opaque payloads (here: generated images) with a small
//! set of queryable attributes and an expiry. The gateway signs and
//! submits the underlying transactions; this crate only speaks its HTTP
//! API.

pub mod client;
pub mod error;
pub mod types;

pub use client::ArkivClient;
pub use error::ArkivError;
pub use types::{
    image_attributes, AttributeValue, Attributes, CreatedEntity, Entity, NewEntity, ENTITY_TTL,
};
