//! Payload codecs.
//!
//! Job input and output are opaque bytes to the protocol. These helpers give
//! clients and workers a typed view over them.

#[cfg(feature = "json")]
pub mod json;

#[cfg(feature = "json")]
pub use json::{decode, encode, json_handler, JsonHandler};
