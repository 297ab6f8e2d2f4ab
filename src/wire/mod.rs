//! The packet envelope and its wire codec.
//!
//! Every message on every transport is a [`Packet`]: a `{type, header,
//! content}` triple serialized as a JSON object with lowercase field
//! names. The reserved type [`INTERNAL`] marks protocol control traffic;
//! everything else is opaque application payload.

pub mod codec;
pub mod headers;
mod packet;

pub use packet::{INTERNAL, Packet};
