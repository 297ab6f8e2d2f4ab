//! Core types shared by every layer: configuration, constants, and errors.

mod config;
pub mod constants;
mod error;

pub use config::ConnectionConfig;
pub use error::{EncodeError, MatchError, SessionError, TransportError};
