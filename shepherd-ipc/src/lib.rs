//! Worker registration protocol for shepherd
//!
//! This crate provides the registration message protocol, the unix socket
//! line transport, and the endpoint naming rules shared by the master and
//! its worker processes.

pub mod endpoint;
pub mod error;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use error::IpcError;
pub use protocol::{MessageEnvelope, RegistrationMessage, REGISTRATION_PROTOCOL_VERSION};
pub use transport::{RegistrationClient, RegistrationStream};
