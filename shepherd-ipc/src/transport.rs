//! Unix socket line transport for registration traffic

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::error::IpcError;
use crate::protocol::{MessageEnvelope, RegistrationMessage, REGISTRATION_PROTOCOL_VERSION};

/// Newline-delimited JSON envelope stream over a unix socket.
pub struct RegistrationStream {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl RegistrationStream {
    /// Wrap an established connection
    pub fn new(stream: UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    /// Send a message wrapped in a protocol envelope
    pub async fn send<T: Serialize>(&mut self, message: &MessageEnvelope<T>) -> Result<(), IpcError> {
        let json = serde_json::to_string(message)
            .map_err(|e| IpcError::SerializationError(e.to_string()))?;

        // Send with newline delimiter
        let line = format!("{}\n", json);
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| IpcError::IoError(e.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|e| IpcError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Receive the next envelope, checking protocol compatibility
    pub async fn receive<T: for<'de> Deserialize<'de>>(
        &mut self,
    ) -> Result<MessageEnvelope<T>, IpcError> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| IpcError::IoError(e.to_string()))?;

        if read == 0 {
            return Err(IpcError::ConnectionClosed);
        }

        // Remove newline
        line.truncate(line.trim_end().len());

        let envelope: MessageEnvelope<T> = serde_json::from_str(&line)
            .map_err(|e| IpcError::DeserializationError(e.to_string()))?;

        if envelope.protocol_version != REGISTRATION_PROTOCOL_VERSION {
            return Err(IpcError::ProtocolVersionMismatch {
                expected: REGISTRATION_PROTOCOL_VERSION,
                actual: envelope.protocol_version,
            });
        }

        Ok(envelope)
    }
}

/// Worker-side connector to the master registration endpoint.
pub struct RegistrationClient {
    stream: RegistrationStream,
}

impl RegistrationClient {
    /// Connect to the master registration socket
    pub async fn connect(master_address: impl AsRef<Path>) -> Result<Self, IpcError> {
        let stream = UnixStream::connect(master_address.as_ref())
            .await
            .map_err(|e| IpcError::IoError(e.to_string()))?;
        Ok(Self {
            stream: RegistrationStream::new(stream),
        })
    }

    /// Report a registration message to the master, best effort
    pub async fn report(&mut self, message: RegistrationMessage) -> Result<(), IpcError> {
        self.stream.send(&MessageEnvelope::new(message)).await
    }
}
