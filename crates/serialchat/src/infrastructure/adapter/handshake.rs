//! Service handshake exchanged when a TCP link opens.
//!
//! Both sides send one hello frame right after the TCP connect:
//!
//! ```text
//! [service_uuid: 16 bytes][name_len: u16 BE][name UTF-8][addr_len: u16 BE][addr UTF-8]
//! ```
//!
//! The dialer writes first and the listener answers only if the service UUID
//! matches its own.  `addr` is the sender's advertised listen address, which
//! is how the other side names it in link-state events.

use std::io::{self, Read, Write};

use thiserror::Error;
use uuid::Uuid;

/// Error type for the service handshake.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("handshake I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("{field} is {len} bytes; the limit is {max}", max = u16::MAX)]
    FieldTooLong { field: &'static str, len: usize },

    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("service mismatch: expected {expected}, peer offered {offered}")]
    ServiceMismatch { expected: Uuid, offered: Uuid },
}

impl HandshakeError {
    /// Whether the peer simply hung up before finishing the hello.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, HandshakeError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

/// One side's hello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub service_uuid: Uuid,
    pub name: String,
    pub address: String,
}

impl Hello {
    /// Encodes the hello frame.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::FieldTooLong`] if a field exceeds `u16::MAX` bytes.
    pub fn encode(&self) -> Result<Vec<u8>, HandshakeError> {
        let mut buf = Vec::with_capacity(16 + 4 + self.name.len() + self.address.len());
        buf.extend_from_slice(self.service_uuid.as_bytes());
        put_field(&mut buf, "name", &self.name)?;
        put_field(&mut buf, "address", &self.address)?;
        Ok(buf)
    }

    /// Writes the encoded frame to `writer`.
    pub fn write_to(&self, writer: &mut impl Write) -> Result<(), HandshakeError> {
        writer.write_all(&self.encode()?)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads one hello frame from `reader`.
    pub fn read_from(reader: &mut impl Read) -> Result<Hello, HandshakeError> {
        let mut uuid = [0u8; 16];
        reader.read_exact(&mut uuid)?;
        let name = get_field(reader, "name")?;
        let address = get_field(reader, "address")?;
        Ok(Hello {
            service_uuid: Uuid::from_bytes(uuid),
            name,
            address,
        })
    }

    /// Fails unless the hello names `expected`.
    pub fn check_service(&self, expected: Uuid) -> Result<(), HandshakeError> {
        if self.service_uuid == expected {
            Ok(())
        } else {
            Err(HandshakeError::ServiceMismatch {
                expected,
                offered: self.service_uuid,
            })
        }
    }
}

fn put_field(buf: &mut Vec<u8>, field: &'static str, value: &str) -> Result<(), HandshakeError> {
    let len = u16::try_from(value.len()).map_err(|_| HandshakeError::FieldTooLong {
        field,
        len: value.len(),
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

fn get_field(reader: &mut impl Read, field: &'static str) -> Result<String, HandshakeError> {
    let mut len = [0u8; 2];
    reader.read_exact(&mut len)?;
    let mut bytes = vec![0u8; usize::from(u16::from_be_bytes(len))];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| HandshakeError::InvalidUtf8(field))
}
