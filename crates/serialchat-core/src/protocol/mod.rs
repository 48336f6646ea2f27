//! Protocol module containing the frame codec and the service constants.

pub mod codec;
pub mod service;

pub use codec::{decode_message, encode_message, DELIMITER};
pub use service::{READ_BUFFER_SIZE, SERVICE_NAME, SERVICE_UUID, UNKNOWN_NAME};
