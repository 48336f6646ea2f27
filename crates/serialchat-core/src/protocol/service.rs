//! Constants both peers must agree on to find each other's chat service.

use uuid::Uuid;

/// Service identifier used on both the listen and the dial side.
///
/// A listener registered under any other UUID is invisible to a dialling
/// peer, so this value must never differ between builds that talk to each
/// other.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x27b7d1da_08c7_4505_a6d1_2459987e5e2d);

/// Service record name published by the listening side.
pub const SERVICE_NAME: &str = "chat_service";

/// Capacity of the buffer used for a single socket read.
///
/// One read is one frame, so a frame longer than this is truncated and the
/// rest arrives as the next "message".
pub const READ_BUFFER_SIZE: usize = 1024;

/// Sender name used when the local adapter cannot report its own name.
pub const UNKNOWN_NAME: &str = "Unknown name";
