use thiserror::Error;

/// Reasons a raw CAN frame could not be mapped to a protocol message.
///
/// Decode failures are recoverable: the offending frame is dropped and
/// monitoring continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The identifier matches no known BMS12 message pattern.
    #[error("identifier {0} matches no known BMS12 message")]
    UnknownIdentifier(u32),
    /// The payload length or a field value is outside the expected range.
    #[error("malformed payload: {0}")]
    MalformedPayload(&'static str),
}

#[derive(Debug, Error)]
pub enum Error {
    /// A unit address outside 0..=15 was passed by the caller.
    #[error("unit address {0} outside the valid range 0..=15")]
    UnitNotFound(u8),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
