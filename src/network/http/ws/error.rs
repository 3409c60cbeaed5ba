use std::io;

/// Fatal framing violations. None of these are retriable: the owning
/// connection is expected to tear the socket down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("illegal opcode {0:#04x}")]
    BadOpcode(u8),

    #[error("inbound frame is not masked")]
    UnmaskedFrame,

    #[error("frame payload of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: u64, max: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<WsError> for io::Error {
    fn from(err: WsError) -> Self {
        match err {
            WsError::Protocol(e) => io::Error::new(io::ErrorKind::InvalidData, e),
            WsError::Io(e) => e,
        }
    }
}
