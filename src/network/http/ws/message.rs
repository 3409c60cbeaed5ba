use bytes::{Bytes, BytesMut};

use super::frame::{OpCode, write_header};

/// One decoded inbound message: the frame's opcode and its payload, already
/// unmasked. Ownership transfers to the dispatcher.
#[derive(Debug, Clone)]
pub struct WsMessage {
    opcode: OpCode,
    payload: Bytes,
}

impl WsMessage {
    pub fn new(opcode: OpCode, payload: Bytes) -> Self {
        Self { opcode, payload }
    }

    #[inline]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    #[inline]
    pub fn is_text(&self) -> bool {
        self.opcode == OpCode::Text
    }

    #[inline]
    pub fn is_binary(&self) -> bool {
        self.opcode == OpCode::Binary
    }

    #[inline]
    pub fn is_ping(&self) -> bool {
        self.opcode == OpCode::Ping
    }

    #[inline]
    pub fn is_pong(&self) -> bool {
        self.opcode == OpCode::Pong
    }

    #[inline]
    pub fn is_close(&self) -> bool {
        self.opcode == OpCode::Close
    }

    /// The payload as text, when this is a valid UTF-8 text frame.
    pub fn as_text(&self) -> Option<&str> {
        if self.is_text() {
            std::str::from_utf8(&self.payload).ok()
        } else {
            None
        }
    }
}

/// An outbound message as the encoder sees it: only the payload length is
/// needed to frame it, the payload bytes go straight to the transport
/// buffer.
#[derive(Debug, Clone, Copy)]
pub struct WsResponse {
    content_length: u64,
}

impl WsResponse {
    pub fn new(content_length: u64) -> Self {
        Self { content_length }
    }

    #[inline]
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// Appends the frame header for this payload to the send buffer.
    pub fn serialize(&self, buf: &mut BytesMut) {
        write_header(buf, self.content_length);
    }
}
