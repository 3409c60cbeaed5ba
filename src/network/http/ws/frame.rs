use bytes::{BufMut, BytesMut};

/*

 0                   1                   2                   3
 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
+-+-+-+-+-------+-+-------------+-------------------------------+
|F|R|R|R| opcode|M| Payload len |    Extended payload length    |
|I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
|N|V|V|V|       |S|             |   (if payload len==126/127)   |
| |1|2|3|       |K|             |                               |
+-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
|     Extended payload length continued, if payload len == 127  |
+ - - - - - - - - - - - - - - - +-------------------------------+
|                               |Masking-key, if MASK set to 1  |
+-------------------------------+-------------------------------+
| Masking-key (continued)       |          Payload Data         |
+-------------------------------- - - - - - - - - - - - - - - - +
:                     Payload Data continued ...                :
+ - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - +
|                     Payload Data continued ...                |
+---------------------------------------------------------------+

*/

pub(crate) const FIN_BIT: u8 = 0x80;
pub(crate) const MASK_BIT: u8 = 0x80;
pub(crate) const OPCODE_MASK: u8 = 0x0F;
pub(crate) const PAYLOAD_LEN_MASK: u8 = 0x7F;

/// Largest payload length expressible in the 7-bit literal field.
pub(crate) const MAX_LITERAL_LEN: u64 = 125;
pub(crate) const EXT_LEN_16: u8 = 126;
pub(crate) const EXT_LEN_64: u8 = 127;

/// Fixed 2-byte header prefix.
pub(crate) const BASE_HEADER_SIZE: usize = 2;
pub(crate) const MASK_KEY_SIZE: usize = 4;
/// Worst case header: prefix + 64-bit extended length.
pub(crate) const MAX_HEADER_SIZE: usize = BASE_HEADER_SIZE + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    /// Maps a raw 4-bit opcode to the legal set; any other value is a
    /// protocol violation.
    #[inline]
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    #[inline]
    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// Appends a frame header for an outgoing payload of `payload_len` bytes.
///
/// Server frames are single, unfragmented text frames and are never masked,
/// so the header is fully determined by the payload length: FIN + Text,
/// then the 7-bit literal length or a big-endian 16/64-bit extended field.
/// The payload itself is appended to the transport buffer by the caller.
pub fn write_header(buf: &mut BytesMut, payload_len: u64) {
    buf.reserve(MAX_HEADER_SIZE);

    buf.put_u8(FIN_BIT | OpCode::Text as u8);

    if payload_len <= MAX_LITERAL_LEN {
        buf.put_u8(payload_len as u8);
    } else if payload_len <= u16::MAX as u64 {
        buf.put_u8(EXT_LEN_16);
        buf.put_u16(payload_len as u16);
    } else {
        buf.put_u8(EXT_LEN_64);
        buf.put_u64(payload_len);
    }
}
