use bytes::{Buf, BytesMut};

use super::error::ProtocolError;
use super::frame::{
    BASE_HEADER_SIZE, EXT_LEN_16, EXT_LEN_64, FIN_BIT, MASK_BIT, MASK_KEY_SIZE, OPCODE_MASK,
    OpCode, PAYLOAD_LEN_MASK,
};

/// Parse stage of one inbound frame.
///
/// The header length is self-describing, so the stages must be walked in
/// order: the fixed 2-byte prefix first, then the extended length and mask
/// key whose width the prefix determined, then the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    FinAndLen,
    ExtendedLenAndMask,
    Payload,
    Done,
}

/// Outcome of a single [`FrameReader::read_frame`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadProgress {
    /// The buffer is short exactly this many bytes; accumulate more input
    /// and re-invoke. Never an error.
    NeedBytes(u64),
    /// A whole frame is buffered and its payload has been unmasked in
    /// place. Extract the payload and [`FrameReader::reset`] before the
    /// next invocation.
    FrameReady,
}

/// Incremental frame parser, one long-lived instance per connection.
///
/// Input may arrive in any chunking, from a single byte up to several
/// frames per read. Every call either makes progress or reports the exact
/// byte shortfall; already-consumed header bytes are never re-parsed on
/// re-entry. Header fields are undefined until the stage that resolves
/// them has run.
#[derive(Debug)]
pub struct FrameReader {
    stage: Stage,
    fin: bool,
    masked: bool,
    raw_len: u8,
    opcode: OpCode,
    payload_len: u64,
    mask: [u8; MASK_KEY_SIZE],
    max_payload_len: u64,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::with_limit(u64::MAX)
    }

    /// A reader that rejects any frame whose resolved payload length
    /// exceeds `max_payload_len`.
    pub fn with_limit(max_payload_len: u64) -> Self {
        Self {
            stage: Stage::FinAndLen,
            fin: true,
            masked: true,
            raw_len: 0,
            opcode: OpCode::Close,
            payload_len: 0,
            mask: [0; MASK_KEY_SIZE],
            max_payload_len,
        }
    }

    /// Returns the instance to its initial stage so it can parse the next
    /// frame without reallocation.
    pub fn reset(&mut self) {
        self.stage = Stage::FinAndLen;
        self.fin = true;
        self.masked = true;
        self.raw_len = 0;
        self.opcode = OpCode::Close;
        self.payload_len = 0;
        self.mask = [0; MASK_KEY_SIZE];
    }

    #[inline]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    #[inline]
    pub fn fin(&self) -> bool {
        self.fin
    }

    /// Resolved payload length; meaningful only after the extended-length
    /// stage has completed.
    #[inline]
    pub fn payload_len(&self) -> u64 {
        self.payload_len
    }

    /// Drives the parse as far as the buffered bytes allow.
    ///
    /// On `FrameReady` the header bytes have been retired from `buf` and
    /// the first `payload_len` bytes of it are the unmasked payload.
    pub fn read_frame(&mut self, buf: &mut BytesMut) -> Result<ReadProgress, ProtocolError> {
        loop {
            match self.stage {
                Stage::FinAndLen => {
                    if buf.len() < BASE_HEADER_SIZE {
                        return Ok(ReadProgress::NeedBytes(
                            (BASE_HEADER_SIZE - buf.len()) as u64,
                        ));
                    }
                    self.parse_fin_and_len(buf)?;
                    self.stage = Stage::ExtendedLenAndMask;
                }
                Stage::ExtendedLenAndMask => {
                    let header_len = BASE_HEADER_SIZE + self.ext_len_size() + MASK_KEY_SIZE;
                    if buf.len() < header_len {
                        return Ok(ReadProgress::NeedBytes((header_len - buf.len()) as u64));
                    }
                    self.parse_len_and_mask(buf);
                    if self.payload_len > self.max_payload_len {
                        return Err(ProtocolError::FrameTooLarge {
                            len: self.payload_len,
                            max: self.max_payload_len,
                        });
                    }
                    // Retire the whole header; only payload bytes remain.
                    buf.advance(header_len);
                    self.stage = Stage::Payload;
                }
                Stage::Payload => {
                    let available = buf.len() as u64;
                    if available < self.payload_len {
                        return Ok(ReadProgress::NeedBytes(self.payload_len - available));
                    }
                    self.stage = Stage::Done;
                }
                Stage::Done => {
                    let len = self.payload_len as usize;
                    for (i, byte) in buf[..len].iter_mut().enumerate() {
                        *byte ^= self.mask[i & 3];
                    }
                    return Ok(ReadProgress::FrameReady);
                }
            }
        }
    }

    /// Peeks the fixed 2-byte prefix without consuming it. Validates the
    /// opcode against the legal set and requires the mask bit on every
    /// inbound frame.
    fn parse_fin_and_len(&mut self, buf: &BytesMut) -> Result<(), ProtocolError> {
        let first = buf[0];
        let second = buf[1];

        self.fin = first & FIN_BIT == FIN_BIT;
        self.masked = second & MASK_BIT == MASK_BIT;
        self.raw_len = second & PAYLOAD_LEN_MASK;

        let raw_opcode = first & OPCODE_MASK;
        self.opcode = OpCode::from_u8(raw_opcode).ok_or(ProtocolError::BadOpcode(raw_opcode))?;

        if !self.masked {
            return Err(ProtocolError::UnmaskedFrame);
        }
        Ok(())
    }

    /// Width of the extended length field announced by the 7-bit prefix.
    #[inline]
    fn ext_len_size(&self) -> usize {
        match self.raw_len {
            EXT_LEN_16 => 2,
            EXT_LEN_64 => 8,
            _ => 0,
        }
    }

    /// Resolves the payload length and captures the mask key, both at
    /// offsets now known from the prefix. The caller has checked that the
    /// whole header is buffered.
    fn parse_len_and_mask(&mut self, buf: &BytesMut) {
        let mask_offset = match self.raw_len {
            EXT_LEN_16 => {
                self.payload_len = u16::from_be_bytes([buf[2], buf[3]]) as u64;
                BASE_HEADER_SIZE + 2
            }
            EXT_LEN_64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                self.payload_len = u64::from_be_bytes(raw);
                BASE_HEADER_SIZE + 8
            }
            _ => {
                self.payload_len = self.raw_len as u64;
                BASE_HEADER_SIZE
            }
        };
        self.mask
            .copy_from_slice(&buf[mask_offset..mask_offset + MASK_KEY_SIZE]);
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    /// Builds a masked client frame the way a browser would put it on the
    /// wire.
    fn client_frame(opcode: u8, payload: &[u8], mask: [u8; 4]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(0x80 | opcode);
        let len = payload.len();
        if len <= 125 {
            buf.put_u8(0x80 | len as u8);
        } else if len <= 65535 {
            buf.put_u8(0x80 | 126);
            buf.put_u16(len as u16);
        } else {
            buf.put_u8(0x80 | 127);
            buf.put_u64(len as u64);
        }
        buf.extend_from_slice(&mask);
        for (i, byte) in payload.iter().enumerate() {
            buf.put_u8(byte ^ mask[i & 3]);
        }
        buf
    }

    fn decode_all(buf: &mut BytesMut) -> (OpCode, Vec<u8>) {
        let mut reader = FrameReader::new();
        match reader.read_frame(buf).expect("parse") {
            ReadProgress::FrameReady => {
                let len = reader.payload_len() as usize;
                (reader.opcode(), buf.split_to(len).to_vec())
            }
            ReadProgress::NeedBytes(n) => panic!("incomplete frame, want {n}"),
        }
    }

    #[test]
    fn test_round_trip_lengths() {
        for len in [0usize, 1, 125, 126, 65535, 65536, 1 << 20] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let mask: [u8; 4] = rand::random();
            let mut wire = client_frame(0x1, &payload, mask);

            let mut reader = FrameReader::new();
            assert_eq!(
                reader.read_frame(&mut wire).expect("parse"),
                ReadProgress::FrameReady,
                "length {len}"
            );
            assert_eq!(reader.payload_len(), len as u64);
            assert_eq!(reader.opcode(), OpCode::Text);
            assert!(reader.fin());
            assert_eq!(&wire[..len], &payload[..]);
        }
    }

    #[test]
    fn test_encoded_header_round_trips_through_reader() {
        use crate::network::http::ws::frame::write_header;

        // The outbound encoder and the inbound reader must agree on every
        // length band; the client-side mask is grafted on since inbound
        // frames are required to carry one.
        for len in [0usize, 1, 125, 126, 65535, 65536, 1 << 20] {
            let payload = vec![0xAB; len];
            let mask = [0x0F, 0xF0, 0x55, 0xAA];
            let mut wire = BytesMut::new();
            write_header(&mut wire, len as u64);
            wire[1] |= 0x80;
            wire.extend_from_slice(&mask);
            for (i, byte) in payload.iter().enumerate() {
                wire.put_u8(byte ^ mask[i & 3]);
            }

            let mut reader = FrameReader::new();
            assert_eq!(
                reader.read_frame(&mut wire).expect("parse"),
                ReadProgress::FrameReady,
                "length {len}"
            );
            assert_eq!(reader.payload_len(), len as u64);
            assert_eq!(reader.opcode(), OpCode::Text);
            assert_eq!(&wire[..len], &payload[..]);
        }
    }

    #[test]
    fn test_one_byte_chunk_delivery_matches_whole_frame() {
        let payload = b"the sample payload";
        let mask = [0x37, 0xFA, 0x21, 0x3D];
        let wire = client_frame(0x1, payload, mask);

        let mut whole = wire.clone();
        let expected = decode_all(&mut whole);

        // Feed one byte at a time, re-invoking exactly when the reader
        // reports a shortfall.
        let mut reader = FrameReader::new();
        let mut buf = BytesMut::new();
        let mut src = wire.iter().copied();
        let trickled = loop {
            match reader.read_frame(&mut buf).expect("parse") {
                ReadProgress::NeedBytes(n) => {
                    assert!(n > 0);
                    buf.put_u8(src.next().expect("reader over-asked"));
                }
                ReadProgress::FrameReady => {
                    let len = reader.payload_len() as usize;
                    break (reader.opcode(), buf.split_to(len).to_vec());
                }
            }
        };
        assert_eq!(trickled, expected);
    }

    #[test]
    fn test_exact_shortfall_reports() {
        let payload = b"hello";
        let mask = [1, 2, 3, 4];
        let wire = client_frame(0x1, payload, mask);

        let mut reader = FrameReader::new();
        let mut buf = BytesMut::new();

        // Empty buffer: the full 2-byte prefix is missing.
        assert_eq!(
            reader.read_frame(&mut buf).expect("parse"),
            ReadProgress::NeedBytes(2)
        );

        // One byte buffered: one prefix byte missing.
        buf.extend_from_slice(&wire[..1]);
        assert_eq!(
            reader.read_frame(&mut buf).expect("parse"),
            ReadProgress::NeedBytes(1)
        );

        // Prefix buffered: the 4-byte mask key is still missing.
        buf.extend_from_slice(&wire[1..2]);
        assert_eq!(
            reader.read_frame(&mut buf).expect("parse"),
            ReadProgress::NeedBytes(4)
        );

        // Whole header buffered: the payload is still missing.
        buf.extend_from_slice(&wire[2..6]);
        assert_eq!(
            reader.read_frame(&mut buf).expect("parse"),
            ReadProgress::NeedBytes(payload.len() as u64)
        );

        buf.extend_from_slice(&wire[6..]);
        assert_eq!(
            reader.read_frame(&mut buf).expect("parse"),
            ReadProgress::FrameReady
        );
        assert_eq!(&buf[..payload.len()], payload);
    }

    #[test]
    fn test_header_retired_exactly_once() {
        let payload = b"abc";
        let mask = [9, 8, 7, 6];
        let mut wire = client_frame(0x2, payload, mask);

        let mut reader = FrameReader::new();
        assert_eq!(
            reader.read_frame(&mut wire).expect("parse"),
            ReadProgress::FrameReady
        );
        // Only payload bytes remain after the header was consumed.
        assert_eq!(wire.len(), payload.len());
        assert_eq!(reader.opcode(), OpCode::Binary);
    }

    #[test]
    fn test_masking_is_involutive() {
        let payload = b"mask me";
        let mask = [0xA5, 0x5A, 0xFF, 0x00];
        let wire = client_frame(0x1, payload, mask);

        // The wire bytes are the payload XORed cyclically with the key.
        let body = &wire[6..];
        for (i, byte) in body.iter().enumerate() {
            assert_eq!(*byte, payload[i] ^ mask[i & 3]);
        }

        // Applying the XOR again returns the original payload.
        let mut buf = wire.clone();
        let (_, decoded) = decode_all(&mut buf);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_reset_makes_reader_reusable() {
        let first = client_frame(0x1, b"first", [1, 1, 1, 1]);
        let second = client_frame(0x2, b"second", [2, 2, 2, 2]);

        let mut fresh_buf = second.clone();
        let expected = decode_all(&mut fresh_buf);

        let mut reader = FrameReader::new();
        let mut buf = first.clone();
        assert_eq!(
            reader.read_frame(&mut buf).expect("parse"),
            ReadProgress::FrameReady
        );
        let len = reader.payload_len() as usize;
        buf.advance(len);
        reader.reset();

        buf.extend_from_slice(&second);
        assert_eq!(
            reader.read_frame(&mut buf).expect("parse"),
            ReadProgress::FrameReady
        );
        let len = reader.payload_len() as usize;
        let got = (reader.opcode(), buf.split_to(len).to_vec());
        assert_eq!(got, expected);
    }

    #[test]
    fn test_illegal_opcode_is_fatal() {
        let mut wire = client_frame(0x3, b"nope", [1, 2, 3, 4]);
        let mut reader = FrameReader::new();
        assert_eq!(
            reader.read_frame(&mut wire),
            Err(ProtocolError::BadOpcode(0x3))
        );
    }

    #[test]
    fn test_unmasked_inbound_frame_is_fatal() {
        let mut wire = BytesMut::new();
        wire.put_u8(0x81);
        wire.put_u8(0x05); // mask bit clear
        wire.extend_from_slice(b"hello");

        let mut reader = FrameReader::new();
        assert_eq!(
            reader.read_frame(&mut wire),
            Err(ProtocolError::UnmaskedFrame)
        );
    }

    #[test]
    fn test_payload_limit_enforced() {
        let mut wire = client_frame(0x1, &[0u8; 32], [4, 3, 2, 1]);
        let mut reader = FrameReader::with_limit(16);
        assert_eq!(
            reader.read_frame(&mut wire),
            Err(ProtocolError::FrameTooLarge { len: 32, max: 16 })
        );
    }

    #[test]
    fn test_empty_payload_completes() {
        let mut wire = client_frame(0x9, b"", [1, 2, 3, 4]);
        let mut reader = FrameReader::new();
        assert_eq!(
            reader.read_frame(&mut wire).expect("parse"),
            ReadProgress::FrameReady
        );
        assert_eq!(reader.payload_len(), 0);
        assert_eq!(reader.opcode(), OpCode::Ping);
        assert!(wire.is_empty());
    }
}
