use bytes::BytesMut;
use std::io::{self, Read, Write};
use std::net::IpAddr;

use super::server::drain;
use super::ws::frame::{FIN_BIT, OpCode};
use super::ws::message::WsResponse;

// RFC 6455 §5.5: control frame payloads cap at 125 bytes, a 2-byte status
// code plus at most 123 bytes of reason.
const MAX_CLOSE_REASON: usize = 123;
const CLOSE_NORMAL: u16 = 1000;

/// Per-connection view handed to the dispatcher: the stream plus the
/// receive and send buffers, all borrowed from the owning connection task.
/// Exactly one session exists per connection at a time.
pub struct WsSession<'buf, 'stream, S>
where
    S: Read + Write,
{
    peer_addr: &'stream IpAddr,
    stream: &'stream mut S,
    // receive buffer the frame reader consumes from
    req_buf: &'buf mut BytesMut,
    // send buffer for encoded frames
    rsp_buf: &'buf mut BytesMut,
    closing: bool,
    close_sent: bool,
}

impl<'buf, 'stream, S> WsSession<'buf, 'stream, S>
where
    S: Read + Write,
{
    pub fn new(
        stream: &'stream mut S,
        peer_addr: &'stream IpAddr,
        req_buf: &'buf mut BytesMut,
        rsp_buf: &'buf mut BytesMut,
    ) -> Self {
        Self {
            peer_addr,
            stream,
            req_buf,
            rsp_buf,
            closing: false,
            close_sent: false,
        }
    }

    #[inline]
    pub fn peer_addr(&self) -> &IpAddr {
        self.peer_addr
    }

    #[inline]
    pub fn recv_buf(&mut self) -> &mut BytesMut {
        self.req_buf
    }

    /// True once either side initiated teardown; the owning connection
    /// drains outbound bytes and drops the socket.
    #[inline]
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    #[inline]
    pub(crate) fn set_closing(&mut self) {
        self.closing = true;
    }

    /// Frames `text` as a single unmasked text frame and drains it to the
    /// peer.
    pub fn send_text(&mut self, text: &str) -> io::Result<()> {
        let rsp = WsResponse::new(text.len() as u64);
        rsp.serialize(self.rsp_buf);
        self.rsp_buf.extend_from_slice(text.as_bytes());
        drain(self.stream, self.rsp_buf)
    }

    /// Queues a Close frame (status 1000, optional UTF-8 reason) and marks
    /// the session closing. Idempotent: a second call is a no-op.
    pub fn close(&mut self, reason: Option<&[u8]>) -> io::Result<()> {
        if self.close_sent {
            return Ok(());
        }

        let rlen = reason.map(|r| r.len()).unwrap_or(0);
        if rlen > MAX_CLOSE_REASON {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "close reason too long",
            ));
        }

        let mut payload = [0u8; 2 + MAX_CLOSE_REASON];
        payload[..2].copy_from_slice(&CLOSE_NORMAL.to_be_bytes());
        if let Some(r) = reason {
            if std::str::from_utf8(r).is_err() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "close reason not utf8",
                ));
            }
            payload[2..2 + rlen].copy_from_slice(r);
        }
        let total = 2 + rlen;

        // Control frame lengths always fit the 7-bit literal field.
        self.rsp_buf
            .extend_from_slice(&[FIN_BIT | OpCode::Close as u8, total as u8]);
        self.rsp_buf.extend_from_slice(&payload[..total]);

        self.close_sent = true;
        self.closing = true;
        drain(self.stream, self.rsp_buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    /// Captures everything written so the wire bytes can be asserted.
    struct SinkStream {
        written: Vec<u8>,
    }

    impl Read for SinkStream {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl Write for SinkStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    const PEER: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn test_send_text_frames_and_drains() {
        let mut stream = SinkStream { written: vec![] };
        let mut req_buf = BytesMut::new();
        let mut rsp_buf = BytesMut::new();
        let mut session = WsSession::new(&mut stream, &PEER, &mut req_buf, &mut rsp_buf);

        session.send_text("hi").expect("send");
        assert_eq!(stream.written, vec![0x81, 2, b'h', b'i']);
    }

    #[test]
    fn test_close_emits_status_1000() {
        let mut stream = SinkStream { written: vec![] };
        let mut req_buf = BytesMut::new();
        let mut rsp_buf = BytesMut::new();
        let mut session = WsSession::new(&mut stream, &PEER, &mut req_buf, &mut rsp_buf);

        session.close(Some(b"bye")).expect("close");
        assert!(session.is_closing());
        assert_eq!(stream.written, vec![0x88, 5, 0x03, 0xE8, b'b', b'y', b'e']);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut stream = SinkStream { written: vec![] };
        let mut req_buf = BytesMut::new();
        let mut rsp_buf = BytesMut::new();
        let mut session = WsSession::new(&mut stream, &PEER, &mut req_buf, &mut rsp_buf);

        session.close(None).expect("close");
        let first = session.stream.written.len();
        session.close(None).expect("second close");
        assert_eq!(stream.written.len(), first);
    }

    #[test]
    fn test_close_reason_limits() {
        let mut stream = SinkStream { written: vec![] };
        let mut req_buf = BytesMut::new();
        let mut rsp_buf = BytesMut::new();
        let mut session = WsSession::new(&mut stream, &PEER, &mut req_buf, &mut rsp_buf);

        let long = [b'x'; 124];
        let err = session.close(Some(&long)).expect_err("too long");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let err = session.close(Some(&[0xFF, 0xFE])).expect_err("not utf8");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
