use std::io::{Read, Write};

use super::error::WsError;
use super::message::WsMessage;
use super::reader::{FrameReader, ReadProgress};
use crate::network::http::session::WsSession;

/// Tag handed to the dispatcher alongside every decoded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    WebSocket,
}

/// Destination for decoded messages. The codec depends on this capability
/// but never owns it; failures are propagated untouched.
pub trait MessageDispatcher {
    fn on_message<S: Read + Write>(
        &mut self,
        kind: MessageKind,
        session: &mut WsSession<'_, '_, S>,
        message: WsMessage,
    ) -> std::io::Result<()>;
}

/// Per-connection codec: one frame reader driven against the connection's
/// receive buffer.
pub struct WsCodec {
    reader: FrameReader,
}

impl WsCodec {
    pub fn new(max_frame_size: u64) -> Self {
        Self {
            reader: FrameReader::with_limit(max_frame_size),
        }
    }

    /// Drives the frame reader until it needs more bytes or the receive
    /// buffer is exhausted, dispatching one message per completed frame.
    ///
    /// Returns the byte count the caller must supply before the next call
    /// can make progress, or 0 when every buffered frame was delivered.
    /// Draining happens in a single invocation: several frames arriving in
    /// one I/O readiness event never trigger redundant read requests.
    ///
    /// A Close frame marks the session closing after dispatch and stops the
    /// drain; remaining buffered bytes are discarded with the connection.
    pub fn read_loop<S, D>(
        &mut self,
        session: &mut WsSession<'_, '_, S>,
        dispatcher: &mut D,
    ) -> Result<u64, WsError>
    where
        S: Read + Write,
        D: MessageDispatcher,
    {
        loop {
            match self.reader.read_frame(session.recv_buf())? {
                ReadProgress::NeedBytes(want) => return Ok(want),
                ReadProgress::FrameReady => {
                    let opcode = self.reader.opcode();
                    let len = self.reader.payload_len() as usize;
                    let payload = session.recv_buf().split_to(len).freeze();
                    self.reader.reset();

                    let message = WsMessage::new(opcode, payload);
                    let peer_closed = message.is_close();
                    dispatcher
                        .on_message(MessageKind::WebSocket, session, message)
                        .map_err(WsError::Io)?;

                    if peer_closed {
                        session.set_closing();
                    }
                    if session.is_closing() || session.recv_buf().is_empty() {
                        return Ok(0);
                    }
                }
            }
        }
    }
}
