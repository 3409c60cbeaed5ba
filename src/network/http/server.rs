use bytes::{Buf, BufMut, BytesMut};
use may::net::{TcpListener, TcpStream};
use may::{coroutine, go};
use std::io::{self, Read, Write};
use std::net::IpAddr;
use tracing::{debug, info};

use super::config::ServerConfig;
use super::handshake;
use super::session::WsSession;
use super::ws::codec::{MessageDispatcher, WsCodec};

#[cfg(unix)]
use may::io::WaitIo;

const MIN_BUF_LEN: usize = 1024;
pub(crate) const BUF_LEN: usize = 8 * 4096;

macro_rules! mc {
    ($e: expr) => {
        match $e {
            Ok(val) => val,
            Err(_err) => {
                continue;
            }
        }
    };
}

/// Builds one dispatcher per accepted connection and owns the listener
/// loop.
pub trait WsServiceFactory: Send + Sized + 'static {
    type Service: MessageDispatcher + Send;

    /// Create a new message dispatcher for each connection.
    fn service(&self, id: usize) -> Self::Service;

    /// Start the websocket service.
    fn start(self, config: ServerConfig) -> io::Result<coroutine::JoinHandle<()>> {
        may::config()
            .set_workers(config.workers)
            .set_stack_size(config.stack_size);
        let listener = TcpListener::bind((config.listen_addr.as_str(), config.listen_port))?;
        info!(
            "listening on {}:{}",
            config.listen_addr, config.listen_port
        );
        go!(
            coroutine::Builder::new().name("WsServiceFactory".to_owned()),
            move || {
                #[cfg(unix)]
                use std::os::fd::AsRawFd;
                #[cfg(windows)]
                use std::os::windows::io::AsRawSocket;

                for stream in listener.incoming() {
                    let mut stream = mc!(stream);
                    let peer_addr = mc!(stream.peer_addr()).ip();

                    #[cfg(unix)]
                    let id = stream.as_raw_fd() as usize;
                    #[cfg(windows)]
                    let id = stream.as_raw_socket() as usize;

                    mc!(stream.set_nodelay(true));
                    let service = self.service(id);
                    let max_frame_size = config.max_frame_size;
                    let builder = may::coroutine::Builder::new().id(id);
                    go!(
                        builder,
                        move || if let Err(e) =
                            serve(&mut stream, &peer_addr, service, max_frame_size)
                        {
                            debug!("websocket connection to {peer_addr} ended: {e}");
                            stream.shutdown(std::net::Shutdown::Both).ok();
                        }
                    )
                    .unwrap();
                }
            }
        )
    }
}

#[inline]
pub(crate) fn reserve_buf(buf: &mut BytesMut) {
    let rem = buf.capacity() - buf.len();
    if rem < MIN_BUF_LEN {
        buf.reserve(BUF_LEN - rem);
    }
}

/// Nonblocking read into the receive buffer. Returns true when the socket
/// is drained and the caller should wait for the next readiness event.
#[inline]
pub(crate) fn read(stream: &mut impl Read, buf: &mut BytesMut) -> io::Result<bool> {
    reserve_buf(buf);
    let chunk = buf.chunk_mut();
    let len = chunk.len();

    // SAFETY: We ensure exclusive access and will commit the right amount
    let read_buf: &mut [u8] = unsafe { std::slice::from_raw_parts_mut(chunk.as_mut_ptr(), len) };

    let mut io_slice = [io::IoSliceMut::new(read_buf)];
    let n = match stream.read_vectored(&mut io_slice) {
        Ok(0) => return Err(io::Error::new(io::ErrorKind::BrokenPipe, "read closed")),
        Ok(n) => n,
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
        Err(e) => return Err(e),
    };

    unsafe {
        buf.advance_mut(n);
    }
    Ok(n < len)
}

/// Nonblocking write of the send buffer. Returns the byte count written and
/// whether the socket backpressured.
#[inline]
pub(crate) fn write(stream: &mut impl Write, rsp_buf: &mut BytesMut) -> io::Result<(usize, bool)> {
    use std::io::IoSlice;

    let write_buf = rsp_buf.chunk();
    let len = write_buf.len();
    let mut write_cnt = 0;
    let mut blocked = false;

    while write_cnt < len {
        let slice = IoSlice::new(&write_buf[write_cnt..]);
        match stream.write_vectored(std::slice::from_ref(&slice)) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write closed")),
            Ok(n) => write_cnt += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                blocked = true;
                break;
            }
            Err(e) => return Err(e),
        }
    }
    rsp_buf.advance(write_cnt);
    Ok((write_cnt, blocked))
}

/// Flushes the whole send buffer, yielding to the scheduler whenever the
/// socket backpressures.
pub(crate) fn drain(stream: &mut impl Write, rsp_buf: &mut BytesMut) -> io::Result<()> {
    while !rsp_buf.is_empty() {
        let (_, blocked) = write(stream, rsp_buf)?;
        if blocked && !rsp_buf.is_empty() {
            may::coroutine::yield_now();
        }
    }
    Ok(())
}

#[cfg(unix)]
#[inline]
fn wait_more(stream: &mut TcpStream) {
    stream.wait_io();
}

#[cfg(not(unix))]
#[inline]
fn wait_more(_stream: &mut TcpStream) {
    may::coroutine::yield_now();
}

/// Per-connection loop: upgrade handshake first, then frames until either
/// side closes or a protocol violation tears the connection down.
pub(crate) fn serve<T: MessageDispatcher>(
    stream: &mut TcpStream,
    peer_addr: &IpAddr,
    mut service: T,
    max_frame_size: u64,
) -> io::Result<()> {
    let mut req_buf = BytesMut::with_capacity(BUF_LEN);
    let mut rsp_buf = BytesMut::with_capacity(BUF_LEN);

    // No frames flow until the 101 is on the wire.
    loop {
        let blocked = read(stream, &mut req_buf)?;
        match handshake::upgrade(&mut req_buf, &mut rsp_buf) {
            Ok(Some(_)) => break,
            Ok(None) => {
                if blocked {
                    wait_more(stream);
                }
            }
            Err(e) => {
                let _ = drain(stream, &mut rsp_buf);
                return Err(e);
            }
        }
    }
    drain(stream, &mut rsp_buf)?;
    debug!("websocket established with {peer_addr}");

    let mut codec = WsCodec::new(max_frame_size);
    loop {
        {
            let mut session = WsSession::new(stream, peer_addr, &mut req_buf, &mut rsp_buf);
            codec
                .read_loop(&mut session, &mut service)
                .map_err(io::Error::from)?;
            if session.is_closing() {
                session.close(None)?;
                return Ok(());
            }
        }
        let blocked = read(stream, &mut req_buf)?;
        if blocked {
            wait_more(stream);
        }
    }
}
