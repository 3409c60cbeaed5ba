use arc_swap::ArcSwap;
use bytes::{Buf, BytesMut};
use std::io;
use std::sync::Arc;

pub(crate) const MAX_HEADERS: usize = 32;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// RFC 1123 date string for response headers, refreshed once per second by
/// a background coroutine so the hot path never formats a timestamp.
pub static CURRENT_DATE: once_cell::sync::Lazy<Arc<ArcSwap<Arc<str>>>> =
    once_cell::sync::Lazy::new(|| {
        let now = httpdate::HttpDate::from(std::time::SystemTime::now()).to_string();
        let swap = Arc::new(ArcSwap::from_pointee(Arc::from(now.into_boxed_str())));
        let swap_clone: Arc<ArcSwap<Arc<str>>> = Arc::clone(&swap);
        may::go!(move || loop {
            let now = std::time::SystemTime::now();
            let subsec = now
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_millis();
            let delay = 1_000u64.saturating_sub(subsec as u64);
            may::coroutine::sleep(std::time::Duration::from_millis(delay));
            let new_date = httpdate::HttpDate::from(std::time::SystemTime::now()).to_string();
            swap_clone.store(Arc::<str>::from(new_date.into_boxed_str()).into());
        });
        swap
    });

/// Sec-WebSocket-Accept derivation: SHA-1 over the client key and the RFC
/// 6455 GUID, base64-encoded.
#[inline]
pub fn compute_accept(sec_key: &[u8]) -> String {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as B64;
    use sha1::{Digest, Sha1};

    let mut sha = Sha1::new();
    sha.update(sec_key);
    sha.update(WS_GUID.as_bytes());
    B64.encode(sha.finalize())
}

#[inline]
fn bad_request(rsp_buf: &mut BytesMut) {
    rsp_buf.extend_from_slice(b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n");
}

/// Drives the HTTP Upgrade handshake against the buffered request bytes.
///
/// Returns `Ok(None)` while the request is still partial; the caller reads
/// more bytes and retries. On a valid upgrade the request bytes are
/// consumed and the `101 Switching Protocols` response is appended to
/// `rsp_buf`. A malformed or non-websocket request queues a `400` and
/// returns an error; the connection is expected to go down with it.
pub fn upgrade(req_buf: &mut BytesMut, rsp_buf: &mut BytesMut) -> io::Result<Option<usize>> {
    let (amt, accept, protocol) = {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        let status = req
            .parse(req_buf.as_ref())
            .map_err(|e| io::Error::other(format!("failed to parse upgrade request: {e:?}")))?;

        let amt = match status {
            httparse::Status::Complete(amt) => amt,
            httparse::Status::Partial => return Ok(None),
        };

        let header = |name: &str| {
            req.headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(name))
                .map(|h| h.value)
        };

        let is_ws = header("upgrade").is_some_and(|v| v.eq_ignore_ascii_case(b"websocket"));
        if !is_ws {
            bad_request(rsp_buf);
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "not a websocket upgrade request",
            ));
        }

        let key = match header("sec-websocket-key") {
            Some(key) => key,
            None => {
                bad_request(rsp_buf);
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "sec-websocket-key header not found",
                ));
            }
        };

        let protocol = header("sec-websocket-protocol")
            .and_then(|v| std::str::from_utf8(v).ok())
            .map(str::to_owned);

        (amt, compute_accept(key), protocol)
    };
    req_buf.advance(amt);

    rsp_buf.extend_from_slice(
        b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n",
    );
    rsp_buf.extend_from_slice(b"Server: Finbit ");
    rsp_buf.extend_from_slice(env!("FINBIT_BUILD_VERSION").as_bytes());
    rsp_buf.extend_from_slice(b"\r\nDate: ");
    rsp_buf.extend_from_slice(CURRENT_DATE.load().as_bytes());
    rsp_buf.extend_from_slice(b"\r\nSec-WebSocket-Accept: ");
    rsp_buf.extend_from_slice(accept.as_bytes());
    rsp_buf.extend_from_slice(b"\r\n");
    if let Some(protocol) = protocol {
        rsp_buf.extend_from_slice(b"Sec-WebSocket-Protocol: ");
        rsp_buf.extend_from_slice(protocol.as_bytes());
        rsp_buf.extend_from_slice(b"\r\n");
    }
    rsp_buf.extend_from_slice(b"\r\n");

    Ok(Some(amt))
}
