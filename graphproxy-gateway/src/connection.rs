//! Per-connection HTTP/1.1 handling (keepalive, Content-Length-bounded
//! bodies). Parsed requests are dispatched synchronously to the gate or
//! the realtime endpoint; a blocking upstream fetch inside a handler
//! suspends only the worker that owns this connection.

use crate::request::HttpRequest;
use crate::worker::{Endpoint, SharedState};
use graphproxy_core::reply::Reply;
use monoio::io::{AsyncReadRent, AsyncWriteRentExt};
use monoio::net::TcpStream;
use std::net::SocketAddr;
use std::sync::Arc;

const RESP_400: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";

/// Requests larger than this are rejected outright.
const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Handle a single client connection (HTTP/1.1 with keepalive).
///
/// Buffers are allocated once and reused across keepalive requests.
pub async fn handle_connection(
    mut client: TcpStream,
    peer_addr: SocketAddr,
    shared: Arc<SharedState>,
    endpoint: Endpoint,
) -> anyhow::Result<()> {
    let mut read_buf = vec![0u8; 8192];
    let mut acc: Vec<u8> = Vec::with_capacity(8192);
    let mut resp_buf = Vec::with_capacity(4096);

    loop {
        // ── Read until one complete request (headers + body) is buffered ──
        let (request, keep_alive) = loop {
            if !acc.is_empty() {
                match parse_request(&acc) {
                    Ok(Some(Parsed {
                        request,
                        keep_alive,
                        consumed,
                    })) => {
                        acc.drain(..consumed);
                        break (request, keep_alive);
                    }
                    Ok(None) => {
                        // incomplete: keep reading
                        if acc.len() > MAX_REQUEST_BYTES {
                            let (res, _) = client.write_all(RESP_400.to_vec()).await;
                            res?;
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        tracing::debug!(peer = %peer_addr, error = %e, "HTTP parse error");
                        let (res, _) = client.write_all(RESP_400.to_vec()).await;
                        res?;
                        return Ok(());
                    }
                }
            }

            let (res, returned_buf) = client.read(read_buf).await;
            read_buf = returned_buf;
            let n = match res {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) => return Err(e.into()),
            };
            acc.extend_from_slice(&read_buf[..n]);
        };

        // ── Dispatch (synchronous; may block on the upstream) ──
        let reply = match endpoint {
            Endpoint::Proxy => shared.gate.handle(&request),
            Endpoint::Realtime => shared.realtime.handle(&request),
        };

        build_response(&mut resp_buf, &reply);
        let data = resp_buf.clone();
        let (res, _) = client.write_all(data).await;
        res?;

        if !keep_alive {
            return Ok(());
        }
    }
}

struct Parsed {
    request: HttpRequest,
    keep_alive: bool,
    consumed: usize,
}

/// Try to parse one request out of the buffer. `Ok(None)` means more
/// bytes are needed.
fn parse_request(buf: &[u8]) -> anyhow::Result<Option<Parsed>> {
    let mut headers_raw = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut headers_raw);

    let header_len = match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let content_length = req
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("content-length"))
        .and_then(|h| std::str::from_utf8(h.value).ok())
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let total = header_len + content_length;
    if buf.len() < total {
        return Ok(None);
    }

    let method = req.method.unwrap_or("GET").to_string();
    let target = req.path.unwrap_or("/");
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (target.to_string(), String::new()),
    };

    let mut headers = Vec::with_capacity(req.headers.len());
    let mut keep_alive = true;
    for h in req.headers.iter() {
        if h.name.is_empty() {
            break;
        }
        let value = std::str::from_utf8(h.value).unwrap_or("").to_string();
        if h.name.eq_ignore_ascii_case("connection") {
            keep_alive = !value.eq_ignore_ascii_case("close");
        }
        headers.push((h.name.to_string(), value));
    }

    let body = buf[header_len..total].to_vec();
    Ok(Some(Parsed {
        request: HttpRequest {
            method,
            path,
            query,
            headers,
            body,
        },
        keep_alive,
        consumed: total,
    }))
}

/// Serialize a reply into a response buffer (no format! overhead).
///
/// The body length is authoritative here, so stored length/framing
/// headers are skipped.
pub fn build_response(buf: &mut Vec<u8>, reply: &Reply) {
    buf.clear();
    buf.extend_from_slice(b"HTTP/1.1 ");
    buf.extend_from_slice(reply.status.as_bytes());
    buf.extend_from_slice(b"\r\ncontent-length: ");
    let mut itoa_buf = itoa::Buffer::new();
    buf.extend_from_slice(itoa_buf.format(reply.body.len()).as_bytes());
    buf.extend_from_slice(b"\r\nconnection: keep-alive\r\n");
    for (name, value) in &reply.headers {
        if name.eq_ignore_ascii_case("content-length")
            || name.eq_ignore_ascii_case("connection")
            || name.eq_ignore_ascii_case("keep-alive")
            || name.eq_ignore_ascii_case("transfer-encoding")
        {
            continue;
        }
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(&reply.body);
}
