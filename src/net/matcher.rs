//! Connection classification from a read-ahead prefix.
//!
//! # Responsibilities
//! - Recognize a gRPC stream: HTTP/2 preface, then a HEADERS block whose
//!   `content-type` is `application/grpc` or `application/grpc+<subtype>`
//! - Recognize an HTTP/1.x request line
//! - Tell the caller when more bytes are needed before deciding
//!
//! # Design Decisions
//! - Pure functions over a byte slice; the demultiplexer owns all I/O
//! - The RPC matcher runs first since gRPC traffic is itself HTTP/2
//! - Nothing is written to the client while matching; hyper's HTTP/2
//!   server sends its own SETTINGS after hand-over, and h2 answers the ACK
//!   of an extra one with GOAWAY
//!
//! # Limitations
//! - A client that waits for the server SETTINGS before sending HEADERS is
//!   never matched and is dropped after the match timeout

/// HTTP/2 client connection preface.
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

const FRAME_HEADER_LEN: usize = 9;

/// Smallest read-ahead budget that can hold the preface and a frame header.
pub const MIN_PEEK_BYTES: usize = PREFACE.len() + FRAME_HEADER_LEN;

/// Initial SETTINGS_MAX_FRAME_SIZE; a client may not exceed it before the
/// server has advertised anything else.
const MAX_FRAME_SIZE: usize = 16_384;

const MAX_REQUEST_LINE: usize = 8 * 1024;

const FRAME_DATA: u8 = 0x0;
const FRAME_HEADERS: u8 = 0x1;
const FRAME_CONTINUATION: u8 = 0x9;

const FLAG_END_HEADERS: u8 = 0x4;
const FLAG_PADDED: u8 = 0x8;
const FLAG_PRIORITY: u8 = 0x20;

const GRPC_CONTENT_TYPE: &[u8] = b"application/grpc";

const METHODS: [&[u8]; 9] = [
    b"GET", b"POST", b"PUT", b"DELETE", b"HEAD", b"OPTIONS", b"PATCH", b"CONNECT", b"TRACE",
];

/// Which sub-listener a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// gRPC over HTTP/2.
    Rpc,
    /// Plain HTTP/1.x.
    Http,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Rpc => "rpc",
            Protocol::Http => "http",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of inspecting the bytes received so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Matched(Protocol),
    /// The prefix is consistent with a protocol but not yet conclusive.
    NeedMore,
    /// Neither protocol; the connection should be dropped.
    Unmatched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Yes,
    No,
    NeedMore,
}

/// Classify a connection from the bytes it has sent so far.
pub fn classify(prefix: &[u8]) -> Classification {
    let rpc = match_grpc(prefix);
    if rpc == Verdict::Yes {
        return Classification::Matched(Protocol::Rpc);
    }

    match (rpc, match_http1(prefix)) {
        (_, Verdict::Yes) => Classification::Matched(Protocol::Http),
        (Verdict::NeedMore, _) | (_, Verdict::NeedMore) => Classification::NeedMore,
        _ => Classification::Unmatched,
    }
}

/// Classify a connection whose peer stopped sending before [`classify`]
/// could decide.
///
/// Only the HTTP/1 fast path applies: a known method followed by a space.
pub fn classify_truncated(prefix: &[u8]) -> Classification {
    match classify(prefix) {
        Classification::NeedMore if starts_with_method(prefix) => {
            Classification::Matched(Protocol::Http)
        }
        Classification::NeedMore => Classification::Unmatched,
        decided => decided,
    }
}

/// `application/grpc` or any `application/grpc+<subtype>`.
pub fn is_grpc_content_type(value: &[u8]) -> bool {
    match value.strip_prefix(GRPC_CONTENT_TYPE) {
        Some(rest) => rest.is_empty() || rest.first() == Some(&b'+'),
        None => false,
    }
}

fn match_grpc(buf: &[u8]) -> Verdict {
    if buf.len() < PREFACE.len() {
        return if PREFACE.starts_with(buf) {
            Verdict::NeedMore
        } else {
            Verdict::No
        };
    }
    if !buf.starts_with(PREFACE) {
        return Verdict::No;
    }

    let mut pos = PREFACE.len();
    let mut block: Option<Vec<u8>> = None;

    loop {
        let Some(header) = buf.get(pos..pos + FRAME_HEADER_LEN) else {
            return Verdict::NeedMore;
        };
        let len = u32::from_be_bytes([0, header[0], header[1], header[2]]) as usize;
        let kind = header[3];
        let flags = header[4];
        if len > MAX_FRAME_SIZE {
            return Verdict::No;
        }

        let start = pos + FRAME_HEADER_LEN;
        let Some(payload) = buf.get(start..start + len) else {
            return Verdict::NeedMore;
        };
        pos = start + len;

        match kind {
            FRAME_HEADERS if block.is_none() => {
                let Some(fragment) = headers_fragment(payload, flags) else {
                    return Verdict::No;
                };
                if flags & FLAG_END_HEADERS != 0 {
                    return match_header_block(fragment);
                }
                block = Some(fragment.to_vec());
            }
            FRAME_CONTINUATION => {
                let Some(pending) = block.as_mut() else {
                    return Verdict::No;
                };
                pending.extend_from_slice(payload);
                if flags & FLAG_END_HEADERS != 0 {
                    return match_header_block(pending);
                }
            }
            // A header block must not be interleaved with other frames.
            _ if block.is_some() => return Verdict::No,
            FRAME_DATA => return Verdict::No,
            // SETTINGS, WINDOW_UPDATE, PRIORITY, PING and friends.
            _ => {}
        }
    }
}

/// Strip padding and priority fields from a HEADERS payload.
fn headers_fragment(payload: &[u8], flags: u8) -> Option<&[u8]> {
    let mut fragment = payload;
    let mut pad = 0;

    if flags & FLAG_PADDED != 0 {
        pad = *fragment.first()? as usize;
        fragment = &fragment[1..];
    }
    if flags & FLAG_PRIORITY != 0 {
        fragment = fragment.get(5..)?;
    }
    let end = fragment.len().checked_sub(pad)?;
    Some(&fragment[..end])
}

fn match_header_block(block: &[u8]) -> Verdict {
    let headers = match loona_hpack::Decoder::new().decode(block) {
        Ok(headers) => headers,
        Err(e) => {
            tracing::trace!(error = ?e, "Undecodable HPACK block");
            return Verdict::No;
        }
    };

    match headers.iter().find(|(name, _)| name.as_slice() == b"content-type") {
        Some((_, value)) if is_grpc_content_type(value) => Verdict::Yes,
        _ => Verdict::No,
    }
}

fn match_http1(buf: &[u8]) -> Verdict {
    match buf.iter().position(|&b| b == b'\n') {
        Some(end) => {
            let line = &buf[..end];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if is_request_line(line) {
                Verdict::Yes
            } else {
                Verdict::No
            }
        }
        None if buf.len() >= MAX_REQUEST_LINE => Verdict::No,
        None if is_partial_request_line(buf) => Verdict::NeedMore,
        None => Verdict::No,
    }
}

fn is_request_line(line: &[u8]) -> bool {
    let mut parts = line.splitn(3, |&b| b == b' ');
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    is_token(method) && is_target(target) && is_http1_version(version)
}

/// Whether `buf` could still grow into a valid request line.
fn is_partial_request_line(buf: &[u8]) -> bool {
    let buf = buf.strip_suffix(b"\r").unwrap_or(buf);
    let parts: Vec<&[u8]> = buf.splitn(3, |&b| b == b' ').collect();

    match parts.as_slice() {
        [method] => method.iter().all(|&b| is_tchar(b)),
        [method, target] => is_token(method) && target.iter().all(|&b| is_target_byte(b)),
        [method, target, version] => {
            is_token(method)
                && is_target(target)
                && (b"HTTP/1.".starts_with(version) || is_http1_version(version))
        }
        _ => false,
    }
}

fn is_http1_version(version: &[u8]) -> bool {
    version.len() == 8 && version.starts_with(b"HTTP/1.") && version[7].is_ascii_digit()
}

fn is_token(bytes: &[u8]) -> bool {
    !bytes.is_empty() && bytes.iter().all(|&b| is_tchar(b))
}

fn is_target(bytes: &[u8]) -> bool {
    !bytes.is_empty() && bytes.iter().all(|&b| is_target_byte(b))
}

fn is_target_byte(b: u8) -> bool {
    b.is_ascii_graphic()
}

fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

fn starts_with_method(buf: &[u8]) -> bool {
    METHODS
        .iter()
        .any(|m| buf.starts_with(m) && buf.get(m.len()) == Some(&b' '))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const SETTINGS: u8 = 0x4;
    const WINDOW_UPDATE: u8 = 0x8;

    pub(crate) fn frame(kind: u8, flags: u8, stream: u32, payload: &[u8]) -> Vec<u8> {
        let len = payload.len() as u32;
        let mut out = vec![(len >> 16) as u8, (len >> 8) as u8, len as u8, kind, flags];
        out.extend_from_slice(&stream.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    pub(crate) fn header_block(headers: &[(&str, &str)]) -> Vec<u8> {
        loona_hpack::Encoder::new().encode(
            headers
                .iter()
                .map(|(name, value)| (name.as_bytes(), value.as_bytes())),
        )
    }

    /// Preface, client SETTINGS, WINDOW_UPDATE and a single HEADERS frame.
    pub(crate) fn grpc_prefix(content_type: &str) -> Vec<u8> {
        let block = header_block(&[
            (":method", "POST"),
            (":scheme", "http"),
            (":path", "/helloworld.Greeter/SayHello"),
            (":authority", "localhost"),
            ("content-type", content_type),
            ("te", "trailers"),
        ]);

        let mut out = PREFACE.to_vec();
        out.extend(frame(SETTINGS, 0, 0, &[0, 3, 0, 0, 0, 100]));
        out.extend(frame(WINDOW_UPDATE, 0, 0, &[0, 0x0f, 0, 1]));
        out.extend(frame(FRAME_HEADERS, FLAG_END_HEADERS, 1, &block));
        out
    }

    #[test]
    fn grpc_headers_route_to_rpc() {
        let prefix = grpc_prefix("application/grpc");
        assert_eq!(classify(&prefix), Classification::Matched(Protocol::Rpc));
    }

    #[test]
    fn grpc_subtypes_route_to_rpc() {
        let prefix = grpc_prefix("application/grpc+proto");
        assert_eq!(classify(&prefix), Classification::Matched(Protocol::Rpc));
    }

    #[test]
    fn grpc_content_type_rules() {
        assert!(is_grpc_content_type(b"application/grpc"));
        assert!(is_grpc_content_type(b"application/grpc+json"));
        assert!(!is_grpc_content_type(b"application/grpc-web"));
        assert!(!is_grpc_content_type(b"application/json"));
        assert!(!is_grpc_content_type(b""));
    }

    #[test]
    fn plain_http2_is_unmatched() {
        let prefix = grpc_prefix("application/json");
        assert_eq!(classify(&prefix), Classification::Unmatched);
    }

    #[test]
    fn every_strict_prefix_of_grpc_needs_more() {
        let prefix = grpc_prefix("application/grpc");
        for cut in [1, 10, PREFACE.len(), PREFACE.len() + 4, prefix.len() - 1] {
            assert_eq!(classify(&prefix[..cut]), Classification::NeedMore, "cut at {}", cut);
        }
    }

    #[test]
    fn headers_split_across_continuation() {
        let block = header_block(&[
            (":method", "POST"),
            (":path", "/svc/Method"),
            ("content-type", "application/grpc"),
        ]);
        let (first, rest) = block.split_at(block.len() / 2);

        let mut prefix = PREFACE.to_vec();
        prefix.extend(frame(FRAME_HEADERS, 0, 1, first));
        prefix.extend(frame(FRAME_CONTINUATION, FLAG_END_HEADERS, 1, rest));

        assert_eq!(classify(&prefix), Classification::Matched(Protocol::Rpc));
    }

    #[test]
    fn padded_priority_headers_are_unwrapped() {
        let block = header_block(&[("content-type", "application/grpc")]);
        let mut payload = vec![3];
        payload.extend_from_slice(&[0, 0, 0, 0, 16]);
        payload.extend_from_slice(&block);
        payload.extend_from_slice(&[0, 0, 0]);

        let mut prefix = PREFACE.to_vec();
        prefix.extend(frame(
            FRAME_HEADERS,
            FLAG_END_HEADERS | FLAG_PADDED | FLAG_PRIORITY,
            1,
            &payload,
        ));

        assert_eq!(classify(&prefix), Classification::Matched(Protocol::Rpc));
    }

    #[test]
    fn data_before_headers_is_unmatched() {
        let mut prefix = PREFACE.to_vec();
        prefix.extend(frame(FRAME_DATA, 0, 1, b"payload"));
        assert_eq!(classify(&prefix), Classification::Unmatched);
    }

    #[test]
    fn oversized_frame_is_unmatched() {
        let mut prefix = PREFACE.to_vec();
        prefix.extend_from_slice(&[0xff, 0xff, 0xff, SETTINGS, 0, 0, 0, 0, 0]);
        assert_eq!(classify(&prefix), Classification::Unmatched);
    }

    #[test]
    fn http1_request_routes_to_http() {
        assert_eq!(
            classify(b"GET /_ready HTTP/1.1\r\nHost: localhost\r\n\r\n"),
            Classification::Matched(Protocol::Http)
        );
        assert_eq!(
            classify(b"POST /submit HTTP/1.0\r\n"),
            Classification::Matched(Protocol::Http)
        );
    }

    #[test]
    fn partial_request_line_needs_more() {
        let partials: [&[u8]; 5] = [b"G", b"GET", b"GET /_re", b"GET /_ready HTTP/", b"GET /_ready HTTP/1.1\r"];
        for partial in partials {
            assert_eq!(classify(partial), Classification::NeedMore, "{:?}", partial);
        }
    }

    #[test]
    fn malformed_table_size_update_is_unmatched() {
        let mut prefix = PREFACE.to_vec();
        prefix.extend(frame(FRAME_HEADERS, FLAG_END_HEADERS, 1, &[0x3f, 0xb7]));
        assert_eq!(classify(&prefix), Classification::Unmatched);
    }

    #[test]
    fn random_header_blocks_never_panic() {
        let mut rng = fastrand::Rng::with_seed(0x6772_7063);
        for _ in 0..20_000 {
            let len = rng.usize(0..=64);
            let block: Vec<u8> = (0..len).map(|_| rng.u8(..)).collect();
            let mut prefix = PREFACE.to_vec();
            prefix.extend(frame(FRAME_HEADERS, FLAG_END_HEADERS, 1, &block));

            let outcome = std::panic::catch_unwind(|| classify(&prefix));
            assert!(outcome.is_ok(), "classify panicked on block {:02x?}", block);
        }
    }

    #[test]
    fn garbage_is_unmatched() {
        assert_eq!(classify(b"\x16\x03\x01\x02\x00\x01"), Classification::Unmatched);
        assert_eq!(classify(b"hello world\r\n"), Classification::Unmatched);
        assert_eq!(classify(b"GET /x HTTP/2.0\r\n"), Classification::Unmatched);
        assert_eq!(classify(b"GET /x HTTP/1.1 extra\r\n"), Classification::Unmatched);
    }

    #[test]
    fn truncated_input_uses_method_fast_path() {
        assert_eq!(
            classify_truncated(b"GET /_ready"),
            Classification::Matched(Protocol::Http)
        );
        assert_eq!(classify_truncated(b"GET"), Classification::Unmatched);
        assert_eq!(classify_truncated(b"hello"), Classification::Unmatched);
        assert_eq!(classify_truncated(&PREFACE[..10]), Classification::Unmatched);
        assert_eq!(classify_truncated(b""), Classification::Unmatched);
    }
}
