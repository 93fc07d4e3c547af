//! Inbound request head: read, parse, frame.
//!
//! Reads exactly the head bytes off the buffered connection so the body
//! stays in the buffer for the body source.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::emission::{BodySource, HttpVersion};
use crate::telemetry::Header;

const MAX_HEADERS: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum HeadError {
    #[error("request head exceeds {0} bytes")]
    TooLarge(usize),

    #[error("malformed request head: {0}")]
    Malformed(String),

    #[error("unsupported transfer coding `{0}`")]
    UnsupportedTransferCoding(String),

    #[error("conflicting Content-Length values")]
    ConflictingLength,

    #[error("connection closed mid-head")]
    Truncated,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl HeadError {
    /// Status of the error response, if one should be sent.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            HeadError::TooLarge(_) => Some(431),
            HeadError::Malformed(_) | HeadError::ConflictingLength => Some(400),
            HeadError::UnsupportedTransferCoding(_) => Some(501),
            HeadError::Truncated | HeadError::Io(_) => None,
        }
    }
}

/// How the request body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    None,
    Length(u64),
    Chunked,
}

#[derive(Debug)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    /// Authority from an absolute-form target, if any.
    pub authority: Option<String>,
    pub version: HttpVersion,
    pub header: Header,
}

impl RequestHead {
    /// Authority from the target or the `Host` header.
    pub fn host(&self) -> Option<String> {
        self.authority.clone().or_else(|| self.header.get("host"))
    }

    pub fn keep_alive(&self) -> bool {
        let tokens: Vec<String> = self
            .header
            .get_all("connection")
            .iter()
            .flat_map(|v| v.split(',').map(|t| t.trim().to_ascii_lowercase()).collect::<Vec<_>>())
            .collect();
        match self.version {
            HttpVersion::Http11 => !tokens.iter().any(|t| t == "close"),
            HttpVersion::Http10 => tokens.iter().any(|t| t == "keep-alive"),
        }
    }

    pub fn expects_continue(&self) -> bool {
        self.version == HttpVersion::Http11
            && self
                .header
                .get("expect")
                .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
    }

    pub fn framing(&self) -> Result<Framing, HeadError> {
        let codings: Vec<String> = self
            .header
            .get_all("transfer-encoding")
            .iter()
            .flat_map(|v| v.split(',').map(|t| t.trim().to_ascii_lowercase()).collect::<Vec<_>>())
            .filter(|t| !t.is_empty())
            .collect();
        if let Some(last) = codings.last() {
            if last == "chunked" && codings.iter().filter(|c| *c == "chunked").count() == 1 {
                return Ok(Framing::Chunked);
            }
            return Err(HeadError::UnsupportedTransferCoding(codings.join(", ")));
        }

        let mut length = None;
        for value in self.header.get_all("content-length") {
            for part in value.split(',') {
                let parsed: u64 = part
                    .trim()
                    .parse()
                    .map_err(|_| HeadError::Malformed(format!("Content-Length `{}`", part.trim())))?;
                match length {
                    Some(existing) if existing != parsed => return Err(HeadError::ConflictingLength),
                    _ => length = Some(parsed),
                }
            }
        }
        Ok(match length {
            Some(0) | None => Framing::None,
            Some(len) => Framing::Length(len),
        })
    }
}

/// Body source for `framing` over the connection reader. Chunked trailers
/// share the head's size limit.
pub fn body_source<R>(framing: Framing, reader: R, max_head_bytes: usize) -> BodySource<R>
where
    R: AsyncBufRead + Unpin,
{
    match framing {
        Framing::None => BodySource::Empty,
        Framing::Length(len) => BodySource::sized(reader, len),
        Framing::Chunked => BodySource::chunked_with_trailer_limit(reader, max_head_bytes as u64),
    }
}

/// Read the next head. `Ok(None)` is a clean close between requests.
pub async fn read_head<R>(reader: &mut R, max_bytes: usize) -> Result<Option<RequestHead>, HeadError>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw: Vec<u8> = Vec::with_capacity(1024);
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return if raw.is_empty() {
                Ok(None)
            } else {
                Err(HeadError::Truncated)
            };
        }

        let mut consumed = 0;
        let mut complete = false;
        for &byte in buf {
            consumed += 1;
            // Empty lines before a request line are ignored.
            if raw.is_empty() && (byte == b'\r' || byte == b'\n') {
                continue;
            }
            raw.push(byte);
            if raw.ends_with(b"\r\n\r\n") || raw.ends_with(b"\n\n") {
                complete = true;
                break;
            }
            if raw.len() > max_bytes {
                break;
            }
        }
        reader.consume(consumed);

        if complete {
            return parse_head(&raw).map(Some);
        }
        if raw.len() > max_bytes {
            return Err(HeadError::TooLarge(max_bytes));
        }
    }
}

pub fn parse_head(raw: &[u8]) -> Result<RequestHead, HeadError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);
    match request.parse(raw) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Err(HeadError::Malformed("incomplete head".into())),
        Err(e) => return Err(HeadError::Malformed(e.to_string())),
    }

    let method = request.method.unwrap_or_default().to_string();
    let target = request.path.unwrap_or_default();
    let version = HttpVersion::from_minor(request.version.unwrap_or(1));

    let mut header = Header::new();
    for h in request.headers.iter() {
        header.add(h.name, String::from_utf8_lossy(h.value).into_owned());
    }

    let (authority, path, query) = split_target(target)?;
    Ok(RequestHead {
        method,
        path,
        query,
        authority,
        version,
        header,
    })
}

type Target = (Option<String>, String, Option<String>);

fn split_target(target: &str) -> Result<Target, HeadError> {
    let (authority, rest) = if let Some(stripped) = target
        .strip_prefix("http://")
        .or_else(|| target.strip_prefix("https://"))
    {
        match stripped.find('/') {
            Some(idx) => (Some(stripped[..idx].to_string()), &stripped[idx..]),
            None => (Some(stripped.to_string()), "/"),
        }
    } else if target.starts_with('/') || target == "*" {
        (None, target)
    } else {
        return Err(HeadError::Malformed(format!("request target `{target}`")));
    };

    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query.to_string())),
        None => (rest, None),
    };
    Ok((authority, path.to_string(), query))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, BufReader};

    #[tokio::test]
    async fn reads_head_and_leaves_body() {
        let wire = b"\r\nPOST /orders?PP_USER=alice&x=1 HTTP/1.1\r\nHost: gw.local\r\nContent-Length: 5\r\nSet-Cookie: a\r\nSet-Cookie: b\r\n\r\nhello";
        let mut reader = BufReader::new(&wire[..]);
        let head = read_head(&mut reader, 1024).await.unwrap().unwrap();

        assert_eq!(head.method, "POST");
        assert_eq!(head.path, "/orders");
        assert_eq!(head.query.as_deref(), Some("PP_USER=alice&x=1"));
        assert_eq!(head.host().as_deref(), Some("gw.local"));
        assert_eq!(head.header.get_all("set-cookie"), vec!["a", "b"]);
        assert_eq!(head.framing().unwrap(), Framing::Length(5));

        let mut rest = String::new();
        reader.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "hello");
    }

    #[tokio::test]
    async fn clean_close_and_truncation() {
        let mut empty = BufReader::new(&b""[..]);
        assert!(read_head(&mut empty, 1024).await.unwrap().is_none());

        let mut partial = BufReader::new(&b"GET / HTTP/1.1\r\nHost"[..]);
        assert!(matches!(read_head(&mut partial, 1024).await, Err(HeadError::Truncated)));
    }

    #[tokio::test]
    async fn oversized_head_is_rejected() {
        let wire = format!("GET / HTTP/1.1\r\nX-Big: {}\r\n\r\n", "a".repeat(200));
        let mut reader = BufReader::new(wire.as_bytes());
        let err = read_head(&mut reader, 64).await.unwrap_err();
        assert!(matches!(err, HeadError::TooLarge(64)));
        assert_eq!(err.status_code(), Some(431));
    }

    #[test]
    fn keep_alive_rules() {
        let head = parse_head(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(head.keep_alive());
        let head = parse_head(b"GET / HTTP/1.1\r\nConnection: Close\r\n\r\n").unwrap();
        assert!(!head.keep_alive());
        let head = parse_head(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!head.keep_alive());
        let head = parse_head(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n").unwrap();
        assert!(head.keep_alive());
    }

    #[test]
    fn framing_rules() {
        let head = parse_head(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\nContent-Length: 3\r\n\r\n").unwrap();
        assert_eq!(head.framing().unwrap(), Framing::Chunked);

        let head = parse_head(b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip\r\n\r\n").unwrap();
        assert_eq!(head.framing().unwrap_err().status_code(), Some(501));

        let head = parse_head(b"POST / HTTP/1.1\r\nContent-Length: 3\r\nContent-Length: 4\r\n\r\n").unwrap();
        assert!(matches!(head.framing(), Err(HeadError::ConflictingLength)));

        let head = parse_head(b"POST / HTTP/1.1\r\nContent-Length: 0\r\n\r\n").unwrap();
        assert_eq!(head.framing().unwrap(), Framing::None);
    }

    #[test]
    fn absolute_form_target() {
        let head = parse_head(b"GET http://https---api-example-com---alice.gw/v1?a=1 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(head.authority.as_deref(), Some("https---api-example-com---alice.gw"));
        assert_eq!(head.path, "/v1");
        assert_eq!(head.query.as_deref(), Some("a=1"));
        assert!(parse_head(b"GET nonsense HTTP/1.1\r\n\r\n").is_err());
    }
}
