//! Body sources.
//!
//! # Responsibilities
//! - Expose every framing (sized, until-EOF, chunked) as a sequence of
//!   bounded segments
//! - Never read more than the framing allows, so a keep-alive connection
//!   stays positioned on the next request
//!
//! # Design Decisions
//! - Readers are `AsyncBufRead`; callers may pass `&mut` borrows so the
//!   connection keeps ownership of its stream
//! - Chunk extensions and trailers are read and discarded; trailers are
//!   capped in total like a request head

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Longest accepted chunk-size or trailer line.
const MAX_LINE_LENGTH: u64 = 8 * 1024;

/// Default cap on the whole trailer section.
pub const DEFAULT_TRAILER_LIMIT: u64 = 64 * 1024;

async fn read_crlf_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut line = Vec::new();
    (&mut *reader)
        .take(MAX_LINE_LENGTH)
        .read_until(b'\n', &mut line)
        .await?;
    match line.last() {
        Some(b'\n') => {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            Ok(line)
        }
        None => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed inside chunked body",
        )),
        Some(_) => Err(io::Error::new(io::ErrorKind::InvalidData, "chunk line too long")),
    }
}

async fn read_bounded<R: AsyncBufRead + Unpin>(reader: &mut R, max: usize) -> io::Result<Bytes> {
    let mut buf = vec![0u8; max];
    let n = reader.read(&mut buf).await?;
    buf.truncate(n);
    Ok(Bytes::from(buf))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data { remaining: u64 },
    DataEnd,
    Done,
}

/// Decoder for `Transfer-Encoding: chunked`.
#[derive(Debug)]
pub struct ChunkedDecoder<R> {
    reader: R,
    state: ChunkState,
    trailer_limit: u64,
}

impl<R: AsyncBufRead + Unpin> ChunkedDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            state: ChunkState::Size,
            trailer_limit: DEFAULT_TRAILER_LIMIT,
        }
    }

    /// Cap the total size of the trailer section, line endings included.
    pub fn with_trailer_limit(mut self, limit: u64) -> Self {
        self.trailer_limit = limit;
        self
    }

    pub fn is_done(&self) -> bool {
        self.state == ChunkState::Done
    }

    /// Next piece of chunk content, at most `max` bytes. `None` once the
    /// terminating chunk and trailers have been consumed.
    pub async fn next_segment(&mut self, max: usize) -> io::Result<Option<Bytes>> {
        loop {
            match self.state {
                ChunkState::Size => {
                    let line = read_crlf_line(&mut self.reader).await?;
                    let size = parse_chunk_size(&line)?;
                    if size == 0 {
                        self.consume_trailers().await?;
                        self.state = ChunkState::Done;
                        return Ok(None);
                    }
                    self.state = ChunkState::Data { remaining: size };
                }
                ChunkState::Data { remaining } => {
                    let want = remaining.min(max.max(1) as u64) as usize;
                    let segment = read_bounded(&mut self.reader, want).await?;
                    if segment.is_empty() {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed inside chunk",
                        ));
                    }
                    let remaining = remaining - segment.len() as u64;
                    self.state = if remaining == 0 {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data { remaining }
                    };
                    return Ok(Some(segment));
                }
                ChunkState::DataEnd => {
                    let line = read_crlf_line(&mut self.reader).await?;
                    if !line.is_empty() {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "missing CRLF after chunk",
                        ));
                    }
                    self.state = ChunkState::Size;
                }
                ChunkState::Done => return Ok(None),
            }
        }
    }

    async fn consume_trailers(&mut self) -> io::Result<()> {
        let mut total = 0u64;
        loop {
            let line = read_crlf_line(&mut self.reader).await?;
            if line.is_empty() {
                return Ok(());
            }
            total += line.len() as u64 + 2;
            if total > self.trailer_limit {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "trailer section too large"));
            }
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

fn parse_chunk_size(line: &[u8]) -> io::Result<u64> {
    let invalid = || io::Error::new(io::ErrorKind::InvalidData, "invalid chunk size");
    let text = std::str::from_utf8(line).map_err(|_| invalid())?;
    let digits = text.split(';').next().unwrap_or("").trim();
    if digits.is_empty() {
        return Err(invalid());
    }
    u64::from_str_radix(digits, 16).map_err(|_| invalid())
}

/// Where a body's bytes come from, with its framing.
#[derive(Debug)]
pub enum BodySource<R> {
    Empty,
    Sized { reader: R, remaining: u64 },
    UntilEof(R),
    Chunked(ChunkedDecoder<R>),
}

impl<R: AsyncBufRead + Unpin> BodySource<R> {
    pub fn sized(reader: R, length: u64) -> Self {
        if length == 0 {
            BodySource::Empty
        } else {
            BodySource::Sized {
                reader,
                remaining: length,
            }
        }
    }

    pub fn chunked(reader: R) -> Self {
        BodySource::Chunked(ChunkedDecoder::new(reader))
    }

    /// Chunked body whose trailer section may not exceed `trailer_limit` bytes.
    pub fn chunked_with_trailer_limit(reader: R, trailer_limit: u64) -> Self {
        BodySource::Chunked(ChunkedDecoder::new(reader).with_trailer_limit(trailer_limit))
    }

    /// Next segment of at most `max` bytes, `None` at the end of the body.
    pub async fn next_segment(&mut self, max: usize) -> io::Result<Option<Bytes>> {
        let max = max.max(1);
        match self {
            BodySource::Empty => Ok(None),
            BodySource::Sized { reader, remaining } => {
                if *remaining == 0 {
                    return Ok(None);
                }
                let want = (*remaining).min(max as u64) as usize;
                let segment = read_bounded(reader, want).await?;
                if segment.is_empty() {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("body ended with {} bytes missing", remaining),
                    ));
                }
                *remaining -= segment.len() as u64;
                Ok(Some(segment))
            }
            BodySource::UntilEof(reader) => {
                let segment = read_bounded(reader, max).await?;
                Ok(if segment.is_empty() { None } else { Some(segment) })
            }
            BodySource::Chunked(decoder) => decoder.next_segment(max).await,
        }
    }

    /// Whether every byte of the body has been read.
    pub fn is_exhausted(&self) -> bool {
        match self {
            BodySource::Empty => true,
            BodySource::Sized { remaining, .. } => *remaining == 0,
            BodySource::UntilEof(_) => false,
            BodySource::Chunked(decoder) => decoder.is_done(),
        }
    }

    /// Length announced by the framing, if any.
    pub fn declared_length(&self) -> Option<u64> {
        match self {
            BodySource::Empty => Some(0),
            BodySource::Sized { remaining, .. } => Some(*remaining),
            _ => None,
        }
    }
}
