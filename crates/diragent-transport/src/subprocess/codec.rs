//! Framing for the worker pipe
//!
//! The pipe carries a stream of JSON documents separated by optional
//! whitespace. Writers in this crate emit one compact document per line, but
//! readers accept any layout, including documents pretty-printed across many
//! lines or several documents on one line.
//!
//! Use [`JsonStreamCodec`] with [`tokio_util::codec::FramedRead`]:
//!
//! ```rust,ignore
//! let mut documents = FramedRead::new(child_stdout, JsonStreamCodec::new());
//! while let Some(document) = documents.next().await {
//!     match document? {
//!         Ok(value) => { /* one JSON document */ }
//!         Err(err) => { /* malformed input, already skipped */ }
//!     }
//! }
//! ```

use bytes::{Buf, BytesMut};
use serde_json::Value;
use std::io;
use tokio_util::codec::Decoder;

/// Largest incomplete document buffered before the stream is abandoned: 16 MiB.
pub const MAX_DOCUMENT_BYTES: usize = 16 * 1024 * 1024;

/// Result of decoding one document from the stream
///
/// A malformed document is an item rather than a stream error so the reader
/// can report it and carry on with the next document.
pub type Document = Result<Value, serde_json::Error>;

/// Decoder for a whitespace-separated stream of JSON documents
///
/// After a syntax error the decoder discards input up to and including the
/// next newline, then resumes. I/O failures and oversized documents are
/// stream errors.
#[derive(Debug)]
pub struct JsonStreamCodec {
    max_length: usize,
    skipping: bool,
}

impl JsonStreamCodec {
    /// Create a codec with the [`MAX_DOCUMENT_BYTES`] limit
    pub fn new() -> Self {
        Self::with_max_length(MAX_DOCUMENT_BYTES)
    }

    /// Create a codec that gives up on documents longer than `max_length`
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            skipping: false,
        }
    }

    fn skip_malformed(&mut self, src: &mut BytesMut) {
        match src.iter().position(|&b| b == b'\n') {
            Some(newline) => {
                src.advance(newline + 1);
                self.skipping = false;
            }
            None => src.clear(),
        }
    }
}

impl Default for JsonStreamCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonStreamCodec {
    type Item = Document;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Document>, io::Error> {
        if self.skipping {
            self.skip_malformed(src);
            if self.skipping {
                return Ok(None);
            }
        }

        let leading = src
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(src.len());
        src.advance(leading);
        if src.is_empty() {
            return Ok(None);
        }

        let (parsed, consumed) = {
            let mut documents = serde_json::Deserializer::from_slice(&src[..]).into_iter::<Value>();
            let parsed = documents.next();
            (parsed, documents.byte_offset())
        };
        match parsed {
            Some(Ok(value)) => {
                src.advance(consumed);
                Ok(Some(Ok(value)))
            }
            Some(Err(err)) if err.is_eof() => {
                if src.len() > self.max_length {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("document exceeds {} bytes", self.max_length),
                    ));
                }
                Ok(None)
            }
            Some(Err(err)) => {
                let failed_at = error_offset(&src[..], &err);
                src.advance(failed_at);
                self.skipping = true;
                self.skip_malformed(src);
                Ok(Some(Err(err)))
            }
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Document>, io::Error> {
        if let Some(document) = self.decode(src)? {
            return Ok(Some(document));
        }
        if src.is_empty() || self.skipping {
            src.clear();
            return Ok(None);
        }
        // A truncated trailing document
        let err = match serde_json::from_slice::<Value>(&src[..]) {
            Err(err) => err,
            Ok(value) => {
                src.clear();
                return Ok(Some(Ok(value)));
            }
        };
        src.clear();
        Ok(Some(Err(err)))
    }
}

/// Byte offset in `src` of the position `err` reports
fn error_offset(src: &[u8], err: &serde_json::Error) -> usize {
    let line_start = if err.line() <= 1 {
        0
    } else {
        src.iter()
            .enumerate()
            .filter(|&(_, &b)| b == b'\n')
            .nth(err.line() - 2)
            .map_or(src.len(), |(at, _)| at + 1)
    };
    (line_start + err.column().saturating_sub(1)).min(src.len())
}
