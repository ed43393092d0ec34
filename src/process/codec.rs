//! Line codec for agent stdout/stderr.
//!
//! Splits the byte stream on `\n`, decodes each line lossily as UTF-8 and
//! strips a trailing `\r`. Lines longer than [`MAX_LINE_BYTES`] are cut at
//! the limit and the remainder up to the next newline is discarded, so a
//! misbehaving process cannot make the bridge buffer unbounded output.

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::warn;

use crate::{AppError, Result};

/// Maximum bytes forwarded for a single output line: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Lossy, length-capped line decoder.
#[derive(Debug)]
pub struct OutputCodec {
    max_len: usize,
    /// Bytes of `src` already searched for a newline.
    next_index: usize,
    /// Dropping the tail of an oversize line.
    discarding: bool,
}

impl OutputCodec {
    /// Codec with the default [`MAX_LINE_BYTES`] cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_len(MAX_LINE_BYTES)
    }

    /// Codec with a custom cap.
    #[must_use]
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len: max_len.max(1),
            next_index: 0,
            discarding: false,
        }
    }
}

impl Default for OutputCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for OutputCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        loop {
            let newline = src[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            if let Some(pos) = newline {
                self.next_index = 0;
                let line = src.split_to(pos + 1);
                if std::mem::take(&mut self.discarding) {
                    continue;
                }
                return Ok(Some(to_text(&line[..pos])));
            }

            if self.discarding {
                src.clear();
                self.next_index = 0;
                return Ok(None);
            }

            if src.len() > self.max_len {
                warn!(limit = self.max_len, "output line truncated");
                let line = src.split_to(self.max_len);
                src.clear();
                self.next_index = 0;
                self.discarding = true;
                return Ok(Some(to_text(&line)));
            }

            self.next_index = src.len();
            return Ok(None);
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if src.is_empty() || std::mem::take(&mut self.discarding) {
            src.clear();
            return Ok(None);
        }
        let rest = src.split_to(src.len());
        Ok(Some(to_text(&rest)))
    }
}

fn to_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
