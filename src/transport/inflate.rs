//! zlib-stream decompression
//!
//! With `compress=zlib-stream` the whole connection is one zlib stream. A
//! logical message may span several binary frames and ends with the
//! `00 00 FF FF` sync-flush marker.

use flate2::{Decompress, FlushDecompress, Status};
use thiserror::Error;

const SYNC_FLUSH_SUFFIX: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum InflateError {
    #[error("zlib stream is corrupt")]
    Corrupt(#[from] flate2::DecompressError),

    #[error("inflated payload is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Per-connection inflater; a new connection needs a new one
pub struct Inflater {
    decompress: Decompress,
    buffer: Vec<u8>,
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

impl Inflater {
    pub fn new() -> Self {
        Self {
            decompress: Decompress::new(true),
            buffer: Vec::new(),
        }
    }

    /// Feed one binary frame. Returns the message once its flush marker arrives.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<String>, InflateError> {
        self.buffer.extend_from_slice(chunk);
        if !self.buffer.ends_with(&SYNC_FLUSH_SUFFIX) {
            return Ok(None);
        }

        let input = std::mem::take(&mut self.buffer);
        let mut output = Vec::with_capacity(CHUNK_SIZE);
        let mut offset = 0;

        loop {
            if output.len() == output.capacity() {
                output.reserve(CHUNK_SIZE);
            }
            let before_in = self.decompress.total_in();
            let before_out = output.len();
            let status =
                self.decompress
                    .decompress_vec(&input[offset..], &mut output, FlushDecompress::Sync)?;
            let consumed = (self.decompress.total_in() - before_in) as usize;
            offset += consumed;

            let drained = offset >= input.len() && output.len() < output.capacity();
            let stalled = consumed == 0 && output.len() == before_out;
            if drained || stalled || matches!(status, Status::StreamEnd) {
                break;
            }
        }

        Ok(Some(String::from_utf8(output)?))
    }
}
