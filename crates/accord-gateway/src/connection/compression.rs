//! zlib-stream inflate
//!
//! With `compress=zlib-stream` the gateway sends binary frames carrying one
//! shared zlib stream. A message is complete when the accumulated data ends
//! with the 4-byte sync-flush suffix. The inflate context lives for the
//! whole connection and is never reset between messages.

use accord_core::{AccordError, AccordResult};
use flate2::{Decompress, FlushDecompress};

/// Sync-flush marker terminating each complete message
const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

const INFLATE_CHUNK: usize = 16 * 1024;

/// Persistent inflate context for one gateway connection
pub struct Inflater {
    decompress: Decompress,
    pending: Vec<u8>,
}

impl Inflater {
    /// Create a context expecting a zlib header
    #[must_use]
    pub fn new() -> Self {
        Self {
            decompress: Decompress::new(true),
            pending: Vec::new(),
        }
    }

    /// Feed one binary frame
    ///
    /// Returns the decompressed message once the suffix delimiter arrives;
    /// None while a message is still split across frames.
    pub fn inflate(&mut self, frame: &[u8]) -> AccordResult<Option<Vec<u8>>> {
        self.pending.extend_from_slice(frame);
        if !self.pending.ends_with(&ZLIB_SUFFIX) {
            return Ok(None);
        }

        let input = std::mem::take(&mut self.pending);
        let mut output = Vec::with_capacity(input.len().saturating_mul(3));
        let mut chunk = vec![0u8; INFLATE_CHUNK];
        let mut offset = 0usize;

        while offset < input.len() {
            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();

            self.decompress
                .decompress(&input[offset..], &mut chunk, FlushDecompress::Sync)
                .map_err(|e| AccordError::Protocol(format!("zlib inflate failed: {e}")))?;

            let consumed = (self.decompress.total_in() - before_in) as usize;
            let produced = (self.decompress.total_out() - before_out) as usize;
            output.extend_from_slice(&chunk[..produced]);
            offset += consumed;

            if consumed == 0 && produced == 0 {
                break;
            }
        }

        Ok(Some(output))
    }

    /// Bytes buffered while waiting for a message delimiter
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Inflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inflater")
            .field("pending", &self.pending.len())
            .field("total_in", &self.decompress.total_in())
            .finish()
    }
}
