//! Word-aligned memory cache over EVM byte memory
//!
//! EVM memory is byte addressed but almost every access the harness performs
//! on a captured memory image is a 32-byte word at a 32-byte boundary (frame
//! locals, mapping keys, revert payloads). [`FastMem`] layers a word cache
//! over the raw byte buffer so repeated word reads skip the bytes-to-integer
//! conversion, while still supporting arbitrary byte-level reads and writes.
//!
//! Invariant: after any byte-level read, the byte buffer is consistent with
//! the cache for every word intersecting the read range.

use alloy::primitives::U256;

/// Cached state of one 32-byte word
#[derive(Clone, Copy, Debug, PartialEq)]
enum CachedWord {
    /// The byte buffer is authoritative for this word
    Dirty,
    /// Cached value, consistent with the byte buffer unless writeback pends
    Value(U256),
}

/// Byte memory with a word cache and a writeback bitmap
///
/// Word reads at aligned offsets are served from the cache when clean;
/// unaligned or byte-granular operations flush pending word writes into the
/// byte buffer first, so external readers always observe a consistent image.
#[derive(Clone, Debug, Default)]
pub struct FastMem {
    bytes: Vec<u8>,
    word_cache: Vec<CachedWord>,
    needs_writeback: Vec<bool>,
}

impl FastMem {
    /// Create an empty memory
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a memory pre-populated from a raw byte image
    ///
    /// Used to wrap memory captured from an interpreter frame; the image is
    /// padded to a word boundary.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut mem = Self::new();
        if !data.is_empty() {
            mem.extend(0, data.len());
            mem.write(0, data);
        }
        mem
    }

    /// Current size in bytes (always a multiple of 32)
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the memory is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Grow the memory so that `[pos, pos + size)` is addressable
    ///
    /// New words enter the cache as dirty sentinels so that the (zeroed)
    /// byte buffer stays authoritative for them.
    pub fn extend(&mut self, pos: usize, size: usize) {
        if size == 0 {
            return;
        }
        let new_words = (pos + size).div_ceil(32);
        if new_words > self.word_cache.len() {
            let grow = new_words - self.word_cache.len();
            self.word_cache
                .extend(std::iter::repeat(CachedWord::Dirty).take(grow));
            self.needs_writeback
                .extend(std::iter::repeat(false).take(grow));
            self.bytes.resize(new_words * 32, 0);
        }
    }

    /// Read the 32-byte word at `pos`
    ///
    /// Fast path when `pos` is word aligned and the cached word is clean;
    /// otherwise falls back to a byte read and caches the result.
    pub fn read_word(&mut self, pos: usize) -> U256 {
        if pos % 32 == 0 {
            if let CachedWord::Value(word) = self.word_cache[pos / 32] {
                return word;
            }
        }
        let bytes = self.read_bytes(pos, 32);
        let word = U256::from_be_slice(&bytes);
        if pos % 32 == 0 {
            self.word_cache[pos / 32] = CachedWord::Value(word);
        }
        word
    }

    /// Write the 32-byte word at `pos`
    ///
    /// Aligned writes land in the cache and mark writeback pending; unaligned
    /// writes go through the byte path.
    pub fn write_word(&mut self, pos: usize, word: U256) {
        self.extend(pos, 32);
        if pos % 32 == 0 {
            self.word_cache[pos / 32] = CachedWord::Value(word);
            self.needs_writeback[pos / 32] = true;
        } else {
            self.write(pos, &word.to_be_bytes::<32>());
        }
    }

    /// Read `size` bytes starting at `pos`
    ///
    /// Flushes pending word writes intersecting the range first.
    pub fn read_bytes(&mut self, pos: usize, size: usize) -> Vec<u8> {
        if size == 0 {
            return Vec::new();
        }
        self.extend(pos, size);
        self.writeback(pos, size);
        self.bytes[pos..pos + size].to_vec()
    }

    /// Write raw bytes at `pos`
    ///
    /// Words intersecting the range are invalidated in the cache; the byte
    /// buffer becomes authoritative for them.
    pub fn write(&mut self, pos: usize, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.extend(pos, data.len());
        // unaligned writes may straddle a word with a pending cache write
        self.writeback(pos, data.len());
        let start = pos / 32;
        let end = (pos + data.len()).div_ceil(32);
        for ix in start..end {
            self.word_cache[ix] = CachedWord::Dirty;
            debug_assert!(!self.needs_writeback[ix]);
        }
        self.bytes[pos..pos + data.len()].copy_from_slice(data);
    }

    fn writeback(&mut self, pos: usize, size: usize) {
        let start = pos / 32;
        let end = (pos + size).div_ceil(32);
        for ix in start..end.min(self.needs_writeback.len()) {
            if self.needs_writeback[ix] {
                let word = match self.word_cache[ix] {
                    CachedWord::Value(w) => w,
                    CachedWord::Dirty => unreachable!("writeback pending for dirty word"),
                };
                self.bytes[ix * 32..ix * 32 + 32].copy_from_slice(&word.to_be_bytes::<32>());
                self.needs_writeback[ix] = false;
            }
        }
    }
}
