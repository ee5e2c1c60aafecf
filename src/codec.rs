//! Block compression used by compressed package archives.
//!
//! Compressed entries are stored as a sequence of `[block_size: u32][block_bytes]` frames.  The framing lives in
//! [crate::FileStream] and [crate::PackageBuilder]; a [BlockCodec] only ever sees one block at a time.
use std::io::{Read, Result, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

/// Uncompressed size of each block written by [crate::PackageBuilder].
pub const BLOCK_SIZE: usize = 32 * 1024;

pub trait BlockCodec: Send + Sync + std::fmt::Debug {
    fn compress_block(&self, input: &[u8]) -> Result<Vec<u8>>;

    /// Decode one block.  `max_len` bounds the output; decoders must not produce more.
    fn decompress_block(&self, input: &[u8], max_len: usize) -> Result<Vec<u8>>;
}

/// Raw deflate blocks.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeflateCodec;

impl BlockCodec for DeflateCodec {
    fn compress_block(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(Vec::with_capacity(input.len() / 2), Compression::default());
        encoder.write_all(input)?;
        encoder.finish()
    }

    fn decompress_block(&self, input: &[u8], max_len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(max_len.min(BLOCK_SIZE));
        DeflateDecoder::new(input)
            .take(max_len as u64)
            .read_to_end(&mut out)?;
        Ok(out)
    }
}
