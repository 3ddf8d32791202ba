//! Block-based image delta compression
//!
//! Both images are cut into square blocks. For each colour channel every
//! block that changed since the previous upload is written as
//! `{u8 channel, u32 BE block index, channel bytes}`; the record stream is
//! raw-deflated behind a fixed header:
//!
//! ```text
//! "applitools" | u8 version (3) | u16 BE source id (0) | u16 BE block size | deflate(records)
//! ```
//!
//! The encoder gives up and hands back the plain encoded target as soon as
//! the output would be larger than it.

use std::borrow::Cow;
use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use image::RgbaImage;
use tracing::{debug, trace};

use crate::error::{Error, Result};

pub const PREAMBLE: &[u8; 10] = b"applitools";
pub const FORMAT_VERSION: u8 = 3;
pub const DEFAULT_BLOCK_SIZE: u16 = 10;

const HEADER_LEN: usize = PREAMBLE.len() + 1 + 2 + 2;
const COLOR_CHANNELS: u8 = 3;
const PIXEL_LEN: usize = 4;

/// Compress `target` against `source` with the default block size
pub fn compress_by_raw_blocks<'a>(
    target: &RgbaImage,
    target_encoded: &'a [u8],
    source: Option<&RgbaImage>,
) -> Result<Cow<'a, [u8]>> {
    compress_with_block_size(target, target_encoded, source, DEFAULT_BLOCK_SIZE)
}

/// Compress `target` against `source`.
///
/// Returns `target_encoded` untouched when there is no source, the sizes
/// differ, or the delta would not be smaller.
pub fn compress_with_block_size<'a>(
    target: &RgbaImage,
    target_encoded: &'a [u8],
    source: Option<&RgbaImage>,
    block_size: u16,
) -> Result<Cow<'a, [u8]>> {
    let source = match source {
        Some(s) if s.dimensions() == target.dimensions() => s,
        Some(s) => {
            debug!(
                "Skipping delta compression: size changed from {:?} to {:?}",
                s.dimensions(),
                target.dimensions()
            );
            return Ok(Cow::Borrowed(target_encoded));
        }
        None => return Ok(Cow::Borrowed(target_encoded)),
    };
    if block_size == 0 {
        return Err(Error::InvalidConfig("delta block size must be positive".into()));
    }

    let max_len = target_encoded.len();
    let grid = BlockGrid::new(target.width(), target.height(), block_size as u32);
    let target_px = target.as_raw();
    let source_px = source.as_raw();

    let mut records = Vec::new();
    let mut block = Vec::with_capacity((block_size as usize).pow(2));

    for channel in 0..COLOR_CHANNELS {
        for index in 0..grid.count() {
            if grid.copy_if_changed(index, channel, source_px, target_px, &mut block) {
                records.push(channel);
                records.extend_from_slice(&index.to_be_bytes());
                records.extend_from_slice(&block);

                if HEADER_LEN + records.len() > max_len {
                    trace!("Delta larger than raw image after block {} of channel {}", index, channel);
                    return Ok(Cow::Borrowed(target_encoded));
                }
            }
        }
    }

    let mut out = Vec::with_capacity(HEADER_LEN + records.len() / 4);
    out.extend_from_slice(PREAMBLE);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&block_size.to_be_bytes());

    let mut encoder = DeflateEncoder::new(out, Compression::best());
    encoder.write_all(&records)?;
    let out = encoder.finish()?;

    if out.len() > max_len {
        return Ok(Cow::Borrowed(target_encoded));
    }

    debug!(
        "Delta compressed {} bytes into {} ({} bytes of changed blocks)",
        max_len,
        out.len(),
        records.len()
    );
    Ok(Cow::Owned(out))
}

/// Block layout over an image; edge blocks are clipped, never padded
struct BlockGrid {
    width: u32,
    height: u32,
    block_size: u32,
    columns: u32,
    rows: u32,
}

impl BlockGrid {
    fn new(width: u32, height: u32, block_size: u32) -> Self {
        Self {
            width,
            height,
            block_size,
            columns: width.div_ceil(block_size),
            rows: height.div_ceil(block_size),
        }
    }

    fn count(&self) -> u32 {
        self.columns * self.rows
    }

    /// Fill `out` with the target's channel bytes for block `index` and
    /// report whether any of them differ from the source.
    fn copy_if_changed(
        &self,
        index: u32,
        channel: u8,
        source: &[u8],
        target: &[u8],
        out: &mut Vec<u8>,
    ) -> bool {
        let x0 = (index % self.columns) * self.block_size;
        let y0 = (index / self.columns) * self.block_size;
        let x1 = (x0 + self.block_size).min(self.width);
        let y1 = (y0 + self.block_size).min(self.height);

        out.clear();
        let mut changed = false;
        for y in y0..y1 {
            for x in x0..x1 {
                let offset = (y as usize * self.width as usize + x as usize) * PIXEL_LEN
                    + channel as usize;
                let value = target[offset];
                changed |= value != source[offset];
                out.push(value);
            }
        }
        changed
    }
}

/// One changed block inside a delta payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub channel: u8,
    pub index: u32,
    pub data: Vec<u8>,
}

/// A decoded delta payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaPayload {
    pub format_version: u8,
    pub source_id: u16,
    pub block_size: u16,
    pub records: Vec<BlockRecord>,
}

impl DeltaPayload {
    /// Whether `bytes` starts with the delta preamble
    pub fn is_delta(bytes: &[u8]) -> bool {
        bytes.len() >= HEADER_LEN && bytes.starts_with(PREAMBLE)
    }

    /// Parse a payload produced for an image of `width` x `height` pixels;
    /// the dimensions are needed to know how long each edge block is.
    pub fn decode(bytes: &[u8], width: u32, height: u32) -> Result<Self> {
        if !Self::is_delta(bytes) {
            return Err(Error::Internal("not a delta payload".into()));
        }

        let format_version = bytes[10];
        let source_id = u16::from_be_bytes([bytes[11], bytes[12]]);
        let block_size = u16::from_be_bytes([bytes[13], bytes[14]]);
        if block_size == 0 {
            return Err(Error::Internal("delta payload has zero block size".into()));
        }

        let mut stream = Vec::new();
        DeflateDecoder::new(&bytes[HEADER_LEN..]).read_to_end(&mut stream)?;

        let grid = BlockGrid::new(width, height, block_size as u32);
        let mut records = Vec::new();
        let mut pos = 0;
        while pos < stream.len() {
            if pos + 5 > stream.len() {
                return Err(Error::Internal("truncated delta record header".into()));
            }
            let channel = stream[pos];
            let index = u32::from_be_bytes([
                stream[pos + 1],
                stream[pos + 2],
                stream[pos + 3],
                stream[pos + 4],
            ]);
            pos += 5;

            if index >= grid.count() {
                return Err(Error::Internal(format!("delta block index {} out of range", index)));
            }
            let len = grid.block_len(index);
            if pos + len > stream.len() {
                return Err(Error::Internal("truncated delta block".into()));
            }
            records.push(BlockRecord {
                channel,
                index,
                data: stream[pos..pos + len].to_vec(),
            });
            pos += len;
        }

        Ok(Self {
            format_version,
            source_id,
            block_size,
            records,
        })
    }
}

impl BlockGrid {
    fn block_len(&self, index: u32) -> usize {
        let x0 = (index % self.columns) * self.block_size;
        let y0 = (index / self.columns) * self.block_size;
        let w = (x0 + self.block_size).min(self.width) - x0;
        let h = (y0 + self.block_size).min(self.height) - y0;
        (w * h) as usize
    }
}
