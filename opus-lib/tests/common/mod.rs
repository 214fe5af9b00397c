#![allow(dead_code)]
use std::path::{Path, PathBuf};

use opus::header::MAGIC;
use opus::InterferogramLocator;

/// Samples per interferogram in generated files.
pub const NPT: usize = 16;
pub const DAT: &str = "09/04/2022";
pub const TIM: &str = "00:00:05.5 (UTC)";
pub const DUR: f64 = 2.0;

pub const STATUS: u32 = 2071;
pub const INSTRUMENT: u32 = 32;
pub const ACQUISITION: u32 = 48;
pub const FOURIER: u32 = 64;
pub const OPTICS: u32 = 96;
pub const SAMPLE: u32 = 160;
pub const SAMPLES: u32 = 2055;
const DIRECTORY: u32 = 13;

/// Locator matching interferograms of generated files.
pub fn locator() -> InterferogramLocator {
    InterferogramLocator::new(NPT as u32, 0)
}

pub fn record(name: &str, tag: i16, value: &[u8]) -> Vec<u8> {
    let mut buf = name.as_bytes().to_vec();
    buf.push(0);
    buf.extend_from_slice(&tag.to_le_bytes());
    buf.extend_from_slice(&((value.len() / 2) as i16).to_le_bytes());
    buf.extend_from_slice(value);
    buf
}

/// NUL terminated string value padded to whole 16-bit words.
pub fn text(s: &str) -> Vec<u8> {
    let mut buf = s.as_bytes().to_vec();
    buf.push(0);
    if buf.len() % 2 == 1 {
        buf.push(0);
    }
    buf
}

/// Assembles an OPUS file from blocks in the given order.
#[derive(Debug, Clone, Default)]
pub struct Builder {
    blocks: Vec<(u32, Vec<u8>)>,
}

impl Builder {
    /// A complete file with `channels` channels. Channel `i` holds
    /// `(i + 1) * [0, 1, ..., NPT - 1]` scaled by `csf`.
    pub fn em27(channels: usize, csf: f64) -> Self {
        let mut builder = Self::default();
        for _ in 0..channels {
            builder = builder.block(STATUS, status(NPT as i32, csf));
        }
        builder = builder
            .block(INSTRUMENT, record("DUR", 1, &DUR.to_le_bytes()))
            .block(ACQUISITION, record("AQM", 2, &text("DD")))
            .block(FOURIER, record("APF", 2, &text("B3")))
            .block(OPTICS, record("SRC", 2, &text("NIR")))
            .block(SAMPLE, record("SNM", 2, &text("ka")));
        for idx in 0..channels {
            builder = builder.block(SAMPLES, samples(&ramp(idx)));
        }
        builder
    }

    pub fn block(mut self, block_type: u32, data: Vec<u8>) -> Self {
        self.blocks.push((block_type, data));
        self
    }

    /// Drop every block of `block_type` after the first `keep`.
    pub fn truncate_blocks(mut self, block_type: u32, keep: usize) -> Self {
        let mut seen = 0;
        self.blocks.retain(|(t, _)| {
            if *t != block_type {
                return true;
            }
            seen += 1;
            seen <= keep
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let count = self.blocks.len() + 1;
        let directory_pointer = 24u32;
        let mut offset = directory_pointer as usize + 12 * count;

        let mut buf = MAGIC.to_vec();
        buf.extend_from_slice(&920_622.0f64.to_le_bytes());
        buf.extend_from_slice(&directory_pointer.to_le_bytes());
        buf.extend_from_slice(&(count as u32).to_le_bytes());
        buf.extend_from_slice(&(count as u32).to_le_bytes());

        let mut entry = |block_type: u32, words: usize, offset: usize| {
            buf.extend_from_slice(&block_type.to_le_bytes());
            buf.extend_from_slice(&(words as u32).to_le_bytes());
            buf.extend_from_slice(&(offset as u32).to_le_bytes());
        };
        entry(DIRECTORY, 3 * count, directory_pointer as usize);

        let mut data = Vec::new();
        for (block_type, block) in &self.blocks {
            let mut block = block.clone();
            block.resize(block.len().div_ceil(4) * 4, 0);
            entry(*block_type, block.len() / 4, offset);
            offset += block.len();
            data.extend(block);
        }
        buf.extend(data);
        buf
    }

    /// Write the file to `dir/name`.
    pub fn write(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).unwrap();
        path
    }
}

pub fn status(npt: i32, csf: f64) -> Vec<u8> {
    let mut raw = record("NPT", 0, &npt.to_le_bytes());
    raw.extend(record("CSF", 1, &csf.to_le_bytes()));
    raw.extend(record("DAT", 2, &text(DAT)));
    raw.extend(record("TIM", 2, &text(TIM)));
    raw.extend(record("END", 0, &[]));
    raw
}

/// Unscaled samples of channel `idx` in files from [Builder::em27].
pub fn ramp(idx: usize) -> Vec<f32> {
    (0..NPT).map(|i| (i * (idx + 1)) as f32).collect()
}

pub fn samples(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}
