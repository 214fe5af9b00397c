//! Interferogram sample decoding.
use std::io::{Read, Seek};

use ndarray::Array2;
#[cfg(feature = "serde")]
use serde::Serialize;
use tracing::debug;

use crate::category::DirectoryEntry;
use crate::file::ChannelParameters;
use crate::header::read_data_block;
use crate::{Error, Result};

/// Which directory entry the samples of each channel are decoded from.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SampleSource {
    /// Row `i` is decoded from the `i`th interferogram block.
    #[default]
    PerChannel,
    /// Every row is decoded from the first interferogram block. This matches the
    /// output of older tooling, which ignored all but the first block.
    FirstBlock,
}

/// Decode interferogram samples into an array of shape `(channels, NPT)`.
///
/// Each row holds the little-endian `f32` samples of a channel scaled by that
/// channel's `CSF` factor.
///
/// # Errors
/// [Error::Format] if the number of channels and blocks differ, there are no
/// channels, channels disagree on `NPT`, there are not 1 or 2 blocks, or a block
/// length differs from `NPT`. [Error::MissingParameter] if `NPT` or `CSF` are
/// missing. Any ``std::io::Error`` reading blocks.
pub fn assemble<R>(
    mut r: R,
    channels: &[ChannelParameters],
    entries: &[DirectoryEntry],
    read_all_channels: bool,
    source: SampleSource,
) -> Result<Array2<f64>>
where
    R: Read + Seek,
{
    if channels.len() != entries.len() {
        return Err(Error::Format(format!(
            "number of channel parameters ({}) and interferogram blocks ({}) do not match",
            channels.len(),
            entries.len()
        )));
    }
    if channels.is_empty() {
        return Err(Error::Format("no channel parameters found".to_string()));
    }

    let count = if read_all_channels { channels.len() } else { 1 };
    let (channels, entries) = (&channels[..count], &entries[..count]);

    let npt = channels[0].spectrum.get_i32("spectrum", "NPT")?;
    for channel in &channels[1..] {
        if channel.spectrum.get_i32("spectrum", "NPT")? != npt {
            return Err(Error::Format(
                "interferograms don't have the same length".to_string(),
            ));
        }
    }
    let npt = usize::try_from(npt)
        .map_err(|_| Error::Format(format!("invalid interferogram length {npt}")))?;

    if !(1..=2).contains(&entries.len()) {
        return Err(Error::Format(format!(
            "invalid number of interferogram blocks found: {}",
            entries.len()
        )));
    }
    for entry in entries {
        if entry.length_words as usize != npt {
            return Err(Error::Format(format!(
                "interferogram block has length {}, but expected {npt}",
                entry.length_words
            )));
        }
    }

    let mut ifg = Array2::<f64>::zeros((entries.len(), npt));
    for (idx, channel) in channels.iter().enumerate() {
        let entry = match source {
            SampleSource::PerChannel => &entries[idx],
            SampleSource::FirstBlock => &entries[0],
        };
        let scale = channel.spectrum.get_f64("spectrum", "CSF")?;
        let block = read_data_block(&mut r, entry)?;
        debug!(channel = idx, offset = entry.offset, npt, scale, "decoding interferogram");

        for (dst, bytes) in ifg.row_mut(idx).iter_mut().zip(block.raw.chunks_exact(4)) {
            let sample = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            *dst = f64::from(sample) * scale;
        }
    }

    Ok(ifg)
}
