//! Reading complete OPUS files.
//!
//! Reference: <https://tccon-wiki.caltech.edu/Main/I2SAndOPUSHeaders>
use std::fmt::Display;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ndarray::Array2;
#[cfg(feature = "serde")]
use serde::Serialize;
use tracing::{debug, trace};
use typed_builder::TypedBuilder;

use crate::category::{BlockCategory, Directory, DirectoryEntry, InterferogramLocator};
use crate::header::{read_data_block, read_directory, read_parameter_block, FileHeader};
use crate::interferogram::{assemble, SampleSource};
use crate::parameter::ParameterBlock;
use crate::timestamp::{measurement_time, TimestampMode};
use crate::{Error, Result};

/// What to do with the interferogram blocks of a file.
#[cfg_attr(feature = "serde", derive(Serialize), serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InterferogramMode {
    /// Do not touch the interferogram blocks.
    Skip,
    /// Read the interferogram blocks to make sure they are complete, but do not
    /// decode them.
    Validate,
    /// Decode the interferogram into [OpusFile::interferogram].
    #[default]
    Read,
}

impl FromStr for InterferogramMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "skip" => Ok(Self::Skip),
            "validate" => Ok(Self::Validate),
            "read" => Ok(Self::Read),
            _ => Err(format!(
                "invalid interferogram mode {s:?}; expected skip, validate, or read"
            )),
        }
    }
}

impl Display for InterferogramMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skip => write!(f, "skip"),
            Self::Validate => write!(f, "validate"),
            Self::Read => write!(f, "read"),
        }
    }
}

/// Options for [OpusFile::read].
///
/// # Example
/// ```
/// use opus::{InterferogramMode, ReadOptions, TimestampMode};
///
/// let opts = ReadOptions::builder()
///     .timestamp_mode(TimestampMode::End)
///     .interferogram_mode(InterferogramMode::Skip)
///     .build();
/// assert!(opts.read_all_channels);
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct ReadOptions {
    /// Whether measurement times refer to the start or end of a scan.
    #[builder(default)]
    pub timestamp_mode: TimestampMode,
    #[builder(default)]
    pub interferogram_mode: InterferogramMode,
    /// When false only the first channel is read.
    #[builder(default = true)]
    pub read_all_channels: bool,
    /// Identifies interferogram blocks by their length.
    #[builder(default)]
    pub locator: InterferogramLocator,
    #[builder(default)]
    pub sample_source: SampleSource,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// The parameter groups of a single spectrometer channel.
///
/// Only `spectrum` differs between the channels of a file.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelParameters {
    /// Data status parameters (`DBTDSTAT`)
    pub spectrum: ParameterBlock,
    /// Instrument status parameters (`DBTINSTR`)
    pub instrument: ParameterBlock,
    /// Acquisition parameters (`DBTAQPAR`)
    pub acquisition: ParameterBlock,
    /// Optics parameters (`DBTPRCPAR`)
    pub optics: ParameterBlock,
    /// Sample origin parameters (`DBTORGPAR`)
    pub sample: ParameterBlock,
    /// Fourier transform parameters (`DBTFTPAR`)
    pub fourier_transform: ParameterBlock,
}

impl ChannelParameters {
    /// A copy of these parameters with `spectrum` replaced.
    #[must_use]
    pub fn with_spectrum(&self, spectrum: ParameterBlock) -> Self {
        Self {
            spectrum,
            ..self.clone()
        }
    }

    /// UTC time of this channel's measurement.
    ///
    /// # Errors
    /// See [measurement_time].
    pub fn measurement_time(&self, mode: TimestampMode) -> Result<DateTime<Utc>> {
        measurement_time(&self.spectrum, &self.instrument, mode)
    }
}

/// A decoded OPUS file.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct OpusFile {
    pub header: FileHeader,
    /// All directory entries in file order.
    pub directory: Vec<DirectoryEntry>,
    pub channel_parameters: Vec<ChannelParameters>,
    /// Measurement time of each entry in `channel_parameters`.
    pub measurement_times: Vec<DateTime<Utc>>,
    /// Samples of shape `(channels, NPT)`, only with [InterferogramMode::Read].
    pub interferogram: Option<Array2<f64>>,
}

impl OpusFile {
    /// Read the OPUS file at `path`.
    ///
    /// # Errors
    /// [Error::Format] for any structural problem, [Error::MissingParameter] or
    /// [Error::Timestamp] if the measurement time cannot be derived, or any
    /// ``std::io::Error`` opening or reading. A file that fails to read never
    /// produces a partial result.
    pub fn read<P: AsRef<Path>>(path: P, opts: &ReadOptions) -> Result<Self> {
        let path = path.as_ref();
        debug!(?path, mode = %opts.interferogram_mode, "reading OPUS file");
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), opts)
    }

    /// Read an OPUS file from `r`, which must be positioned at the magic sequence.
    ///
    /// # Errors
    /// See [OpusFile::read].
    pub fn from_reader<R>(mut r: R, opts: &ReadOptions) -> Result<Self>
    where
        R: Read + Seek,
    {
        let header = FileHeader::read(&mut r)?;
        trace!(?header, "header");
        let directory = Directory::new(read_directory(&mut r, &header)?, &opts.locator);
        directory.validate()?;

        let required = |category: BlockCategory| {
            directory
                .first(category)
                .ok_or_else(|| Error::Format(format!("no {category} block found")))
        };
        let status = directory.entries(BlockCategory::DataStatus);
        let first = ChannelParameters {
            spectrum: read_parameter_block(&mut r, &required(BlockCategory::DataStatus)?)?,
            instrument: read_parameter_block(&mut r, &required(BlockCategory::Instrument)?)?,
            acquisition: read_parameter_block(&mut r, &required(BlockCategory::Acquisition)?)?,
            optics: read_parameter_block(&mut r, &required(BlockCategory::Processing)?)?,
            sample: read_parameter_block(&mut r, &required(BlockCategory::SampleOrigin)?)?,
            fourier_transform: read_parameter_block(
                &mut r,
                &required(BlockCategory::FourierTransform)?,
            )?,
        };

        let count = if opts.read_all_channels {
            status.len()
        } else {
            1
        };
        let mut channel_parameters = Vec::with_capacity(count);
        for entry in status.iter().take(count).skip(1) {
            let spectrum = read_parameter_block(&mut r, entry)?;
            channel_parameters.push(first.with_spectrum(spectrum));
        }
        channel_parameters.insert(0, first);

        let ifg_entries = directory.entries(BlockCategory::Interferogram);
        let interferogram = match opts.interferogram_mode {
            InterferogramMode::Skip => None,
            InterferogramMode::Validate => {
                for entry in &ifg_entries {
                    read_data_block(&mut r, entry)?;
                }
                None
            }
            InterferogramMode::Read => {
                let n = channel_parameters.len().min(ifg_entries.len());
                Some(assemble(
                    &mut r,
                    &channel_parameters,
                    &ifg_entries[..n],
                    opts.read_all_channels,
                    opts.sample_source,
                )?)
            }
        };

        let measurement_times = channel_parameters
            .iter()
            .map(|c| c.measurement_time(opts.timestamp_mode))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            channels = channel_parameters.len(),
            interferogram = interferogram.is_some(),
            "read OPUS file"
        );
        Ok(OpusFile {
            header,
            directory: directory.all().to_vec(),
            channel_parameters,
            measurement_times,
            interferogram,
        })
    }

    /// Number of channels read.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channel_parameters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_strings() {
        for mode in [
            InterferogramMode::Skip,
            InterferogramMode::Validate,
            InterferogramMode::Read,
        ] {
            assert_eq!(mode.to_string().parse::<InterferogramMode>().unwrap(), mode);
        }
        assert!("load".parse::<InterferogramMode>().is_err());
    }

    #[test]
    fn default_options() {
        let opts = ReadOptions::default();

        assert_eq!(opts.timestamp_mode, TimestampMode::Start);
        assert_eq!(opts.interferogram_mode, InterferogramMode::Read);
        assert!(opts.read_all_channels);
        assert_eq!(opts.locator, InterferogramLocator::default());
        assert_eq!(opts.sample_source, SampleSource::PerChannel);
    }
}
