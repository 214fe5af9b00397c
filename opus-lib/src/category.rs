//! Directory entry classification.
use std::fmt::Display;

#[cfg(feature = "serde")]
use serde::Serialize;
use tracing::debug;

use crate::{Error, Result};

/// Bit shift of the parameter type field in a block type code.
pub const PARM_SHIFT: u32 = 4;
/// Mask of the parameter type field after shifting.
pub const PARM_MASK: u32 = 0x3f;

/// Semantic category of a directory entry.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockCategory {
    /// No parameter type; data blocks and the directory itself.
    Anonymous,
    /// Data status parameters, one per channel.
    DataStatus,
    Instrument,
    Acquisition,
    FourierTransform,
    Plot,
    /// Processing parameters, which hold the optics settings.
    Processing,
    GasChromatography,
    LibrarySearch,
    Communication,
    SampleOrigin,
    /// Vendor reserved parameter types 11 through 63.
    Reserved(u8),
    /// Anonymous block with the length of an interferogram. Never found on disk.
    Interferogram,
}

impl BlockCategory {
    /// Decode the category from a raw 32-bit block type code.
    #[must_use]
    pub fn from_block_type(block_type: u32) -> Self {
        match (block_type >> PARM_SHIFT) & PARM_MASK {
            0 => Self::Anonymous,
            1 => Self::DataStatus,
            2 => Self::Instrument,
            3 => Self::Acquisition,
            4 => Self::FourierTransform,
            5 => Self::Plot,
            6 => Self::Processing,
            7 => Self::GasChromatography,
            8 => Self::LibrarySearch,
            9 => Self::Communication,
            10 => Self::SampleOrigin,
            // masked to 6 bits
            n => Self::Reserved(n as u8),
        }
    }

    /// Category name as used by OPUS, e.g., `DBTDSTAT`.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Anonymous => String::new(),
            Self::DataStatus => "DBTDSTAT".to_string(),
            Self::Instrument => "DBTINSTR".to_string(),
            Self::Acquisition => "DBTAQPAR".to_string(),
            Self::FourierTransform => "DBTFTPAR".to_string(),
            Self::Plot => "DBTPLTPAR".to_string(),
            Self::Processing => "DBTPRCPAR".to_string(),
            Self::GasChromatography => "DBTGCPAR".to_string(),
            Self::LibrarySearch => "DBTLIBPAR".to_string(),
            Self::Communication => "DBTCOMPAR".to_string(),
            Self::SampleOrigin => "DBTORGPAR".to_string(),
            Self::Reserved(n) => format!("DBTPARM{n}"),
            Self::Interferogram => "interferogram".to_string(),
        }
    }

    /// True for categories whose blocks hold raw data rather than parameters.
    #[must_use]
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Anonymous | Self::Interferogram)
    }
}

impl Display for BlockCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One slot of the OPUS directory.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Encoded block type (32-bit mask)
    pub block_type: u32,
    /// Block length in 32-bit words
    pub length_words: u32,
    /// Byte offset of the block from the start of the file
    pub offset: u32,
    pub category: BlockCategory,
}

impl DirectoryEntry {
    /// Size of an on-disk directory entry.
    pub const LEN: usize = 12;

    /// Classify a raw directory triple.
    #[must_use]
    pub fn new(block_type: u32, length_words: u32, offset: u32) -> Self {
        Self {
            block_type,
            length_words,
            offset,
            category: BlockCategory::from_block_type(block_type),
        }
    }

    /// Block length in bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        4 * self.length_words as usize
    }
}

/// Identifies anonymous blocks that carry interferogram samples by their length.
///
/// The canonical length is instrument specific; the default fits the EM27/SUN.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterferogramLocator {
    pub expected_length_words: u32,
    pub tolerance_words: u32,
}

impl Default for InterferogramLocator {
    fn default() -> Self {
        Self {
            expected_length_words: 228_512,
            tolerance_words: 200,
        }
    }
}

impl InterferogramLocator {
    #[must_use]
    pub fn new(expected_length_words: u32, tolerance_words: u32) -> Self {
        Self {
            expected_length_words,
            tolerance_words,
        }
    }

    #[must_use]
    pub fn matches(&self, entry: &DirectoryEntry) -> bool {
        entry.category == BlockCategory::Anonymous
            && entry.length_words.abs_diff(self.expected_length_words) <= self.tolerance_words
    }
}

/// Parameter categories every readable file must contain at least once.
pub const REQUIRED: [BlockCategory; 6] = [
    BlockCategory::DataStatus,
    BlockCategory::Instrument,
    BlockCategory::Acquisition,
    BlockCategory::Processing,
    BlockCategory::FourierTransform,
    BlockCategory::SampleOrigin,
];

/// The classified directory of a file, in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct Directory {
    entries: Vec<DirectoryEntry>,
}

impl Directory {
    /// Classify `entries`, relabelling interferogram sized anonymous blocks.
    #[must_use]
    pub fn new(entries: Vec<DirectoryEntry>, locator: &InterferogramLocator) -> Self {
        let entries = entries
            .into_iter()
            .map(|mut entry| {
                if locator.matches(&entry) {
                    entry.category = BlockCategory::Interferogram;
                }
                entry
            })
            .collect();
        Self { entries }
    }

    /// All entries, including ignored anonymous ones.
    #[must_use]
    pub fn all(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    /// Entries of `category`, in file order.
    #[must_use]
    pub fn entries(&self, category: BlockCategory) -> Vec<DirectoryEntry> {
        self.entries
            .iter()
            .filter(|e| e.category == category)
            .copied()
            .collect()
    }

    /// First entry of `category`.
    #[must_use]
    pub fn first(&self, category: BlockCategory) -> Option<DirectoryEntry> {
        self.entries.iter().find(|e| e.category == category).copied()
    }

    /// Check that all required categories are present and that there is exactly
    /// one interferogram block for each data status block.
    ///
    /// # Errors
    /// [Error::Format] naming the first violated category.
    pub fn validate(&self) -> Result<()> {
        for category in REQUIRED {
            if self.first(category).is_none() {
                return Err(Error::Format(format!("no {category} block found")));
            }
        }

        let channels = self.entries(BlockCategory::DataStatus).len();
        let interferograms = self.entries(BlockCategory::Interferogram).len();
        if interferograms != channels {
            return Err(Error::Format(format!(
                "found {interferograms} interferogram blocks for {channels} {} blocks",
                BlockCategory::DataStatus
            )));
        }
        debug!(channels, entries = self.entries.len(), "directory is complete");
        Ok(())
    }
}
