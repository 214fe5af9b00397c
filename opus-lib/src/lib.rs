#![doc = include_str!("../README.md")]

mod error;

pub mod category;
pub mod detect;
pub mod file;
pub mod header;
pub mod interferogram;
pub mod lock;
pub mod parameter;
pub mod timestamp;

pub use category::{BlockCategory, DirectoryEntry, InterferogramLocator};
pub use detect::{
    detect_corrupt_files, CompiledValidator, CorruptionReport, Detector, Validator,
    ValidatorOutput, LOCK_TIMEOUT,
};
pub use error::{Error, Result};
pub use file::{ChannelParameters, InterferogramMode, OpusFile, ReadOptions};
pub use header::FileHeader;
pub use interferogram::SampleSource;
pub use parameter::{ParameterBlock, ParameterValue};
pub use timestamp::TimestampMode;
