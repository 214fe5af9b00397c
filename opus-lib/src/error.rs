use crate::parameter::BlockKind;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The byte stream does not conform to the OPUS structure.
    #[error("invalid OPUS file: {0}")]
    Format(String),

    /// A block decoded to a different kind than the caller expected.
    #[error("expected a {expected} block, got a {actual} block")]
    TypeMismatch {
        expected: BlockKind,
        actual: BlockKind,
    },

    /// A required parameter is missing from a block or has the wrong type.
    #[error("parameter {key} missing or invalid in {block} block")]
    MissingParameter { block: String, key: String },

    #[error("invalid measurement time: {0}")]
    Timestamp(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Building the external validator failed.
    #[error("command '{command}' failed with exit code {status:?}, stderr: {stderr}, stdout: {stdout}")]
    Compile {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// The external validator exited unsuccessfully.
    #[error("OPUS file validator failed with exit code {status:?}, stderr: {stderr}, stdout: {stdout}")]
    Validator {
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// The validator output did not have the expected layout.
    #[error("unexpected validator output: {0}")]
    ValidatorContract(String),
}

pub type Result<T> = std::result::Result<T, Error>;
