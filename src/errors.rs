use thiserror::Error;

#[derive(Debug, Error)]
pub enum SbtError {
    /// Raised for internal errors in the libraries.  Should not happen.
    #[error("internal error: {message:?}")]
    Internal { message: String },

    #[error("unknown molecule type: {moltype}")]
    UnknownMoleculeType { moltype: String },

    #[error("incompatible sketches: {reason}")]
    IncompatibleSketch { reason: String },

    #[error("filter size mismatch: {left:?} != {right:?}")]
    FilterSizeMismatch { left: Vec<u64>, right: Vec<u64> },

    #[error("corrupt index: {message}")]
    CorruptIndex { message: String },

    #[error("invalid sketch parameters: {message}")]
    InvalidSketchParams { message: String },

    #[error("Can only set {message:?} if the MinHash is empty")]
    NonEmptyMinHash { message: String },

    #[error("invalid DNA character in input k-mer: {message}")]
    InvalidDNA { message: String },

    #[error("invalid protein character in input: {message}")]
    InvalidProt { message: String },

    #[error(transparent)]
    StorageError(#[from] crate::index::storage::StorageError),

    #[error(transparent)]
    SerdeError(#[from] serde_json::error::Error),

    #[error(transparent)]
    NifflerError(#[from] niffler::Error),

    #[error(transparent)]
    CsvError(#[from] csv::Error),

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

impl SbtError {
    pub(crate) fn incompatible<S: Into<String>>(reason: S) -> SbtError {
        SbtError::IncompatibleSketch {
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt<S: Into<String>>(message: S) -> SbtError {
        SbtError::CorruptIndex {
            message: message.into(),
        }
    }

    /// Short name of the error kind, used for user-facing diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            SbtError::Internal { .. } => "Internal",
            SbtError::UnknownMoleculeType { .. } => "UnknownMoleculeType",
            SbtError::IncompatibleSketch { .. } => "IncompatibleSketch",
            SbtError::FilterSizeMismatch { .. } => "FilterSizeMismatch",
            SbtError::CorruptIndex { .. } => "CorruptIndex",
            SbtError::InvalidSketchParams { .. } => "InvalidSketchParams",
            SbtError::NonEmptyMinHash { .. } => "NonEmptyMinHash",
            SbtError::InvalidDNA { .. } => "InvalidDNA",
            SbtError::InvalidProt { .. } => "InvalidProt",
            SbtError::StorageError(_) => "Storage",
            SbtError::SerdeError(_) => "Serde",
            SbtError::NifflerError(_) => "Niffler",
            SbtError::CsvError(_) => "Csv",
            SbtError::IOError(_) => "IO",
        }
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbtErrorCode {
    // no error
    NoError = 0,
    // internals
    Internal = 2,
    // Compatibility errors
    IncompatibleSketch = 1_01,
    NonEmptyMinHash = 1_06,
    InvalidSketchParams = 1_08,
    // Input sequence errors
    InvalidDNA = 11_01,
    InvalidProt = 11_02,
    UnknownMoleculeType = 11_04,
    // index-related errors
    CorruptIndex = 12_01,
    Storage = 12_02,
    FilterSizeMismatch = 12_03,
    // external errors
    Io = 100_001,
    SerdeError = 100_004,
    NifflerError = 100_005,
    CsvError = 100_006,
}

impl SbtErrorCode {
    pub fn from_error(error: &SbtError) -> SbtErrorCode {
        match error {
            SbtError::Internal { .. } => SbtErrorCode::Internal,
            SbtError::UnknownMoleculeType { .. } => SbtErrorCode::UnknownMoleculeType,
            SbtError::IncompatibleSketch { .. } => SbtErrorCode::IncompatibleSketch,
            SbtError::FilterSizeMismatch { .. } => SbtErrorCode::FilterSizeMismatch,
            SbtError::CorruptIndex { .. } => SbtErrorCode::CorruptIndex,
            SbtError::InvalidSketchParams { .. } => SbtErrorCode::InvalidSketchParams,
            SbtError::NonEmptyMinHash { .. } => SbtErrorCode::NonEmptyMinHash,
            SbtError::InvalidDNA { .. } => SbtErrorCode::InvalidDNA,
            SbtError::InvalidProt { .. } => SbtErrorCode::InvalidProt,
            SbtError::StorageError { .. } => SbtErrorCode::Storage,
            SbtError::SerdeError { .. } => SbtErrorCode::SerdeError,
            SbtError::NifflerError { .. } => SbtErrorCode::NifflerError,
            SbtError::CsvError { .. } => SbtErrorCode::CsvError,
            SbtError::IOError { .. } => SbtErrorCode::Io,
        }
    }

    /// Process exit status for the command line interface.
    ///
    /// Each error family gets its own status so scripts can tell them apart.
    pub fn exit_code(self) -> i32 {
        match self {
            SbtErrorCode::NoError => 0,
            SbtErrorCode::IncompatibleSketch => 3,
            SbtErrorCode::CorruptIndex | SbtErrorCode::FilterSizeMismatch => 4,
            SbtErrorCode::UnknownMoleculeType => 5,
            _ => 1,
        }
    }
}
