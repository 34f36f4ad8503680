use bitreader::BitReaderError;
use std::array::TryFromSliceError;
use std::io::ErrorKind;
use thiserror::Error;

/// Error types that may occur when reading a CHD file or hunk.
///
/// Discriminants follow the order of `chd_error` in libchdr, so `Error::ReadError as u32`
/// matches `CHDERR_READ_ERROR`.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
#[repr(C)]
pub enum Error {
    #[error("no error")]
    None,
    #[error("no drive interface")]
    NoInterface,
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid file")]
    InvalidFile,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("invalid data")]
    InvalidData,
    #[error("file not found")]
    FileNotFound,
    #[error("requires parent")]
    RequiresParent,
    #[error("file not writeable")]
    FileNotWriteable,
    #[error("read error")]
    ReadError,
    #[error("write error")]
    WriteError,
    #[error("codec error")]
    CodecError,
    #[error("invalid parent")]
    InvalidParent,
    #[error("hunk out of range")]
    HunkOutOfRange,
    #[error("decompression error")]
    DecompressionError,
    #[error("compression error")]
    CompressionError,
    #[error("can't create file")]
    CantCreateFile,
    #[error("can't verify file")]
    CantVerify,
    #[error("operation not supported")]
    NotSupported,
    #[error("can't find metadata")]
    MetadataNotFound,
    #[error("invalid metadata size")]
    InvalidMetadataSize,
    #[error("unsupported CHD version")]
    UnsupportedVersion,
    #[error("incomplete verify")]
    VerifyIncomplete,
    #[error("invalid metadata")]
    InvalidMetadata,
    #[error("invalid state")]
    InvalidState,
    #[error("operation pending")]
    OperationPending,
    #[error("no async operation in progress")]
    NoAsyncOperation,
    #[error("unsupported format")]
    UnsupportedFormat,
    #[error("undocumented error")]
    Unknown,
}

/// Returns the human readable description of an error code.
pub fn error_string(err: &Error) -> &'static str {
    match err {
        Error::None => "no error",
        Error::NoInterface => "no drive interface",
        Error::OutOfMemory => "out of memory",
        Error::InvalidFile => "invalid file",
        Error::InvalidParameter => "invalid parameter",
        Error::InvalidData => "invalid data",
        Error::FileNotFound => "file not found",
        Error::RequiresParent => "requires parent",
        Error::FileNotWriteable => "file not writeable",
        Error::ReadError => "read error",
        Error::WriteError => "write error",
        Error::CodecError => "codec error",
        Error::InvalidParent => "invalid parent",
        Error::HunkOutOfRange => "hunk out of range",
        Error::DecompressionError => "decompression error",
        Error::CompressionError => "compression error",
        Error::CantCreateFile => "can't create file",
        Error::CantVerify => "can't verify file",
        Error::NotSupported => "operation not supported",
        Error::MetadataNotFound => "can't find metadata",
        Error::InvalidMetadataSize => "invalid metadata size",
        Error::UnsupportedVersion => "unsupported CHD version",
        Error::VerifyIncomplete => "incomplete verify",
        Error::InvalidMetadata => "invalid metadata",
        Error::InvalidState => "invalid state",
        Error::OperationPending => "operation pending",
        Error::NoAsyncOperation => "no async operation in progress",
        Error::UnsupportedFormat => "unsupported format",
        Error::Unknown => "undocumented error",
    }
}

impl From<TryFromSliceError> for Error {
    fn from(_: TryFromSliceError) -> Self {
        Error::InvalidFile
    }
}

impl From<BitReaderError> for Error {
    fn from(_: BitReaderError) -> Self {
        Error::ReadError
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::NotFound => Error::FileNotFound,
            ErrorKind::PermissionDenied => Error::NotSupported,
            ErrorKind::AlreadyExists => Error::CantCreateFile,
            ErrorKind::InvalidInput => Error::InvalidParameter,
            ErrorKind::InvalidData => Error::InvalidData,
            ErrorKind::WriteZero => Error::WriteError,
            ErrorKind::UnexpectedEof => Error::ReadError,
            ErrorKind::Unsupported => Error::NotSupported,
            ErrorKind::OutOfMemory => Error::OutOfMemory,
            _ => Error::Unknown,
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        let kind = match err {
            Error::FileNotFound => ErrorKind::NotFound,
            Error::InvalidParameter | Error::HunkOutOfRange => ErrorKind::InvalidInput,
            Error::ReadError => ErrorKind::UnexpectedEof,
            Error::OutOfMemory => ErrorKind::OutOfMemory,
            Error::NotSupported => ErrorKind::Unsupported,
            _ => ErrorKind::InvalidData,
        };
        std::io::Error::new(kind, err)
    }
}

/// Result type for `chd_reader`.
pub type Result<T> = std::result::Result<T, Error>;
