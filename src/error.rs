//! Error types for the filesystem.
//!
//! Every namespace and I/O failure carries a POSIX-style code so callers can
//! branch on `ENOENT`/`EEXIST`/... without string matching. Storage-engine and
//! serialization failures are wrapped rather than flattened so the original
//! cause survives for logging.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FsError>;

/// POSIX-style error codes surfaced by filesystem operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
	Enoent,
	Eexist,
	Eisdir,
	Enotdir,
	Enotempty,
	Einval,
	Ebadf,
	Eloop,
	Eacces,
	Eperm,
	Enospc,
	Exdev,
	Ebusy,
}

impl ErrorCode {
	pub fn as_str(&self) -> &'static str {
		match self {
			ErrorCode::Enoent => "ENOENT",
			ErrorCode::Eexist => "EEXIST",
			ErrorCode::Eisdir => "EISDIR",
			ErrorCode::Enotdir => "ENOTDIR",
			ErrorCode::Enotempty => "ENOTEMPTY",
			ErrorCode::Einval => "EINVAL",
			ErrorCode::Ebadf => "EBADF",
			ErrorCode::Eloop => "ELOOP",
			ErrorCode::Eacces => "EACCES",
			ErrorCode::Eperm => "EPERM",
			ErrorCode::Enospc => "ENOSPC",
			ErrorCode::Exdev => "EXDEV",
			ErrorCode::Ebusy => "EBUSY",
		}
	}
}

impl std::fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Error)]
pub enum FsError {
	#[error("ENOENT: no such file or directory: {path}")]
	NotFound { path: String },

	#[error("EEXIST: file already exists: {path}")]
	AlreadyExists { path: String },

	#[error("EISDIR: illegal operation on a directory: {path}")]
	IsDirectory { path: String },

	#[error("ENOTDIR: not a directory: {path}")]
	NotADirectory { path: String },

	#[error("ENOTEMPTY: directory not empty: {path}")]
	NotEmpty { path: String },

	#[error("EINVAL: invalid argument: {message}")]
	InvalidArgument { message: String },

	#[error("EBADF: bad file descriptor: fd {fd}")]
	BadDescriptor { fd: u64 },

	#[error("ELOOP: too many levels of symbolic links: {path}")]
	SymlinkLoop { path: String },

	#[error("EACCES: permission denied: {path}")]
	AccessDenied { path: String },

	#[error("EPERM: operation not permitted: {message}")]
	NotPermitted { message: String },

	#[error("ENOSPC: no space left on device")]
	NoSpace,

	#[error("EXDEV: cross-device link not permitted")]
	CrossDevice,

	#[error("EBUSY: resource busy: {message}")]
	Busy { message: String },

	#[error("invalid pattern {pattern:?}: {reason}")]
	InvalidPattern { pattern: String, reason: String },

	#[error("operation cancelled")]
	Cancelled,

	#[error("storage engine error: {0}")]
	Storage(Box<redb::Error>),

	#[error("serialization error: {0}")]
	Serialization(String),

	#[error("blob store error: {message}")]
	BlobStore { message: String },

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

impl FsError {
	pub fn not_found(path: impl Into<String>) -> Self {
		FsError::NotFound { path: path.into() }
	}

	pub fn already_exists(path: impl Into<String>) -> Self {
		FsError::AlreadyExists { path: path.into() }
	}

	pub fn invalid(message: impl Into<String>) -> Self {
		FsError::InvalidArgument { message: message.into() }
	}

	pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
		FsError::InvalidPattern { pattern: pattern.into(), reason: reason.into() }
	}

	pub fn busy(message: impl Into<String>) -> Self {
		FsError::Busy { message: message.into() }
	}

	pub fn blob_store(message: impl Into<String>) -> Self {
		FsError::BlobStore { message: message.into() }
	}

	/// The POSIX code for this error, if it maps to one.
	pub fn code(&self) -> Option<ErrorCode> {
		match self {
			FsError::NotFound { .. } => Some(ErrorCode::Enoent),
			FsError::AlreadyExists { .. } => Some(ErrorCode::Eexist),
			FsError::IsDirectory { .. } => Some(ErrorCode::Eisdir),
			FsError::NotADirectory { .. } => Some(ErrorCode::Enotdir),
			FsError::NotEmpty { .. } => Some(ErrorCode::Enotempty),
			FsError::InvalidArgument { .. } => Some(ErrorCode::Einval),
			FsError::BadDescriptor { .. } => Some(ErrorCode::Ebadf),
			FsError::SymlinkLoop { .. } => Some(ErrorCode::Eloop),
			FsError::AccessDenied { .. } => Some(ErrorCode::Eacces),
			FsError::NotPermitted { .. } => Some(ErrorCode::Eperm),
			FsError::NoSpace => Some(ErrorCode::Enospc),
			FsError::CrossDevice => Some(ErrorCode::Exdev),
			FsError::Busy { .. } => Some(ErrorCode::Ebusy),
			_ => None,
		}
	}

	/// True when the error is the cancellation class (clean abort, partial
	/// work already undone by the enclosing transaction).
	pub fn is_cancelled(&self) -> bool {
		matches!(self, FsError::Cancelled)
	}
}

impl From<redb::Error> for FsError {
	fn from(e: redb::Error) -> Self {
		FsError::Storage(Box::new(e))
	}
}

impl From<redb::DatabaseError> for FsError {
	fn from(e: redb::DatabaseError) -> Self {
		FsError::Storage(Box::new(e.into()))
	}
}

impl From<redb::TransactionError> for FsError {
	fn from(e: redb::TransactionError) -> Self {
		FsError::Storage(Box::new(e.into()))
	}
}

impl From<redb::TableError> for FsError {
	fn from(e: redb::TableError) -> Self {
		FsError::Storage(Box::new(e.into()))
	}
}

impl From<redb::StorageError> for FsError {
	fn from(e: redb::StorageError) -> Self {
		FsError::Storage(Box::new(e.into()))
	}
}

impl From<redb::CommitError> for FsError {
	fn from(e: redb::CommitError) -> Self {
		FsError::Storage(Box::new(e.into()))
	}
}

impl From<redb::SavepointError> for FsError {
	fn from(e: redb::SavepointError) -> Self {
		FsError::Storage(Box::new(e.into()))
	}
}

impl From<bincode::Error> for FsError {
	fn from(e: bincode::Error) -> Self {
		FsError::Serialization(e.to_string())
	}
}

impl From<serde_json::Error> for FsError {
	fn from(e: serde_json::Error) -> Self {
		FsError::Serialization(e.to_string())
	}
}
