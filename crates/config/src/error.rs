//! Error types for case file parsing.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when reading a case file.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error parsing KDL syntax.
	#[error("KDL parse error: {0}")]
	Kdl(#[from] kdl::KdlError),

	/// Error reading a case file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// A required field is missing.
	#[error("missing required field: {0}")]
	MissingField(String),

	/// A field is present but unusable.
	#[error("invalid value for `{key}`: {reason}")]
	InvalidValue {
		/// Dotted path of the field.
		key: String,
		/// What is wrong with it.
		reason: String,
	},

	/// A top-level node that is neither `coded` nor a known extension point.
	#[error("unknown section `{0}` (expected `coded`, `function1` or `diffusivity`)")]
	UnknownSection(String),
}

/// Result type for case file operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
