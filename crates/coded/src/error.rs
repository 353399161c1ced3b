//! Error types for the coded pipeline.

use std::path::PathBuf;

use thiserror::Error;

use crate::fingerprint::Fingerprint;

/// Failure of one pipeline stage.
///
/// Results are memoized per fingerprint and per library path and shared with
/// every waiting caller, hence `Clone`.
#[derive(Debug, Clone, Error)]
pub enum CodedError {
	/// A required entry is missing or malformed.
	#[error("configuration error in `{key}`: {reason}")]
	Configuration {
		/// Offending configuration key.
		key: String,
		/// What is wrong with it.
		reason: String,
	},

	/// A template references a slot the extension point does not declare.
	#[error("template `{template}`: {detail}")]
	Synthesis {
		/// Template identifier (the extension type name).
		template: String,
		/// Description of the mismatch.
		detail: String,
	},

	/// The toolchain failed, timed out or could not be run.
	#[error("build failed ({}):\n{diagnostics}", fingerprint.as_ref().map_or_else(|| "toolchain".to_string(), |f| f.short().to_string()))]
	Build {
		/// Fingerprint being built, if the failure happened past discovery.
		fingerprint: Option<Fingerprint>,
		/// Compiler output or the underlying system error.
		diagnostics: String,
	},

	/// The built library could not be opened or did not satisfy the ABI.
	#[error("failed to load {}: {reason}", path.display())]
	Load {
		/// Artifact path.
		path: PathBuf,
		/// Loader error or validation failure.
		reason: String,
	},
}

impl CodedError {
	pub(crate) fn configuration(key: impl Into<String>, reason: impl Into<String>) -> Self {
		Self::Configuration {
			key: key.into(),
			reason: reason.into(),
		}
	}

	pub(crate) fn load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
		Self::Load {
			path: path.into(),
			reason: reason.into(),
		}
	}
}

/// Failure to construct one named extension.
#[derive(Debug, Clone, Error)]
#[error("coded {type_name} `{name}`: {source}")]
pub struct ExtensionError {
	/// Extension point type name.
	pub type_name: &'static str,
	/// Code name from the descriptor, or `<unnamed>` when it is missing.
	pub name: String,
	/// Root cause.
	#[source]
	pub source: CodedError,
}

/// Result type for pipeline stages.
pub type Result<T> = std::result::Result<T, CodedError>;
