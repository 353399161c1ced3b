//! Runtime settings for the coded pipeline.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CodedError, Result};

/// Cache directory override.
pub const ENV_CACHE_DIR: &str = "CODED_CACHE_DIR";
/// Directory of template overrides.
pub const ENV_TEMPLATES: &str = "CODED_TEMPLATES";
/// Compiler override.
pub const ENV_COMPILER: &str = "CODED_COMPILER";
/// Build timeout in seconds.
pub const ENV_BUILD_TIMEOUT: &str = "CODED_BUILD_TIMEOUT";
/// `0`, `false`, `no` or `off` forbids compiling case-supplied code.
pub const ENV_ALLOW_SYSTEM_OPERATIONS: &str = "CODED_ALLOW_SYSTEM_OPERATIONS";

/// Where artifacts go, which compiler builds them and whether building is
/// allowed at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
	pub cache_dir: PathBuf,
	pub templates_dir: Option<PathBuf>,
	pub compiler: Option<PathBuf>,
	pub build_timeout: Option<Duration>,
	pub allow_system_operations: bool,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			cache_dir: default_cache_dir(),
			templates_dir: None,
			compiler: None,
			build_timeout: None,
			allow_system_operations: true,
		}
	}
}

impl Settings {
	/// Defaults overridden by the `CODED_*` environment variables.
	pub fn from_env() -> Result<Self> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Defaults overridden through `lookup`, which maps a variable name to
	/// its value.
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
		let mut settings = Self::default();
		let lookup = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

		if let Some(dir) = lookup(ENV_CACHE_DIR) {
			settings.cache_dir = PathBuf::from(dir);
		}
		settings.templates_dir = lookup(ENV_TEMPLATES).map(PathBuf::from);
		settings.compiler = lookup(ENV_COMPILER).map(PathBuf::from);
		if let Some(secs) = lookup(ENV_BUILD_TIMEOUT) {
			settings.build_timeout = Some(parse_timeout(ENV_BUILD_TIMEOUT, &secs)?);
		}
		if let Some(flag) = lookup(ENV_ALLOW_SYSTEM_OPERATIONS) {
			settings.allow_system_operations = parse_flag(&flag);
		}

		Ok(settings)
	}
}

/// `<user cache dir>/coded/artifacts`, or a directory under the system
/// temporary directory when there is no user cache.
pub fn default_cache_dir() -> PathBuf {
	dirs::cache_dir()
		.unwrap_or_else(std::env::temp_dir)
		.join("coded")
		.join("artifacts")
}

/// Parses a timeout in (possibly fractional) seconds. Zero and negative
/// values are rejected.
pub fn parse_timeout(key: &str, secs: &str) -> Result<Duration> {
	let value: f64 = secs
		.parse()
		.map_err(|_| CodedError::configuration(key, format!("`{secs}` is not a number of seconds")))?;
	if !value.is_finite() || value <= 0.0 {
		return Err(CodedError::configuration(key, format!("`{secs}` must be a positive number of seconds")));
	}
	Ok(Duration::from_secs_f64(value))
}

fn parse_flag(value: &str) -> bool {
	!matches!(value.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off")
}
