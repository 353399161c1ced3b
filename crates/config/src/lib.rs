//! Case files for coded extensions.
//!
//! A case file is KDL (v2). It holds an optional `coded` settings section and
//! any number of entries, one node per coded extension:
//!
//! ```kdl
//! coded {
//!     cache-dir "/tmp/coded"
//!     build-timeout 120
//!     allow-system-operations #true
//! }
//!
//! function1 {
//!     name "pistonPosition"
//!     code "return 0.13 - 0.1 * x;"
//! }
//!
//! diffusivity "inverseDistance" {
//!     code-include "#include <float.h>"
//!     code "return 1.0 / (distance + DBL_EPSILON);"
//! }
//! ```
//!
//! Multi-line code reads best as a KDL multi-line or raw string. Entries are
//! handed to the pipeline through [`KdlCodeDict`].

pub mod error;
pub mod kdl_util;

use std::path::{Path, PathBuf};
use std::time::Duration;

use coded::Settings;
use kdl::{KdlDocument, KdlNode};
use tracing::debug;

pub use error::{ConfigError, Result};
pub use kdl_util::KdlCodeDict;

use crate::kdl_util::{get_bool, get_number, get_string, invalid};

const SETTINGS_SECTION: &str = "coded";

/// Extension point an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
	/// `function1` nodes.
	Function1,
	/// `diffusivity` nodes.
	Diffusivity,
}

impl EntryKind {
	/// Node name in the case file.
	pub fn section(self) -> &'static str {
		match self {
			Self::Function1 => "function1",
			Self::Diffusivity => "diffusivity",
		}
	}

	fn from_section(name: &str) -> Option<Self> {
		match name {
			"function1" => Some(Self::Function1),
			"diffusivity" => Some(Self::Diffusivity),
			_ => None,
		}
	}
}

/// One coded entry.
#[derive(Debug, Clone)]
pub struct CaseEntry {
	pub kind: EntryKind,
	pub name: String,
	node: KdlNode,
}

impl CaseEntry {
	/// Read access for the pipeline.
	pub fn dict(&self) -> KdlCodeDict<'_> {
		KdlCodeDict::new(&self.node)
	}

	/// The entry's node, as written.
	pub fn node(&self) -> &KdlNode {
		&self.node
	}
}

/// Settings given in the `coded` section. Unset fields keep the base value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsOverrides {
	pub cache_dir: Option<PathBuf>,
	pub templates_dir: Option<PathBuf>,
	pub compiler: Option<PathBuf>,
	pub build_timeout: Option<Duration>,
	pub allow_system_operations: Option<bool>,
}

impl SettingsOverrides {
	/// Applies the overrides on top of `base`.
	pub fn apply(&self, mut base: Settings) -> Settings {
		if let Some(dir) = &self.cache_dir {
			base.cache_dir = dir.clone();
		}
		if let Some(dir) = &self.templates_dir {
			base.templates_dir = Some(dir.clone());
		}
		if let Some(compiler) = &self.compiler {
			base.compiler = Some(compiler.clone());
		}
		if let Some(timeout) = self.build_timeout {
			base.build_timeout = Some(timeout);
		}
		if let Some(allow) = self.allow_system_operations {
			base.allow_system_operations = allow;
		}
		base
	}
}

/// A parsed case file.
#[derive(Debug, Clone, Default)]
pub struct CaseFile {
	pub settings: SettingsOverrides,
	pub entries: Vec<CaseEntry>,
}

impl CaseFile {
	/// Looks an entry up by code name.
	pub fn get(&self, name: &str) -> Option<&CaseEntry> {
		self.entries.iter().find(|entry| entry.name == name)
	}

	/// Entries of one kind, in file order.
	pub fn entries_of(&self, kind: EntryKind) -> impl Iterator<Item = &CaseEntry> {
		self.entries.iter().filter(move |entry| entry.kind == kind)
	}
}

/// Parses a case file from text.
pub fn parse_case(input: &str) -> Result<CaseFile> {
	let doc: KdlDocument = input.parse()?;
	let mut case = CaseFile::default();
	let mut seen_settings = false;

	for node in doc.nodes() {
		let section = node.name().value();
		if section == SETTINGS_SECTION {
			if seen_settings {
				return Err(ConfigError::InvalidValue {
					key: SETTINGS_SECTION.to_string(),
					reason: "section given twice".to_string(),
				});
			}
			seen_settings = true;
			if let Some(children) = node.children() {
				case.settings = parse_settings(children)?;
			}
			continue;
		}

		let kind = EntryKind::from_section(section).ok_or_else(|| ConfigError::UnknownSection(section.to_string()))?;
		let name = coded::CodeDict::get_str(&KdlCodeDict::new(node), coded::descriptor::NAME_KEY)
			.map(str::trim)
			.filter(|name| !name.is_empty())
			.ok_or_else(|| ConfigError::MissingField(format!("{section}.name")))?
			.to_string();
		if case.get(&name).is_some() {
			return Err(invalid(section, "name", format!("`{name}` is defined more than once")));
		}

		case.entries.push(CaseEntry {
			kind,
			name,
			node: node.clone(),
		});
	}

	debug!(entries = case.entries.len(), "Parsed case file");
	Ok(case)
}

/// Reads and parses a case file.
///
/// Relative `cache-dir` and `templates-dir` resolve against the file's
/// directory.
pub fn load_case(path: impl AsRef<Path>) -> Result<CaseFile> {
	let path = path.as_ref();
	let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
		path: path.to_path_buf(),
		error: e,
	})?;
	let mut case = parse_case(&content)?;

	let base = path.parent().unwrap_or(Path::new(""));
	for dir in [&mut case.settings.cache_dir, &mut case.settings.templates_dir].into_iter().flatten() {
		if dir.is_relative() {
			*dir = base.join(&*dir);
		}
	}
	Ok(case)
}

fn parse_settings(doc: &KdlDocument) -> Result<SettingsOverrides> {
	const KNOWN: &[&str] = &["cache-dir", "templates-dir", "compiler", "build-timeout", "allow-system-operations"];
	if let Some(unknown) = doc.nodes().iter().map(|n| n.name().value()).find(|name| !KNOWN.contains(name)) {
		return Err(invalid(SETTINGS_SECTION, unknown, "unknown setting"));
	}

	let build_timeout = get_number(doc, SETTINGS_SECTION, "build-timeout")?
		.map(|secs| {
			if secs.is_finite() && secs > 0.0 {
				Ok(Duration::from_secs_f64(secs))
			} else {
				Err(invalid(SETTINGS_SECTION, "build-timeout", "must be a positive number of seconds"))
			}
		})
		.transpose()?;

	Ok(SettingsOverrides {
		cache_dir: get_string(doc, SETTINGS_SECTION, "cache-dir")?.map(PathBuf::from),
		templates_dir: get_string(doc, SETTINGS_SECTION, "templates-dir")?.map(PathBuf::from),
		compiler: get_string(doc, SETTINGS_SECTION, "compiler")?.map(PathBuf::from),
		build_timeout,
		allow_system_operations: get_bool(doc, SETTINGS_SECTION, "allow-system-operations")?,
	})
}
