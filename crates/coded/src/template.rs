//! Code templates and synthesis.
//!
//! Every extension point owns one template pair: a declaration unit and a
//! source unit. Placeholders are `${key}`; fragment placeholders expand to the
//! descriptor's text or to nothing, and a few built-in variables expand to
//! constants of the ABI contract. Synthesis is plain text substitution; the
//! injected code is only checked by the toolchain.

use std::borrow::Cow;
use std::path::Path;

use coded_abi::{ABI_PRELUDE, CODED_ABI_VERSION};
use tracing::debug;

use crate::descriptor::CodeDescriptor;
use crate::error::{CodedError, Result};

/// A declaration/source template pair for one extension point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeTemplate {
	id: &'static str,
	header: Cow<'static, str>,
	source: Cow<'static, str>,
}

/// Synthesized declaration and source units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedUnit {
	pub header: String,
	pub source: String,
}

impl CodeTemplate {
	/// Template compiled into the binary.
	pub const fn embedded(id: &'static str, header: &'static str, source: &'static str) -> Self {
		Self {
			id,
			header: Cow::Borrowed(header),
			source: Cow::Borrowed(source),
		}
	}

	/// Reads `<id>Template.h` and `<id>Template.c` from `dir`.
	///
	/// Returns `Ok(None)` when neither file exists. Exactly one of them
	/// existing is a configuration error.
	pub fn from_dir(dir: &Path, id: &'static str) -> Result<Option<Self>> {
		let header_path = dir.join(format!("{id}Template.h"));
		let source_path = dir.join(format!("{id}Template.c"));

		match (header_path.exists(), source_path.exists()) {
			(false, false) => return Ok(None),
			(true, true) => {}
			_ => {
				return Err(CodedError::configuration(
					"templates-dir",
					format!("{} must contain both {id}Template.h and {id}Template.c", dir.display()),
				));
			}
		}

		let read = |path: &Path| {
			std::fs::read_to_string(path).map_err(|e| CodedError::configuration("templates-dir", format!("{}: {e}", path.display())))
		};
		debug!(template = id, dir = %dir.display(), "Using template override");
		Ok(Some(Self {
			id,
			header: Cow::Owned(read(&header_path)?),
			source: Cow::Owned(read(&source_path)?),
		}))
	}

	/// Template identifier; equal to the extension point's type name.
	pub fn id(&self) -> &'static str {
		self.id
	}

	/// File name of the generated declaration unit.
	pub fn header_file_name(&self) -> String {
		format!("{}.h", self.id)
	}

	/// File name of the generated source unit.
	pub fn source_file_name(&self) -> String {
		format!("{}.c", self.id)
	}

	/// Checks that every placeholder is a declared key or a built-in.
	pub fn validate(&self, code_keys: &[&'static str]) -> Result<()> {
		let lookup = |key: &str| code_keys.iter().any(|k| *k == key).then_some("");
		self.render(&self.header, &lookup)?;
		self.render(&self.source, &lookup)?;
		Ok(())
	}

	/// Substitutes the descriptor's fragments into both units.
	pub fn synthesize(&self, descriptor: &CodeDescriptor, code_keys: &[&'static str]) -> Result<SynthesizedUnit> {
		let lookup = |key: &str| code_keys.iter().any(|k| *k == key).then(|| descriptor.fragment(key).unwrap_or(""));
		Ok(SynthesizedUnit {
			header: self.render(&self.header, &lookup)?,
			source: self.render(&self.source, &lookup)?,
		})
	}

	fn render<'a>(&self, text: &str, lookup: &dyn Fn(&str) -> Option<&'a str>) -> Result<String> {
		let mut out = String::with_capacity(text.len());
		let mut rest = text;

		while let Some(start) = rest.find("${") {
			out.push_str(&rest[..start]);
			let after = &rest[start + 2..];
			let Some(end) = after.find('}') else {
				return Err(self.mismatch("unterminated `${` placeholder".to_string()));
			};
			let key = &after[..end];
			match key {
				"templateId" => out.push_str(self.id),
				"abiVersion" => out.push_str(&CODED_ABI_VERSION.to_string()),
				"abiPrelude" => out.push_str(ABI_PRELUDE),
				_ => match lookup(key) {
					Some(value) => out.push_str(value),
					None => return Err(self.mismatch(format!("placeholder `${{{key}}}` is not a declared code key"))),
				},
			}
			rest = &after[end + 1..];
		}

		out.push_str(rest);
		Ok(out)
	}

	fn mismatch(&self, detail: String) -> CodedError {
		CodedError::Synthesis {
			template: self.id.to_string(),
			detail,
		}
	}
}
