//! Code descriptors: the fragments and options one coded entry declares.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::{CodedError, Result};

/// Key holding the code name.
pub const NAME_KEY: &str = "name";
/// Key holding extra compiler flags.
pub const CODE_OPTIONS_KEY: &str = "code-options";
/// Key holding extra link libraries.
pub const CODE_LIBS_KEY: &str = "code-libs";

/// Read access to a configuration node.
///
/// Parsing lives with the configuration format; the pipeline only looks up
/// string entries and list entries by key.
pub trait CodeDict {
	/// Returns a string-valued entry.
	fn get_str(&self, key: &str) -> Option<&str>;

	/// Returns a list-valued entry. A single string counts as a one-item list.
	fn get_list(&self, key: &str) -> Option<Vec<&str>> {
		self.get_str(key).map(|value| vec![value])
	}
}

impl CodeDict for BTreeMap<String, String> {
	fn get_str(&self, key: &str) -> Option<&str> {
		self.get(key).map(String::as_str)
	}
}

impl CodeDict for HashMap<String, String> {
	fn get_str(&self, key: &str) -> Option<&str> {
		self.get(key).map(String::as_str)
	}
}

impl<D: CodeDict + ?Sized> CodeDict for &D {
	fn get_str(&self, key: &str) -> Option<&str> {
		(**self).get_str(key)
	}

	fn get_list(&self, key: &str) -> Option<Vec<&str>> {
		(**self).get_list(key)
	}
}

/// Extra compiler and linker arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
	/// Flags passed before the sources.
	pub compile_flags: Vec<String>,
	/// Libraries and linker flags passed after the sources.
	pub link_libs: Vec<String>,
}

impl BuildOptions {
	pub fn is_empty(&self) -> bool {
		self.compile_flags.is_empty() && self.link_libs.is_empty()
	}

	/// Appends `overrides` after `self`, so later flags take precedence.
	pub fn merged(&self, overrides: &BuildOptions) -> BuildOptions {
		BuildOptions {
			compile_flags: self.compile_flags.iter().chain(&overrides.compile_flags).cloned().collect(),
			link_libs: self.link_libs.iter().chain(&overrides.link_libs).cloned().collect(),
		}
	}
}

/// Immutable view of one coded entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeDescriptor {
	name: String,
	fragments: Vec<(&'static str, String)>,
	options: BuildOptions,
	raw_options: Vec<(&'static str, String)>,
}

impl CodeDescriptor {
	/// Extracts the name, the fragments for `code_keys` and the build options.
	///
	/// Absent fragment keys are omitted. Only a missing or empty `name` fails.
	pub fn from_dict(dict: &(impl CodeDict + ?Sized), code_keys: &[&'static str]) -> Result<Self> {
		let name = dict
			.get_str(NAME_KEY)
			.map(str::trim)
			.filter(|name| !name.is_empty())
			.ok_or_else(|| CodedError::configuration(NAME_KEY, "required entry is missing"))?;

		if !is_valid_name(name) {
			return Err(CodedError::configuration(
				NAME_KEY,
				format!("`{name}` must start with a letter or `_` and contain only letters, digits, `_`, `-` or `.`"),
			));
		}

		let fragments = code_keys
			.iter()
			.filter_map(|&key| dict.get_str(key).map(|text| (key, text.to_string())))
			.collect();

		let mut options = BuildOptions::default();
		let mut raw_options = Vec::new();
		for key in [CODE_OPTIONS_KEY, CODE_LIBS_KEY] {
			let Some(items) = dict.get_list(key) else {
				continue;
			};
			let args: Vec<String> = items.iter().flat_map(|item| item.split_whitespace()).map(str::to_string).collect();
			raw_options.push((key, items.join(" ")));
			if key == CODE_OPTIONS_KEY {
				options.compile_flags = args;
			} else {
				options.link_libs = args;
			}
		}

		Ok(Self {
			name: name.to_string(),
			fragments,
			options,
			raw_options,
		})
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Returns the fragment for `key`, if the entry supplied one.
	pub fn fragment(&self, key: &str) -> Option<&str> {
		self.fragments.iter().find(|(k, _)| *k == key).map(|(_, text)| text.as_str())
	}

	/// Present fragments in declared order.
	pub fn fragments(&self) -> impl Iterator<Item = (&'static str, &str)> {
		self.fragments.iter().map(|(key, text)| (*key, text.as_str()))
	}

	pub fn build_options(&self) -> &BuildOptions {
		&self.options
	}

	/// Writes the canonical audit form: name, fragments, then build options.
	///
	/// Each value is a `#{ ... #}` verbatim block terminated by `;`.
	pub fn write_code(&self, out: &mut impl fmt::Write) -> fmt::Result {
		writeln!(out, "{NAME_KEY} {:?};", self.name)?;
		for (key, text) in self.fragments.iter().chain(&self.raw_options) {
			writeln!(out, "{key} #{{{text}#}};")?;
		}
		Ok(())
	}

	/// The audit form as a string.
	pub fn code_string(&self) -> String {
		let mut out = String::new();
		// Writing into a String cannot fail.
		let _ = self.write_code(&mut out);
		out
	}
}

fn is_valid_name(name: &str) -> bool {
	let mut chars = name.chars();
	chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
		&& chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	const KEYS: &[&str] = &["code-include", "local-code", "code"];

	fn dict(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
		entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
	}

	#[test]
	fn missing_name_is_a_configuration_error() {
		let err = CodeDescriptor::from_dict(&dict(&[("code", "return x;")]), KEYS).unwrap_err();
		assert!(matches!(err, CodedError::Configuration { ref key, .. } if key == NAME_KEY));
	}

	#[test]
	fn blank_or_unsafe_name_is_rejected() {
		assert!(CodeDescriptor::from_dict(&dict(&[("name", "  ")]), KEYS).is_err());
		assert!(CodeDescriptor::from_dict(&dict(&[("name", "../escape")]), KEYS).is_err());
		assert!(CodeDescriptor::from_dict(&dict(&[("name", "piston.position-v2")]), KEYS).is_ok());
	}

	#[test]
	fn absent_fragments_are_omitted() {
		let d = CodeDescriptor::from_dict(&dict(&[("name", "f"), ("code", "return x;")]), KEYS).unwrap();
		assert_eq!(d.fragment("code"), Some("return x;"));
		assert_eq!(d.fragment("code-include"), None);
		assert_eq!(d.fragments().count(), 1);
	}

	#[test]
	fn undeclared_keys_are_ignored() {
		let d = CodeDescriptor::from_dict(&dict(&[("name", "f"), ("code-extra", "junk")]), KEYS).unwrap();
		assert_eq!(d.fragments().count(), 0);
	}

	#[test]
	fn build_options_are_split_on_whitespace() {
		let d = CodeDescriptor::from_dict(
			&dict(&[("name", "f"), ("code-options", "-O3  -DFAST"), ("code-libs", "-lm")]),
			KEYS,
		)
		.unwrap();
		assert_eq!(d.build_options().compile_flags, vec!["-O3", "-DFAST"]);
		assert_eq!(d.build_options().link_libs, vec!["-lm"]);
	}

	#[test]
	fn merge_appends_descriptor_options_after_defaults() {
		let defaults = BuildOptions {
			compile_flags: vec!["-O2".into()],
			link_libs: vec!["-lm".into()],
		};
		let descriptor = BuildOptions {
			compile_flags: vec!["-O3".into()],
			link_libs: Vec::new(),
		};
		let merged = defaults.merged(&descriptor);
		assert_eq!(merged.compile_flags, vec!["-O2", "-O3"]);
		assert_eq!(merged.link_libs, vec!["-lm"]);
	}

	#[test]
	fn write_code_emits_name_fragments_then_options() {
		let d = CodeDescriptor::from_dict(
			&dict(&[
				("code-libs", "-lm"),
				("code", "return x;"),
				("name", "piston"),
				("code-include", "#include <math.h>"),
				("code-options", "-O3"),
			]),
			KEYS,
		)
		.unwrap();

		assert_eq!(
			d.code_string(),
			"name \"piston\";\n\
			 code-include #{#include <math.h>#};\n\
			 code #{return x;#};\n\
			 code-options #{-O3#};\n\
			 code-libs #{-lm#};\n"
		);
	}
}
