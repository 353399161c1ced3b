//! KDL access helpers shared by the case file sections.

use coded::CodeDict;
use kdl::{KdlDocument, KdlNode, KdlValue};

use crate::error::{ConfigError, Result};

/// Read access to the children of one entry node.
///
/// `name "x"` style children hold strings; a child with several string
/// arguments is a list. The code name may also be given as the node's first
/// argument: `function1 "pistonPosition" { ... }`.
#[derive(Debug, Clone, Copy)]
pub struct KdlCodeDict<'a> {
	node: &'a KdlNode,
}

impl<'a> KdlCodeDict<'a> {
	pub fn new(node: &'a KdlNode) -> Self {
		Self { node }
	}

	fn children(&self) -> Option<&'a KdlDocument> {
		self.node.children()
	}
}

impl CodeDict for KdlCodeDict<'_> {
	fn get_str(&self, key: &str) -> Option<&str> {
		let child = self.children().and_then(|doc| doc.get_arg(key)).and_then(KdlValue::as_string);
		if child.is_none() && key == coded::descriptor::NAME_KEY {
			return self.node.get(0).and_then(KdlValue::as_string);
		}
		child
	}

	fn get_list(&self, key: &str) -> Option<Vec<&str>> {
		let items: Vec<&str> = self
			.children()?
			.get(key)?
			.entries()
			.iter()
			.filter(|entry| entry.name().is_none())
			.filter_map(|entry| entry.value().as_string())
			.collect();
		(!items.is_empty()).then_some(items)
	}
}

/// First argument of child `key` as a string.
pub fn get_string<'a>(doc: &'a KdlDocument, section: &str, key: &str) -> Result<Option<&'a str>> {
	match doc.get_arg(key) {
		None => Ok(None),
		Some(value) => value.as_string().map(Some).ok_or_else(|| invalid(section, key, "expected a string")),
	}
}

/// First argument of child `key` as a boolean.
pub fn get_bool(doc: &KdlDocument, section: &str, key: &str) -> Result<Option<bool>> {
	match doc.get_arg(key) {
		None => Ok(None),
		Some(value) => value.as_bool().map(Some).ok_or_else(|| invalid(section, key, "expected #true or #false")),
	}
}

/// First argument of child `key` as a number.
pub fn get_number(doc: &KdlDocument, section: &str, key: &str) -> Result<Option<f64>> {
	match doc.get_arg(key) {
		None => Ok(None),
		Some(value) => value
			.as_float()
			.or_else(|| value.as_integer().map(|i| i as f64))
			.map(Some)
			.ok_or_else(|| invalid(section, key, "expected a number")),
	}
}

pub(crate) fn invalid(section: &str, key: &str, reason: impl Into<String>) -> ConfigError {
	ConfigError::InvalidValue {
		key: format!("{section}.{key}"),
		reason: reason.into(),
	}
}
