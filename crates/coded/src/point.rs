//! Extension points: the stable interfaces generated code plugs into.

use std::sync::Arc;

use crate::descriptor::BuildOptions;
use crate::loader::Guest;
use crate::template::CodeTemplate;

/// A polymorphic interface that case-supplied code can implement.
///
/// Each point declares its closed set of fragment keys, owns one template
/// pair and knows how to bind a constructed guest to its typed instance.
pub trait ExtensionPoint: Send + Sync + 'static {
	/// Type name; selects the template and is checked against the guest.
	const TYPE_NAME: &'static str;

	/// Fragment keys, in audit order.
	const CODE_KEYS: &'static [&'static str];

	/// The typed, evaluable instance.
	type Instance: Send + Sync + 'static;

	/// Embedded template pair.
	fn template() -> CodeTemplate;

	/// Flags every build of this point starts from, before the descriptor's.
	fn default_options() -> BuildOptions {
		BuildOptions::default()
	}

	/// Binds a validated guest to the typed instance, checking its vtable.
	fn bind(guest: Guest) -> Result<Self::Instance, String>;
}

/// Destination for constructed instances, keyed by code name.
pub trait Registry<I: ?Sized> {
	fn register(&mut self, name: &str, instance: Arc<I>);
}

impl<I: ?Sized> Registry<I> for std::collections::HashMap<String, Arc<I>> {
	fn register(&mut self, name: &str, instance: Arc<I>) {
		self.insert(name.to_string(), instance);
	}
}

impl<I: ?Sized> Registry<I> for std::collections::BTreeMap<String, Arc<I>> {
	fn register(&mut self, name: &str, instance: Arc<I>) {
		self.insert(name.to_string(), instance);
	}
}
