//! Shared services handed to every orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::cache::BuildCache;
use crate::error::Result;
use crate::loader::DynamicLoader;
use crate::point::ExtensionPoint;
use crate::settings::Settings;
use crate::template::CodeTemplate;
use crate::toolchain::{SystemToolchain, Toolchain};

/// Build cache, loader and policy shared by the orchestrators of one host.
#[derive(Debug)]
pub struct CodedContext {
	cache: BuildCache,
	loader: Arc<DynamicLoader>,
	templates_dir: Option<PathBuf>,
	allow_system_operations: bool,
}

impl CodedContext {
	/// Context backed by the system C compiler.
	pub fn new(settings: &Settings) -> Result<Arc<Self>> {
		let toolchain = SystemToolchain::detect(settings.compiler.as_deref(), &settings.cache_dir.join(".toolchain"))?;
		Ok(Self::with_toolchain(settings, Arc::new(toolchain)))
	}

	/// Context backed by an arbitrary toolchain and the process-wide loader.
	pub fn with_toolchain(settings: &Settings, toolchain: Arc<dyn Toolchain>) -> Arc<Self> {
		Self::with_loader(settings, toolchain, DynamicLoader::shared())
	}

	/// Context with its own loader.
	pub fn with_loader(settings: &Settings, toolchain: Arc<dyn Toolchain>, loader: Arc<DynamicLoader>) -> Arc<Self> {
		debug!(
			cache_dir = %settings.cache_dir.display(),
			toolchain = toolchain.version(),
			allow_system_operations = settings.allow_system_operations,
			"Creating coded context"
		);
		Arc::new(Self {
			cache: BuildCache::new(&settings.cache_dir, toolchain).with_timeout(settings.build_timeout),
			loader,
			templates_dir: settings.templates_dir.clone(),
			allow_system_operations: settings.allow_system_operations,
		})
	}

	pub fn cache(&self) -> &BuildCache {
		&self.cache
	}

	pub fn loader(&self) -> &DynamicLoader {
		&self.loader
	}

	pub fn templates_dir(&self) -> Option<&Path> {
		self.templates_dir.as_deref()
	}

	pub fn allow_system_operations(&self) -> bool {
		self.allow_system_operations
	}

	/// The template for `P`: an override from the templates directory if one
	/// exists, otherwise the embedded pair.
	pub fn template<P: ExtensionPoint>(&self) -> Result<CodeTemplate> {
		if let Some(dir) = &self.templates_dir
			&& let Some(template) = CodeTemplate::from_dir(dir, P::TYPE_NAME)?
		{
			return Ok(template);
		}
		Ok(P::template())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::FakeToolchain;

	#[test]
	fn contexts_share_the_process_loader() {
		let dir = tempfile::tempdir().unwrap();
		let settings = Settings {
			cache_dir: dir.path().to_path_buf(),
			..Settings::default()
		};
		let first = CodedContext::with_toolchain(&settings, Arc::new(FakeToolchain::default()));
		let second = CodedContext::with_toolchain(&settings, Arc::new(FakeToolchain::default()));
		assert!(std::ptr::eq(first.loader(), second.loader()));

		let own = CodedContext::with_loader(&settings, Arc::new(FakeToolchain::default()), Arc::new(DynamicLoader::new()));
		assert!(!std::ptr::eq(first.loader(), own.loader()));
	}
}
