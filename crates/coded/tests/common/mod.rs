//! Helpers for tests that drive the real C toolchain.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use coded::{BuildRequest, CodedContext, Settings, SystemToolchain, Toolchain};

/// System toolchain that counts its invocations.
pub struct CountingToolchain {
	inner: SystemToolchain,
	invocations: AtomicUsize,
}

impl CountingToolchain {
	pub fn invocations(&self) -> usize {
		self.invocations.load(Ordering::SeqCst)
	}
}

impl Toolchain for CountingToolchain {
	fn version(&self) -> &str {
		self.inner.version()
	}

	fn build(&self, request: &BuildRequest<'_>) -> coded::Result<()> {
		self.invocations.fetch_add(1, Ordering::SeqCst);
		self.inner.build(request)
	}
}

/// Settings rooted in `dir`.
pub fn settings(dir: &Path) -> Settings {
	Settings {
		cache_dir: dir.join("artifacts"),
		..Settings::default()
	}
}

/// A context over the host C compiler, or `None` when there is none.
pub fn context(dir: &Path) -> Option<(Arc<CodedContext>, Arc<CountingToolchain>)> {
	let settings = settings(dir);
	let toolchain = match SystemToolchain::detect(None, &dir.join("scratch")) {
		Ok(toolchain) => Arc::new(CountingToolchain {
			inner: toolchain,
			invocations: AtomicUsize::new(0),
		}),
		Err(e) => {
			eprintln!("skipping: {e}");
			return None;
		}
	};
	Some((CodedContext::with_toolchain(&settings, toolchain.clone()), toolchain))
}

pub fn dict(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
	entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

pub fn assert_close(actual: f64, expected: f64) {
	assert!((actual - expected).abs() < 1e-9, "expected {expected}, got {actual}");
}
