//! Test doubles shared by the unit tests.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::{CodedError, Result};
use crate::toolchain::{BuildRequest, Toolchain};

/// Toolchain that writes a placeholder library and counts invocations.
#[derive(Debug, Default)]
pub(crate) struct FakeToolchain {
	invocations: AtomicUsize,
	fail_with: Option<String>,
	/// Write the output before failing, like a compiler killed mid-link.
	partial_output: bool,
	delay: Duration,
}

impl FakeToolchain {
	pub fn failing(message: &str) -> Self {
		Self {
			fail_with: Some(message.to_string()),
			..Default::default()
		}
	}

	/// Leaves a partial library behind, then reports a timeout.
	pub fn timing_out() -> Self {
		Self {
			fail_with: Some("compiler timed out after 1s".to_string()),
			partial_output: true,
			..Default::default()
		}
	}

	pub fn slow(delay: Duration) -> Self {
		Self {
			delay,
			..Default::default()
		}
	}

	pub fn invocations(&self) -> usize {
		self.invocations.load(Ordering::SeqCst)
	}
}

impl Toolchain for FakeToolchain {
	fn version(&self) -> &str {
		"fake 1.0"
	}

	fn build(&self, request: &BuildRequest<'_>) -> Result<()> {
		self.invocations.fetch_add(1, Ordering::SeqCst);
		thread::sleep(self.delay);
		assert!(request.source.exists(), "source unit is written before the toolchain runs");
		if let Some(message) = &self.fail_with {
			if self.partial_output {
				let _ = fs::write(request.output, b"trunc");
			}
			return Err(CodedError::Build {
				fingerprint: Some(request.fingerprint),
				diagnostics: message.clone(),
			});
		}
		fs::write(request.output, b"not really a library").map_err(|e| CodedError::Build {
			fingerprint: Some(request.fingerprint),
			diagnostics: e.to_string(),
		})
	}
}
