//! Parallel prebuilding of many coded entries.

use std::sync::mpsc;
use std::thread;

use crate::cache::BuildStatus;
use crate::coded_base::CodedBase;
use crate::error::ExtensionError;
use crate::point::ExtensionPoint;

/// Callback type for progress reporting: code name, then status.
pub type ProgressCallback = Box<dyn Fn(&str, &str) + Send + Sync>;

/// Prepares every entry on a bounded pool of worker threads.
///
/// Entries sharing a fingerprint still build once; the cache serializes them.
/// Results arrive in completion order.
pub fn build_all<P: ExtensionPoint>(
	coded: Vec<CodedBase<P>>,
	on_progress: Option<ProgressCallback>,
) -> Vec<(CodedBase<P>, Result<BuildStatus, ExtensionError>)> {
	let (tx, rx) = mpsc::channel();
	let num_jobs = thread::available_parallelism().map(|n| n.get()).unwrap_or(4).min(8).min(coded.len().max(1));

	let mut chunks: Vec<Vec<CodedBase<P>>> = (0..num_jobs).map(|_| Vec::new()).collect();
	for (i, entry) in coded.into_iter().enumerate() {
		chunks[i % num_jobs].push(entry);
	}

	for chunk in chunks {
		let tx = tx.clone();

		thread::spawn(move || {
			for mut entry in chunk {
				let result = entry.prepare();
				let _ = tx.send((entry, result));
			}
		});
	}

	drop(tx);

	let mut results = Vec::new();
	for (entry, result) in rx {
		if let Some(ref cb) = on_progress {
			let status = match &result {
				Ok(BuildStatus::AlreadyBuilt) => "up to date",
				Ok(BuildStatus::Built) => "built",
				Err(_) => "error",
			};
			cb(entry.code_name(), status);
		}
		results.push((entry, result));
	}

	results
}
