//! Fingerprint-keyed artifact cache.
//!
//! Artifacts live in `<root>/<type name>/<fingerprint>/`. A directory only
//! appears under that name once it is complete: builds run in a sibling
//! staging directory that is renamed into place after the manifest is
//! written. Within a process each fingerprint has one slot, so concurrent
//! requests wait for a single build and share its result.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::descriptor::BuildOptions;
use crate::error::{CodedError, Result};
use crate::fingerprint::Fingerprint;
use crate::template::{CodeTemplate, SynthesizedUnit};
use crate::toolchain::{BuildRequest, Toolchain};

const MANIFEST: &str = "artifact.json";

/// A published shared library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
	/// Path of the loadable library.
	pub path: PathBuf,
	pub fingerprint: Fingerprint,
	pub built_at: DateTime<Utc>,
}

/// Status of a build request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
	/// A previously published artifact was reused.
	AlreadyBuilt,
	/// The toolchain ran for this request.
	Built,
}

/// Result of [`BuildCache::get_or_build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
	pub artifact: Artifact,
	pub status: BuildStatus,
}

/// Everything needed to build one unit.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactRequest<'a> {
	pub template: &'a CodeTemplate,
	pub fingerprint: Fingerprint,
	pub unit: &'a SynthesizedUnit,
	pub options: &'a BuildOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
	fingerprint: Fingerprint,
	template: String,
	library: String,
	library_len: u64,
	toolchain: String,
	built_at: DateTime<Utc>,
}

type Slot = OnceLock<Result<Artifact>>;

/// Build cache rooted at one directory.
pub struct BuildCache {
	root: PathBuf,
	toolchain: Arc<dyn Toolchain>,
	timeout: Option<Duration>,
	slots: Mutex<HashMap<Fingerprint, Arc<Slot>>>,
}

impl BuildCache {
	pub fn new(root: impl Into<PathBuf>, toolchain: Arc<dyn Toolchain>) -> Self {
		Self {
			root: root.into(),
			toolchain,
			timeout: None,
			slots: Mutex::new(HashMap::new()),
		}
	}

	/// Bounds every toolchain invocation.
	pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn toolchain(&self) -> &dyn Toolchain {
		self.toolchain.as_ref()
	}

	/// Final directory for a fingerprint.
	pub fn artifact_dir(&self, template_id: &str, fingerprint: &Fingerprint) -> PathBuf {
		self.root.join(template_id).join(fingerprint.to_hex())
	}

	/// Returns the published artifact for `fingerprint` if it is intact.
	pub fn lookup(&self, template_id: &str, fingerprint: &Fingerprint) -> Option<Artifact> {
		let dir = self.artifact_dir(template_id, fingerprint);
		let bytes = fs::read(dir.join(MANIFEST)).ok()?;

		let manifest: Manifest = match serde_json::from_slice(&bytes) {
			Ok(manifest) => manifest,
			Err(e) => {
				warn!(dir = %dir.display(), error = %e, "Ignoring unreadable artifact manifest");
				return None;
			}
		};
		if manifest.fingerprint != *fingerprint {
			warn!(dir = %dir.display(), found = %manifest.fingerprint.short(), "Artifact manifest names another fingerprint");
			return None;
		}

		let path = dir.join(library_file_name(template_id, fingerprint));
		let len = fs::metadata(&path).ok()?.len();
		if len != manifest.library_len {
			warn!(path = %path.display(), expected = manifest.library_len, len, "Artifact library is truncated");
			return None;
		}

		debug!(fingerprint = %fingerprint.short(), path = %path.display(), "Artifact cache hit");
		Some(Artifact {
			path,
			fingerprint: *fingerprint,
			built_at: manifest.built_at,
		})
	}

	/// Returns the artifact for the request, building it on a miss.
	///
	/// Concurrent calls for one fingerprint run the toolchain at most once and
	/// all observe the same result. Failures are remembered until
	/// [`Self::invalidate`]; nothing is published for them.
	pub fn get_or_build(&self, request: &ArtifactRequest<'_>) -> Result<BuildOutcome> {
		let slot = {
			let mut slots = self.slots.lock();
			Arc::clone(slots.entry(request.fingerprint).or_default())
		};

		let mut status = BuildStatus::AlreadyBuilt;
		let result = slot.get_or_init(|| match self.lookup(request.template.id(), &request.fingerprint) {
			Some(artifact) => Ok(artifact),
			None => {
				status = BuildStatus::Built;
				self.build(request)
			}
		});

		match result {
			Ok(artifact) if artifact.path.exists() => Ok(BuildOutcome {
				artifact: artifact.clone(),
				status,
			}),
			Ok(artifact) => {
				warn!(path = %artifact.path.display(), "Cached artifact disappeared, rebuilding");
				self.forget(&request.fingerprint, &slot);
				self.get_or_build(request)
			}
			Err(e) => Err(e.clone()),
		}
	}

	/// Drops the in-process result for `fingerprint`, so the next request
	/// checks the disk again and rebuilds on a miss.
	pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
		self.slots.lock().remove(fingerprint).is_some()
	}

	fn forget(&self, fingerprint: &Fingerprint, slot: &Arc<Slot>) {
		let mut slots = self.slots.lock();
		if slots.get(fingerprint).is_some_and(|current| Arc::ptr_eq(current, slot)) {
			slots.remove(fingerprint);
		}
	}

	fn build(&self, request: &ArtifactRequest<'_>) -> Result<Artifact> {
		let template = request.template;
		let fingerprint = request.fingerprint;
		let io = |path: &Path, e: std::io::Error| CodedError::Build {
			fingerprint: Some(fingerprint),
			diagnostics: format!("{}: {e}", path.display()),
		};

		let type_dir = self.root.join(template.id());
		fs::create_dir_all(&type_dir).map_err(|e| io(&type_dir, e))?;

		let staging = tempfile::Builder::new()
			.prefix(&format!(".build-{}-", fingerprint.short()))
			.tempdir_in(&type_dir)
			.map_err(|e| io(&type_dir, e))?;

		let header = staging.path().join(template.header_file_name());
		let source = staging.path().join(template.source_file_name());
		fs::write(&header, &request.unit.header).map_err(|e| io(&header, e))?;
		fs::write(&source, &request.unit.source).map_err(|e| io(&source, e))?;

		let library = library_file_name(template.id(), &fingerprint);
		let output = staging.path().join(&library);
		self.toolchain.build(&BuildRequest {
			fingerprint,
			source: &source,
			include_dir: staging.path(),
			output: &output,
			options: request.options,
			timeout: self.timeout,
		})?;

		let library_len = fs::metadata(&output)
			.map_err(|_| CodedError::Build {
				fingerprint: Some(fingerprint),
				diagnostics: format!("toolchain reported success but produced no {library}"),
			})?
			.len();

		let manifest = Manifest {
			fingerprint,
			template: template.id().to_string(),
			library: library.clone(),
			library_len,
			toolchain: self.toolchain.version().to_string(),
			built_at: Utc::now(),
		};
		let manifest_path = staging.path().join(MANIFEST);
		let json = serde_json::to_vec_pretty(&manifest).map_err(|e| CodedError::Build {
			fingerprint: Some(fingerprint),
			diagnostics: format!("failed to encode manifest: {e}"),
		})?;
		fs::write(&manifest_path, json).map_err(|e| io(&manifest_path, e))?;

		let final_dir = self.artifact_dir(template.id(), &fingerprint);
		if final_dir.exists() && self.lookup(template.id(), &fingerprint).is_none() {
			warn!(dir = %final_dir.display(), "Replacing damaged artifact directory");
			fs::remove_dir_all(&final_dir).map_err(|e| io(&final_dir, e))?;
		}

		if let Err(e) = fs::rename(staging.path(), &final_dir) {
			return match self.lookup(template.id(), &fingerprint) {
				Some(existing) => {
					warn!(fingerprint = %fingerprint.short(), "Another process published this artifact first");
					Ok(existing)
				}
				None => Err(io(&final_dir, e)),
			};
		}

		info!(fingerprint = %fingerprint.short(), dir = %final_dir.display(), "Published artifact");
		Ok(Artifact {
			path: final_dir.join(library),
			fingerprint,
			built_at: manifest.built_at,
		})
	}
}

impl std::fmt::Debug for BuildCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BuildCache")
			.field("root", &self.root)
			.field("toolchain", &self.toolchain.version())
			.field("timeout", &self.timeout)
			.finish_non_exhaustive()
	}
}

/// Platform file name of the library built for `fingerprint`.
pub fn library_file_name(template_id: &str, fingerprint: &Fingerprint) -> String {
	format!(
		"{}{template_id}_{}.{}",
		std::env::consts::DLL_PREFIX,
		fingerprint.short(),
		std::env::consts::DLL_EXTENSION
	)
}

#[cfg(test)]
mod tests {
	use std::thread;

	use super::*;
	use crate::testing::FakeToolchain;

	static TEMPLATE: CodeTemplate = CodeTemplate::embedded("codedTest", "/* h */", "/* c */");

	fn unit(text: &str) -> SynthesizedUnit {
		SynthesizedUnit {
			header: "/* h */".into(),
			source: text.into(),
		}
	}

	fn fingerprint(unit: &SynthesizedUnit) -> Fingerprint {
		Fingerprint::compute(unit, &BuildOptions::default(), "fake 1.0")
	}

	fn request<'a>(unit: &'a SynthesizedUnit, options: &'a BuildOptions) -> ArtifactRequest<'a> {
		ArtifactRequest {
			template: &TEMPLATE,
			fingerprint: fingerprint(unit),
			unit,
			options,
		}
	}

	fn staging_dirs(root: &Path) -> usize {
		fs::read_dir(root.join("codedTest"))
			.map(|entries| {
				entries
					.flatten()
					.filter(|e| e.file_name().to_string_lossy().starts_with(".build-"))
					.count()
			})
			.unwrap_or(0)
	}

	#[test]
	fn second_request_reuses_the_artifact() {
		let dir = tempfile::tempdir().unwrap();
		let toolchain = Arc::new(FakeToolchain::default());
		let cache = BuildCache::new(dir.path(), toolchain.clone());
		let (unit, options) = (unit("a"), BuildOptions::default());

		let first = cache.get_or_build(&request(&unit, &options)).unwrap();
		let second = cache.get_or_build(&request(&unit, &options)).unwrap();

		assert_eq!(first.status, BuildStatus::Built);
		assert_eq!(second.status, BuildStatus::AlreadyBuilt);
		assert_eq!(first.artifact, second.artifact);
		assert_eq!(toolchain.invocations(), 1);
		assert!(first.artifact.path.starts_with(cache.artifact_dir("codedTest", &first.artifact.fingerprint)));
	}

	#[test]
	fn published_artifacts_survive_a_new_cache() {
		let dir = tempfile::tempdir().unwrap();
		let (unit, options) = (unit("a"), BuildOptions::default());
		let built = BuildCache::new(dir.path(), Arc::new(FakeToolchain::default()))
			.get_or_build(&request(&unit, &options))
			.unwrap();

		let toolchain = Arc::new(FakeToolchain::default());
		let cache = BuildCache::new(dir.path(), toolchain.clone());
		let reused = cache.get_or_build(&request(&unit, &options)).unwrap();

		assert_eq!(reused.status, BuildStatus::AlreadyBuilt);
		assert_eq!(reused.artifact, built.artifact);
		assert_eq!(toolchain.invocations(), 0);
	}

	#[test]
	fn failures_are_remembered_but_never_published() {
		let dir = tempfile::tempdir().unwrap();
		let toolchain = Arc::new(FakeToolchain::failing("error: expected ';'"));
		let cache = BuildCache::new(dir.path(), toolchain.clone());
		let (unit, options) = (unit("broken"), BuildOptions::default());
		let req = request(&unit, &options);

		let err = cache.get_or_build(&req).unwrap_err();
		assert!(matches!(err, CodedError::Build { ref diagnostics, .. } if diagnostics.contains("expected ';'")));
		assert!(!cache.artifact_dir("codedTest", &req.fingerprint).exists());
		assert_eq!(staging_dirs(dir.path()), 0);

		assert!(cache.get_or_build(&req).is_err());
		assert_eq!(toolchain.invocations(), 1);

		assert!(cache.invalidate(&req.fingerprint));
		assert!(cache.get_or_build(&req).is_err());
		assert_eq!(toolchain.invocations(), 2);
	}

	#[test]
	fn timed_out_builds_leave_nothing_behind() {
		let dir = tempfile::tempdir().unwrap();
		let cache = BuildCache::new(dir.path(), Arc::new(FakeToolchain::timing_out()));
		let (unit, options) = (unit("slow"), BuildOptions::default());
		let req = request(&unit, &options);

		let err = cache.get_or_build(&req).unwrap_err();
		assert!(matches!(err, CodedError::Build { ref diagnostics, .. } if diagnostics.contains("timed out")));
		assert!(!cache.artifact_dir("codedTest", &req.fingerprint).exists());
		assert!(cache.lookup("codedTest", &req.fingerprint).is_none());
		assert_eq!(staging_dirs(dir.path()), 0);
	}

	#[test]
	fn a_new_cache_retries_a_failed_fingerprint() {
		let dir = tempfile::tempdir().unwrap();
		let (unit, options) = (unit("flaky"), BuildOptions::default());
		let failing = BuildCache::new(
			dir.path(),
			Arc::new(FakeToolchain::failing("boom")),
		);
		assert!(failing.get_or_build(&request(&unit, &options)).is_err());

		let toolchain = Arc::new(FakeToolchain::default());
		let outcome = BuildCache::new(dir.path(), toolchain.clone())
			.get_or_build(&request(&unit, &options))
			.unwrap();
		assert_eq!(outcome.status, BuildStatus::Built);
		assert_eq!(toolchain.invocations(), 1);
	}

	#[test]
	fn concurrent_requests_share_one_build() {
		let dir = tempfile::tempdir().unwrap();
		let toolchain = Arc::new(FakeToolchain::slow(Duration::from_millis(50)));
		let cache = BuildCache::new(dir.path(), toolchain.clone());
		let (unit, options) = (unit("shared"), BuildOptions::default());

		let paths: Vec<PathBuf> = thread::scope(|scope| {
			let handles: Vec<_> = (0..8)
				.map(|_| scope.spawn(|| cache.get_or_build(&request(&unit, &options)).unwrap().artifact.path))
				.collect();
			handles.into_iter().map(|h| h.join().unwrap()).collect()
		});

		assert_eq!(toolchain.invocations(), 1);
		assert!(paths.windows(2).all(|w| w[0] == w[1]));
	}

	#[test]
	fn distinct_fingerprints_build_independently() {
		let dir = tempfile::tempdir().unwrap();
		let toolchain = Arc::new(FakeToolchain::default());
		let cache = BuildCache::new(dir.path(), toolchain.clone());
		let options = BuildOptions::default();
		let (a, b) = (unit("a"), unit("b"));

		let first = cache.get_or_build(&request(&a, &options)).unwrap();
		let second = cache.get_or_build(&request(&b, &options)).unwrap();

		assert_ne!(first.artifact.path, second.artifact.path);
		assert_eq!(toolchain.invocations(), 2);
	}

	#[test]
	fn damaged_artifacts_are_rebuilt() {
		let dir = tempfile::tempdir().unwrap();
		let toolchain = Arc::new(FakeToolchain::default());
		let (unit, options) = (unit("a"), BuildOptions::default());
		let built = BuildCache::new(dir.path(), toolchain.clone())
			.get_or_build(&request(&unit, &options))
			.unwrap();

		fs::write(&built.artifact.path, b"trunc").unwrap();

		let cache = BuildCache::new(dir.path(), toolchain.clone());
		assert!(cache.lookup("codedTest", &built.artifact.fingerprint).is_none());
		let rebuilt = cache.get_or_build(&request(&unit, &options)).unwrap();
		assert_eq!(rebuilt.status, BuildStatus::Built);
		assert_eq!(toolchain.invocations(), 2);
		assert!(cache.lookup("codedTest", &built.artifact.fingerprint).is_some());
	}

	#[test]
	fn library_names_derive_from_the_fingerprint() {
		let fp = Fingerprint::from_bytes([0xab; 32]);
		let name = library_file_name("codedFunction1", &fp);
		assert!(name.contains("codedFunction1_abababababababab"));
		assert!(name.ends_with(std::env::consts::DLL_EXTENSION));
	}
}
