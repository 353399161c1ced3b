// Library code reports through tracing only; the host owns the terminal.
#![deny(clippy::print_stderr)]

//! Runtime code injection.
//!
//! Cases embed C fragments in their configuration. This crate turns them into
//! live objects behind stable interfaces without restarting the host:
//!
//! * [`descriptor`]: the fragments and build options of one coded entry
//! * [`template`]: template pairs and fragment substitution
//! * [`fingerprint`]: content digests keying the build cache
//! * [`cache`]: fingerprint-keyed artifacts, built through a [`Toolchain`]
//! * [`loader`]: opening libraries and validating the [`coded_abi`] contract
//! * [`coded_base`]: the per-entry orchestrator
//! * [`points`]: built-in extension points
//!
//! # Lifetime of loaded code
//!
//! Libraries are opened once per artifact and never unloaded. A long-running
//! host that keeps changing its code accumulates one library per distinct
//! fingerprint.

pub mod cache;
pub mod coded_base;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod fingerprint;
pub mod loader;
pub mod parallel;
pub mod point;
pub mod points;
pub mod settings;
pub mod template;
pub mod toolchain;

#[cfg(test)]
mod testing;

pub use cache::{Artifact, ArtifactRequest, BuildCache, BuildOutcome, BuildStatus};
pub use coded_base::{CodedBase, CodedStage};
pub use context::CodedContext;
pub use descriptor::{BuildOptions, CodeDescriptor, CodeDict};
pub use error::{CodedError, ExtensionError, Result};
pub use fingerprint::Fingerprint;
pub use loader::{DynamicLoader, Guest, LoadedLibrary};
pub use parallel::{ProgressCallback, build_all};
pub use point::{ExtensionPoint, Registry};
pub use points::{CodedDiffusivity, CodedFunction1, Diffusivity, Function1};
pub use settings::Settings;
pub use template::{CodeTemplate, SynthesizedUnit};
pub use toolchain::{BuildRequest, SystemToolchain, Toolchain};
