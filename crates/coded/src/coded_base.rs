//! Per-extension orchestration of the synthesize, build and load pipeline.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::{Artifact, ArtifactRequest, BuildStatus};
use crate::context::CodedContext;
use crate::descriptor::{BuildOptions, CodeDescriptor, CodeDict, NAME_KEY};
use crate::error::{CodedError, ExtensionError};
use crate::fingerprint::Fingerprint;
use crate::point::{ExtensionPoint, Registry};
use crate::template::{CodeTemplate, SynthesizedUnit};

/// How far an orchestrator has driven its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CodedStage {
	/// Only the descriptor exists.
	Uninitialized,
	/// Source units and fingerprint are known.
	Synthesized,
	/// A published artifact exists for the fingerprint.
	Built,
	/// An instance has been constructed from the artifact.
	Loaded,
}

type StageResult<T> = std::result::Result<T, ExtensionError>;

/// Drives one coded entry of extension point `P` from configuration to a
/// live instance.
///
/// Every stage is entered lazily: [`Self::instance`] synthesizes, builds and
/// loads as needed, [`Self::prepare`] stops after building. Configuration
/// changes go through [`Self::update`]; instances handed out before stay
/// valid.
pub struct CodedBase<P: ExtensionPoint> {
	context: Arc<CodedContext>,
	template: CodeTemplate,
	descriptor: CodeDescriptor,
	options: BuildOptions,
	unit: Option<(Arc<SynthesizedUnit>, Fingerprint)>,
	artifact: Option<Artifact>,
	instance: Option<Arc<P::Instance>>,
}

impl<P: ExtensionPoint> CodedBase<P> {
	/// Reads the descriptor from `dict` and resolves the template.
	///
	/// The template is validated here, so a placeholder mismatch surfaces
	/// before anything is built.
	pub fn new(context: Arc<CodedContext>, dict: &(impl CodeDict + ?Sized)) -> StageResult<Self> {
		let fail = |source| ExtensionError {
			type_name: P::TYPE_NAME,
			name: dict.get_str(NAME_KEY).unwrap_or("<unnamed>").to_string(),
			source,
		};

		let template = context.template::<P>().map_err(fail)?;
		template.validate(P::CODE_KEYS).map_err(fail)?;
		let descriptor = CodeDescriptor::from_dict(dict, P::CODE_KEYS).map_err(fail)?;
		let options = P::default_options().merged(descriptor.build_options());

		debug!(kind = P::TYPE_NAME, name = descriptor.name(), "Created coded entry");
		Ok(Self {
			context,
			template,
			descriptor,
			options,
			unit: None,
			artifact: None,
			instance: None,
		})
	}

	pub fn code_name(&self) -> &str {
		self.descriptor.name()
	}

	/// `"<type name> <code name>"`.
	pub fn description(&self) -> String {
		format!("{} {}", P::TYPE_NAME, self.descriptor.name())
	}

	pub fn descriptor(&self) -> &CodeDescriptor {
		&self.descriptor
	}

	/// Effective build options: extension point defaults, then the descriptor's.
	pub fn build_options(&self) -> &BuildOptions {
		&self.options
	}

	pub fn stage(&self) -> CodedStage {
		if self.instance.is_some() {
			CodedStage::Loaded
		} else if self.artifact.is_some() {
			CodedStage::Built
		} else if self.unit.is_some() {
			CodedStage::Synthesized
		} else {
			CodedStage::Uninitialized
		}
	}

	/// Synthesized units, computing them on first use.
	pub fn synthesize(&mut self) -> StageResult<Arc<SynthesizedUnit>> {
		self.ensure_synthesized().map(|(unit, _)| unit)
	}

	/// Fingerprint of the synthesized units, build options and toolchain.
	pub fn fingerprint(&mut self) -> StageResult<Fingerprint> {
		self.ensure_synthesized().map(|(_, fingerprint)| fingerprint)
	}

	/// Builds or reuses the artifact without loading it.
	pub fn prepare(&mut self) -> StageResult<BuildStatus> {
		self.ensure_built().map(|(_, status)| status)
	}

	/// The live instance, driving the pipeline to [`CodedStage::Loaded`].
	pub fn instance(&mut self) -> StageResult<Arc<P::Instance>> {
		if let Some(instance) = &self.instance {
			return Ok(Arc::clone(instance));
		}
		let (artifact, _) = self.ensure_built()?;

		let instance = Arc::new(
			self.context
				.loader()
				.instantiate::<P>(&artifact)
				.map_err(|e| self.error(e))?,
		);
		info!(name = self.descriptor.name(), path = %artifact.path.display(), "Loaded coded instance");
		self.instance = Some(Arc::clone(&instance));
		Ok(instance)
	}

	/// The instance, only once loaded.
	pub fn current(&self) -> Option<Arc<P::Instance>> {
		self.instance.clone()
	}

	/// Artifact backing the current state, once built.
	pub fn artifact(&self) -> Option<&Artifact> {
		self.artifact.as_ref()
	}

	/// Applies changed configuration.
	///
	/// Returns whether the descriptor changed. When the fingerprint changes
	/// too, the entry drops back to [`CodedStage::Synthesized`] and the next
	/// [`Self::instance`] rebuilds. On error the entry is left untouched.
	pub fn update(&mut self, dict: &(impl CodeDict + ?Sized)) -> StageResult<bool> {
		let descriptor = CodeDescriptor::from_dict(dict, P::CODE_KEYS).map_err(|e| self.error(e))?;
		if descriptor == self.descriptor {
			return Ok(false);
		}

		let options = P::default_options().merged(descriptor.build_options());
		let unit = self.template.synthesize(&descriptor, P::CODE_KEYS).map_err(|e| self.error(e))?;
		let fingerprint = Fingerprint::compute(&unit, &options, self.context.cache().toolchain().version());
		let previous = self.unit.as_ref().map(|(_, fp)| *fp);

		self.descriptor = descriptor;
		self.options = options;
		if previous != Some(fingerprint) {
			debug!(
				name = self.descriptor.name(),
				fingerprint = %fingerprint.short(),
				"Configuration changed, rebuilding on next use"
			);
			self.artifact = None;
			self.instance = None;
		}
		self.unit = Some((Arc::new(unit), fingerprint));
		Ok(true)
	}

	/// Writes the descriptor's audit form.
	pub fn write_code(&self, out: &mut impl fmt::Write) -> fmt::Result {
		self.descriptor.write_code(out)
	}

	/// Loads the instance and registers it under the code name.
	pub fn register_into(&mut self, registry: &mut impl Registry<P::Instance>) -> StageResult<()> {
		let instance = self.instance()?;
		registry.register(self.descriptor.name(), instance);
		Ok(())
	}

	fn ensure_synthesized(&mut self) -> StageResult<(Arc<SynthesizedUnit>, Fingerprint)> {
		if let Some((unit, fingerprint)) = &self.unit {
			return Ok((Arc::clone(unit), *fingerprint));
		}
		let unit = self
			.template
			.synthesize(&self.descriptor, P::CODE_KEYS)
			.map_err(|e| self.error(e))?;
		let fingerprint = Fingerprint::compute(&unit, &self.options, self.context.cache().toolchain().version());
		debug!(name = self.descriptor.name(), fingerprint = %fingerprint.short(), "Synthesized coded source");

		let unit = Arc::new(unit);
		self.unit = Some((Arc::clone(&unit), fingerprint));
		Ok((unit, fingerprint))
	}

	fn ensure_built(&mut self) -> StageResult<(Artifact, BuildStatus)> {
		if let Some(artifact) = &self.artifact {
			return Ok((artifact.clone(), BuildStatus::AlreadyBuilt));
		}
		let (unit, fingerprint) = self.ensure_synthesized()?;

		if !self.context.allow_system_operations() {
			return Err(self.error(CodedError::configuration(
				"allow-system-operations",
				"compiling case-supplied code is disabled",
			)));
		}

		let outcome = self
			.context
			.cache()
			.get_or_build(&ArtifactRequest {
				template: &self.template,
				fingerprint,
				unit: &unit,
				options: &self.options,
			})
			.map_err(|e| self.error(e))?;

		info!(
			name = self.descriptor.name(),
			fingerprint = %fingerprint.short(),
			status = ?outcome.status,
			"Prepared coded library"
		);
		self.artifact = Some(outcome.artifact.clone());
		Ok((outcome.artifact, outcome.status))
	}

	fn error(&self, source: CodedError) -> ExtensionError {
		ExtensionError {
			type_name: P::TYPE_NAME,
			name: self.descriptor.name().to_string(),
			source,
		}
	}
}

impl<P: ExtensionPoint> fmt::Debug for CodedBase<P> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CodedBase")
			.field("type", &P::TYPE_NAME)
			.field("name", &self.descriptor.name())
			.field("stage", &self.stage())
			.finish_non_exhaustive()
	}
}
