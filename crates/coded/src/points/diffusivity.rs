//! `codedDiffusivity`: mesh-motion diffusivity at a point.
//!
//! The `code` fragment is the body of
//! `double value(x, y, z, distance)`, where `distance` is the distance to the
//! nearest moving boundary. `<math.h>` is always included.

use std::ffi::c_void;
use std::fmt;

use coded_abi::CodedDiffusivityVTableV1;

use crate::descriptor::BuildOptions;
use crate::loader::Guest;
use crate::point::ExtensionPoint;
use crate::template::CodeTemplate;

type ValueFn = unsafe extern "C" fn(*const c_void, f64, f64, f64, f64) -> f64;

/// Extension point marker for [`Diffusivity`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CodedDiffusivity;

impl ExtensionPoint for CodedDiffusivity {
	const TYPE_NAME: &'static str = "codedDiffusivity";
	const CODE_KEYS: &'static [&'static str] = &["code-include", "code-data", "local-code", "code-construct", "code-destruct", "code"];

	type Instance = Diffusivity;

	fn template() -> CodeTemplate {
		CodeTemplate::embedded(
			Self::TYPE_NAME,
			include_str!("../../templates/codedDiffusivityTemplate.h"),
			include_str!("../../templates/codedDiffusivityTemplate.c"),
		)
	}

	fn default_options() -> BuildOptions {
		BuildOptions {
			compile_flags: Vec::new(),
			link_libs: if cfg!(unix) { vec!["-lm".to_string()] } else { Vec::new() },
		}
	}

	fn bind(guest: Guest) -> Result<Diffusivity, String> {
		// SAFETY: the guest's type name was checked to be `codedDiffusivity`.
		let vtable = unsafe { guest.vtable::<CodedDiffusivityVTableV1>() }?;
		let value = vtable.value.ok_or("vtable entry `value` is null")?;
		Ok(Diffusivity { guest, value })
	}
}

/// A loaded diffusivity field.
pub struct Diffusivity {
	guest: Guest,
	value: ValueFn,
}

impl Diffusivity {
	/// Diffusivity at `point`, `distance` away from the moving boundary.
	pub fn value(&self, point: [f64; 3], distance: f64) -> f64 {
		let [x, y, z] = point;
		// SAFETY: the entry comes from the guest's vtable and takes its object.
		unsafe { (self.value)(self.guest.object(), x, y, z, distance) }
	}

	/// Evaluates pairwise; stops at the shorter of the two slices.
	pub fn values(&self, points: &[[f64; 3]], distances: &[f64]) -> Vec<f64> {
		points.iter().zip(distances).map(|(&point, &distance)| self.value(point, distance)).collect()
	}
}

impl fmt::Debug for Diffusivity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Diffusivity").field("object", &self.guest.object()).finish()
	}
}
