//! `codedFunction1`: a scalar function of one variable.
//!
//! The `code` fragment is the body of `double value(x)`, for example a
//! prescribed piston position over time. `code-integral` is the body of
//! `double integral(x1, x2)`; without it the integral falls back to a
//! composite trapezoid rule over `value`. Data members declared in
//! `code-data` are reached through `self->`.

use std::ffi::c_void;
use std::fmt;

use coded_abi::CodedFunction1VTableV1;

use crate::loader::Guest;
use crate::point::ExtensionPoint;
use crate::template::CodeTemplate;

type ValueFn = unsafe extern "C" fn(*const c_void, f64) -> f64;
type IntegralFn = unsafe extern "C" fn(*const c_void, f64, f64) -> f64;

/// Extension point marker for [`Function1`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CodedFunction1;

impl ExtensionPoint for CodedFunction1 {
	const TYPE_NAME: &'static str = "codedFunction1";
	const CODE_KEYS: &'static [&'static str] = &[
		"code-include",
		"code-data",
		"local-code",
		"code-construct",
		"code-destruct",
		"code",
		"code-integral",
	];

	type Instance = Function1;

	fn template() -> CodeTemplate {
		CodeTemplate::embedded(
			Self::TYPE_NAME,
			include_str!("../../templates/codedFunction1Template.h"),
			include_str!("../../templates/codedFunction1Template.c"),
		)
	}

	fn bind(guest: Guest) -> Result<Function1, String> {
		// SAFETY: the guest's type name was checked to be `codedFunction1`.
		let vtable = unsafe { guest.vtable::<CodedFunction1VTableV1>() }?;
		let value = vtable.value.ok_or("vtable entry `value` is null")?;
		let integral = vtable.integral.ok_or("vtable entry `integral` is null")?;
		Ok(Function1 { guest, value, integral })
	}
}

/// A loaded scalar function.
pub struct Function1 {
	guest: Guest,
	value: ValueFn,
	integral: IntegralFn,
}

impl Function1 {
	pub fn value(&self, x: f64) -> f64 {
		// SAFETY: entries come from the guest's vtable and take its object.
		unsafe { (self.value)(self.guest.object(), x) }
	}

	/// Integral over `[x1, x2]`.
	pub fn integral(&self, x1: f64, x2: f64) -> f64 {
		// SAFETY: as in `value`.
		unsafe { (self.integral)(self.guest.object(), x1, x2) }
	}
}

impl fmt::Debug for Function1 {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Function1").field("object", &self.guest.object()).finish()
	}
}
