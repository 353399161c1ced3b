//! C ABI shared by the host and every generated coded extension.
//!
//! A generated unit exports exactly one factory, [`CODED_FACTORY_SYMBOL`], with
//! the signature [`CodedFactoryV1`]. The factory fills a [`CodedGuestV1`] that
//! names the extension type, owns an opaque object and points at a static
//! vtable whose layout is defined per extension point.
//!
//! The C side of this contract is [`ABI_PRELUDE`]. It is spliced into every
//! declaration unit, so the Rust and C definitions below must change together
//! and any change bumps [`CODED_ABI_VERSION`].

use core::ffi::{c_char, c_int, c_void};

/// ABI revision embedded in every generated unit.
pub const CODED_ABI_VERSION: u32 = 1;

/// Name of the factory entry point resolved by the loader.
pub const CODED_FACTORY_SYMBOL: &str = "coded_factory_v1";

/// Factory status for a constructed guest.
pub const CODED_STATUS_OK: c_int = 0;
/// Factory status when construction failed.
pub const CODED_STATUS_FAILED: c_int = 1;

/// Factory exported by a generated library.
pub type CodedFactoryV1 = unsafe extern "C" fn(out: *mut CodedGuestV1) -> c_int;

/// Guest instance handed back by the factory.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CodedGuestV1 {
	/// Must equal [`CODED_ABI_VERSION`].
	pub abi_version: u32,
	/// `sizeof` the vtable pointed to by `vtable`.
	pub vtable_size: u32,
	/// NUL-terminated extension type name, static in the library.
	pub type_name: *const c_char,
	/// Opaque object owned by the guest until `destroy` runs.
	pub object: *mut c_void,
	/// Static vtable for the extension point.
	pub vtable: *const c_void,
	/// Releases `object`.
	pub destroy: Option<unsafe extern "C" fn(object: *mut c_void)>,
}

/// Vtable of the `codedFunction1` extension point.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CodedFunction1VTableV1 {
	pub value: Option<unsafe extern "C" fn(object: *const c_void, x: f64) -> f64>,
	pub integral: Option<unsafe extern "C" fn(object: *const c_void, x1: f64, x2: f64) -> f64>,
}

/// Vtable of the `codedDiffusivity` extension point.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CodedDiffusivityVTableV1 {
	pub value: Option<unsafe extern "C" fn(object: *const c_void, x: f64, y: f64, z: f64, distance: f64) -> f64>,
}

/// C declarations matching the Rust definitions in this crate.
pub const ABI_PRELUDE: &str = r#"#include <stddef.h>
#include <stdint.h>
#include <stdlib.h>

#define CODED_ABI_VERSION 1u
#define CODED_STATUS_OK 0
#define CODED_STATUS_FAILED 1

#if defined(_WIN32)
#define CODED_EXPORT __declspec(dllexport)
#else
#define CODED_EXPORT __attribute__((visibility("default")))
#endif

typedef struct coded_guest_v1 {
	uint32_t abi_version;
	uint32_t vtable_size;
	const char *type_name;
	void *object;
	const void *vtable;
	void (*destroy)(void *object);
} coded_guest_v1;

typedef struct coded_function1_vtable_v1 {
	double (*value)(const void *object, double x);
	double (*integral)(const void *object, double x1, double x2);
} coded_function1_vtable_v1;

typedef struct coded_diffusivity_vtable_v1 {
	double (*value)(const void *object, double x, double y, double z, double distance);
} coded_diffusivity_vtable_v1;

CODED_EXPORT int coded_factory_v1(coded_guest_v1 *out);"#;

#[cfg(target_pointer_width = "64")]
const _: () = {
	assert!(core::mem::size_of::<CodedGuestV1>() == 40);
	assert!(core::mem::size_of::<CodedFunction1VTableV1>() == 16);
	assert!(core::mem::size_of::<CodedDiffusivityVTableV1>() == 8);
};
