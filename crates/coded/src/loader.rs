//! Loading built artifacts and constructing guest instances.
//!
//! A library is opened at most once per path and then kept for the lifetime of
//! the process: instances handed out earlier may still point into it, and
//! native unloading is not reliable across platforms.

use std::collections::HashMap;
use std::ffi::{CStr, c_void};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use coded_abi::{CODED_ABI_VERSION, CODED_FACTORY_SYMBOL, CODED_STATUS_OK, CodedFactoryV1, CodedGuestV1};
use libloading::{Library, Symbol};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::cache::Artifact;
use crate::error::{CodedError, Result};
use crate::point::ExtensionPoint;

/// An opened library with its resolved factory.
#[derive(Debug)]
pub struct LoadedLibrary {
	path: PathBuf,
	factory: CodedFactoryV1,
	_library: Library,
}

impl LoadedLibrary {
	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Runs the factory and checks the guest against the ABI contract.
	fn construct(&self, type_name: &str) -> std::result::Result<Guest, String> {
		// SAFETY: an all-zero guest is a valid value (null pointers, `None`).
		let mut raw = unsafe { std::mem::zeroed::<CodedGuestV1>() };
		// SAFETY: the symbol was resolved with the factory's signature and the
		// library is never unloaded.
		let status = unsafe { (self.factory)(&mut raw) };
		if status != CODED_STATUS_OK {
			return Err(format!("factory `{CODED_FACTORY_SYMBOL}` failed with status {status}"));
		}

		// From here on the guest owns an object that must be destroyed.
		let guest = Guest { raw };
		check_guest(&guest.raw, type_name)?;
		Ok(guest)
	}
}

fn check_guest(raw: &CodedGuestV1, type_name: &str) -> std::result::Result<(), String> {
	if raw.abi_version != CODED_ABI_VERSION {
		return Err(format!(
			"incompatible ABI version: host={CODED_ABI_VERSION}, guest={}",
			raw.abi_version
		));
	}
	if raw.type_name.is_null() {
		return Err("guest has no type name".to_string());
	}
	// SAFETY: non-null and NUL-terminated per the ABI contract.
	let guest_type = unsafe { CStr::from_ptr(raw.type_name) }.to_string_lossy();
	if guest_type != type_name {
		return Err(format!("type mismatch: expected `{type_name}`, library provides `{guest_type}`"));
	}
	if raw.object.is_null() {
		return Err("guest object is null".to_string());
	}
	if raw.vtable.is_null() {
		return Err("guest vtable is null".to_string());
	}
	Ok(())
}

/// A constructed guest object. Destroyed on drop.
#[derive(Debug)]
pub struct Guest {
	raw: CodedGuestV1,
}

// SAFETY: generated evaluators only receive the object through a const
// pointer, and destruction happens once through `&mut self`.
unsafe impl Send for Guest {}
unsafe impl Sync for Guest {}

impl Guest {
	/// Wraps a guest filled in by a factory.
	///
	/// # Safety
	///
	/// `raw` must satisfy the ABI contract and its object must not be owned by
	/// anything else.
	pub unsafe fn from_raw(raw: CodedGuestV1) -> Self {
		Self { raw }
	}

	/// Opaque object passed to every vtable entry.
	pub fn object(&self) -> *const c_void {
		self.raw.object
	}

	/// Reinterprets the vtable as `T`, checking the advertised size.
	///
	/// # Safety
	///
	/// `T` must be the vtable layout declared for this guest's type name.
	pub unsafe fn vtable<T>(&self) -> std::result::Result<&T, String> {
		let expected = std::mem::size_of::<T>();
		if (self.raw.vtable_size as usize) < expected {
			return Err(format!("vtable is {} bytes, expected {expected}", self.raw.vtable_size));
		}
		// SAFETY: non-null (checked at construction), large enough and of
		// layout `T` per the caller's contract.
		Ok(unsafe { &*self.raw.vtable.cast::<T>() })
	}
}

impl Drop for Guest {
	fn drop(&mut self) {
		if let Some(destroy) = self.raw.destroy
			&& !self.raw.object.is_null()
		{
			// SAFETY: the object came from the same guest and is destroyed once.
			unsafe { destroy(self.raw.object) };
		}
	}
}

type Slot = OnceLock<Result<&'static LoadedLibrary>>;

/// Library loader. Each path is opened at most once per loader.
///
/// Contexts share [`DynamicLoader::shared`] unless handed their own, so the
/// once-per-path guarantee holds for the whole process by default.
#[derive(Debug, Default)]
pub struct DynamicLoader {
	libraries: Mutex<HashMap<PathBuf, Arc<Slot>>>,
}

impl DynamicLoader {
	pub fn new() -> Self {
		Self::default()
	}

	/// The process-wide loader.
	pub fn shared() -> Arc<Self> {
		static SHARED: OnceLock<Arc<DynamicLoader>> = OnceLock::new();
		Arc::clone(SHARED.get_or_init(|| Arc::new(Self::new())))
	}

	/// Opens `path` once and resolves its factory.
	///
	/// Concurrent first loads of one path serialize; failures are not
	/// remembered, so a rebuilt artifact can be retried.
	pub fn load(&self, path: &Path) -> Result<&'static LoadedLibrary> {
		let slot = {
			let mut libraries = self.libraries.lock();
			Arc::clone(libraries.entry(path.to_path_buf()).or_default())
		};

		let result = slot.get_or_init(|| open(path)).clone();
		if result.is_err() {
			let mut libraries = self.libraries.lock();
			if libraries.get(path).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
				libraries.remove(path);
			}
		}
		result
	}

	/// Number of libraries currently held open.
	pub fn loaded(&self) -> usize {
		self.libraries.lock().values().filter(|slot| matches!(slot.get(), Some(Ok(_)))).count()
	}

	/// Loads the artifact and constructs a `P` instance from it.
	pub fn instantiate<P: ExtensionPoint>(&self, artifact: &Artifact) -> Result<P::Instance> {
		let library = self.load(&artifact.path)?;
		let guest = library
			.construct(P::TYPE_NAME)
			.map_err(|reason| CodedError::load(&artifact.path, reason))?;
		let instance = P::bind(guest).map_err(|reason| CodedError::load(&artifact.path, reason))?;
		debug!(path = %artifact.path.display(), kind = P::TYPE_NAME, "Constructed coded instance");
		Ok(instance)
	}
}

fn open(path: &Path) -> Result<&'static LoadedLibrary> {
	// SAFETY: loading runs the library's initializers; artifacts are produced
	// by this process's build cache from the case's own code.
	let library = unsafe { Library::new(path) }.map_err(|e| CodedError::load(path, e.to_string()))?;

	let symbol = format!("{CODED_FACTORY_SYMBOL}\0");
	// SAFETY: the symbol's type is fixed by the ABI contract.
	let factory: CodedFactoryV1 = unsafe {
		let symbol: Symbol<CodedFactoryV1> = library
			.get(symbol.as_bytes())
			.map_err(|_| CodedError::load(path, format!("missing entry symbol `{CODED_FACTORY_SYMBOL}`")))?;
		*symbol
	};

	info!(path = %path.display(), "Loaded coded library");
	Ok(Box::leak(Box::new(LoadedLibrary {
		path: path.to_path_buf(),
		factory,
		_library: library,
	})))
}

#[cfg(test)]
mod tests {
	use std::ffi::c_char;
	use std::ptr;

	use super::*;

	static TYPE_NAME: &CStr = c"codedTest";
	static VTABLE: [usize; 2] = [0, 0];

	fn raw() -> CodedGuestV1 {
		CodedGuestV1 {
			abi_version: CODED_ABI_VERSION,
			vtable_size: 16,
			type_name: TYPE_NAME.as_ptr(),
			object: ptr::NonNull::<u8>::dangling().as_ptr().cast(),
			vtable: VTABLE.as_ptr().cast(),
			destroy: None,
		}
	}

	#[test]
	fn accepts_a_conforming_guest() {
		assert_eq!(check_guest(&raw(), "codedTest"), Ok(()));
	}

	#[test]
	fn rejects_foreign_abi_versions() {
		let guest = CodedGuestV1 {
			abi_version: CODED_ABI_VERSION + 1,
			..raw()
		};
		assert!(check_guest(&guest, "codedTest").unwrap_err().contains("ABI version"));
	}

	#[test]
	fn rejects_type_mismatch() {
		let err = check_guest(&raw(), "codedOther").unwrap_err();
		assert!(err.contains("codedOther") && err.contains("codedTest"), "{err}");
	}

	#[test]
	fn rejects_null_pointers() {
		let nameless = CodedGuestV1 {
			type_name: ptr::null::<c_char>(),
			..raw()
		};
		assert!(check_guest(&nameless, "codedTest").is_err());

		let hollow = CodedGuestV1 {
			object: ptr::null_mut(),
			..raw()
		};
		assert!(check_guest(&hollow, "codedTest").is_err());

		let tableless = CodedGuestV1 {
			vtable: ptr::null(),
			..raw()
		};
		assert!(check_guest(&tableless, "codedTest").is_err());
	}

	#[test]
	fn short_vtables_are_rejected() {
		// SAFETY: the guest owns no object and has no destructor.
		let guest = unsafe { Guest::from_raw(CodedGuestV1 { vtable_size: 8, ..raw() }) };
		// SAFETY: never dereferenced, the size check fails first.
		assert!(unsafe { guest.vtable::<[usize; 2]>() }.is_err());
	}

	#[test]
	fn drop_runs_the_destructor() {
		use std::sync::atomic::{AtomicUsize, Ordering};
		static DESTROYED: AtomicUsize = AtomicUsize::new(0);
		unsafe extern "C" fn destroy(_: *mut c_void) {
			DESTROYED.fetch_add(1, Ordering::SeqCst);
		}

		// SAFETY: the object is a dangling marker only passed to `destroy`.
		drop(unsafe {
			Guest::from_raw(CodedGuestV1 {
				destroy: Some(destroy),
				..raw()
			})
		});
		assert_eq!(DESTROYED.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn missing_library_is_a_load_error() {
		let loader = DynamicLoader::new();
		let err = loader.load(Path::new("/nonexistent/libcoded.so")).unwrap_err();
		assert!(matches!(err, CodedError::Load { .. }));
		assert_eq!(loader.loaded(), 0);
	}

	#[test]
	fn non_library_files_are_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("libbogus.so");
		std::fs::write(&path, b"definitely not ELF").unwrap();
		let err = DynamicLoader::new().load(&path).unwrap_err();
		assert!(matches!(err, CodedError::Load { path: ref p, .. } if p == &path));
	}
}
