//! Content fingerprints for synthesized units.
//!
//! A fingerprint identifies one `(header, source, build options, toolchain)`
//! combination. It keys the build cache and names generated files, so the hex
//! form is fixed-length lowercase ASCII.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::descriptor::BuildOptions;
use crate::template::SynthesizedUnit;

const DOMAIN: &[u8] = b"coded-fingerprint-v1";

/// blake3 digest identifying a buildable unit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
	/// Length of [`Self::to_hex`].
	pub const HEX_LEN: usize = 64;

	/// Digests everything that affects the built artifact.
	pub fn compute(unit: &SynthesizedUnit, options: &BuildOptions, toolchain_version: &str) -> Self {
		let mut hasher = blake3::Hasher::new();
		hasher.update(DOMAIN);
		field(&mut hasher, unit.header.as_bytes());
		field(&mut hasher, unit.source.as_bytes());
		list(&mut hasher, &options.compile_flags);
		list(&mut hasher, &options.link_libs);
		field(&mut hasher, toolchain_version.as_bytes());
		Self(*hasher.finalize().as_bytes())
	}

	pub const fn from_bytes(bytes: [u8; 32]) -> Self {
		Self(bytes)
	}

	pub const fn as_bytes(&self) -> &[u8; 32] {
		&self.0
	}

	/// Full lowercase hex digest.
	pub fn to_hex(&self) -> String {
		blake3::Hash::from_bytes(self.0).to_hex().to_string()
	}

	/// First 16 hex characters, used in library file names.
	pub fn short(&self) -> String {
		let mut hex = self.to_hex();
		hex.truncate(16);
		hex
	}
}

fn field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
	hasher.update(&(bytes.len() as u64).to_le_bytes());
	hasher.update(bytes);
}

fn list(hasher: &mut blake3::Hasher, items: &[String]) {
	hasher.update(&(items.len() as u64).to_le_bytes());
	for item in items {
		field(hasher, item.as_bytes());
	}
}

impl fmt::Display for Fingerprint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_hex())
	}
}

impl fmt::Debug for Fingerprint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Fingerprint({})", self.short())
	}
}

/// Error parsing a fingerprint from hex.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid fingerprint `{0}`")]
pub struct ParseFingerprintError(String);

impl FromStr for Fingerprint {
	type Err = ParseFingerprintError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.len() != Self::HEX_LEN || !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
			return Err(ParseFingerprintError(s.to_string()));
		}
		blake3::Hash::from_hex(s)
			.map(|hash| Self(*hash.as_bytes()))
			.map_err(|_| ParseFingerprintError(s.to_string()))
	}
}

impl Serialize for Fingerprint {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_hex())
	}
}

impl<'de> Deserialize<'de> for Fingerprint {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let hex = String::deserialize(deserializer)?;
		hex.parse().map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn unit(source: &str) -> SynthesizedUnit {
		SynthesizedUnit {
			header: "/* header */".to_string(),
			source: source.to_string(),
		}
	}

	#[test]
	fn identical_inputs_give_identical_digests() {
		let options = BuildOptions {
			compile_flags: vec!["-O3".into()],
			link_libs: vec!["-lm".into()],
		};
		let a = Fingerprint::compute(&unit("return x;"), &options, "cc 13");
		let b = Fingerprint::compute(&unit("return x;"), &options, "cc 13");
		assert_eq!(a, b);
		assert_eq!(a.to_hex(), b.to_hex());
	}

	#[test]
	fn every_input_affects_the_digest() {
		let options = BuildOptions::default();
		let base = Fingerprint::compute(&unit("return x;"), &options, "cc 13");

		assert_ne!(base, Fingerprint::compute(&unit("return 2*x;"), &options, "cc 13"));
		assert_ne!(base, Fingerprint::compute(&unit("return x;"), &options, "cc 14"));

		let flagged = BuildOptions {
			compile_flags: vec!["-DFAST".into()],
			link_libs: Vec::new(),
		};
		assert_ne!(base, Fingerprint::compute(&unit("return x;"), &flagged, "cc 13"));
	}

	#[test]
	fn flag_boundaries_are_unambiguous() {
		let joined = BuildOptions {
			compile_flags: vec!["-DA -DB".into()],
			link_libs: Vec::new(),
		};
		let split = BuildOptions {
			compile_flags: vec!["-DA".into(), "-DB".into()],
			link_libs: Vec::new(),
		};
		let moved = BuildOptions {
			compile_flags: Vec::new(),
			link_libs: vec!["-DA -DB".into()],
		};
		let a = Fingerprint::compute(&unit(""), &joined, "");
		assert_ne!(a, Fingerprint::compute(&unit(""), &split, ""));
		assert_ne!(a, Fingerprint::compute(&unit(""), &moved, ""));
	}

	#[test]
	fn hex_is_path_safe_and_parses_back() {
		let fp = Fingerprint::compute(&unit("x"), &BuildOptions::default(), "v");
		let hex = fp.to_hex();
		assert_eq!(hex.len(), Fingerprint::HEX_LEN);
		assert!(hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));
		assert_eq!(hex.parse::<Fingerprint>().unwrap(), fp);
		assert_eq!(fp.short(), hex[..16]);
	}

	#[test]
	fn rejects_malformed_hex() {
		assert!("abc".parse::<Fingerprint>().is_err());
		assert!("Z".repeat(64).parse::<Fingerprint>().is_err());
		assert!("A".repeat(64).parse::<Fingerprint>().is_err());
	}

	#[test]
	fn serializes_as_hex_string() {
		let fp = Fingerprint::from_bytes([7; 32]);
		let json = serde_json::to_string(&fp).unwrap();
		assert_eq!(json, format!("\"{}\"", fp.to_hex()));
		assert_eq!(serde_json::from_str::<Fingerprint>(&json).unwrap(), fp);
	}
}
