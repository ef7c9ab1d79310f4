use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context, Error, Result};
use data_encoding::BASE64;
use hickory_resolver::proto::dnssec::{Algorithm, PublicKeyBuf, TrustAnchors};

/// A DNSKEY accepted a priori as a root of DNSSEC validation.
///
/// The textual form is five whitespace-separated fields:
/// `zone flags protocol algorithm public_key_base64`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchor {
	pub zone: String,
	pub flags: u16,
	pub protocol: u8,
	pub algorithm: u8,
	pub public_key: Vec<u8>,
}

impl FromStr for TrustAnchor {
	type Err = Error;

	fn from_str(input: &str) -> Result<Self> {
		let fields: Vec<&str> = input.split_whitespace().collect();
		if fields.len() != 5 {
			return Err(anyhow!(
				"invalid trust anchor '{}': expected 5 fields, got {}",
				input,
				fields.len()
			));
		}
		let flags = fields[1]
			.parse()
			.with_context(|| format!("invalid trust anchor flags '{}'", fields[1]))?;
		let protocol = fields[2]
			.parse()
			.with_context(|| format!("invalid trust anchor protocol '{}'", fields[2]))?;
		let algorithm = fields[3]
			.parse()
			.with_context(|| format!("invalid trust anchor algorithm '{}'", fields[3]))?;
		let public_key = BASE64
			.decode(fields[4].as_bytes())
			.with_context(|| format!("invalid trust anchor public key '{}'", fields[4]))?;
		Ok(Self {
			zone: fields[0].to_owned(),
			flags,
			protocol,
			algorithm,
			public_key,
		})
	}
}

impl fmt::Display for TrustAnchor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{} {} {} {} {}",
			self.zone,
			self.flags,
			self.protocol,
			self.algorithm,
			BASE64.encode(&self.public_key)
		)
	}
}

/// Collect parsed anchors into the validation key set of the resolver
/// runtime.
pub fn to_validation_keys(anchors: &[TrustAnchor]) -> TrustAnchors {
	let mut keys = TrustAnchors::empty();
	for anchor in anchors {
		let key = PublicKeyBuf::new(
			anchor.public_key.clone(),
			Algorithm::from_u8(anchor.algorithm),
		);
		keys.insert(&key);
	}
	keys
}

#[cfg(test)]
mod tests {
	use super::*;

	const ROOT_ANCHOR: &str = ". 257 3 8 AwEAAdAjHYjq";

	#[test]
	fn test_parse_fields() {
		let anchor: TrustAnchor = ROOT_ANCHOR.parse().unwrap();
		assert_eq!(anchor.zone, ".");
		assert_eq!(anchor.flags, 257);
		assert_eq!(anchor.protocol, 3);
		assert_eq!(anchor.algorithm, 8);
		assert_eq!(anchor.public_key, BASE64.decode(b"AwEAAdAjHYjq").unwrap());
	}

	#[test]
	fn test_roundtrip() {
		let anchor: TrustAnchor = ROOT_ANCHOR.parse().unwrap();
		assert_eq!(anchor.to_string(), ROOT_ANCHOR);
	}

	#[test]
	fn test_wrong_field_count() {
		assert!(". 257 3 8".parse::<TrustAnchor>().is_err());
		assert!(". 257 3 8 AwEA extra".parse::<TrustAnchor>().is_err());
		assert!("".parse::<TrustAnchor>().is_err());
	}

	#[test]
	fn test_bad_numeric_fields() {
		assert!(". 70000 3 8 AwEA".parse::<TrustAnchor>().is_err());
		assert!(". 257 x 8 AwEA".parse::<TrustAnchor>().is_err());
	}

	#[test]
	fn test_bad_base64() {
		assert!(". 257 3 8 !!!".parse::<TrustAnchor>().is_err());
	}

	#[test]
	fn test_validation_keys() {
		let anchor: TrustAnchor = ROOT_ANCHOR.parse().unwrap();
		let keys = to_validation_keys(&[anchor]);
		assert_eq!(keys.len(), 1);
	}
}
