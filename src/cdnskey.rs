use std::fmt;

use data_encoding::BASE64;
use hickory_resolver::lookup::Lookup;
use hickory_resolver::proto::dnssec::rdata::{DNSSECRData, CDNSKEY};
use hickory_resolver::proto::rr::RData;
use hickory_resolver::proto::serialize::binary::{BinEncodable, BinEncoder};

/// One CDNSKEY record as published by a zone, projected into owned values.
///
/// RDATA layout: flags(16) | protocol(8) | algorithm(8) | public_key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdnskeyRecord {
	pub flags: u16,
	pub protocol: u8,
	pub algorithm: u8,
	pub public_key: Vec<u8>,
}

impl CdnskeyRecord {
	/// Project the typed record data back into its wire fields.
	///
	/// Re-encoding keeps the public key intact even for the RFC 8078
	/// delete form (algorithm 0), which the typed accessors do not expose.
	pub fn from_rdata(rdata: &CDNSKEY) -> Option<Self> {
		let mut wire = Vec::new();
		{
			let mut encoder = BinEncoder::new(&mut wire);
			rdata.emit(&mut encoder).ok()?;
		}
		if wire.len() < 4 {
			return None;
		}
		Some(Self {
			flags: u16::from_be_bytes([wire[0], wire[1]]),
			protocol: wire[2],
			algorithm: wire[3],
			public_key: wire[4..].to_vec(),
		})
	}
}

impl fmt::Display for CdnskeyRecord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{} {} {} {}",
			self.flags,
			self.protocol,
			self.algorithm,
			BASE64.encode(&self.public_key)
		)
	}
}

/// Pull every CDNSKEY out of a finished lookup.
pub fn extract_from_lookup(lookup: &Lookup) -> Vec<CdnskeyRecord> {
	lookup
		.record_iter()
		.filter_map(|record| match record.data() {
			RData::DNSSEC(DNSSECRData::CDNSKEY(rdata)) => CdnskeyRecord::from_rdata(rdata),
			_ => None,
		})
		.collect()
}
