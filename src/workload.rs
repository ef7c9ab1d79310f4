use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;

use anyhow::{bail, Context, Result};

const SECURE_HEADER: &str = "[secure]";
const INSECURE_HEADER: &str = "[insecure]";

/// The zones to scan, as read from stdin.
///
/// Signed zones are queried through validating resolvers; unsigned zones are
/// grouped under the authoritative nameserver hostnames that serve them.
#[derive(Debug)]
pub struct Workload {
	signed_zones: BTreeSet<String>,
	insecure_zones_by_ns: BTreeMap<String, BTreeSet<String>>,
}

impl Workload {
	/// Parse a workload from a byte stream.
	///
	/// The input is consumed in chunks; tokens may span chunk boundaries.
	pub fn parse<R: Read>(mut source: R) -> Result<Self> {
		let mut parser = Parser::new();
		let mut chunk = [0u8; 0x10000];
		loop {
			let read = source.read(&mut chunk).context("failed to read workload")?;
			if read == 0 {
				break;
			}
			parser.feed(&chunk[..read])?;
		}
		parser.finish()
	}

	pub fn signed_zones(&self) -> &BTreeSet<String> {
		&self.signed_zones
	}

	/// Nameserver hostnames of the insecure zones, in sorted order.
	pub fn nameservers(&self) -> impl Iterator<Item = &String> {
		self.insecure_zones_by_ns.keys()
	}

	pub fn zones_of(&self, nameserver: &str) -> Option<&BTreeSet<String>> {
		self.insecure_zones_by_ns.get(nameserver)
	}

	pub fn nameserver_count(&self) -> usize {
		self.insecure_zones_by_ns.len()
	}

	pub fn signed_zone_count(&self) -> usize {
		self.signed_zones.len()
	}

	/// Total number of zones to query: signed zones plus one per delegation
	/// of an unsigned zone.
	pub fn zone_count(&self) -> usize {
		let insecure: usize = self.insecure_zones_by_ns.values().map(BTreeSet::len).sum();
		self.signed_zones.len() + insecure
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
	None,
	Secure,
	Insecure,
}

/// Incremental tokenizer for the section-switched workload format.
///
/// Space separates tokens within a line, newline separates lines. A token is
/// a section header only when it makes up a whole line by itself; anywhere
/// else the same text is data.
struct Parser {
	section: Section,
	/// Partial token carried over between chunks.
	carry: Vec<u8>,
	/// No token has been seen yet on the current line.
	first_token_of_line: bool,
	/// Nameserver captured from the current `[insecure]` line.
	nameserver: Option<String>,
	line_zones: BTreeSet<String>,
	signed_zones: BTreeSet<String>,
	insecure_zones_by_ns: BTreeMap<String, BTreeSet<String>>,
}

impl Parser {
	fn new() -> Self {
		Self {
			section: Section::None,
			carry: Vec::new(),
			first_token_of_line: true,
			nameserver: None,
			line_zones: BTreeSet::new(),
			signed_zones: BTreeSet::new(),
			insecure_zones_by_ns: BTreeMap::new(),
		}
	}

	fn feed(&mut self, chunk: &[u8]) -> Result<()> {
		let mut token_start = 0;
		for (position, byte) in chunk.iter().enumerate() {
			let line_end = *byte == b'\n';
			if !line_end && *byte != b' ' {
				continue;
			}
			let token = self.take_token(&chunk[token_start..position])?;
			self.process_token(&token, line_end)?;
			token_start = position + 1;
		}
		self.carry.extend_from_slice(&chunk[token_start..]);
		Ok(())
	}

	fn finish(mut self) -> Result<Workload> {
		let token = self.take_token(&[])?;
		// A header that ends exactly at end of stream still switches the
		// section; a trailing lone nameserver has no zones and is dropped.
		if self.first_token_of_line && (token == SECURE_HEADER || token == INSECURE_HEADER) {
			return Ok(self.into_workload());
		}
		self.process_token(&token, false)?;
		self.flush_line();
		Ok(self.into_workload())
	}

	fn into_workload(self) -> Workload {
		Workload {
			signed_zones: self.signed_zones,
			insecure_zones_by_ns: self.insecure_zones_by_ns,
		}
	}

	fn take_token(&mut self, tail: &[u8]) -> Result<String> {
		let mut raw = std::mem::take(&mut self.carry);
		raw.extend_from_slice(tail);
		String::from_utf8(raw).context("workload is not valid UTF-8")
	}

	fn process_token(&mut self, token: &str, line_end: bool) -> Result<()> {
		let whole_line = self.first_token_of_line && line_end;
		if whole_line && (token == SECURE_HEADER || token == INSECURE_HEADER) {
			self.section = if token == SECURE_HEADER {
				Section::Secure
			} else {
				Section::Insecure
			};
			self.nameserver = None;
			self.line_zones.clear();
			return Ok(());
		}
		if !token.is_empty() {
			match self.section {
				Section::None => bail!("workload data found before any section header"),
				Section::Secure => {
					self.signed_zones.insert(token.to_owned());
				}
				Section::Insecure => {
					if self.nameserver.is_none() {
						self.nameserver = Some(token.to_owned());
					} else {
						self.line_zones.insert(token.to_owned());
					}
				}
			}
		}
		self.first_token_of_line = false;
		if line_end {
			self.flush_line();
			self.first_token_of_line = true;
		}
		Ok(())
	}

	/// Commit the current `[insecure]` line. Lines without a nameserver or
	/// without zones carry no work.
	fn flush_line(&mut self) {
		let zones = std::mem::take(&mut self.line_zones);
		if let Some(nameserver) = self.nameserver.take() {
			if !zones.is_empty() {
				self.insecure_zones_by_ns
					.entry(nameserver)
					.or_default()
					.extend(zones);
			}
		}
	}
}
