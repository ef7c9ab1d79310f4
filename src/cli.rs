use std::net::IpAddr;

use anyhow::{anyhow, Result};
use clap::Parser;

use crate::anchors::TrustAnchor;

/// Scanner of CDNSKEY records.
///
/// Reads the zones to scan from standard input, split into a `[secure]`
/// section of DNSSEC-signed zones and an `[insecure]` section of
/// `nameserver zone...` lines, and writes one result line per outcome to
/// standard output.
#[derive(Parser, Debug)]
#[command(name = "cdnskey-scanner")]
pub struct Cli {
	/// Resolvers used for A/AAAA lookups of nameserver hostnames;
	/// default is the system configured resolver
	#[arg(long = "hostname_resolvers", value_name = "IP[,IP...]")]
	pub hostname_resolvers: Option<String>,

	/// Resolvers used for validated CDNSKEY lookups of signed zones;
	/// default is the system configured resolver
	#[arg(long = "cdnskey_resolvers", value_name = "IP[,IP...]")]
	pub cdnskey_resolvers: Option<String>,

	/// Trust anchors for DNSSEC validation, each formatted as
	/// "zone flags protocol algorithm public_key_base64";
	/// default is the built-in root chain of trust
	#[arg(long = "dnssec_trust_anchors", value_name = "ANCHOR[,ANCHOR...]")]
	pub dnssec_trust_anchors: Option<String>,

	/// Maximum time (in seconds) spent by one DNS request
	#[arg(long = "timeout", value_name = "SECONDS", default_value_t = 10)]
	pub timeout: u64,

	/// Total time (in seconds) reserved for the whole scan
	#[arg(
		value_name = "RUNTIME_SECONDS",
		value_parser = clap::value_parser!(u64).range(1..)
	)]
	pub runtime: u64,
}

/// Parse a comma-separated list of IP addresses.
pub fn parse_ip_list(input: &str) -> Result<Vec<IpAddr>> {
	input
		.split(',')
		.map(|item| {
			item.parse()
				.map_err(|e| anyhow!("invalid IP address '{}': {}", item, e))
		})
		.collect()
}

/// Parse a comma-separated list of trust anchors.
pub fn parse_anchor_list(input: &str) -> Result<Vec<TrustAnchor>> {
	input.split(',').map(str::parse).collect()
}
