use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hickory_resolver::config::{
	ConnectionConfig, LookupIpStrategy, NameServerConfig, ResolveHosts, ResolverConfig,
	ResolverOpts,
};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::dnssec::TrustAnchors;
use hickory_resolver::proto::rr::{Name, RecordType};
use hickory_resolver::proto::{ProtoError, ProtoErrorKind};
use hickory_resolver::{Resolver, TokioResolver};
use tracing::debug;

use crate::cdnskey::{self, CdnskeyRecord};

/// DNS transport, in upstream preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
	Udp,
	Tcp,
	Tls,
}

/// Outcome of an A/AAAA lookup for a nameserver hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressOutcome {
	Resolved(BTreeSet<IpAddr>),
	Failed,
}

/// Outcome of an unvalidated CDNSKEY query against one authoritative
/// address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CdnskeyOutcome {
	/// The server answered; the set of records may be empty.
	Answered(Vec<CdnskeyRecord>),
	Failed,
}

/// Outcome of a DNSSEC-validated CDNSKEY query for a signed zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecureOutcome {
	/// Every record of the answer proved secure; the set may be empty.
	Validated(Vec<CdnskeyRecord>),
	/// The query completed but the answer did not validate.
	Untrustworthy,
	Failed,
}

/// Per-query settings of the insecure scan phase.
#[derive(Debug, Clone)]
pub struct AuthoritativeConfig {
	pub transports: Vec<Transport>,
	pub timeout: Duration,
}

/// Per-query settings of the secure scan phase.
#[derive(Clone)]
pub struct ValidatingConfig {
	pub resolvers: Vec<IpAddr>,
	pub transports: Vec<Transport>,
	pub timeout: Duration,
	/// Explicit trust anchors; `None` keeps the engine's root anchors.
	pub trust_anchors: Option<Arc<TrustAnchors>>,
}

fn name_server(ip: IpAddr, transports: &[Transport]) -> NameServerConfig {
	let connections = transports
		.iter()
		.map(|transport| match transport {
			Transport::Udp => ConnectionConfig::udp(),
			Transport::Tcp => ConnectionConfig::tcp(),
			Transport::Tls => ConnectionConfig::tls(Arc::from(ip.to_string())),
		})
		.collect();
	NameServerConfig {
		ip,
		trust_negative_responses: true,
		connections,
	}
}

/// A stub configuration pointing at the given upstreams only.
fn upstream_config(ips: &[IpAddr], transports: &[Transport]) -> ResolverConfig {
	ResolverConfig::from_parts(
		None,
		Vec::new(),
		ips.iter().map(|ip| name_server(*ip, transports)).collect(),
	)
}

/// Shared query options: hard per-query timeout, no retries, no hosts file.
fn base_options(timeout: Duration) -> ResolverOpts {
	let mut options = ResolverOpts::default();
	options.timeout = timeout;
	options.attempts = 0;
	options.edns0 = true;
	options.use_hosts_file = ResolveHosts::Never;
	options
}

/// Upstream addresses from the operating system's resolver configuration.
pub fn system_resolver_ips() -> Result<Vec<IpAddr>> {
	let (config, _) = hickory_resolver::system_conf::read_system_conf()
		.context("failed to read system resolver configuration")?;
	Ok(config.name_servers().iter().map(|ns| ns.ip).collect())
}

/// The shared resolver of the hostname resolution phase.
pub fn hostname_resolver(
	upstreams: &[IpAddr],
	transports: &[Transport],
	timeout: Duration,
) -> Arc<TokioResolver> {
	let mut options = base_options(timeout);
	options.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
	let resolver = Resolver::builder_with_config(
		upstream_config(upstreams, transports),
		TokioConnectionProvider::default(),
	)
	.with_options(options)
	.build();
	Arc::new(resolver)
}

fn zone_name(zone: &str) -> Result<Name, ProtoError> {
	let mut name = Name::from_ascii(zone)?;
	name.set_fqdn(true);
	Ok(name)
}

/// Resolve one nameserver hostname to its distinct addresses.
pub async fn resolve_addresses(resolver: Arc<TokioResolver>, hostname: String) -> AddressOutcome {
	let name = match zone_name(&hostname) {
		Ok(name) => name,
		Err(error) => {
			debug!("invalid nameserver hostname '{hostname}': {error}");
			return AddressOutcome::Failed;
		}
	};
	match resolver.lookup_ip(name).await {
		Ok(found) => AddressOutcome::Resolved(found.iter().collect()),
		Err(error) => match error.kind() {
			ProtoErrorKind::NoRecordsFound { .. } => AddressOutcome::Resolved(BTreeSet::new()),
			_ => {
				debug!("address lookup for '{hostname}' failed: {error}");
				AddressOutcome::Failed
			}
		},
	}
}

/// Query one authoritative address directly for the CDNSKEY set of a zone.
///
/// Each query runs in its own context so the single upstream and the
/// transport list never leak between queries.
pub async fn query_authoritative(
	config: AuthoritativeConfig,
	address: IpAddr,
	zone: String,
) -> CdnskeyOutcome {
	let mut options = base_options(config.timeout);
	options.recursion_desired = false;
	let resolver = Resolver::builder_with_config(
		upstream_config(&[address], &config.transports),
		TokioConnectionProvider::default(),
	)
	.with_options(options)
	.build();
	let name = match zone_name(&zone) {
		Ok(name) => name,
		Err(error) => {
			debug!("invalid zone '{zone}': {error}");
			return CdnskeyOutcome::Failed;
		}
	};
	match resolver.lookup(name, RecordType::CDNSKEY).await {
		Ok(lookup) => CdnskeyOutcome::Answered(cdnskey::extract_from_lookup(&lookup)),
		Err(error) => match error.kind() {
			// An authoritative NODATA or NXDOMAIN answer is still an answer.
			ProtoErrorKind::NoRecordsFound { .. } => CdnskeyOutcome::Answered(Vec::new()),
			_ => {
				debug!("CDNSKEY query for '{zone}' at {address} failed: {error}");
				CdnskeyOutcome::Failed
			}
		},
	}
}

/// Query the recursive upstreams for the CDNSKEY set of a signed zone with
/// DNSSEC validation; only fully validated answers count as completed.
pub async fn query_validated(config: ValidatingConfig, zone: String) -> SecureOutcome {
	let mut options = base_options(config.timeout);
	options.validate = true;
	let mut builder = Resolver::builder_with_config(
		upstream_config(&config.resolvers, &config.transports),
		TokioConnectionProvider::default(),
	)
	.with_options(options);
	if let Some(anchors) = &config.trust_anchors {
		builder = builder.with_trust_anchor(anchors.clone());
	}
	let resolver = builder.build();
	let name = match zone_name(&zone) {
		Ok(name) => name,
		Err(error) => {
			debug!("invalid zone '{zone}': {error}");
			return SecureOutcome::Failed;
		}
	};
	match resolver.lookup(name, RecordType::CDNSKEY).await {
		Ok(lookup) => {
			let unproven = lookup.dnssec_iter().any(|data| !data.proof().is_secure());
			if unproven {
				return SecureOutcome::Untrustworthy;
			}
			SecureOutcome::Validated(cdnskey::extract_from_lookup(&lookup))
		}
		Err(error) => classify_validated_error(&zone, &error),
	}
}

fn classify_validated_error(zone: &str, error: &ProtoError) -> SecureOutcome {
	match error.kind() {
		// A validated proof of absence is a completed, empty answer.
		ProtoErrorKind::NoRecordsFound { .. } => SecureOutcome::Validated(Vec::new()),
		ProtoErrorKind::Nsec { proof, .. } if proof.is_secure() => {
			SecureOutcome::Validated(Vec::new())
		}
		ProtoErrorKind::Nsec { .. } => SecureOutcome::Untrustworthy,
		_ => {
			debug!("validated CDNSKEY query for '{zone}' failed: {error}");
			SecureOutcome::Failed
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_upstream_config_per_transport() {
		let ips = ["192.0.2.53".parse().unwrap()];
		let config = upstream_config(&ips, &[Transport::Udp, Transport::Tcp]);
		assert_eq!(config.name_servers().len(), 1);
		assert_eq!(config.name_servers()[0].ip, ips[0]);
		assert_eq!(config.name_servers()[0].connections.len(), 2);
	}

	#[test]
	fn test_zone_name_is_fully_qualified() {
		let name = zone_name("example.test").unwrap();
		assert!(name.is_fqdn());
		assert!(zone_name("bad..name").is_err());
	}

	#[test]
	fn test_timeout_error_is_failed() {
		let error = ProtoError::from(ProtoErrorKind::Timeout);
		assert_eq!(
			classify_validated_error("example.test", &error),
			SecureOutcome::Failed
		);
	}

	#[test]
	fn test_message_error_is_failed() {
		let error = ProtoError::from("upstream unreachable");
		assert_eq!(
			classify_validated_error("example.test", &error),
			SecureOutcome::Failed
		);
	}
}
