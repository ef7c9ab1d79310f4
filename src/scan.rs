use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::io::Write;
use std::net::IpAddr;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::warn;

use crate::pacing::run_paced;
use crate::runtime::{AddressOutcome, CdnskeyOutcome, SecureOutcome};
use crate::workload::Workload;

/// One unit of phase-2 work: a zone asked of one address of one of its
/// authoritative nameservers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsecureTarget {
	pub nameserver: String,
	pub address: IpAddr,
	pub zone: String,
}

/// Phase 1: resolve nameserver hostnames to their addresses.
///
/// Hostnames that fail to resolve or resolve to nothing are left out of the
/// result; their zones produce no further work and no output.
pub async fn resolve_hostnames<F, Fut>(
	hostnames: Vec<String>,
	budget: Duration,
	submit: F,
) -> BTreeMap<String, BTreeSet<IpAddr>>
where
	F: Fn(&String) -> Fut,
	Fut: Future<Output = AddressOutcome> + Send + 'static,
{
	let mut resolved = BTreeMap::new();
	run_paced(hostnames, budget, submit, |hostname, outcome| {
		if let Some(AddressOutcome::Resolved(addresses)) = outcome {
			if !addresses.is_empty() {
				resolved.insert(hostname, addresses);
			}
		}
	})
	.await;
	resolved
}

/// Cross every resolved nameserver address with the zones delegated to that
/// nameserver, dropping duplicate `(address, zone)` pairs, then shuffle so
/// no authoritative server sees a burst of consecutive queries.
pub fn build_insecure_targets(
	workload: &Workload,
	addresses: &BTreeMap<String, BTreeSet<IpAddr>>,
	rng: &mut impl Rng,
) -> Vec<InsecureTarget> {
	let mut zone_owners: BTreeMap<IpAddr, BTreeMap<&str, &str>> = BTreeMap::new();
	for (nameserver, resolved) in addresses {
		let Some(zones) = workload.zones_of(nameserver) else {
			continue;
		};
		for address in resolved {
			let owners = zone_owners.entry(*address).or_default();
			for zone in zones {
				owners.entry(zone.as_str()).or_insert(nameserver.as_str());
			}
		}
	}
	let mut targets: Vec<InsecureTarget> = zone_owners
		.iter()
		.flat_map(|(address, owners)| {
			owners.iter().map(|(zone, nameserver)| InsecureTarget {
				nameserver: (*nameserver).to_owned(),
				address: *address,
				zone: (*zone).to_owned(),
			})
		})
		.collect();
	targets.shuffle(rng);
	targets
}

/// Phase 2: query each authoritative address for the CDNSKEY set of each
/// of its zones, without recursion or validation.
pub async fn scan_insecure<F, Fut>(
	targets: Vec<InsecureTarget>,
	budget: Duration,
	submit: F,
	out: &mut impl Write,
) where
	F: Fn(&InsecureTarget) -> Fut,
	Fut: Future<Output = CdnskeyOutcome> + Send + 'static,
{
	run_paced(targets, budget, submit, |target, outcome| match outcome {
		Some(CdnskeyOutcome::Answered(records)) if records.is_empty() => {
			write_line(
				out,
				format_args!(
					"insecure-empty {} {} {}",
					target.nameserver, target.address, target.zone
				),
			);
		}
		Some(CdnskeyOutcome::Answered(records)) => {
			for record in records {
				write_line(
					out,
					format_args!(
						"insecure {} {} {} {}",
						target.nameserver, target.address, target.zone, record
					),
				);
			}
		}
		Some(CdnskeyOutcome::Failed) | None => {
			write_line(
				out,
				format_args!(
					"unresolved {} {} {}",
					target.nameserver, target.address, target.zone
				),
			);
		}
	})
	.await;
}

/// Phase 3: query the validating resolvers for the CDNSKEY set of each
/// signed zone.
pub async fn scan_secure<F, Fut>(zones: Vec<String>, budget: Duration, submit: F, out: &mut impl Write)
where
	F: Fn(&String) -> Fut,
	Fut: Future<Output = SecureOutcome> + Send + 'static,
{
	run_paced(zones, budget, submit, |zone, outcome| match outcome {
		Some(SecureOutcome::Validated(records)) if records.is_empty() => {
			write_line(out, format_args!("secure-empty {zone}"));
		}
		Some(SecureOutcome::Validated(records)) => {
			for record in records {
				write_line(out, format_args!("secure {zone} {record}"));
			}
		}
		Some(SecureOutcome::Untrustworthy) => {
			write_line(out, format_args!("untrustworthy {zone}"));
		}
		Some(SecureOutcome::Failed) | None => {
			write_line(out, format_args!("unknown {zone}"));
		}
	})
	.await;
}

/// Write one result line; a failed write is logged and never aborts the
/// phase.
fn write_line(out: &mut impl Write, line: fmt::Arguments<'_>) {
	let written = out.write_fmt(line).and_then(|()| out.write_all(b"\n"));
	if let Err(error) = written {
		warn!("failed to write result line: {error}");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cdnskey::CdnskeyRecord;
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	fn lines(buffer: &[u8]) -> Vec<String> {
		String::from_utf8(buffer.to_vec())
			.unwrap()
			.lines()
			.map(str::to_owned)
			.collect()
	}

	fn workload(input: &str) -> Workload {
		Workload::parse(input.as_bytes()).unwrap()
	}

	fn one_key() -> CdnskeyRecord {
		CdnskeyRecord {
			flags: 257,
			protocol: 3,
			algorithm: 13,
			public_key: b"AB".to_vec(),
		}
	}

	#[tokio::test]
	async fn test_resolve_hostnames_keeps_only_resolved() {
		let hostnames = vec![
			"dead.test".to_owned(),
			"empty.test".to_owned(),
			"ns.test".to_owned(),
		];
		let submit = |hostname: &String| {
			let hostname = hostname.clone();
			async move {
				match hostname.as_str() {
					"ns.test" => AddressOutcome::Resolved(
						[
							"1.2.3.4".parse().unwrap(),
							"5.6.7.8".parse().unwrap(),
						]
						.into(),
					),
					"empty.test" => AddressOutcome::Resolved(BTreeSet::new()),
					_ => AddressOutcome::Failed,
				}
			}
		};
		let resolved = resolve_hostnames(hostnames, Duration::from_millis(10), submit).await;
		assert_eq!(resolved.len(), 1);
		assert_eq!(resolved["ns.test"].len(), 2);
	}

	#[test]
	fn test_build_targets_cross_product() {
		let workload = workload("[insecure]\nns.test zone-a.test zone-b.test\n");
		let mut addresses = BTreeMap::new();
		addresses.insert(
			"ns.test".to_owned(),
			BTreeSet::from(["1.2.3.4".parse::<IpAddr>().unwrap(), "5.6.7.8".parse().unwrap()]),
		);
		let mut rng = StdRng::seed_from_u64(7);
		let targets = build_insecure_targets(&workload, &addresses, &mut rng);
		assert_eq!(targets.len(), 4);
		assert!(targets.iter().all(|t| t.nameserver == "ns.test"));
	}

	#[test]
	fn test_build_targets_deduplicates_shared_address() {
		// Two nameservers serving the same zone from the same address: the
		// pair is queried once, attributed to the first nameserver in order.
		let workload =
			workload("[insecure]\nns-a.test zone.test\nns-b.test zone.test other.test\n");
		let mut addresses = BTreeMap::new();
		let shared: BTreeSet<IpAddr> = BTreeSet::from(["1.2.3.4".parse().unwrap()]);
		addresses.insert("ns-a.test".to_owned(), shared.clone());
		addresses.insert("ns-b.test".to_owned(), shared);
		let mut rng = StdRng::seed_from_u64(7);
		let mut targets = build_insecure_targets(&workload, &addresses, &mut rng);
		targets.sort_by(|a, b| a.zone.cmp(&b.zone));
		assert_eq!(targets.len(), 2);
		assert_eq!(targets[0].zone, "other.test");
		assert_eq!(targets[0].nameserver, "ns-b.test");
		assert_eq!(targets[1].zone, "zone.test");
		assert_eq!(targets[1].nameserver, "ns-a.test");
	}

	#[test]
	fn test_build_targets_skips_unresolved_nameserver() {
		let workload = workload("[insecure]\nns.test zone.test\n");
		let addresses = BTreeMap::new();
		let mut rng = StdRng::seed_from_u64(7);
		assert!(build_insecure_targets(&workload, &addresses, &mut rng).is_empty());
	}

	#[tokio::test]
	async fn test_scan_insecure_empty_answers() {
		let targets = vec![
			InsecureTarget {
				nameserver: "ns.test".to_owned(),
				address: "1.2.3.4".parse().unwrap(),
				zone: "zone.test".to_owned(),
			},
			InsecureTarget {
				nameserver: "ns.test".to_owned(),
				address: "5.6.7.8".parse().unwrap(),
				zone: "zone.test".to_owned(),
			},
		];
		let submit = |_: &InsecureTarget| async { CdnskeyOutcome::Answered(Vec::new()) };
		let mut buffer = Vec::new();
		scan_insecure(targets, Duration::from_millis(10), submit, &mut buffer).await;
		let mut output = lines(&buffer);
		output.sort();
		assert_eq!(
			output,
			vec![
				"insecure-empty ns.test 1.2.3.4 zone.test",
				"insecure-empty ns.test 5.6.7.8 zone.test",
			]
		);
	}

	#[tokio::test]
	async fn test_scan_insecure_records_and_failures() {
		let targets = vec![
			InsecureTarget {
				nameserver: "ns.test".to_owned(),
				address: "1.2.3.4".parse().unwrap(),
				zone: "keyed.test".to_owned(),
			},
			InsecureTarget {
				nameserver: "ns.test".to_owned(),
				address: "1.2.3.4".parse().unwrap(),
				zone: "lost.test".to_owned(),
			},
		];
		let submit = |target: &InsecureTarget| {
			let keyed = target.zone == "keyed.test";
			async move {
				if keyed {
					CdnskeyOutcome::Answered(vec![one_key()])
				} else {
					CdnskeyOutcome::Failed
				}
			}
		};
		let mut buffer = Vec::new();
		scan_insecure(targets, Duration::from_millis(10), submit, &mut buffer).await;
		let mut output = lines(&buffer);
		output.sort();
		assert_eq!(
			output,
			vec![
				"insecure ns.test 1.2.3.4 keyed.test 257 3 13 QUI=",
				"unresolved ns.test 1.2.3.4 lost.test",
			]
		);
	}

	#[tokio::test]
	async fn test_scan_secure_single_record() {
		let submit = |_: &String| async { SecureOutcome::Validated(vec![one_key()]) };
		let mut buffer = Vec::new();
		scan_secure(
			vec!["example.test".to_owned()],
			Duration::from_millis(10),
			submit,
			&mut buffer,
		)
		.await;
		assert_eq!(lines(&buffer), vec!["secure example.test 257 3 13 QUI="]);
	}

	#[tokio::test]
	async fn test_scan_secure_untrustworthy() {
		let submit = |_: &String| async { SecureOutcome::Untrustworthy };
		let mut buffer = Vec::new();
		scan_secure(
			vec!["bogus.test".to_owned()],
			Duration::from_millis(10),
			submit,
			&mut buffer,
		)
		.await;
		assert_eq!(lines(&buffer), vec!["untrustworthy bogus.test"]);
	}

	#[tokio::test]
	async fn test_scan_secure_empty_and_unknown() {
		let submit = |zone: &String| {
			let empty = zone.as_str() == "empty.test";
			async move {
				if empty {
					SecureOutcome::Validated(Vec::new())
				} else {
					SecureOutcome::Failed
				}
			}
		};
		let mut buffer = Vec::new();
		scan_secure(
			vec!["empty.test".to_owned(), "gone.test".to_owned()],
			Duration::from_millis(10),
			submit,
			&mut buffer,
		)
		.await;
		let mut output = lines(&buffer);
		output.sort();
		assert_eq!(output, vec!["secure-empty empty.test", "unknown gone.test"]);
	}
}
