mod anchors;
mod cdnskey;
mod cli;
mod pacing;
mod runtime;
mod scan;
mod workload;

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::error::ErrorKind;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::pacing::proportional_share;
use crate::runtime::Transport;
use crate::workload::Workload;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
	let cli = match Cli::try_parse() {
		Ok(cli) => cli,
		Err(error) if error.kind() == ErrorKind::DisplayHelp => {
			error.print()?;
			return Ok(());
		}
		Err(error) => {
			error.print()?;
			std::process::exit(1);
		}
	};

	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with_writer(io::stderr)
		.init();

	let hostname_resolvers = match &cli.hostname_resolvers {
		Some(list) => cli::parse_ip_list(list)?,
		None => Vec::new(),
	};
	let cdnskey_resolvers = match &cli.cdnskey_resolvers {
		Some(list) => cli::parse_ip_list(list)?,
		None => Vec::new(),
	};
	let trust_anchors = match &cli.dnssec_trust_anchors {
		Some(list) => cli::parse_anchor_list(list)?,
		None => Vec::new(),
	};
	let query_timeout = Duration::from_secs(cli.timeout);
	let runtime = Duration::from_secs(cli.runtime);
	let transports = vec![Transport::Tcp];

	let workload = Workload::parse(io::stdin().lock())?;
	let deadline = Instant::now() + runtime;

	let nameserver_queries = workload.nameserver_count();
	let estimated_queries = nameserver_queries + 2 * workload.zone_count();
	info!(estimated_queries, "queries estimated for the whole scan");
	let hostname_budget = proportional_share(runtime, nameserver_queries, estimated_queries);

	let addresses = if nameserver_queries == 0 {
		BTreeMap::new()
	} else {
		let upstreams = if hostname_resolvers.is_empty() {
			runtime::system_resolver_ips()?
		} else {
			hostname_resolvers
		};
		let resolver = runtime::hostname_resolver(&upstreams, &transports, query_timeout);
		let submit =
			move |hostname: &String| runtime::resolve_addresses(resolver.clone(), hostname.clone());
		let hostnames: Vec<String> = workload.nameservers().cloned().collect();
		info!(
			count = hostnames.len(),
			budget_ms = hostname_budget.as_millis() as u64,
			"resolving nameserver hostnames"
		);
		scan::resolve_hostnames(hostnames, hostname_budget, submit).await
	};

	let mut rng = StdRng::from_entropy();
	let targets = scan::build_insecure_targets(&workload, &addresses, &mut rng);

	let now = Instant::now();
	if now >= deadline {
		bail!("lack of time");
	}
	let remaining = deadline - now;

	let insecure_queries = targets.len();
	let secure_queries = workload.signed_zone_count();
	info!(
		insecure_queries,
		secure_queries, "workload remaining after hostname resolution"
	);
	let total_queries = insecure_queries + secure_queries;
	let insecure_budget = proportional_share(remaining, insecure_queries, total_queries);
	let secure_budget = proportional_share(remaining, secure_queries, total_queries);

	let stdout = io::stdout();
	let mut out = stdout.lock();

	if !targets.is_empty() {
		let config = runtime::AuthoritativeConfig {
			transports: transports.clone(),
			timeout: query_timeout,
		};
		let submit = move |target: &scan::InsecureTarget| {
			runtime::query_authoritative(config.clone(), target.address, target.zone.clone())
		};
		scan::scan_insecure(targets, insecure_budget, submit, &mut out).await;
	}

	if secure_queries > 0 {
		let upstreams = if cdnskey_resolvers.is_empty() {
			runtime::system_resolver_ips()?
		} else {
			cdnskey_resolvers
		};
		let anchor_keys = if trust_anchors.is_empty() {
			None
		} else {
			Some(Arc::new(anchors::to_validation_keys(&trust_anchors)))
		};
		let config = runtime::ValidatingConfig {
			resolvers: upstreams,
			transports,
			timeout: query_timeout,
			trust_anchors: anchor_keys,
		};
		let submit = move |zone: &String| runtime::query_validated(config.clone(), zone.clone());
		let zones: Vec<String> = workload.signed_zones().iter().cloned().collect();
		scan::scan_secure(zones, secure_budget, submit, &mut out).await;
	}

	Ok(())
}
