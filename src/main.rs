//! redist CLI entry point

use anyhow::{Context, Result};
use bytes::Bytes;
use redist::config::cli::{Cli, RunMode};
use redist::config::toml::load_config;
use redist::config::{cli_convert, validator, Config, EndpointConfig};
use redist::distributed::{AssembledArray, Endpoint, EndpointAddress, Exchange, RedistributionCoordinator, Role};
use redist::distribution::DistributionDescriptor;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli.validate()?;

    let config = load_config(&cli)?;
    redist::logging::init(config.runtime.debug);

    println!("redist v{}", env!("CARGO_PKG_VERSION"));
    println!();

    validator::validate_config(&config).context("Configuration validation failed")?;

    if cli.mode == RunMode::Participant {
        // validate() guarantees both are present
        let role = cli.role.map(cli_convert::convert_role).context("--role is required")?;
        let rank = cli.rank.context("--rank is required")?;
        validator::validate_participant_mode(&config, role, rank)
            .context("Configuration validation failed")?;
    }

    print!("{}", config);

    if config.runtime.dry_run {
        println!();
        println!("Dry run mode - configuration validated successfully");
        return Ok(());
    }

    println!();

    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?;

    match cli.mode {
        RunMode::Local => runtime.block_on(run_local(config)),
        RunMode::Participant => {
            let role = cli.role.map(cli_convert::convert_role).context("--role is required")?;
            let rank = cli.rank.context("--rank is required")?;
            runtime.block_on(run_participant(config, role, rank))
        }
    }
}

/// Run every participant in this process on localhost
async fn run_local(config: Config) -> Result<()> {
    let start = Instant::now();
    let count = config.participant_count();

    // One endpoint per participant, each on its own ephemeral port
    let endpoint_config = EndpointConfig {
        port: 0,
        ..config.endpoint.clone()
    };
    let mut endpoints = Vec::with_capacity(count);
    for _ in 0..count {
        let endpoint = Endpoint::open(&endpoint_config).await.context("Failed to open endpoint")?;
        endpoints.push(Arc::new(endpoint));
    }
    let peers: Vec<EndpointAddress> = endpoints.iter().map(|e| e.address().clone()).collect();

    let groups = config
        .providers
        .iter()
        .map(|p| (Role::Provider, p))
        .chain(config.consumers.iter().map(|c| (Role::Consumer, c)));

    let mut providers = Vec::new();
    let mut consumers = Vec::new();
    for ((role, participant), endpoint) in groups.zip(endpoints.iter()) {
        let exchange = open_exchange(&config, role, participant.descriptor(endpoint.address().clone()), endpoint.clone(), peers.clone())?;
        match role {
            Role::Provider => providers.push(Arc::new(exchange)),
            Role::Consumer => consumers.push(Arc::new(exchange)),
        }
    }

    for exchange in providers.iter().chain(consumers.iter()) {
        exchange.announce().await?;
    }

    let element_size = config.exchange.element_size;
    for round in 0..config.exchange.rounds as u64 {
        let mut deliveries = Vec::new();
        for provider in &providers {
            let provider = provider.clone();
            let data = fill_local(provider.coordinator().local(), round, element_size);
            deliveries.push(tokio::spawn(async move { provider.deliver(data, element_size).await }));
        }

        let mut collections = Vec::new();
        for consumer in &consumers {
            let consumer = consumer.clone();
            collections.push(tokio::spawn(async move { consumer.collect().await }));
        }

        let mut sent = 0;
        for delivery in deliveries {
            sent += delivery.await.context("Provider task failed")??;
        }

        for (consumer, collection) in consumers.iter().zip(collections) {
            let assembled = collection.await.context("Consumer task failed")??;
            report(consumer.coordinator().local(), round, assembled.as_ref(), element_size)?;
        }

        for provider in &providers {
            provider.finish_round();
        }

        println!("Round {}: {} block(s) delivered", round, sent);
    }

    for exchange in providers.iter().chain(consumers.iter()) {
        exchange.shutdown();
    }
    for endpoint in &endpoints {
        endpoint.close().await;
    }

    println!();
    println!("Completed {} round(s) in {:.3}s", config.exchange.rounds, start.elapsed().as_secs_f64());
    Ok(())
}

/// Run one participant; its peers are the other addresses in the scenario
async fn run_participant(config: Config, role: Role, rank: u32) -> Result<()> {
    let group = match role {
        Role::Provider => &config.providers,
        Role::Consumer => &config.consumers,
    };
    let participant = group
        .iter()
        .find(|p| p.rank == rank)
        .with_context(|| format!("{} rank {} is not part of the scenario", role, rank))?;
    let own: EndpointAddress = participant
        .address
        .as_deref()
        .context("participant has no address")?
        .parse()?;

    let mut endpoint_config = config.endpoint.clone();
    if endpoint_config.port == 0 {
        endpoint_config.port = own.port;
    }
    if endpoint_config.advertise_host.is_none() {
        endpoint_config.advertise_host = Some(own.host.clone());
    }

    let endpoint = Arc::new(Endpoint::open(&endpoint_config).await.context("Failed to open endpoint")?);

    let peers = config
        .providers
        .iter()
        .chain(config.consumers.iter())
        .filter_map(|p| p.address.as_deref())
        .map(str::parse::<EndpointAddress>)
        .filter(|a| !matches!(a, Ok(a) if *a == own))
        .collect::<Result<Vec<_>>>()?;

    let local = participant.descriptor(endpoint.address().clone());
    let exchange = open_exchange(&config, role, local, endpoint.clone(), peers)?;
    exchange.announce().await?;

    exchange
        .coordinator()
        .wait_for_metadata()
        .await
        .context("Metadata phase did not complete")?;
    info!(%role, rank, "metadata complete");

    let element_size = config.exchange.element_size;
    for round in 0..config.exchange.rounds as u64 {
        match role {
            Role::Provider => {
                let data = fill_local(exchange.coordinator().local(), round, element_size);
                let sent = exchange.deliver(data, element_size).await?;
                exchange.finish_round();
                println!("Round {}: provider {} sent {} block(s)", round, rank, sent);
            }
            Role::Consumer => {
                let assembled = exchange.collect().await?;
                report(exchange.coordinator().local(), round, assembled.as_ref(), element_size)?;
            }
        }
    }

    // Providers stay registered while consumers may still hold unread blocks
    if role == Role::Consumer {
        exchange.withdraw()?;
    }
    exchange.shutdown();
    endpoint.close().await;

    Ok(())
}

fn open_exchange(
    config: &Config,
    role: Role,
    local: DistributionDescriptor,
    endpoint: Arc<Endpoint>,
    peers: Vec<EndpointAddress>,
) -> Result<Exchange> {
    let coordinator = Arc::new(RedistributionCoordinator::new(config.exchange.name.clone(), role, local));
    coordinator.metadata_complete(config.participant_count());

    let exchange = Exchange::new(coordinator, endpoint, peers, &config.exchange)?;
    exchange.spawn_metadata_pump();
    if role == Role::Consumer {
        exchange.spawn_data_pump();
    }

    Ok(exchange)
}

/// Verify and print what one consumer received
fn report(
    local: &DistributionDescriptor,
    round: u64,
    assembled: Option<&AssembledArray>,
    element_size: usize,
) -> Result<()> {
    let Some(assembled) = assembled else {
        println!("Round {}: consumer {} overlaps no provider", round, local.rank);
        return Ok(());
    };

    let buffer = assembled.to_local(local, element_size)?;
    let mismatches = verify(local, assembled, round, element_size, &buffer);
    if mismatches > 0 {
        anyhow::bail!(
            "consumer {} round {}: {} element(s) do not match the provider data",
            local.rank,
            round,
            mismatches
        );
    }

    let sources: Vec<String> = assembled.blocks.iter().map(|b| b.provider_rank.to_string()).collect();
    println!(
        "Round {}: consumer {} received {} of {} element(s) from provider(s) {} (verified)",
        round,
        local.rank,
        assembled.element_count(),
        local.len(),
        sources.join(",")
    );
    Ok(())
}

/// Deterministic element content for a global point in a round
fn pattern(round: u64, point: &[u64], element_size: usize) -> Vec<u8> {
    let seed = point
        .iter()
        .fold(round.wrapping_mul(0x9e37_79b9_7f4a_7c15), |acc, &c| {
            acc.rotate_left(17) ^ c.wrapping_mul(0xbf58_476d_1ce4_e5b9)
        });
    seed.to_le_bytes().iter().copied().cycle().take(element_size).collect()
}

/// Provider buffer filled with the round's pattern
fn fill_local(local: &DistributionDescriptor, round: u64, element_size: usize) -> Bytes {
    local
        .points()
        .flat_map(|p| pattern(round, &p, element_size))
        .collect::<Vec<u8>>()
        .into()
}

/// Count elements differing from the pattern (zeros where nothing was received)
fn verify(
    local: &DistributionDescriptor,
    assembled: &AssembledArray,
    round: u64,
    element_size: usize,
    buffer: &[u8],
) -> usize {
    local
        .points()
        .enumerate()
        .filter(|(i, point)| {
            let got = &buffer[i * element_size..(i + 1) * element_size];
            let covered = assembled.blocks.iter().any(|b| b.region.contains(point));
            if covered {
                got != pattern(round, point, element_size).as_slice()
            } else {
                got.iter().any(|&b| b != 0)
            }
        })
        .count()
}
