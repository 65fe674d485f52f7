//! Configuration validation

use super::*;
use crate::distributed::Role;
use anyhow::{Context, Result};
use std::collections::HashSet;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_exchange(&config.exchange)?;
    validate_endpoint(&config.endpoint)?;

    if config.providers.is_empty() {
        anyhow::bail!("scenario has no providers");
    }
    if config.consumers.is_empty() {
        anyhow::bail!("scenario has no consumers");
    }

    validate_group(&config.providers, "provider")?;
    validate_group(&config.consumers, "consumer")?;
    validate_dimensionality(config)?;

    Ok(())
}

/// Validate exchange settings
pub fn validate_exchange(exchange: &ExchangeConfig) -> Result<()> {
    if exchange.name.trim().is_empty() {
        anyhow::bail!("exchange name must not be empty");
    }

    if exchange.rounds == 0 {
        anyhow::bail!("rounds must be at least 1");
    }

    if exchange.element_size == 0 {
        anyhow::bail!("element_size must be at least 1 byte");
    }

    if exchange.metadata_mailbox == exchange.data_mailbox {
        anyhow::bail!(
            "metadata_mailbox and data_mailbox must differ (both are {})",
            exchange.data_mailbox
        );
    }

    if exchange.connect_retries == 0 {
        anyhow::bail!("connect_retries must be at least 1");
    }

    Ok(())
}

/// Validate endpoint settings
pub fn validate_endpoint(endpoint: &EndpointConfig) -> Result<()> {
    if endpoint.bind_host.trim().is_empty() {
        anyhow::bail!("bind_host must not be empty");
    }

    if endpoint.accept_poll_interval_ms == 0 {
        anyhow::bail!("accept_poll_interval_ms must be at least 1");
    }

    if endpoint.max_payload == 0 {
        anyhow::bail!("max_payload must be at least 1 byte");
    }

    Ok(())
}

fn validate_group(group: &[ParticipantConfig], role: &str) -> Result<()> {
    let mut ranks = HashSet::new();

    for participant in group {
        if !ranks.insert(participant.rank) {
            anyhow::bail!("duplicate {} rank {}", role, participant.rank);
        }

        if participant.axes.is_empty() {
            anyhow::bail!("{} {} has no axes", role, participant.rank);
        }

        if let Some(ref address) = participant.address {
            address
                .parse::<EndpointAddress>()
                .with_context(|| format!("{} {} has an invalid address", role, participant.rank))?;
        }
    }

    Ok(())
}

fn validate_dimensionality(config: &Config) -> Result<()> {
    let mut participants = config.providers.iter().chain(config.consumers.iter());
    let Some(first) = participants.next() else {
        return Ok(());
    };

    let dimensions = first.axes.len();
    for participant in participants {
        if participant.axes.len() != dimensions {
            anyhow::bail!(
                "participant rank {} has {} axes, expected {} like every other participant",
                participant.rank,
                participant.axes.len(),
                dimensions
            );
        }
    }

    Ok(())
}

/// Validate what participant mode additionally needs
///
/// Every participant must publish a fixed address, and the local participant
/// must be part of the scenario.
pub fn validate_participant_mode(config: &Config, role: Role, rank: u32) -> Result<()> {
    for (group, name) in [(&config.providers, "provider"), (&config.consumers, "consumer")] {
        for participant in group.iter() {
            if participant.address.is_none() {
                anyhow::bail!(
                    "{} {} has no address (required in participant mode)",
                    name,
                    participant.rank
                );
            }
        }
    }

    let group = match role {
        Role::Provider => &config.providers,
        Role::Consumer => &config.consumers,
    };
    if !group.iter().any(|p| p.rank == rank) {
        anyhow::bail!("{} rank {} is not part of the scenario", role, rank);
    }

    Ok(())
}
