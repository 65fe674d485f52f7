//! TOML scenario file parsing

use super::*;
use crate::config::cli::{Cli, RunMode};
use crate::config::cli_convert::{convert_role, parse_axes, parse_bind, parse_duration_ms, parse_size};
use crate::distributed::Role;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Load the scenario named on the command line (or the demo) with CLI overrides
pub fn load_config(cli: &Cli) -> Result<Config> {
    let config = match cli.config {
        Some(ref path) => parse_toml_file(path)?,
        None => Config::demo(),
    };

    merge_cli_with_config(cli, config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    // Exchange overrides
    if let Some(ref name) = cli.name {
        config.exchange.name = name.clone();
    }
    if let Some(rounds) = cli.rounds {
        config.exchange.rounds = rounds;
    }
    if let Some(ref size) = cli.element_size {
        config.exchange.element_size = parse_size(size)
            .context("Invalid --element-size")? as usize;
    }

    // Endpoint overrides
    if let Some(ref bind) = cli.bind {
        let (host, port) = parse_bind(bind).context("Invalid --bind")?;
        config.endpoint.bind_host = host;
        if let Some(port) = port {
            config.endpoint.port = port;
        }
    }
    if let Some(ref host) = cli.advertise_host {
        config.endpoint.advertise_host = Some(host.clone());
    }
    if let Some(ref size) = cli.max_payload {
        config.endpoint.max_payload = parse_size(size).context("Invalid --max-payload")?;
    }
    if let Some(ref timeout) = cli.drain_timeout {
        config.endpoint.drain_timeout_ms = parse_duration_ms(timeout).context("Invalid --drain-timeout")?;
    }

    // Participant axes override
    if cli.mode == RunMode::Participant {
        if let (Some(role), Some(rank), Some(axes)) = (cli.role, cli.rank, &cli.axes) {
            let axes = parse_axes(axes).context("Invalid --axes")?;
            let group = match convert_role(role) {
                Role::Provider => &mut config.providers,
                Role::Consumer => &mut config.consumers,
            };
            match group.iter_mut().find(|p| p.rank == rank) {
                Some(participant) => participant.axes = axes,
                None => group.push(ParticipantConfig::new(rank, axes)),
            }
        }
    }

    // Runtime flags
    config.runtime.dry_run |= cli.dry_run;
    config.runtime.debug |= cli.debug;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    const SCENARIO: &str = r#"
[exchange]
name = "pressure"
rounds = 3
element_size = 4

[endpoint]
bind_host = "0.0.0.0"
port = 7100

[[providers]]
rank = 0
address = "10.0.1.10:7100"
axes = [{ first = 0, last = 9 }, { first = 0, last = 18, stride = 2 }]

[[consumers]]
rank = 0
address = "10.0.1.20:7100"
axes = [{ first = 5, last = 14 }, { first = 0, last = 18, stride = 3 }]
"#;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("redist").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_parse_toml_scenario() {
        let config = parse_toml_string(SCENARIO).unwrap();

        assert_eq!(config.exchange.name, "pressure");
        assert_eq!(config.exchange.rounds, 3);
        assert_eq!(config.exchange.element_size, 4);
        assert_eq!(config.exchange.data_mailbox, DATA_MAILBOX);
        assert_eq!(config.endpoint.bind_host, "0.0.0.0");
        assert_eq!(config.endpoint.port, 7100);
        assert_eq!(config.endpoint.max_payload, 256 * 1024 * 1024);

        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].axes[0].stride, 1);
        assert_eq!(config.providers[0].indices()[1], Index::new(0, 18, 2));
        assert_eq!(config.consumers[0].address.as_deref(), Some("10.0.1.20:7100"));
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config = parse_toml_string("[exchange]\n").unwrap();
        assert_eq!(config.exchange.name, "redist");
        assert_eq!(config.exchange.rounds, 1);
        assert_eq!(config.endpoint.bind_host, "127.0.0.1");
        assert!(config.providers.is_empty());
    }

    #[test]
    fn test_invalid_toml() {
        assert!(parse_toml_string("[exchange\nname = 1").is_err());
        assert!(parse_toml_string("[exchange]\nrounds = \"many\"").is_err());
    }

    #[test]
    fn test_parse_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SCENARIO.as_bytes()).unwrap();

        let config = parse_toml_file(file.path()).unwrap();
        assert_eq!(config.participant_count(), 2);

        let missing = file.path().with_extension("missing");
        assert!(parse_toml_file(&missing).is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let config = parse_toml_string(SCENARIO).unwrap();
        let merged = merge_cli_with_config(
            &cli(&["--rounds", "7", "--element-size", "2", "--bind", "127.0.0.1:0", "--drain-timeout", "1s", "--debug"]),
            config,
        )
        .unwrap();

        assert_eq!(merged.exchange.rounds, 7);
        assert_eq!(merged.exchange.element_size, 2);
        assert_eq!(merged.endpoint.bind_host, "127.0.0.1");
        assert_eq!(merged.endpoint.port, 0);
        assert_eq!(merged.endpoint.drain_timeout_ms, 1000);
        assert!(merged.runtime.debug);
        assert!(!merged.runtime.dry_run);
    }

    #[test]
    fn test_cli_axes_override() {
        let config = parse_toml_string(SCENARIO).unwrap();
        let args = ["--mode", "participant", "--role", "consumer", "--rank", "4", "--axes", "0:3,0:3"];
        let merged = merge_cli_with_config(&cli(&args), config).unwrap();

        assert_eq!(merged.consumers.len(), 2);
        assert_eq!(merged.consumers[1].rank, 4);
        assert_eq!(merged.consumers[1].indices(), vec![Index::new(0, 3, 1), Index::new(0, 3, 1)]);
    }

    #[test]
    fn test_load_demo_without_file() {
        let config = load_config(&cli(&[])).unwrap();
        assert_eq!(config.participant_count(), 5);
    }
}
