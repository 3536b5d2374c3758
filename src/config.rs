use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use anyhow::{Context, Result};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::constants::{FTP_CONTROL_PORT, PORT_MAX, PORT_MIN};
use crate::core_cli::Cli;
use crate::core_error::ProxyError;

/// On-disk configuration, everything optional so the CLI can fill the gaps.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct FileConfig {
    #[serde(default)]
    pub proxy: ProxyTable,
    #[serde(default)]
    pub access: AccessTable,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ProxyTable {
    pub bind_address: Option<Ipv4Addr>,
    pub source_address: Option<Ipv4Addr>,
    pub port_min: Option<u16>,
    pub port_max: Option<u16>,
    pub anonymous_only: Option<bool>,
    pub nat_passthrough: Option<bool>,
    pub reverse_target: Option<String>,
    pub timeout_secs: Option<u64>,
    pub verbose: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct AccessTable {
    pub enabled: Option<bool>,
    /// CIDR networks clients may connect from. Empty list allows all.
    #[serde(default)]
    pub allowed_clients: Vec<String>,
    /// CIDR networks servers may be reached in. Empty list allows all.
    #[serde(default)]
    pub allowed_servers: Vec<String>,
}

impl FileConfig {
    pub fn load(path: &str) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path))?;
        let config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse configuration file: {}", path))?;
        Ok(config)
    }
}

/// Fully resolved session configuration: file values overridden by CLI
/// flags, then validated.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub bind_address: Option<Ipv4Addr>,
    pub source_address: Option<Ipv4Addr>,
    pub port_min: u16,
    pub port_max: u16,
    pub anonymous_only: bool,
    pub nat_passthrough: bool,
    pub reverse_target: Option<SocketAddrV4>,
    pub idle_timeout: Option<Duration>,
    pub verbose: bool,
    pub access_check: bool,
    pub allowed_clients: Vec<Ipv4Net>,
    pub allowed_servers: Vec<Ipv4Net>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_address: None,
            source_address: None,
            port_min: PORT_MIN,
            port_max: PORT_MAX,
            anonymous_only: false,
            nat_passthrough: false,
            reverse_target: None,
            idle_timeout: None,
            verbose: false,
            access_check: false,
            allowed_clients: Vec::new(),
            allowed_servers: Vec::new(),
        }
    }
}

impl ProxyConfig {
    /// Merges the config file and CLI flags; CLI wins where both are given.
    pub fn build(cli: &Cli, file: &FileConfig) -> Result<Self, ProxyError> {
        let mut config = ProxyConfig {
            bind_address: file.proxy.bind_address,
            source_address: file.proxy.source_address,
            port_min: file.proxy.port_min.unwrap_or(PORT_MIN),
            port_max: file.proxy.port_max.unwrap_or(PORT_MAX),
            anonymous_only: file.proxy.anonymous_only.unwrap_or(false),
            nat_passthrough: file.proxy.nat_passthrough.unwrap_or(false),
            reverse_target: None,
            idle_timeout: timeout_from(file.proxy.timeout_secs.unwrap_or(0)),
            verbose: file.proxy.verbose.unwrap_or(false),
            access_check: file.access.enabled.unwrap_or(false),
            allowed_clients: parse_networks(&file.access.allowed_clients)?,
            allowed_servers: parse_networks(&file.access.allowed_servers)?,
        };

        let mut reverse = file.proxy.reverse_target.clone();

        if let Some(addr) = &cli.address {
            config.bind_address = Some(parse_addr(addr)?);
        }
        if let Some(addr) = &cli.source_address {
            config.source_address = Some(parse_addr(addr)?);
        }
        if let Some(min) = cli.port_min {
            config.port_min = min;
        }
        if let Some(max) = cli.port_max {
            config.port_max = max;
        }
        if cli.anonymous_only {
            config.anonymous_only = true;
        }
        if cli.nat_passthrough {
            config.nat_passthrough = true;
        }
        if cli.reverse_target.is_some() {
            reverse = cli.reverse_target.clone();
        }
        if let Some(secs) = cli.timeout {
            config.idle_timeout = timeout_from(secs);
        }
        if cli.verbose {
            config.verbose = true;
        }
        if cli.access_check {
            config.access_check = true;
        }

        if let Some(spec) = reverse {
            config.reverse_target = Some(parse_target(&spec)?);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ProxyError> {
        if self.port_min == 0 {
            return Err(ProxyError::Config(
                "backchannel port range must not start at 0".to_string(),
            ));
        }
        if self.port_min > self.port_max {
            return Err(ProxyError::Config(format!(
                "backchannel port range is empty: {} > {}",
                self.port_min, self.port_max
            )));
        }
        Ok(())
    }
}

fn timeout_from(secs: u64) -> Option<Duration> {
    // A zero timeout means "block indefinitely".
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

fn parse_addr(s: &str) -> Result<Ipv4Addr, ProxyError> {
    s.parse::<Ipv4Addr>()
        .map_err(|_| ProxyError::Config(format!("invalid IPv4 address: {}", s)))
}

/// Parses the reverse-proxy target, `addr[:port]`, port defaulting to 21.
fn parse_target(s: &str) -> Result<SocketAddrV4, ProxyError> {
    match s.split_once(':') {
        Some((addr, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| ProxyError::Config(format!("invalid port in target: {}", s)))?;
            Ok(SocketAddrV4::new(parse_addr(addr)?, port))
        }
        None => Ok(SocketAddrV4::new(parse_addr(s)?, FTP_CONTROL_PORT)),
    }
}

fn parse_networks(specs: &[String]) -> Result<Vec<Ipv4Net>, ProxyError> {
    specs
        .iter()
        .map(|s| {
            // Accept bare addresses as /32 networks.
            if let Ok(addr) = s.parse::<Ipv4Addr>() {
                return Ok(Ipv4Net::from(addr));
            }
            s.parse::<Ipv4Net>()
                .map_err(|_| ProxyError::Config(format!("invalid network: {}", s)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        let mut full = vec!["rouilleproxy"];
        full.extend_from_slice(args);
        Cli::parse_from(full)
    }

    #[test]
    fn defaults_without_flags() {
        let config = ProxyConfig::build(&cli(&[]), &FileConfig::default()).unwrap();
        assert_eq!(config.port_min, PORT_MIN);
        assert_eq!(config.port_max, PORT_MAX);
        assert!(config.idle_timeout.is_none());
        assert!(!config.anonymous_only);
        assert!(config.reverse_target.is_none());
    }

    #[test]
    fn cli_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            [proxy]
            port_min = 10000
            port_max = 10100
            timeout_secs = 30
            "#,
        )
        .unwrap();
        let config = ProxyConfig::build(&cli(&["-m", "10050", "-t", "0"]), &file).unwrap();
        assert_eq!(config.port_min, 10050);
        // The file's upper bound stands where the CLI is silent.
        assert_eq!(config.port_max, 10100);
        // -t 0 turns the file timeout back off
        assert!(config.idle_timeout.is_none());
    }

    #[test]
    fn empty_port_range_rejected() {
        let err = ProxyConfig::build(&cli(&["-m", "5000", "-M", "4000"]), &FileConfig::default())
            .unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));
    }

    #[test]
    fn cli_minimum_above_file_maximum_is_rejected() {
        let file: FileConfig = toml::from_str(
            r#"
            [proxy]
            port_max = 10100
            "#,
        )
        .unwrap();
        let err = ProxyConfig::build(&cli(&["-m", "20000"]), &file).unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));
    }

    #[test]
    fn reverse_target_defaults_to_ftp_port() {
        let config =
            ProxyConfig::build(&cli(&["-R", "10.1.2.3"]), &FileConfig::default()).unwrap();
        assert_eq!(
            config.reverse_target,
            Some(SocketAddrV4::new(Ipv4Addr::new(10, 1, 2, 3), 21))
        );

        let config =
            ProxyConfig::build(&cli(&["-R", "10.1.2.3:2121"]), &FileConfig::default()).unwrap();
        assert_eq!(config.reverse_target.unwrap().port(), 2121);
    }

    #[test]
    fn compatibility_flags_are_accepted_without_effect() {
        let args = cli(&["-u", "proxy", "-g", "proxy", "-r"]);
        assert_eq!(args.user.as_deref(), Some("proxy"));
        assert!(args.reverse_lookup);

        let config = ProxyConfig::build(&args, &FileConfig::default()).unwrap();
        assert_eq!(config.port_min, PORT_MIN);
        assert!(!config.access_check);
    }

    #[test]
    fn access_lists_parse_cidr_and_bare_addresses() {
        let file: FileConfig = toml::from_str(
            r#"
            [access]
            enabled = true
            allowed_clients = ["192.168.0.0/16", "10.0.0.1"]
            "#,
        )
        .unwrap();
        let config = ProxyConfig::build(&cli(&[]), &file).unwrap();
        assert!(config.access_check);
        assert_eq!(config.allowed_clients.len(), 2);
        assert_eq!(config.allowed_clients[1].prefix_len(), 32);
    }
}
