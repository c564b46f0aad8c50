//! Ambient configuration layer: the `-i`/`-h`/`-p`/`-c`/`-D`/`--gdt-*`
//! CLI surface spec.md §6 requires of any daemon embedding the core, plus
//! the plain runtime-config structs the rest of the crate is built
//! against. No serde: matching the original, configuration is rebuilt
//! from CLI flags on every process start rather than persisted
//! (spec.md §6 "Persisted state").

use std::net::Ipv4Addr;
use std::time::Duration;

use clap::{App, AppSettings, Arg};

pub const DEFAULT_STREAMS_PER_ASSOCIATION: u16 = 16;
pub const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_SMSG_POOL_SIZE: usize = 64;
pub const DEFAULT_SPARAM_POOL_SIZE: usize = 256;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_HEARTBEAT_MISS_THRESHOLD: u32 = 3;

/// Parsed CLI surface (spec.md §6 "CLI surface (core-only)"). Daemons
/// that embed the core may layer additional flags on top of their own
/// `clap::App`; `GdtArgs::augment` adds exactly these.
#[derive(Debug, Clone)]
pub struct GdtArgs {
    pub daemon_id: String,
    pub local_addr: Option<Ipv4Addr>,
    pub port: u16,
    pub peers: Vec<(Ipv4Addr, u16)>,
    pub debug: bool,
    pub streams: u16,
    pub stream_timeout: Duration,
    pub smsg_pool: usize,
    pub sparam_pool: usize,
}

impl GdtArgs {
    /// Builds the `clap::App` carrying this surface, for embedding
    /// daemons that want to `.args(GdtArgs::app().get_matches_from(...))`
    /// style composition rather than calling `parse_or_exit` directly.
    pub fn app() -> App<'static> {
        App::new("gdt")
            .setting(AppSettings::DeriveDisplayOrder)
            .arg(
                Arg::new("daemon-id")
                    .short('i')
                    .takes_value(true)
                    .required(true)
                    .help("this daemon's id, at most 15 bytes"),
            )
            .arg(
                Arg::new("local-addr")
                    .short('h')
                    .takes_value(true)
                    .help("local IPv4 address to bind"),
            )
            .arg(
                Arg::new("port")
                    .short('p')
                    .takes_value(true)
                    .default_value("0")
                    .help("SCTP port"),
            )
            .arg(
                Arg::new("connect")
                    .short('c')
                    .takes_value(true)
                    .multiple_occurrences(true)
                    .help("peer to connect to, ip:port (repeatable)"),
            )
            .arg(Arg::new("debug").short('D').help("enable debug logging"))
            .arg(
                Arg::new("gdt-streams")
                    .long("gdt-streams")
                    .takes_value(true)
                    .default_value("16")
                    .help("SCTP streams per association"),
            )
            .arg(
                Arg::new("gdt-stimeout")
                    .long("gdt-stimeout")
                    .takes_value(true)
                    .default_value("5")
                    .help("stream inactivity timeout, seconds"),
            )
            .arg(
                Arg::new("gdt-smsg-pool")
                    .long("gdt-smsg-pool")
                    .takes_value(true)
                    .default_value("64")
                    .help("ServiceMessage pool size"),
            )
            .arg(
                Arg::new("gdt-sparam-pool")
                    .long("gdt-sparam-pool")
                    .takes_value(true)
                    .default_value("256")
                    .help("ServiceParameter pool size"),
            )
    }

    /// Parses `std::env::args()`, exiting the process non-zero on a
    /// missing `-i`, an unparseable address, or a malformed numeric flag
    /// (spec.md §6).
    pub fn parse_or_exit() -> Self {
        let matches = Self::app().get_matches();
        Self::from_matches(&matches).unwrap_or_else(|e| {
            eprintln!("gdt: {e}");
            std::process::exit(1);
        })
    }

    fn from_matches(matches: &clap::ArgMatches) -> Result<Self, String> {
        let daemon_id = matches.value_of("daemon-id").unwrap().to_string();
        if daemon_id.len() > gdt_proto::address::MAX_FIELD_LEN {
            return Err(format!(
                "-i {daemon_id:?} exceeds {} bytes",
                gdt_proto::address::MAX_FIELD_LEN
            ));
        }

        let local_addr = matches
            .value_of("local-addr")
            .map(|s| s.parse::<Ipv4Addr>())
            .transpose()
            .map_err(|e| format!("-h: {e}"))?;

        let port: u16 = matches
            .value_of_t("port")
            .map_err(|e| format!("-p: {e}"))?;

        let peers = matches
            .values_of("connect")
            .into_iter()
            .flatten()
            .map(parse_peer)
            .collect::<Result<Vec<_>, _>>()?;

        let streams: u16 = matches
            .value_of_t("gdt-streams")
            .map_err(|e| format!("--gdt-streams: {e}"))?;
        let stimeout: u64 = matches
            .value_of_t("gdt-stimeout")
            .map_err(|e| format!("--gdt-stimeout: {e}"))?;
        let smsg_pool: usize = matches
            .value_of_t("gdt-smsg-pool")
            .map_err(|e| format!("--gdt-smsg-pool: {e}"))?;
        let sparam_pool: usize = matches
            .value_of_t("gdt-sparam-pool")
            .map_err(|e| format!("--gdt-sparam-pool: {e}"))?;

        Ok(GdtArgs {
            daemon_id,
            local_addr,
            port,
            peers,
            debug: matches.is_present("debug"),
            streams,
            stream_timeout: Duration::from_secs(stimeout),
            smsg_pool,
            sparam_pool,
        })
    }
}

fn parse_peer(raw: &str) -> Result<(Ipv4Addr, u16), String> {
    let (ip, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| format!("-c {raw:?}: expected ip:port"))?;
    let ip: Ipv4Addr = ip.parse().map_err(|e| format!("-c {raw:?}: {e}"))?;
    let port: u16 = port.parse().map_err(|e| format!("-c {raw:?}: {e}"))?;
    Ok((ip, port))
}

/// Per-`Session` runtime configuration, assembled from `GdtArgs` (or
/// built directly by tests/examples without going through the CLI).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub daemon_id: String,
    pub daemon_type: String,
    pub local_addr: Option<Ipv4Addr>,
    pub port: u16,
    pub streams_per_association: u16,
}

impl SessionConfig {
    pub fn from_args(daemon_type: impl Into<String>, args: &GdtArgs) -> Self {
        SessionConfig {
            daemon_id: args.daemon_id.clone(),
            daemon_type: daemon_type.into(),
            local_addr: args.local_addr,
            port: args.port,
            streams_per_association: args.streams,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub smsg_pool: usize,
    pub sparam_pool: usize,
}

impl PoolConfig {
    pub fn from_args(args: &GdtArgs) -> Self {
        PoolConfig {
            smsg_pool: args.smsg_pool,
            sparam_pool: args.sparam_pool,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub miss_threshold: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        HeartbeatConfig {
            interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            miss_threshold: DEFAULT_HEARTBEAT_MISS_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod config_test {
    use super::*;

    #[test]
    fn parses_minimal_required_flags() {
        let matches = GdtArgs::app().get_matches_from(["gdt", "-i", "a1", "-p", "9000"]);
        let args = GdtArgs::from_matches(&matches).unwrap();
        assert_eq!(args.daemon_id, "a1");
        assert_eq!(args.port, 9000);
        assert_eq!(args.streams, DEFAULT_STREAMS_PER_ASSOCIATION);
    }

    #[test]
    fn rejects_oversized_daemon_id() {
        let matches = GdtArgs::app().get_matches_from(["gdt", "-i", "this-daemon-id-is-too-long"]);
        assert!(GdtArgs::from_matches(&matches).is_err());
    }

    #[test]
    fn parses_repeatable_peer_flag() {
        let matches =
            GdtArgs::app().get_matches_from(["gdt", "-i", "a1", "-c", "10.0.0.1:9000", "-c", "10.0.0.2:9001"]);
        let args = GdtArgs::from_matches(&matches).unwrap();
        assert_eq!(args.peers.len(), 2);
        assert_eq!(args.peers[1].1, 9001);
    }
}
