mod config;
mod detector;
mod networks;
mod rpc;
mod state;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use config::NodeupConfig;
use detector::{StallDetector, StallPolicy};
use rpc::{ClientConfig, WsConnector};
use state::LastBlockFile;

/// Exit status for failures that produce no verdict (bad config, RPC or
/// state errors).
const EXIT_INTERNAL: u8 = 2;

/// Liveness probe for a blockchain node: connect, fetch a chain snapshot,
/// and exit 0 if the node looks healthy or 1 if it is unreachable,
/// isolated or stalled.
#[derive(Parser, Debug)]
#[command(name = "nodeup", version, about)]
pub struct Cli {
    /// Network whose defaults and type aliases to use (mainnet, testnet)
    #[arg(short, long)]
    network: Option<String>,

    /// Node websocket URL (overrides the network default)
    #[arg(short, long)]
    url: Option<String>,

    /// Config file path
    #[arg(short, long, default_value = "nodeup.toml")]
    config: PathBuf,

    /// Last-block state file (overrides config)
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Connect timeout in milliseconds (overrides config)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Don't request per-peer best blocks; only check for zero peers
    #[arg(long)]
    no_peer_heights: bool,

    /// Print resolved settings and exit without connecting
    #[arg(long)]
    dry_run: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

/// Everything a probe run needs, after merging config file and CLI flags.
#[derive(Debug)]
struct Settings {
    network: &'static str,
    url: String,
    state_file: PathBuf,
    connect_timeout: Duration,
    policy: StallPolicy,
    client: ClientConfig,
}

fn resolve(cli: &Cli, cfg: NodeupConfig) -> Result<Settings, String> {
    let name = cli.network.as_deref().unwrap_or(&cfg.probe.network);
    let network = networks::lookup(name).ok_or_else(|| {
        format!(
            "unknown network '{name}' (known: {})",
            networks::known_names().join(", ")
        )
    })?;

    let url = cli
        .url
        .clone()
        .or(cfg.probe.url)
        .unwrap_or_else(|| network.default_url.to_string());

    Ok(Settings {
        network: network.name,
        url,
        state_file: cli.state_file.clone().unwrap_or(cfg.state.file),
        connect_timeout: Duration::from_millis(
            cli.timeout_ms.unwrap_or(cfg.probe.connect_timeout_ms),
        ),
        policy: StallPolicy {
            ahead_margin: cfg.stall.ahead_margin,
        },
        client: ClientConfig {
            types: network.type_registry(),
            peer_heights: cfg.stall.peer_heights && !cli.no_peer_heights,
        },
    })
}

fn init_tracing(cli: &Cli) {
    let default_level = if cli.verbose {
        "nodeup=debug"
    } else if cli.quiet {
        "nodeup=warn"
    } else {
        "nodeup=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);
    tracing::debug!(?cli, "parsed CLI arguments");

    let cfg = match NodeupConfig::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::from(EXIT_INTERNAL);
        }
    };
    let settings = match resolve(&cli, cfg) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::from(EXIT_INTERNAL);
        }
    };

    if cli.dry_run {
        println!("network:          {}", settings.network);
        println!("url:              {}", settings.url);
        println!("state file:       {}", settings.state_file.display());
        println!("connect timeout:  {:?}", settings.connect_timeout);
        println!("ahead margin:     {}", settings.policy.ahead_margin);
        println!("peer heights:     {}", settings.client.peer_heights);
        println!("type aliases:     {}", settings.client.types.len());
        return ExitCode::SUCCESS;
    }

    let detector = StallDetector::new(
        WsConnector,
        LastBlockFile::new(&settings.state_file),
        settings.connect_timeout,
        settings.policy,
    );

    match detector.run(&settings.url, &settings.client).await {
        Ok(outcome) => {
            tracing::info!(?outcome, "probe finished");
            ExitCode::from(outcome.exit_code())
        }
        Err(e) => {
            tracing::error!(error = %e, "probe failed");
            ExitCode::from(EXIT_INTERNAL)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("nodeup").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_resolve_to_local_mainnet() {
        let settings = resolve(&parse(&[]), NodeupConfig::default()).unwrap();
        assert_eq!(settings.network, "mainnet");
        assert_eq!(settings.url, "ws://localhost:9944");
        assert_eq!(settings.state_file, PathBuf::from("/tmp/nodeup.lastblock"));
        assert_eq!(settings.connect_timeout, Duration::from_millis(2000));
        assert_eq!(settings.policy.ahead_margin, 10);
        assert!(settings.client.peer_heights);
        assert_eq!(
            settings.client.types.get("Balance2").map(String::as_str),
            Some("u128")
        );
    }

    #[test]
    fn cli_overrides_config() {
        let mut cfg = NodeupConfig::default();
        cfg.probe.url = Some("ws://from-config:9944".to_string());
        cfg.probe.connect_timeout_ms = 5000;

        let cli = parse(&[
            "--network",
            "testnet",
            "--url",
            "ws://10.1.2.3:9944",
            "--timeout-ms",
            "750",
            "--state-file",
            "/var/lib/nodeup/lastblock",
            "--no-peer-heights",
        ]);
        let settings = resolve(&cli, cfg).unwrap();
        assert_eq!(settings.network, "testnet");
        assert_eq!(settings.url, "ws://10.1.2.3:9944");
        assert_eq!(settings.connect_timeout, Duration::from_millis(750));
        assert_eq!(
            settings.state_file,
            PathBuf::from("/var/lib/nodeup/lastblock")
        );
        assert!(!settings.client.peer_heights);
        assert!(settings.client.types.contains_key("Keys"));
    }

    #[test]
    fn config_url_beats_network_default() {
        let mut cfg = NodeupConfig::default();
        cfg.probe.url = Some("ws://from-config:9944".to_string());

        let settings = resolve(&parse(&[]), cfg).unwrap();
        assert_eq!(settings.url, "ws://from-config:9944");
    }

    #[test]
    fn unknown_network_is_rejected() {
        let err = resolve(&parse(&["--network", "devnet"]), NodeupConfig::default()).unwrap_err();
        assert!(err.contains("unknown network 'devnet'"));
        assert!(err.contains("mainnet, testnet"));
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["nodeup", "-v", "-q"]).is_err());
    }
}
