//! Metrolink daemon
//!
//! Usage:
//!   metrolink                           - serve on 0.0.0.0:8765 with the internal clock
//!   metrolink --provider link           - follow an Ableton Link session
//!   metrolink --provider midi --midi-port "IAC"
//!   metrolink --config ./studio.json --port 9000
//!
//! Logging follows `RUST_LOG` (default `info`).

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use metro_clock::{ProviderKind, open_provider};
use metro_hub::{MetroConfig, MetroConfigFile, MetroServer};

#[derive(Parser, Debug)]
#[command(name = "metrolink", version, about = "Shared tempo/transport broadcast server")]
struct Cli {
    /// Config file (default: $METROLINK_CONFIG or ./metrolink.config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:8765
    #[arg(short, long)]
    listen: Option<String>,

    /// Listen port (overrides the port of the listen address)
    #[arg(short, long)]
    port: Option<u16>,

    /// Beats per bar
    #[arg(short, long)]
    quantum: Option<u32>,

    /// Starting tempo for the internal and Link clocks
    #[arg(long)]
    bpm: Option<f64>,

    /// Clock source: internal, midi or link
    #[arg(long)]
    provider: Option<ProviderKind>,

    /// Sampling period in milliseconds
    #[arg(long = "tick-ms")]
    tick_ms: Option<u64>,

    /// Substring of the MIDI input port to follow
    #[arg(long = "midi-port")]
    midi_port: Option<String>,

    /// Append the debug block (raw tempo, raw beat, peers) to every snapshot
    #[arg(long = "debug-payload")]
    debug_payload: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the file values.
    fn resolve(self) -> Result<MetroConfig> {
        let mut file = MetroConfigFile::load(self.config.as_deref())?;

        if let Some(listen) = self.listen {
            file.listen_addr = listen;
        }
        if let Some(quantum) = self.quantum {
            file.quantum = quantum;
        }
        if let Some(bpm) = self.bpm {
            file.initial_bpm = bpm;
        }
        if let Some(provider) = self.provider {
            file.provider = provider;
        }
        if let Some(tick_ms) = self.tick_ms {
            file.tick_interval_ms = tick_ms;
        }
        if let Some(midi_port) = self.midi_port {
            file.midi_port = midi_port;
        }
        if self.debug_payload {
            file.include_debug = true;
        }

        let mut config = file.validate()?;
        if let Some(port) = self.port {
            config.listen_addr = SocketAddr::new(config.listen_addr.ip(), port);
        }
        Ok(config)
    }
}

/// Resolve when `signal` fires. If the signal cannot be installed, never
/// resolve: the process then runs until it is killed.
async fn shutdown_signal(signal: impl Future<Output = std::io::Result<()>>) {
    match signal.await {
        Ok(()) => log::info!("[Metrolink] Interrupt received"),
        Err(e) => {
            log::error!(
                "[Metrolink] Failed to listen for interrupt, running until killed: {}",
                e
            );
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Cli::parse().resolve().context("invalid configuration")?;
    log::info!(
        "[Metrolink] Starting: listen={} provider={} quantum={} bpm={:.1}",
        config.listen_addr,
        config.provider,
        config.quantum,
        config.initial_bpm
    );

    let provider = open_provider(&config.provider_options())
        .with_context(|| format!("failed to open {} clock", config.provider))?;

    let server = MetroServer::bind(config, provider).await?;

    server.run(shutdown_signal(tokio::signal::ctrl_c())).await?;

    log::info!("[Metrolink] Goodbye");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;
    use std::time::Duration;

    fn config_file(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "metrolink",
            "--config",
            "/dev/null/none.json",
        ]);
        assert!(cli.resolve().is_err());

        let cli = Cli::parse_from(["metrolink", "--provider", "link", "--tick-ms", "10"]);
        assert_eq!(cli.provider, Some(ProviderKind::Link));
        assert_eq!(cli.tick_ms, Some(10));
    }

    #[test]
    fn test_cli_overrides_reach_config() {
        let file = config_file(r#"{"quantum": 3, "listen_addr": "127.0.0.1:7000"}"#);
        let path = file.path().to_str().unwrap();

        let config = Cli::parse_from(["metrolink", "--config", path]).resolve().unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:7000".parse().unwrap());
        assert_eq!(config.quantum.get(), 3);
        assert!(!config.include_debug);

        let config = Cli::parse_from([
            "metrolink",
            "--config",
            path,
            "--port",
            "9001",
            "--quantum",
            "5",
            "--bpm",
            "90",
            "--debug-payload",
        ])
        .resolve()
        .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9001".parse().unwrap());
        assert_eq!(config.quantum.get(), 5);
        assert_eq!(config.initial_bpm, 90.0);
        assert!(config.include_debug);

        let cli = Cli::parse_from(["metrolink", "--config", path, "--quantum", "0"]);
        assert!(cli.resolve().is_err());
    }

    #[tokio::test]
    async fn test_failed_signal_keeps_running() {
        let failed = async { Err(std::io::Error::other("no signal handler")) };
        let waited =
            tokio::time::timeout(Duration::from_millis(100), shutdown_signal(failed)).await;
        assert!(waited.is_err());

        let fired = async { Ok(()) };
        tokio::time::timeout(Duration::from_millis(100), shutdown_signal(fired))
            .await
            .unwrap();
    }

    #[test]
    fn test_bad_provider_rejected() {
        assert!(Cli::try_parse_from(["metrolink", "--provider", "osc"]).is_err());
    }
}
