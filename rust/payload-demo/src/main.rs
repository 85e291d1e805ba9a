//! Pollux Payload Demo
//!
//! A payload that trades random typed values with the other participants of
//! a computation. Started by the coordinator, one process per node.
//!
//! # Usage
//!
//! ```bash
//! # Join the coordinator listening on localhost:50000 as node 3
//! pollux-payload-demo --port 50000 --id 3
//!
//! # Remote coordinator, configuration file, logs under /tmp
//! pollux-payload-demo -p 50000 -i 3 -t 10.0.0.5 -c payload.toml --log-dir /tmp
//! ```

mod exchange;

use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use exchange::{ExchangePayload, PAYLOAD_NAME};
use payload_core::{NodeId, PayloadConfig, ShutdownReason};

/// Pollux demo payload
#[derive(Parser, Debug)]
#[command(name = "pollux-payload-demo")]
#[command(about = "Example payload exchanging random values with its peers")]
struct Args {
    /// Coordinator port
    #[arg(short, long)]
    port: u16,

    /// Local node id
    #[arg(short, long)]
    id: i32,

    /// Coordinator IP, also used as the local bind address
    #[arg(short = 't', long = "zebulon-ip", default_value = "localhost")]
    zebulon_ip: String,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Directory for the log file
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,
}

impl Args {
    fn log_file(&self) -> PathBuf {
        self.log_dir.join(format!("{}-{}.log", PAYLOAD_NAME, self.id))
    }

    fn load_config(&self) -> payload_core::Result<PayloadConfig> {
        let config = match &self.config {
            Some(path) => PayloadConfig::from_file(path)?,
            None => PayloadConfig::default(),
        };
        let mut config = config.with_env_overrides();
        config.coordinator.address = format!("{}:{}", self.zebulon_ip, self.port);
        config.server.bind_ip = self.zebulon_ip.clone();
        config.validate()?;
        Ok(config)
    }
}

fn init_logging(args: &Args) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(&args.log_dir)?;
    let path = args.log_file();
    let file = File::create(&path)?;

    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();

    Ok(path)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let log_path = match init_logging(&args) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Cannot open log file {}: {}", args.log_file().display(), e);
            return ExitCode::FAILURE;
        }
    };
    tracing::info!("Logging to {}", log_path.display());
    tracing::info!("Command line: {:?}", std::env::args().collect::<Vec<_>>());

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("Starting {} as node {}", PAYLOAD_NAME, args.id);
    tracing::info!("  Coordinator: {}", config.coordinator.address);
    tracing::info!("  Bind address: {}:{}", config.server.bind_ip, config.server.port);
    tracing::info!("  Transport policy: {:?}", config.failure.transport_policy);

    let outcome = payload_core::serve(ExchangePayload::default(), config, NodeId(args.id)).await;
    let code = match outcome {
        Ok(ShutdownReason::Terminated) => ExitCode::SUCCESS,
        Ok(ShutdownReason::Failure(reason)) => {
            tracing::error!("Payload failed: {}", reason);
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("Payload could not run: {}", e);
            ExitCode::from(2)
        }
    };

    tracing::info!("End of {}", log_path.display());
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use payload_core::config::TransportPolicy;
    use std::io::Write;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["pollux-payload-demo", "-p", "50001", "-i", "4"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = args(&[]);
        assert_eq!(args.zebulon_ip, "localhost");
        assert_eq!(args.log_level, "info");
        assert_eq!(args.log_file(), PathBuf::from("./pollux-payload-demo-4.log"));
    }

    #[test]
    fn test_port_and_id_are_required() {
        assert!(Args::try_parse_from(["pollux-payload-demo", "-i", "1"]).is_err());
        assert!(Args::try_parse_from(["pollux-payload-demo", "-p", "1"]).is_err());
    }

    #[test]
    fn test_command_line_sets_addresses() {
        let config = args(&["-t", "10.1.2.3"]).load_config().unwrap();
        assert_eq!(config.coordinator.address, "10.1.2.3:50001");
        assert_eq!(config.server.bind_ip, "10.1.2.3");
        assert_eq!(config.server.port, 0);
    }

    #[test]
    fn test_config_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[failure]\ntransport_policy = \"propagate\"").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = args(&["-c", &path]).load_config().unwrap();
        assert_eq!(config.failure.transport_policy, TransportPolicy::Propagate);
        assert_eq!(config.coordinator.address, "localhost:50001");
    }
}
