//! amgi - SOCKS5 / HTTP CONNECT forwarding proxy

use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use amgi::config::{parse_log_level, ProxyConfig};
use amgi::error::{Error, Result};
use amgi::protocol::ProxyMode;
use amgi::transport::TlsOptions;
use amgi::ProxyServer;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(version, about = "SOCKS5 / HTTP CONNECT forwarding proxy")]
struct Args {
    /// JSON configuration file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen port [default: 8443]
    #[arg(short, long)]
    port: Option<u16>,

    /// Proxy protocol: http or socks5 [default: http]
    #[arg(short, long)]
    mode: Option<ProxyMode>,

    /// trace, debug, info, warning, error or fatal [default: info]
    #[arg(short = 'v', long = "log_level")]
    log_level: Option<String>,

    /// Log to this file instead of the console
    #[arg(short = 'l', long = "log_file")]
    log_file: Option<String>,

    /// Accept clients over mutual TLS
    #[arg(short, long)]
    tls: bool,

    /// Server private key (PEM), TLS mode
    #[arg(short = 'k', long)]
    private_key: Option<PathBuf>,

    /// Server certificate chain (PEM), TLS mode
    #[arg(short = 's', long)]
    server_cert: Option<PathBuf>,

    /// CA bundle for client certificates (PEM), TLS mode
    #[arg(short = 'c', long)]
    ca_cert: Option<PathBuf>,
}

impl Args {
    /// Layer the flags over the configuration file (or the defaults)
    fn into_config(self) -> Result<ProxyConfig> {
        let mut config = match &self.config {
            Some(path) => ProxyConfig::load(path)?,
            None => ProxyConfig::default(),
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if self.log_file.is_some() {
            config.log_file = self.log_file;
        }

        if self.tls {
            let base = config.tls.take();
            let pick = |flag: Option<PathBuf>, from_file: Option<&PathBuf>| {
                flag.or_else(|| from_file.cloned()).unwrap_or_default()
            };
            config.tls = Some(TlsOptions {
                private_key: pick(self.private_key, base.as_ref().map(|t| &t.private_key)),
                server_cert: pick(self.server_cert, base.as_ref().map(|t| &t.server_cert)),
                ca_cert: pick(self.ca_cert, base.as_ref().map(|t| &t.ca_cert)),
            });
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() {
    let args = Args::parse();

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}\n", e);
            let _ = Args::command().print_help();
            std::process::exit(1);
        }
    };

    // Keep the guard alive so buffered lines reach the log file
    let _guard = match init_logging(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(config: ProxyConfig) -> Result<()> {
    info!("amgi v{} starting...", env!("CARGO_PKG_VERSION"));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let server = ProxyServer::bind(&config).await?;
        server.run().await
    })?;

    info!("Goodbye!");
    Ok(())
}

fn init_logging(config: &ProxyConfig) -> Result<Option<WorkerGuard>> {
    let level = parse_log_level(&config.log_level)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let Some(log_file) = &config.log_file else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| Error::Config(format!("Failed to set tracing subscriber: {}", e)))?;
        return Ok(None);
    };

    let path = Path::new(log_file);
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Config(format!("Invalid log file: {}", log_file)))?;
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Config(format!("Failed to set tracing subscriber: {}", e)))?;

    Ok(Some(guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from(["amgi", "-p", "1080", "-m", "socks5", "--log_level", "debug"]);
        let config = args.into_config().unwrap();
        assert_eq!(config.port, 1080);
        assert_eq!(config.mode, ProxyMode::Socks5);
        assert_eq!(config.log_level, "debug");
        assert!(config.tls.is_none());
    }

    #[test]
    fn test_tls_flags() {
        let args = Args::parse_from([
            "amgi", "--tls", "-k", "key.pem", "-s", "cert.pem", "-c", "ca.pem",
        ]);
        let tls = args.into_config().unwrap().tls.unwrap();
        assert_eq!(tls.private_key, PathBuf::from("key.pem"));
        assert_eq!(tls.ca_cert, PathBuf::from("ca.pem"));
    }

    #[test]
    fn test_tls_without_certificates_fails() {
        let args = Args::parse_from(["amgi", "--tls", "-k", "key.pem"]);
        assert!(matches!(args.into_config(), Err(Error::Config(_))));
    }

    #[test]
    fn test_bad_mode_rejected() {
        assert!(Args::try_parse_from(["amgi", "--mode", "socks4"]).is_err());
    }

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }
}
