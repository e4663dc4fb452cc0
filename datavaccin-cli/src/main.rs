mod refresh;
mod server;
mod validate;

use clap::{Parser, Subcommand};
use datavaccin_lib::WeekId;
use tracing_subscriber::EnvFilter;

use crate::server::config::DEFAULT_CONFIG_PATH;
use crate::server::ServeOverrides;

#[derive(Parser, Debug)]
#[command(name = "datavaccin")]
#[command(version)]
#[command(about = "Vaccination-by-municipality records API", long_about = None)]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the records API and run the weekly refresh
    Serve {
        /// Path to config file
        #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH)]
        config: String,

        /// Port to listen on
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,

        /// Address to bind
        #[arg(long = "hostname")]
        hostname: Option<String>,

        /// Records file to load and persist
        #[arg(short = 'd', long = "data-file")]
        data_file: Option<String>,

        /// Do not start the refresh scheduler
        #[arg(long = "no-refresh")]
        no_refresh: bool,
    },
    /// Fetch one week from the remote dataset and persist the records file
    ///
    /// Pass --server while `serve` is running so the week lands in its live
    /// store; without it the records file is rewritten directly.
    Refresh {
        /// Path to config file
        #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH)]
        config: String,

        /// Week to fetch (YYYY-WW), defaults to the current week
        #[arg(short = 'w', long = "week")]
        week: Option<WeekId>,

        /// Records file to load and persist
        #[arg(short = 'd', long = "data-file", conflicts_with = "server")]
        data_file: Option<String>,

        /// Base URL of a running server to refresh through
        #[arg(short = 's', long = "server")]
        server: Option<String>,

        /// Write token sent to the server
        #[arg(short = 't', long = "token", env = "DV_TOKEN")]
        token: Option<String>,
    },
    /// Check a records file for duplicate ids and unknown field names
    Validate {
        /// Path to config file
        #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH)]
        config: String,

        /// Records file to check, defaults to the configured one
        #[arg(short = 'd', long = "data-file")]
        data_file: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Args::parse();
    match cli.cmd {
        Command::Serve {
            config,
            port,
            hostname,
            data_file,
            no_refresh,
        } => {
            let overrides = ServeOverrides {
                port,
                hostname,
                data_file,
                no_refresh,
            };
            server::run_serve(&config, overrides).await
        }
        Command::Refresh {
            config,
            week,
            data_file,
            server,
            token,
        } => refresh::run_refresh(&config, week, data_file, server, token).await,
        Command::Validate { config, data_file } => validate::run_validate(&config, data_file),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_refresh_week_is_parsed() {
        let args = Args::try_parse_from(["dv", "refresh", "--week", "2022-10"]).unwrap();
        match args.cmd {
            Command::Refresh { week, config, .. } => {
                assert_eq!(week, Some(WeekId::new(2022, 10).unwrap()));
                assert_eq!(config, DEFAULT_CONFIG_PATH);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Args::try_parse_from(["dv", "refresh", "--week", "2022-99"]).is_err());
    }

    #[test]
    fn test_refresh_server_flags() {
        let args = Args::try_parse_from([
            "dv",
            "refresh",
            "--server",
            "http://localhost:8080",
            "--token",
            "wt_ops",
        ])
        .unwrap();
        match args.cmd {
            Command::Refresh { server, token, .. } => {
                assert_eq!(server.as_deref(), Some("http://localhost:8080"));
                assert_eq!(token.as_deref(), Some("wt_ops"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Args::try_parse_from([
            "dv",
            "refresh",
            "--server",
            "http://localhost:8080",
            "--data-file",
            "x.json",
        ])
        .is_err());
    }

    #[test]
    fn test_validate_reads_config() {
        let args = Args::try_parse_from(["dv", "validate", "-c", "/etc/dv.toml"]).unwrap();
        match args.cmd {
            Command::Validate { config, data_file } => {
                assert_eq!(config, "/etc/dv.toml");
                assert!(data_file.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
