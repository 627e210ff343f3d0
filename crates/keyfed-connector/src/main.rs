//! Connector binary: one scheduled invocation of the federation pipelines.
//!
//! Usage: `keyfed-connector [CONFIG_PATH] [download|upload|all]`
//!
//! A lone mode word is taken as the mode, with the config path coming from
//! `KEYFED_CONFIG_PATH` or `config.toml`.

use keyfed_connector::{config, run_invocation, Mode};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: keyfed-connector [CONFIG_PATH] [download|upload|all]";

/// Command-line arguments after the program name.
#[derive(Debug, PartialEq, Eq)]
struct CliArgs {
    config_path: Option<String>,
    mode: Mode,
}

fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    match args {
        [] => Ok(CliArgs {
            config_path: None,
            mode: Mode::All,
        }),
        [only] => match only.parse::<Mode>() {
            Ok(mode) => Ok(CliArgs {
                config_path: None,
                mode,
            }),
            Err(_) => Ok(CliArgs {
                config_path: non_blank(only),
                mode: Mode::All,
            }),
        },
        [path, mode] => Ok(CliArgs {
            config_path: non_blank(path),
            mode: mode.parse::<Mode>().map_err(|e| e.to_string())?,
        }),
        [_, _, extra, ..] => Err(format!("unexpected argument: {extra}")),
    }
}

fn non_blank(value: &str) -> Option<String> {
    (!value.trim().is_empty()).then(|| value.to_string())
}

fn resolve_config_path(cli_path: Option<String>) -> (Option<String>, &'static str) {
    if let Some(path) = cli_path {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("KEYFED_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(message) => {
            eprintln!("{message}\n{USAGE}");
            std::process::exit(2);
        }
    };

    let (resolved_config_path, config_source) = resolve_config_path(cli.config_path);
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration, the connector cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let mode = cli.mode;
    tracing::info!(?mode, "starting keyfed connector");

    match run_invocation(&config, mode) {
        Ok(summary) => {
            tracing::info!(
                downloaded_batches = summary.downloaded_batches,
                uploaded_exposures = summary.uploaded_exposures,
                "keyfed connector finished"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "keyfed connector failed");
            std::process::exit(1);
        }
    }
}
