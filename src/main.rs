use std::convert::Infallible;
use std::net::SocketAddr;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use gulpless::{Config, Mode, Pipeline, Toolchain};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Env {
    Dev,
    Prod,
}

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    #[clap(value_enum, index = 1, default_value = "dev")]
    mode: Env,

    /// Pipeline description
    #[arg(short, long, default_value = "pipeline.json")]
    config: Utf8PathBuf,

    /// Address the dev server listens on
    #[arg(long, env = "DEV_SERVER_ADDRESS", default_value = "127.0.0.1:3000")]
    address: SocketAddr,

    /// Origin `/api` requests are forwarded to in dev mode
    #[arg(long, env = "API_PROXY", default_value = "http://127.0.0.1:8080")]
    api_proxy: String,

    /// Verify TLS certificates of the API origin, only "true" enables it
    #[arg(long, env = "API_PROXY_SECURE", default_value = "false", value_parser = truthy, action = clap::ArgAction::Set)]
    api_proxy_secure: bool,

    /// esbuild executable
    #[arg(long, default_value = "esbuild")]
    esbuild: Utf8PathBuf,

    /// Write a waterfall chart of the build to this file
    #[arg(long)]
    waterfall: Option<Utf8PathBuf>,
}

fn truthy(value: &str) -> Result<bool, Infallible> {
    Ok(value == "true")
}

fn main() -> ExitCode {
    let args = Args::parse();

    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = Config::load(&args.config)?;

    let mode = match args.mode {
        Env::Dev => Mode::Dev,
        Env::Prod => Mode::Prod,
    };

    let diagnostics = Pipeline::new(config)
        .with_transform(Toolchain {
            esbuild: args.esbuild,
        })
        .with_proxy(args.api_proxy, args.api_proxy_secure)
        .with_address(args.address)
        .run(mode)?;

    if let Some(path) = args.waterfall {
        diagnostics.render_waterfall_to_file(&path)?;
        tracing::info!("wrote build waterfall to {path}");
    }

    Ok(())
}
