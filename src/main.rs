use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Parser;
use console::style;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};
use tsumugi::{Config, pipeline};

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    /// Task to run.
    #[clap(index = 1, default_value = pipeline::DEFAULT)]
    task: String,

    /// Configuration file, `tsumugi.json` in the working directory if present.
    #[clap(long)]
    config: Option<Utf8PathBuf>,

    /// Project root.
    #[clap(long)]
    root: Option<Utf8PathBuf>,

    /// HTTP port of the dev server.
    #[clap(long)]
    port: Option<u16>,

    /// Bundler executable for scripts.
    #[clap(long)]
    bundler: Option<String>,

    /// Force development mode even if the task doesn't reach `dev`.
    #[clap(long)]
    dev: bool,

    /// Print per-task timings when the graph is done.
    #[clap(long)]
    timings: bool,

    /// Print the task graph as a Mermaid diagram and exit.
    #[clap(long)]
    graph: bool,
}

fn init_logging() {
    let indicatif = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif.get_stderr_writer()))
        .with(indicatif)
        .init();
}

fn configure(args: &Args) -> anyhow::Result<Config> {
    let mut config = Config::load(args.config.as_deref())?;

    if let Some(root) = &args.root {
        config.root = root.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bundler) = &args.bundler {
        config.bundler = bundler.clone();
    }

    config.root = config
        .root
        .canonicalize_utf8()
        .with_context(|| format!("project root '{}' doesn't exist", config.root))?;

    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging();

    let config = configure(&args)?;
    let blueprint = pipeline::standard(&config)?;

    if args.graph {
        print!("{blueprint}");
        return Ok(());
    }

    // Development mode is fixed before any task is constructed.
    let development = args.dev || blueprint.reaches(&args.task, pipeline::DEV);
    let blueprint = match development {
        true => pipeline::standard(&config.clone().with_development(true))?,
        false => blueprint,
    };

    let mode = if development { "development" } else { "production" };
    tracing::info!("running '{}' in {} mode", style(&args.task).cyan(), mode);

    let runner = blueprint.finish()?;
    let session = runner.run(&args.task)?;

    if args.timings {
        print!("{}", session.diagnostics());
    }

    if session.is_idle() {
        return Ok(());
    }

    let services: Vec<_> = session.services().map(String::from).collect();
    tracing::info!("{} running, press Ctrl-C to stop", services.join(", "));

    session.wait()
}
