use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use keel_core::{ClusterManifest, OperatorConfig};
use keel_sync::{spawn_cluster, Backends, Cluster, ClusterSnapshot};
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "keelctl", version, about = "Keel: converge a Postgres cluster toward its manifest")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace, used when the manifest does not name one
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    /// Operator configuration file (YAML); KEEL_* variables override it
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync the cluster described by a manifest, once or on an interval
    Sync {
        /// Cluster manifest (YAML)
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Run a single pass and exit with its outcome
        #[arg(long = "once", action = ArgAction::SetTrue)]
        once: bool,
        /// Seconds between passes
        #[arg(long = "interval-secs", default_value_t = 30)]
        interval_secs: u64,
    },
    /// Print the effective operator configuration
    Config,
}

fn init_tracing() {
    let env = std::env::var("KEEL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KEEL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KEEL_METRICS_ADDR; expected host:port");
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<OperatorConfig> {
    let base = match path {
        Some(p) => {
            let raw = std::fs::read_to_string(p).with_context(|| format!("reading config {}", p.display()))?;
            serde_yaml::from_str::<OperatorConfig>(&raw).with_context(|| format!("parsing config {}", p.display()))?
        }
        None => OperatorConfig::default(),
    };
    Ok(base.with_env_overrides())
}

fn load_manifest(path: &Path, namespace: Option<&str>) -> Result<ClusterManifest> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading manifest {}", path.display()))?;
    let mut manifest: ClusterManifest = serde_yaml::from_str(&raw).with_context(|| format!("parsing manifest {}", path.display()))?;
    if manifest.name.is_empty() {
        bail!("manifest {} has no name", path.display());
    }
    if manifest.namespace.is_empty() {
        manifest.namespace = namespace.unwrap_or("default").to_string();
    }
    Ok(manifest)
}

fn report(output: Output, snap: &ClusterSnapshot) -> Result<()> {
    match output {
        Output::Human => {
            println!("{}/{} • {} • passes: {}", snap.namespace, snap.name, snap.status, snap.syncs);
            if let Some(e) = &snap.last_error {
                println!("  last error: {}", e);
            }
        }
        Output::Json => {
            let v = serde_json::json!({
                "namespace": snap.namespace,
                "name": snap.name,
                "status": snap.status,
                "syncs": snap.syncs,
                "lastError": snap.last_error,
            });
            println!("{}", serde_json::to_string(&v)?);
        }
    }
    Ok(())
}

async fn run_sync(cli: &Cli, file: &Path, once: bool, interval_secs: u64) -> Result<()> {
    let cfg = load_config(cli.config.as_deref())?;
    let mut manifest = load_manifest(file, cli.namespace.as_deref())?;
    let client = keel_kubehub::get_kube_client().await?;
    let backends = Backends::kube(client, &manifest.namespace, &cfg)?;
    let cap = std::env::var("KEEL_QUEUE_CAP").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(4);
    let (handle, join) = spawn_cluster(Cluster::new(manifest.clone(), cfg, backends), cap);
    info!(cluster = %manifest.name, namespace = %manifest.namespace, once, interval_secs, "sync invoked");

    let mut outcome = Ok(());
    loop {
        let pass = handle.sync(manifest.clone()).await;
        report(cli.output, &handle.snapshot())?;
        if once {
            outcome = pass.map_err(anyhow::Error::from);
            break;
        }
        if let Err(e) = pass {
            error!(error = %e, "sync pass failed; retrying on the next tick");
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(interval_secs.max(1))) => {}
            _ = signal::ctrl_c() => {
                info!("interrupted; stopping");
                break;
            }
        }
        // Pick up edits to the manifest; a broken file keeps the last good one.
        match load_manifest(file, cli.namespace.as_deref()) {
            Ok(m) if m.name == manifest.name && m.namespace == manifest.namespace => manifest = m,
            Ok(m) => warn!(name = %m.name, namespace = %m.namespace, "manifest now names another cluster; ignoring"),
            Err(e) => warn!(error = %e, "could not reload manifest; keeping the previous one"),
        }
    }

    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "cluster worker already stopped");
    }
    if let Err(e) = join.await {
        warn!(error = %e, "cluster worker did not stop cleanly");
    }
    outcome
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Sync { file, once, interval_secs } => {
            if let Err(e) = run_sync(&cli, file, *once, *interval_secs).await {
                error!(error = %e, "sync failed");
                return Err(e);
            }
        }
        Commands::Config => {
            let cfg = load_config(cli.config.as_deref())?;
            match cli.output {
                Output::Human => print!("{}", serde_yaml::to_string(&cfg)?),
                Output::Json => println!("{}", serde_json::to_string_pretty(&cfg)?),
            }
        }
    }
    Ok(())
}
