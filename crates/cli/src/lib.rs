use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use nebula_assistant::{Assistant, ConfigStore};
use nebula_protocol::serialize_json;
use nebula_topology::mesh::DEFAULT_MESH_BIN;
use nebula_topology::{MeshSource, PortScanner, StatusAggregator, TailscaleCli};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

pub use http_api::{build_router, AppState, AI_HANDLER_TIMEOUT, TOPOLOGY_HANDLER_TIMEOUT};
pub use exposure::{AiToken, Exposure, AI_TOKEN_ENV};

pub mod exposure;
mod http_api;
mod stats;

pub const DEFAULT_STATUS_API_URL: &str = nebula_topology::status::DEFAULT_STATUS_API_URL;
pub const STATUS_API_URL_ENV: &str = nebula_topology::status::STATUS_API_URL_ENV;
pub const TAILSCALE_BIN_ENV: &str = "NEBULA_TAILSCALE_BIN";

fn print_stdout(text: &str) -> Result<()> {
    use std::io::Write;

    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

#[derive(Parser)]
#[command(name = "nebula")]
#[command(about = "Mesh topology aggregation with a redacting AI assistant", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(long, global = true)]
    quiet: bool,

    /// Base URL of the remote status backend (queried at <url>/api/status)
    #[arg(
        long,
        global = true,
        env = STATUS_API_URL_ENV,
        default_value = DEFAULT_STATUS_API_URL
    )]
    status_url: String,

    /// Mesh client executable, invoked as `<bin> status --json`
    #[arg(
        long,
        global = true,
        env = TAILSCALE_BIN_ENV,
        default_value = DEFAULT_MESH_BIN
    )]
    tailscale_bin: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve(ServeArgs),

    /// Print the aggregated topology as JSON
    Topology,

    /// Print the raw mesh peer listing as JSON
    Peers,

    /// Check the well-known AI service ports on one address
    Scan {
        /// Address to check
        address: String,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// Address to bind (loopback by default)
    #[arg(long, default_value = "127.0.0.1:8000")]
    bind: String,

    /// Allow listening beyond loopback (requires an auth token)
    #[arg(long)]
    public: bool,

    /// Bearer token required on the /api/ai/* routes (falls back to NEBULA_AUTH_TOKEN)
    #[arg(long)]
    auth_token: Option<String>,
}

impl AppState {
    /// Wires the aggregator, scanner and assistant around one shared mesh source.
    pub fn new(
        remote_base: Option<String>,
        mesh: Arc<dyn MeshSource>,
        config: Arc<ConfigStore>,
        ai_token: Option<AiToken>,
    ) -> Result<Self> {
        let topology = StatusAggregator::new(remote_base, mesh.clone())
            .context("Failed to build status backend client")?;
        let assistant = Assistant::new(config, mesh.clone())
            .context("Failed to build completion client")?;
        Ok(Self {
            topology,
            mesh,
            scanner: PortScanner::default(),
            assistant,
            ai_token,
        })
    }
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let mesh: Arc<dyn MeshSource> = Arc::new(TailscaleCli::new(cli.tailscale_bin.clone()));
    let remote_base = Some(cli.status_url.clone());

    match cli.command {
        Commands::Serve(args) => serve_http(args, remote_base, mesh).await?,
        Commands::Topology => {
            let aggregator = StatusAggregator::new(remote_base, mesh)
                .context("Failed to build status backend client")?;
            let result = aggregator.get_topology().await;
            if let Some(err) = &result.error {
                log::warn!("{err}");
            }
            print_stdout(&serialize_json(&result)?)?;
        }
        Commands::Peers => {
            let fetch = mesh.fetch().await;
            if !fetch.is_live() {
                log::warn!("mesh client unavailable; printing the builtin snapshot");
            }
            print_stdout(&serialize_json(&fetch.snapshot.peer_records())?)?;
        }
        Commands::Scan { address } => {
            let result = PortScanner::default().scan(&address).await;
            print_stdout(&serialize_json(&result)?)?;
        }
    }

    Ok(())
}

async fn serve_http(
    args: ServeArgs,
    remote_base: Option<String>,
    mesh: Arc<dyn MeshSource>,
) -> Result<()> {
    let ai_token = AiToken::resolve(
        args.auth_token.as_deref(),
        std::env::var(AI_TOKEN_ENV).ok(),
    )?;
    let exposure = Exposure::resolve(&args.bind, args.public, ai_token.as_ref()).await?;

    let ai_guarded = ai_token.is_some();
    let state = Arc::new(AppState::new(
        remote_base,
        mesh,
        Arc::new(ConfigStore::default()),
        ai_token,
    )?);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;
    let local_addr = listener.local_addr()?;
    let base_url = format!("http://{local_addr}/api");

    print_stdout(&format!("Serving Nebula API: {base_url}"))?;
    print_stdout(&format!("Topology endpoint: {base_url}/topology"))?;

    if ai_guarded {
        print_stdout(&format!(
            "AI routes need header 'Authorization: Bearer ${AI_TOKEN_ENV}'"
        ))?;
    }
    if exposure.public {
        let addrs = exposure
            .addrs
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        print_stdout(&format!(
            "Public bind enabled (--public). Resolved addresses: {addrs}"
        ))?;
    }

    print_stdout(&format!("Try: curl {base_url}/health"))?;
    axum::serve(listener, app).await?;
    Ok(())
}
