//! shardpool command line
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          shardpool                             │
//! ├───────────────────────────────────────────────────────────────┤
//! │  pool create/list/status/...   put / get / rm / ls             │
//! │  rebalance [--execute]         serve (probes + rebalance loop, │
//! │                                       /healthz /readyz /metrics)│
//! └───────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//!            PoolEngine over LocalDiskStore + JsonMetadataStore
//! ```
//!
//! Every participant's disk mount is a directory on this host.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::{Args as ClapArgs, Parser, Subcommand};
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shardpool::adapters::{JsonMetadataStore, LocalDiskStore, LoggingEventPublisher};
use shardpool::domain::ports::ShardStore;
use shardpool::{
    EngineConfig, Participant, ParticipantId, PlacementStrategy, PoolEngine, PoolHealth,
    PoolScope, PoolSpec,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Erasure-coded storage pools across node disks
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine configuration file (.yaml, .yml or .json)
    #[arg(long, env = "SHARDPOOL_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Directory for pool definitions and the catalog
    #[arg(long, env = "SHARDPOOL_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "SHARDPOOL_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "SHARDPOOL_LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage pools
    #[command(subcommand)]
    Pool(PoolCommand),

    /// Store a file as an object
    Put {
        pool: String,
        object: String,
        file: PathBuf,
    },

    /// Read an object back
    Get {
        pool: String,
        object: String,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete an object
    Rm { pool: String, object: String },

    /// List objects of a pool
    Ls { pool: String },

    /// Show (and optionally execute) the moves that restore fault tolerance
    Rebalance {
        pool: String,
        #[arg(long)]
        execute: bool,
    },

    /// Run health probing and rebalancing with an HTTP status endpoint
    Serve(ServeArgs),
}

#[derive(Subcommand, Debug)]
enum PoolCommand {
    /// Create a pool
    Create {
        name: String,
        /// Data shards (k)
        #[arg(short = 'k', long)]
        data_shards: usize,
        /// Parity shards (m)
        #[arg(short = 'm', long)]
        parity_shards: usize,
        /// space-first, round-robin, node-spread or fill
        #[arg(long, default_value = "space-first")]
        strategy: PlacementStrategy,
        /// single-node or cross-node
        #[arg(long, default_value = "cross-node")]
        scope: PoolScope,
        /// Participant as node:/mount; repeat for each disk
        #[arg(long = "disk", required = true)]
        disks: Vec<ParticipantId>,
    },

    /// List pools
    List,

    /// Show pool status
    Status { name: String },

    /// Add a disk to a pool
    AddDisk { name: String, disk: ParticipantId },

    /// Remove a disk from a pool
    RemoveDisk { name: String, disk: ParticipantId },

    /// Change the placement strategy for future objects
    SetStrategy {
        name: String,
        strategy: PlacementStrategy,
    },

    /// Delete a pool
    Delete {
        name: String,
        /// Drop the pool even though it still holds objects
        #[arg(long)]
        force: bool,
    },
}

#[derive(ClapArgs, Debug)]
struct ServeArgs {
    /// Status server bind address
    #[arg(long, env = "SHARDPOOL_LISTEN", default_value = "0.0.0.0:8080")]
    listen: String,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let config = load_config(&args)?;
    let disks = Arc::new(LocalDiskStore::new());
    let metadata = Arc::new(
        JsonMetadataStore::open(&config.data_dir)
            .await
            .with_context(|| format!("opening metadata under {}", config.data_dir.display()))?,
    );
    let engine = PoolEngine::open(
        config,
        disks.clone(),
        metadata,
        disks.clone(),
        Arc::new(LoggingEventPublisher::new()),
    )
    .await
    .context("starting pool engine")?;

    match args.command {
        Command::Pool(cmd) => run_pool_command(&engine, disks.as_ref(), cmd).await,
        Command::Put { pool, object, file } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let set = engine.put_object(&pool, &object, Bytes::from(data)).await?;
            println!("{}", set.id);
            Ok(())
        }
        Command::Get {
            pool,
            object,
            output,
        } => {
            let data = engine.get_object(&pool, &object).await?;
            match output {
                Some(path) => tokio::fs::write(&path, &data)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?,
                None => {
                    use tokio::io::AsyncWriteExt;
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&data).await?;
                    stdout.flush().await?;
                }
            }
            Ok(())
        }
        Command::Rm { pool, object } => {
            engine.delete_object(&pool, &object).await?;
            Ok(())
        }
        Command::Ls { pool } => print_json(&engine.list_objects(&pool)?),
        Command::Rebalance { pool, execute } => {
            let plan = engine.plan_rebalance(&pool)?;
            if !execute {
                return print_json(&plan);
            }
            let report = engine
                .execute_plan(plan, ctrl_c_token())
                .await?
                .into_result()?;
            print_json(&report)
        }
        Command::Serve(serve) => run_serve(engine, &serve).await,
    }
}

fn load_config(args: &Args) -> anyhow::Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn run_pool_command(
    engine: &PoolEngine,
    disks: &LocalDiskStore,
    cmd: PoolCommand,
) -> anyhow::Result<()> {
    match cmd {
        PoolCommand::Create {
            name,
            data_shards,
            parity_shards,
            strategy,
            scope,
            disks: ids,
        } => {
            let mut participants = Vec::with_capacity(ids.len());
            for id in &ids {
                participants.push(inventory(disks, id).await?);
            }
            let spec = PoolSpec::new(name, data_shards, parity_shards, participants)
                .with_strategy(strategy)
                .with_scope(scope);
            let pool = engine.create_pool(spec).await?;
            print_json(&engine.pool_status(&pool.name)?)
        }
        PoolCommand::List => print_json(&engine.list_pools()),
        PoolCommand::Status { name } => print_json(&engine.pool_status(&name)?),
        PoolCommand::AddDisk { name, disk } => {
            let participant = inventory(disks, &disk).await?;
            print_json(&engine.add_participant(&name, participant).await?)
        }
        PoolCommand::RemoveDisk { name, disk } => {
            print_json(&engine.remove_participant(&name, &disk).await?)
        }
        PoolCommand::SetStrategy { name, strategy } => {
            print_json(&engine.update_strategy(&name, strategy).await?)
        }
        PoolCommand::Delete { name, force } => {
            if force {
                warn!("Deleting pool {} with force; any objects in it are lost", name);
            }
            print_json(&engine.delete_pool(&name, force).await?)
        }
    }
}

/// Size a local disk. Its total is the space available when it joins.
async fn inventory(disks: &LocalDiskStore, id: &ParticipantId) -> anyhow::Result<Participant> {
    let free = disks
        .free_bytes(id)
        .await
        .with_context(|| format!("inspecting {}", id))?;
    if free == 0 {
        bail!("{} has no free space", id);
    }
    Ok(Participant::new(id.node_id.clone(), id.disk.clone(), free, free))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Token cancelled on Ctrl-C.
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing the current move");
            cancel.cancel();
        }
    });
    token
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "h2=warn"] {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }

    // command output goes to stdout, logs to stderr
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

// =============================================================================
// Serve
// =============================================================================

async fn run_serve(engine: PoolEngine, args: &ServeArgs) -> anyhow::Result<()> {
    let engine = Arc::new(engine);
    let shutdown = CancellationToken::new();
    let tasks = engine.spawn_background(shutdown.clone());

    let addr: SocketAddr = args
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {}", args.listen))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Status server listening on {}", addr);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            accepted = listener.accept() => {
                let (stream, _) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Status server accept error: {}", e);
                        continue;
                    }
                };
                let io = TokioIo::new(stream);
                let engine = engine.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| status_handler(engine.clone(), req));
                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Status server connection error: {}", e);
                    }
                });
            }
        }
    }

    shutdown.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }
    info!("Shutdown complete");
    Ok(())
}

async fn status_handler(
    engine: Arc<PoolEngine>,
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (status, content_type, body) = match req.uri().path() {
        "/healthz" | "/livez" => (StatusCode::OK, "text/plain", Bytes::from("ok")),
        "/readyz" => {
            let unavailable: Vec<String> = engine
                .list_pools()
                .into_iter()
                .filter(|p| p.health == PoolHealth::Unavailable)
                .map(|p| p.name)
                .collect();
            if unavailable.is_empty() {
                (StatusCode::OK, "text/plain", Bytes::from("ok"))
            } else {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "text/plain",
                    Bytes::from(format!("unavailable pools: {}", unavailable.join(", "))),
                )
            }
        }
        "/metrics" => match engine.metrics().gather_text() {
            Ok(text) => (StatusCode::OK, "text/plain; version=0.0.4", Bytes::from(text)),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                Bytes::from(e.to_string()),
            ),
        },
        "/pools" => match serde_json::to_vec(&engine.list_pools()) {
            Ok(json) => (StatusCode::OK, "application/json", Bytes::from(json)),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                Bytes::from(e.to_string()),
            ),
        },
        _ => (StatusCode::NOT_FOUND, "text/plain", Bytes::from("not found")),
    };

    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, value);
    }
    Ok(response)
}
