//! kytosd — the Kytos daemon.
//!
//! Serves the placement optimizer over HTTP, or runs a single solve from a
//! JSON request file.
//!
//! # Usage
//!
//! ```text
//! kytosd serve --config kytos.toml --port 8000
//! kytosd solve --input cluster.json --seed 42
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kytos_core::{KytosConfig, OptimizationRequest, OptimizationResponse};
use kytos_placement::solve_placement;

const DEFAULT_FILTER: &str = "info,kytosd=debug,kytos=debug";

#[derive(Parser)]
#[command(name = "kytosd", about = "Kytos pod placement optimizer")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        /// TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Address to bind, overriding the config.
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on, overriding the config.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one solve from a JSON `OptimizationRequest` file.
    Solve {
        #[arg(long)]
        input: PathBuf,

        /// Write the response here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Fix the random seed.
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Serve { config, bind, port } => {
            let mut config = match config {
                Some(path) => KytosConfig::from_file(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => KytosConfig::default(),
            };
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(config).await
        }
        Command::Solve { input, output, seed } => run_solve(&input, output.as_deref(), seed),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run_server(config: KytosConfig) -> anyhow::Result<()> {
    config
        .annealing
        .validate()
        .context("invalid [annealing] defaults")?;

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.server.bind, config.server.port))?;

    let router = kytos_api::build_router(&config.server, config.annealing.clone());

    info!(
        %addr,
        origins = ?config.server.cors_origins,
        reads = config.annealing.num_reads,
        sweeps = config.annealing.num_sweeps,
        "Kytos API server starting"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("Kytos daemon stopped");
    Ok(())
}

fn run_solve(input: &Path, output: Option<&Path>, seed: Option<u64>) -> anyhow::Result<()> {
    let response = solve_file(input, seed)?;
    let rendered = serde_json::to_string_pretty(&response)?;

    match output {
        Some(path) => {
            std::fs::write(path, rendered).with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), actions = response.placements.len(), "plan written");
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

/// Solve the request stored at `input`. A `seed` overrides the file's.
///
/// Solver failures carry their error code as a message prefix.
fn solve_file(input: &Path, seed: Option<u64>) -> anyhow::Result<OptimizationResponse> {
    let raw = std::fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let request: OptimizationRequest =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", input.display()))?;

    let mut settings = request.settings.unwrap_or_default();
    if seed.is_some() {
        settings.seed = seed;
    }

    solve_placement(&request.state, &settings).map_err(|e| anyhow::anyhow!("{}: {e}", e.code()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use kytos_core::ActionType;
    use serde_json::{Value, json};
    use tempfile::NamedTempFile;

    fn request_file(body: &Value) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(body.to_string().as_bytes()).unwrap();
        file
    }

    fn rebalance_request(seed: u64) -> Value {
        let pod = |id: &str| {
            json!({"id": id, "cpu_usage": 500.0, "mem_usage": 1024.0, "current_node": "node1"})
        };
        json!({
            "state": {
                "nodes": [
                    {"id": "node1", "cpu_capacity": 4000.0, "mem_capacity": 16000.0, "cpu_usage": 3500.0, "mem_usage": 14000.0},
                    {"id": "node2", "cpu_capacity": 4000.0, "mem_capacity": 16000.0, "cpu_usage": 0.0, "mem_usage": 0.0},
                ],
                "pods": [pod("pod1"), pod("pod2"), pod("pod3")],
                "services": [],
            },
            "settings": {"num_reads": 6, "num_sweeps": 100, "seed": seed},
        })
    }

    #[test]
    fn fixed_seed_gives_identical_plans() {
        let file = request_file(&rebalance_request(1));

        let a = solve_file(file.path(), Some(42)).unwrap();
        let b = solve_file(file.path(), Some(42)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.placements.len(), 3);
        assert!(a
            .placements
            .iter()
            .all(|p| matches!(p.action, ActionType::Keep | ActionType::Move)));
    }

    #[test]
    fn seed_flag_overrides_file_seed() {
        let first = request_file(&rebalance_request(1));
        let second = request_file(&rebalance_request(2));

        let a = solve_file(first.path(), Some(7)).unwrap();
        let b = solve_file(second.path(), Some(7)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_input_is_prefixed_with_code() {
        let mut body = rebalance_request(1);
        body["state"]["pods"] = json!([]);
        let file = request_file(&body);

        let err = solve_file(file.path(), None).unwrap_err();
        assert!(err.to_string().starts_with("invalid_input: "), "{err}");
    }

    #[test]
    fn infeasible_is_prefixed_with_code() {
        let file = request_file(&json!({
            "state": {
                "nodes": [{"id": "node1", "cpu_capacity": 4000.0, "mem_capacity": 16000.0, "cpu_usage": 0.0, "mem_usage": 0.0}],
                "pods": [
                    {"id": "huge-a", "cpu_usage": 5000.0, "mem_usage": 1024.0, "current_node": null},
                    {"id": "huge-b", "cpu_usage": 6000.0, "mem_usage": 1024.0, "current_node": null},
                ],
                "services": [],
            },
            "settings": {
                "load_balance_weight": 0.0,
                "cpu_limit_weight": 0.0,
                "mem_limit_weight": 0.0,
                "num_reads": 6,
                "num_sweeps": 100,
            },
        }));

        let err = solve_file(file.path(), Some(3)).unwrap_err();
        assert!(err.to_string().starts_with("infeasible: "), "{err}");
    }

    #[test]
    fn missing_file_is_reported() {
        let err = solve_file(Path::new("/nonexistent/kytos-request.json"), None).unwrap_err();
        assert!(err.to_string().contains("reading"));
    }
}
