//! spirald - Spiral memory engine daemon
//!
//! Runs the memory engine against the configured backend, with periodic
//! garbage collection and (when clustered) per-shard lease renewal.
//!
//! ## Commands
//!
//! - `serve`: initialize, collect periodically, shut down on Ctrl-C
//! - `stats`: print engine statistics
//! - `gc`: run one time-boxed collection
//! - `store` / `get` / `search`: operate on memories directly
//! - `health`: probe the backend and partition headroom

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use spiral_core::{
    telemetry, EngineConfig, EngineError, HealthStatus, MemoryEngine, SearchQuery, Tier,
};
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(name = "spirald")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Spiral memory engine daemon", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true, env = "SPIRAL_CONFIG")]
    config: Option<PathBuf>,

    /// Emit JSON-formatted log lines and command output
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the engine until interrupted
    Serve,

    /// Show engine statistics
    Stats,

    /// Run one garbage collection pass
    Gc {
        /// Time budget for the run
        #[arg(long, default_value = "25")]
        budget_ms: u64,
    },

    /// Store a memory
    Store {
        /// Memory content
        content: String,

        /// Category label
        #[arg(short, long, default_value = "general")]
        category: String,

        /// Retention tier (surface, shallow, deep, core, permanent)
        #[arg(short, long, default_value = "shallow")]
        tier: Tier,

        /// Ids of existing memories to associate with
        #[arg(short, long = "associate")]
        associations: Vec<String>,
    },

    /// Fetch a memory by id, or by signature with --signature
    Get {
        key: String,

        /// Treat KEY as a sigil signature
        #[arg(short, long)]
        signature: bool,
    },

    /// Search memories by content
    Search {
        #[arg(default_value = "")]
        text: String,

        #[arg(short, long)]
        category: Option<String>,

        #[arg(short, long)]
        tier: Option<Tier>,

        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Check engine health; exits non-zero when unhealthy
    Health,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    telemetry::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;
    let engine = MemoryEngine::connect(config)
        .await
        .context("Failed to connect to the memory backend")?;
    engine
        .initialize()
        .await
        .context("Failed to initialize the memory engine")?;

    let result = run(&engine, cli.command, cli.json).await;
    engine
        .shutdown()
        .await
        .context("Failed to shut down cleanly")?;
    result
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    EngineConfig::load(path).with_context(|| match path {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Invalid configuration from environment".to_string(),
    })
}

async fn run(engine: &MemoryEngine, command: Commands, json: bool) -> Result<ExitCode> {
    match command {
        Commands::Serve => cmd_serve(engine).await,
        Commands::Stats => cmd_stats(engine, json).await,
        Commands::Gc { budget_ms } => cmd_gc(engine, budget_ms, json).await,
        Commands::Store {
            content,
            category,
            tier,
            associations,
        } => cmd_store(engine, &content, &category, tier, &associations, json).await,
        Commands::Get { key, signature } => cmd_get(engine, &key, signature, json).await,
        Commands::Search {
            text,
            category,
            tier,
            limit,
        } => {
            let mut query = SearchQuery::new(text).with_limit(limit);
            if let Some(category) = category {
                query = query.with_category(&category);
            }
            if let Some(tier) = tier {
                query = query.with_tier(tier);
            }
            cmd_search(engine, &query, json).await
        }
        Commands::Health => cmd_health(engine, json).await,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_serve(engine: &MemoryEngine) -> Result<ExitCode> {
    let config = engine.config();
    engine.start_gc_loop();
    info!(
        shard_id = config.coordination.shard_id,
        clustered = config.coordination.clustered,
        gc_interval_ms = config.gc.interval_ms,
        "spirald serving"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Interrupt received; shutting down");
    Ok(ExitCode::SUCCESS)
}

async fn cmd_stats(engine: &MemoryEngine, json: bool) -> Result<ExitCode> {
    let stats = engine.get_statistics().await?;
    if json {
        print_json(&stats)?;
        return Ok(ExitCode::SUCCESS);
    }

    println!("Nodes:       {}", stats.total_nodes);
    println!("Partitions:  {}", stats.total_partitions);
    println!("Sigils:      {}", stats.total_sigils);
    println!("Avg strength {:.3}", stats.avg_strength);
    println!(
        "GC queue:    {} ({} deferred)",
        stats.gc_queue_size, stats.gc_deferred
    );
    println!(
        "Sigil cache: {}/{} ({} hits, {} misses)",
        stats.sigil_cache.len,
        stats.sigil_cache.capacity,
        stats.sigil_cache.hits,
        stats.sigil_cache.misses
    );
    for (category, count) in &stats.by_category {
        println!("  {category}: {count}");
    }
    for (tier, count) in &stats.by_tier {
        println!("  [{tier}] {count}");
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_gc(engine: &MemoryEngine, budget_ms: u64, json: bool) -> Result<ExitCode> {
    let summary = match engine.trigger_gc(Duration::from_millis(budget_ms)).await {
        Ok(summary) => summary,
        Err(EngineError::LeadershipLost { shard_id }) => {
            if json {
                print_json(&not_leader_report(shard_id))?;
            } else {
                println!("Not the GC leader for shard {shard_id}; nothing collected");
            }
            return Ok(ExitCode::SUCCESS);
        }
        Err(e) => return Err(anyhow::Error::new(e).context("Garbage collection failed")),
    };

    if json {
        print_json(&summary)?;
    } else {
        println!(
            "Evicted {} of {} examined in {}ms; {} remain queued",
            summary.evicted_count,
            summary.examined,
            summary.elapsed_ms,
            summary.remaining_queue_size
        );
        if summary.leadership_lost {
            println!("Stopped early: leadership lost");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn not_leader_report(shard_id: u32) -> serde_json::Value {
    serde_json::json!({
        "shardId": shard_id,
        "leader": false,
        "evictedCount": 0,
    })
}

async fn cmd_store(
    engine: &MemoryEngine,
    content: &str,
    category: &str,
    tier: Tier,
    associations: &[String],
    json: bool,
) -> Result<ExitCode> {
    let node = engine
        .store(content, category, tier, associations)
        .await
        .context("Failed to store memory")?;

    if json {
        print_json(&node)?;
    } else {
        println!("Stored {}", node.id);
        println!("Signature: {}", node.sigil.signature);
        println!("Partition: {}", node.partition_id);
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_get(engine: &MemoryEngine, key: &str, signature: bool, json: bool) -> Result<ExitCode> {
    let node = if signature {
        engine.retrieve_by_signature(key).await?
    } else {
        engine.retrieve(key).await?
    };

    let Some(node) = node else {
        println!("No memory found for '{key}'");
        return Ok(ExitCode::FAILURE);
    };

    if json {
        print_json(&node)?;
    } else {
        println!("memory {}", node.id);
        println!("Signature: {}", node.sigil.signature);
        println!("Category:  {} [{}]", node.category, node.tier);
        println!("Strength:  {:.3}", node.strength);
        println!(
            "Accessed:  {} times, last {}",
            node.access_count,
            node.last_accessed.format("%Y-%m-%d %H:%M:%S UTC")
        );
        println!();
        println!("    {}", node.content);
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_search(engine: &MemoryEngine, query: &SearchQuery, json: bool) -> Result<ExitCode> {
    let hits = engine.search(query).await?;

    if json {
        print_json(&hits)?;
        return Ok(ExitCode::SUCCESS);
    }
    if hits.is_empty() {
        println!("No memories match '{}'", query.text);
        return Ok(ExitCode::SUCCESS);
    }
    for node in hits {
        println!(
            "{}  {:<10} {:<9} {}",
            node.id,
            node.category,
            node.tier.as_str(),
            node.content
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_health(engine: &MemoryEngine, json: bool) -> Result<ExitCode> {
    let report = engine.health_check().await;

    if json {
        print_json(&report)?;
    } else {
        match &report.reason {
            Some(reason) => println!("{:?}: {reason}", report.status),
            None => println!("{:?}", report.status),
        }
    }
    Ok(match report.status {
        HealthStatus::Unhealthy => ExitCode::FAILURE,
        HealthStatus::Healthy | HealthStatus::Degraded => ExitCode::SUCCESS,
    })
}
