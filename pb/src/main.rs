//! PurposeBench - purpose-aware pub/sub benchmark tooling
//!
//! CLI entry point for filter expansion, wire encoding, correctness checks,
//! barrier sync and workload simulation.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, eyre};
use tracing::{debug, info};
use uuid::Uuid;

use purposebench::cli::{Cli, Command, OutputFormat, get_log_path};
use purposebench::client::{BenchmarkClient, CorrectnessScenario};
use purposebench::config::Config;
use purposebench::purpose::{PurposeCodec, PurposeMethod, expand_filter};
use purposebench::results::{ResultLogger, ResultSink};
use purposebench::simulation::TestFramework;
use purposebench::sync::SyncBarrier;
use purposebench::transport::MemoryBroker;

fn parse_level(level_str: Option<&str>) -> tracing::Level {
    let Some(s) = level_str else {
        return tracing::Level::INFO;
    };
    match s.to_uppercase().as_str() {
        "TRACE" => tracing::Level::TRACE,
        "DEBUG" => tracing::Level::DEBUG,
        "INFO" => tracing::Level::INFO,
        "WARN" | "WARNING" => tracing::Level::WARN,
        "ERROR" => tracing::Level::ERROR,
        _ => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
            tracing::Level::INFO
        }
    }
}

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>, to_stderr: bool) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    // Priority: CLI --log-level > config file > default (INFO)
    let level = parse_level(cli_log_level.or(config_log_level));
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    if to_stderr {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    } else {
        let log_path = get_log_path();
        if let Some(log_dir) = log_path.parent() {
            fs::create_dir_all(log_dir).context("Failed to create log directory")?;
        }
        let log_file = fs::File::create(&log_path).context("Failed to create log file")?;
        tracing_subscriber::fmt()
            .with_writer(log_file)
            .with_ansi(false)
            .with_env_filter(filter)
            .init();
    }

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref(), cli.log_stderr)
        .context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Command::Simulate {
        clients,
        cycles,
        seed,
        seconds_between,
        ..
    } = &cli.command
    {
        config.override_workload(*clients, *cycles, *seed, *seconds_between);
    }
    config.validate().context("Invalid configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Expand { filter, format } => cmd_expand(&filter, format),
        Command::Encode {
            topic,
            purpose,
            method,
            subscribe,
            format,
        } => cmd_encode(&topic, &purpose, method, subscribe, format),
        Command::Correctness { method, rounds, format } => cmd_correctness(method, rounds, format).await,
        Command::Sync {
            nodes,
            method,
            timeout_secs,
        } => cmd_sync(&config, nodes, method, timeout_secs).await,
        Command::Simulate { method, output, .. } => cmd_simulate(&config, method, output).await,
    }
}

/// Print the concrete purposes a filter describes
fn cmd_expand(filter: &str, format: OutputFormat) -> Result<()> {
    debug!(%filter, %format, "cmd_expand: called");
    let purposes = expand_filter(filter)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&purposes)?),
        OutputFormat::Text => {
            for purpose in &purposes {
                println!("{}", purpose);
            }
        }
    }
    Ok(())
}

/// Print the wire actions for one publish or subscribe
fn cmd_encode(topic: &str, purpose: &str, method: PurposeMethod, subscribe: bool, format: OutputFormat) -> Result<()> {
    debug!(%topic, %purpose, %method, subscribe, "cmd_encode: called");
    let codec = PurposeCodec::new(method);
    let actions = if subscribe {
        codec.encode_subscribe(topic, purpose)?
    } else {
        codec.encode_publish(topic, purpose, "")
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&actions)?),
        OutputFormat::Text => {
            println!("{}", method.to_string().bold());
            for action in &actions {
                println!("  {}", action);
            }
        }
    }
    Ok(())
}

/// Run the correctness scenario for one or all methods
async fn cmd_correctness(method: Option<PurposeMethod>, rounds: usize, format: OutputFormat) -> Result<()> {
    debug!(?method, rounds, "cmd_correctness: called");
    let methods: Vec<PurposeMethod> = match method {
        Some(m) => vec![m],
        None => PurposeMethod::ALL.to_vec(),
    };

    let mut reports = Vec::new();
    for method in methods {
        let broker = MemoryBroker::default();
        let mut scenario = CorrectnessScenario::new(method);
        scenario.rounds = rounds;
        let result = scenario
            .run(&broker, None)
            .await
            .context(format!("Correctness scenario failed for {}", method))?;
        reports.push((method, result));
    }

    match format {
        OutputFormat::Json => {
            let results: Vec<_> = reports.iter().map(|(_, r)| r).collect();
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        OutputFormat::Text => {
            for (method, result) in &reports {
                let verdict = if result.passed() { "PASS".green() } else { "FAIL".red() };
                println!("{} {}", verdict, method);
                print!("{}", result);
            }
        }
    }

    if reports.iter().all(|(_, r)| r.passed()) {
        Ok(())
    } else {
        Err(eyre!("Correctness check failed"))
    }
}

/// Run every node through ready and done on one in-process broker
///
/// All nodes share this process; there is no network transport.
async fn cmd_sync(config: &Config, nodes: Option<usize>, method: PurposeMethod, timeout_secs: Option<u64>) -> Result<()> {
    let node_ids: Vec<String> = match nodes {
        Some(n) => (1..=n).map(|i| format!("benchmark-{}", i)).collect(),
        None => config.node.expected.clone(),
    };
    if node_ids.is_empty() {
        return Err(eyre!("No nodes to synchronize"));
    }
    let timeout = timeout_secs.map(Duration::from_secs).or(config.node.barrier_timeout());
    info!(nodes = node_ids.len(), %method, ?timeout, "cmd_sync: starting");

    let broker = MemoryBroker::default();
    let mut handles = Vec::new();
    for node_id in &node_ids {
        let client = Arc::new(BenchmarkClient::new(node_id.clone(), Arc::new(broker.client(node_id.clone()))));
        client
            .connect(broker.address(), broker.port())
            .await
            .context(format!("Node {} failed to connect", node_id))?;
        let barrier = Arc::new(SyncBarrier::new(node_id.clone(), node_ids.clone(), client.transport(), method)?);
        let delivery = client.spawn_delivery(Some(Arc::clone(&barrier)))?;
        barrier.subscribe().await?;

        handles.push(tokio::spawn(run_node(client, barrier, delivery, timeout)));
    }

    for handle in handles {
        let node_id = handle.await.context("Node task panicked")??;
        println!("{} {} ready and done", "✓".green(), node_id);
    }
    println!("{}", format!("All {} nodes synchronized", node_ids.len()).bold());
    Ok(())
}

async fn run_node(
    client: Arc<BenchmarkClient>,
    barrier: Arc<SyncBarrier>,
    delivery: tokio::task::JoinHandle<()>,
    timeout: Option<Duration>,
) -> Result<String> {
    barrier.notify_ready().await?;
    let released = match timeout {
        Some(t) => barrier.wait_for_ready_timeout(t).await?,
        None => barrier.wait_for_ready().await,
    };
    if !released {
        return Err(eyre!("{}: ready barrier closed", barrier.my_id()));
    }

    barrier.notify_done().await?;
    let released = match timeout {
        Some(t) => barrier.wait_for_done_timeout(t).await?,
        None => barrier.wait_for_done().await,
    };
    if !released {
        return Err(eyre!("{}: done barrier closed", barrier.my_id()));
    }

    client.disconnect().await?;
    delivery.await.context("Delivery task failed")?;
    Ok(barrier.my_id().to_string())
}

/// Run the workload simulation, writing result lines to a log file
async fn cmd_simulate(config: &Config, method: PurposeMethod, output: Option<PathBuf>) -> Result<()> {
    let path = output.unwrap_or_else(|| {
        config
            .results
            .dir
            .join(format!("{}-{}.log", config.node.id, Uuid::now_v7()))
    });
    debug!(?path, %method, "cmd_simulate: called");

    let logger = ResultLogger::open(&path).await?;
    let sink: Arc<dyn ResultSink> = Arc::new(logger.clone());

    let broker = MemoryBroker::default();
    let mut framework = TestFramework::new(broker, config.workload.clone(), method)
        .with_sink(sink)
        .with_benchmark_id(config.node.id.clone());
    framework.create_clients(config.workload.clients).await?;
    let summary = framework
        .run_test_cycle(config.workload.cycles, config.workload.seconds_between)
        .await?;
    framework.shutdown().await?;
    let lines = logger.shutdown().await?;

    println!("{} (seed {})", "Simulation complete".bold(), summary.seed);
    println!("  Clients:      {}", summary.clients);
    println!("  Cycles:       {}", summary.cycles);
    println!("  Published:    {}", summary.published);
    println!("  Delivered:    {}", summary.delivered);
    println!("  Denied:       {}", summary.denied);
    println!("  Disconnected: {}", summary.disconnected);
    println!("  Result log:   {} ({} lines)", path.display(), lines);
    Ok(())
}
