use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use lockwarden_core::types::{Monitor, UnlockRequest};
use lockwarden_core::{
    ClusterSnapshot, EngineConfig, InMemoryCluster, ManualClock, MetricsFacade, MonitorEngine,
    PatternClassifier, ReconcileScheduler, UnlockRequestReconciler,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("lockwarden")
        .version(lockwarden_core::VERSION)
        .about("Stale backup repository lock remediation")
        .subcommand_required(true)
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("replay")
                .about("Run reconcile passes over a cluster snapshot and print the result")
                .arg(
                    Arg::new("snapshot")
                        .long("snapshot")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Cluster snapshot (YAML)"),
                )
                .arg(
                    Arg::new("passes")
                        .long("passes")
                        .default_value("1")
                        .value_parser(value_parser!(u32))
                        .help("Number of passes to run"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Engine configuration (TOML)"),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .default_value("yaml")
                        .value_parser(["yaml", "json"])
                        .help("Output format of the final snapshot"),
                ),
        )
        .subcommand(
            Command::new("classify")
                .about("Check a log file for repository lock errors")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Log file to classify"),
                )
                .arg(
                    Arg::new("pattern")
                        .long("pattern")
                        .action(ArgAction::Append)
                        .help("Lock error pattern; the defaults apply when none is given"),
                ),
        )
        .subcommand(Command::new("schema").about("Print the JSON schemas of the resources"))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"));

    match matches.subcommand() {
        Some(("replay", args)) => replay(args).await,
        Some(("classify", args)) => classify(args),
        Some(("schema", _)) => schema(),
        _ => bail!("unknown command"),
    }
}

async fn replay(args: &ArgMatches) -> Result<()> {
    let snapshot_path = args
        .get_one::<PathBuf>("snapshot")
        .context("--snapshot is required")?;
    let passes = args.get_one::<u32>("passes").copied().unwrap_or(1);
    let output = args.get_one::<String>("output").map_or("yaml", String::as_str);

    let config = match args.get_one::<PathBuf>("config") {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let source = std::fs::read_to_string(snapshot_path)
        .with_context(|| format!("reading snapshot {}", snapshot_path.display()))?;
    let snapshot = ClusterSnapshot::from_yaml(&source).context("parsing snapshot")?;

    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let cluster = Arc::new(InMemoryCluster::from_snapshot(snapshot, clock.clone()));
    let metrics = Arc::new(MetricsFacade);
    let engine = Arc::new(
        MonitorEngine::new(cluster.clone(), config.clone())
            .with_clock(clock.clone())
            .with_metrics(metrics.clone()),
    );
    let unlocks = Arc::new(
        UnlockRequestReconciler::new(cluster.clone(), config.clone())
            .with_clock(clock.clone())
            .with_metrics(metrics),
    );
    let scheduler = ReconcileScheduler::new(cluster.clone(), engine, unlocks);

    let step = chrono::Duration::seconds(i64::try_from(config.requeue_interval_secs).unwrap_or(30));
    for pass in 1..=passes {
        let report = scheduler
            .run_pass()
            .await
            .with_context(|| format!("pass {pass}"))?;
        info!(pass, reconciled = report.reconciled, failed = report.failed, "pass finished");
        if report.failed > 0 {
            warn!(pass, failed = report.failed, "some objects failed to reconcile");
        }
        clock.advance(step);
    }

    let result = cluster.snapshot();
    let rendered = match output {
        "json" => serde_json::to_string_pretty(&result).context("rendering snapshot")?,
        _ => result.to_yaml().context("rendering snapshot")?,
    };
    println!("{rendered}");
    Ok(())
}

fn classify(args: &ArgMatches) -> Result<()> {
    let path = args.get_one::<PathBuf>("file").context("a log file is required")?;
    let patterns: Vec<String> = args
        .get_many::<String>("pattern")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let classifier = PatternClassifier::new(&patterns);
    for error in classifier.errors() {
        warn!(%error, "pattern ignored");
    }

    match classifier.classify(&text) {
        Some(found) => {
            println!("lock error (pattern '{}'): {}", found.pattern, found.line);
            Ok(())
        }
        None => {
            println!("no lock error found");
            std::process::exit(1);
        }
    }
}

fn schema() -> Result<()> {
    let schemas = serde_json::json!({
        "Monitor": schemars::schema_for!(Monitor),
        "UnlockRequest": schemars::schema_for!(UnlockRequest),
    });
    println!("{}", serde_json::to_string_pretty(&schemas)?);
    Ok(())
}
