use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;
use taxo_kernel::config::EngineConfig;
use taxo_kernel::engine::TaxonomyEngine;
use taxo_kernel::logging::FileAuditLog;
use taxo_kernel::telemetry::init_tracing;
use taxo_kernel::test_harness::{run_simulator, SimulatorConfig, TestHarness};
use taxo_kernel::version::{TaxonomyTree, TreeDocument};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Command::new("taxo-kernel")
        .version(taxo_kernel::VERSION)
        .about("Taxonomy versioning and rollback kernel")
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run the taxonomy simulator")
                .arg(
                    Arg::new("operations")
                        .long("ops")
                        .default_value("1000")
                        .value_parser(value_parser!(u64))
                        .help("Number of operations to simulate"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("stop-on-violation")
                        .long("stop-on-violation")
                        .action(ArgAction::SetTrue)
                        .help("Stop simulation on first violation"),
                ),
        )
        .subcommand(
            Command::new("certify")
                .about("Run the simulator across a range of seeds")
                .arg(
                    Arg::new("seeds")
                        .long("seeds")
                        .default_value("10")
                        .value_parser(value_parser!(u64))
                        .help("Number of seeds, starting at 0"),
                )
                .arg(
                    Arg::new("operations")
                        .long("ops")
                        .default_value("1000")
                        .value_parser(value_parser!(u64))
                        .help("Operations per seed"),
                ),
        )
        .subcommand(
            Command::new("validate")
                .about("Validate a taxonomy tree document (JSON)")
                .arg(
                    Arg::new("path")
                        .long("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to the tree document"),
                ),
        )
        .subcommand(
            Command::new("verify-audit")
                .about("Verify the hash chain of an audit log")
                .arg(
                    Arg::new("path")
                        .long("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to the audit JSONL file"),
                ),
        )
        .subcommand(
            Command::new("inspect")
                .about("Open the configured storage and list its versions")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to a TOML config (defaults to in-memory)"),
                ),
        );

    let matches = cli.get_matches();
    init_tracing(matches.get_flag("json-logs"))?;

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let operations = args.get_one::<u64>("operations").copied().unwrap_or(1000);
            let seed = args.get_one::<u64>("seed").copied().unwrap_or(42);

            println!("Running taxonomy simulator...");
            println!("Operations: {operations}");
            println!("Seed: {seed}");
            println!();

            let report = run_simulator(SimulatorConfig {
                seed,
                total_operations: operations,
                stop_on_first_violation: args.get_flag("stop-on-violation"),
                ..Default::default()
            })
            .await;
            println!("{}", report.generate_text());
            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Some(("certify", args)) => {
            let seeds = args.get_one::<u64>("seeds").copied().unwrap_or(10);
            let operations = args.get_one::<u64>("operations").copied().unwrap_or(1000);

            let report = TestHarness::run_certification(0..seeds, operations).await;
            println!("Certification Report:");
            println!("  Seeds: {}", report.seeds_tested);
            println!("  Violations: {}", report.total_violations);
            if !report.failed_seeds.is_empty() {
                println!("  Failed seeds: {:?}", report.failed_seeds);
            }
            println!("  Passed: {}", report.passed);
            std::process::exit(if report.passed { 0 } else { 1 });
        }
        Some(("validate", args)) => {
            let path = args
                .get_one::<PathBuf>("path")
                .context("--path is required")?;
            let raw = std::fs::read(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let doc: TreeDocument = serde_json::from_slice(&raw)
                .with_context(|| format!("parsing {}", path.display()))?;
            let tree = TaxonomyTree::from_document(doc)?;
            let result = tree.validate()?;

            println!("Version: {}", tree.version);
            println!("Nodes: {}  Edges: {}", tree.node_count(), tree.edge_count());
            println!("{}", serde_json::to_string_pretty(&result)?);
            std::process::exit(if result.is_valid { 0 } else { 1 });
        }
        Some(("verify-audit", args)) => {
            let path = args
                .get_one::<PathBuf>("path")
                .context("--path is required")?;
            match FileAuditLog::verify_file(path) {
                Ok(events) => {
                    println!("Audit log integrity: VALID");
                    println!("Events checked: {events}");
                }
                Err(e) => {
                    println!("Audit log integrity: INVALID ({e})");
                    std::process::exit(1);
                }
            }
        }
        Some(("inspect", args)) => {
            let config = match args.get_one::<PathBuf>("config") {
                Some(path) => EngineConfig::load(path)?,
                None => EngineConfig::default(),
            };
            let engine = TaxonomyEngine::from_config(config).await?;
            let active = engine.active_version();
            for meta in engine.list_versions() {
                let marker = if meta.version_id == active { "*" } else { " " };
                println!(
                    "{marker} {:<8} nodes={:<6} edges={:<6} author={} created={}",
                    meta.version_id.to_string(),
                    meta.node_count,
                    meta.edge_count,
                    meta.author,
                    meta.created_at.to_rfc3339(),
                );
            }
            println!("Rollback phase: {:?}", engine.rollback_phase());
        }
        _ => {
            println!("Taxonomy Kernel v{}", taxo_kernel::VERSION);
            println!();
            println!("Use --help for available commands");
        }
    }
    Ok(())
}
