use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use colored::*;
use tracing_subscriber::EnvFilter;

use liftgate::cli::Args;
use liftgate::config::EngineConfig;
use liftgate::lifecycle::candidates::TemplateCatalog;
use liftgate::lifecycle::manager::{PatternLifecycleManager, RecordingMutator};
use liftgate::lifecycle::pattern::Pattern;
use liftgate::metrics::{MetricsAggregator, SimulatedMetricsSource};
use liftgate::orchestrator::{CycleConfig, CycleReport, EvaluationCycle};
use liftgate::store::InMemoryStore;
use liftgate::Result;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let args = Args::parse();
    let engine = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    let cycle = build_demo_cycle(&args, engine)?;

    if args.watch {
        println!(
            "{}",
            format!("liftgate watching (every {}s)...", args.interval_secs).cyan()
        );
        cycle.run().await;
        return Ok(());
    }

    let mut date = Utc::now().date_naive();
    for n in 1..=args.cycles {
        let report = cycle.run_once(date)?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_summary(n, &report);
        }
        // Step the clock by whichever is longer, the cadence or the gate.
        let params = cycle.current_params();
        let step = params
            .iteration_frequency
            .days()
            .max(params.min_cycle_duration_days);
        date += ChronoDuration::days(step as i64);
    }

    Ok(())
}

/// Wire up a self-contained simulated engine: one experiment, one pattern
/// piloted on the first `--pilot` targets, everything in memory.
fn build_demo_cycle(args: &Args, engine: EngineConfig) -> Result<Arc<EvaluationCycle>> {
    let today = Utc::now().date_naive();

    let aggregator = Arc::new(MetricsAggregator::new());
    aggregator.register_experiment(
        "exp-hero-cta",
        &[
            ("control".into(), "Original page".into()),
            ("hero".into(), "Hero CTA".into()),
        ],
        "control",
        today,
        0,
    );

    let universe: Vec<String> = (1..=args.targets).map(|i| format!("page-{i}")).collect();
    let pilot: Vec<String> = universe.iter().take(args.pilot).cloned().collect();
    let manager = Arc::new(PatternLifecycleManager::new(universe));
    let mutator = Arc::new(RecordingMutator::new());

    manager.register(Pattern::exploratory("pat-hero-cta", "Hero CTA"))?;
    manager.start_pilot("pat-hero-cta", pilot, mutator.as_ref())?;

    let cycle = EvaluationCycle::new(
        CycleConfig {
            poll_interval: std::time::Duration::from_secs(args.interval_secs),
            engine,
            ..CycleConfig::default()
        },
        aggregator,
        manager,
        Arc::new(SimulatedMetricsSource::new(
            vec!["control".into(), "hero".into()],
            today,
        )),
        mutator,
        Arc::new(InMemoryStore::new()),
        Arc::new(TemplateCatalog::new()),
    )?;
    cycle.link_experiment("exp-hero-cta", "pat-hero-cta");
    Ok(Arc::new(cycle))
}

fn print_summary(n: u32, report: &CycleReport) {
    println!();
    println!(
        "{} {}",
        format!("── cycle {n} ──").bold().cyan(),
        report.date.to_string().dimmed()
    );
    if report.skipped {
        println!("  {}", "skipped (inside min cycle duration)".yellow());
        return;
    }

    match &report.winner {
        Some(w) => {
            println!(
                "  winner: {} ({}, {}% confidence){}",
                w.winner_id.green().bold(),
                format!("{:+.1}% lift", w.lift).green(),
                w.significance.confidence_percent,
                if w.ready_to_scale {
                    " — ready to scale".green()
                } else {
                    "".normal()
                }
            );
        }
        None => println!("  winner: {}", "none yet".yellow()),
    }

    for outcome in &report.scaled {
        let state = if outcome.reached_production {
            "production".green().bold()
        } else {
            "partial, will retry".yellow()
        };
        println!(
            "  scaled {}: {} applied, {} failed [{}]",
            outcome.pattern_id.bold(),
            outcome.result.applied.len(),
            outcome.result.failed.len(),
            state
        );
    }

    if let Some(rec) = &report.recommendation {
        println!(
            "  strategy: velocity {:.2}, cadence {}{}",
            rec.velocity,
            rec.cadence.to_string().bold(),
            if rec.stagnant {
                " — stagnant, exploring".red()
            } else {
                "".normal()
            }
        );
        for step in &rec.action_plan.immediate {
            println!("    {} {}", "→".cyan(), step);
        }
    }

    if !report.proposals_registered.is_empty() {
        println!(
            "  {} new exploratory candidates registered",
            report.proposals_registered.len().to_string().magenta()
        );
    }
}
