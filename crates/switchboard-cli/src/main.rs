use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use switchboard_core::app::JobGroup;
use switchboard_core::domain::{AgentId, CallOutcome, EligibilityFacts, LeadId, QueueType};
use switchboard_core::impls::{InMemoryConversionLedger, InMemoryStore, StaticEligibilitySource};
use switchboard_core::ports::{Clock, FixedClock, IdGenerator, SystemClock, UlidGenerator};
use switchboard_core::{Router, RouterBuilder, RouterConfig};

#[derive(Debug, Parser)]
#[command(name = "switchboard", about = "Outbound lead router")]
struct Cli {
    /// JSON configuration file. Defaults apply to every omitted field.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Number of synthetic leads to seed.
    #[arg(long, global = true, default_value_t = 24)]
    leads: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Walks through one simulated shift on a manual clock and prints the reports.
    Demo {
        /// Agents taking calls.
        #[arg(long, default_value_t = 3)]
        agents: usize,
    },
    /// Runs the periodic jobs against the seeded in-memory adapters until Ctrl-C.
    Run,
}

/// Synthetic facts: a third unsigned, a third with open requirements, the rest done.
fn seed(source: &StaticEligibilitySource, n: usize) {
    for i in 0..n {
        let facts = match i % 3 {
            0 => EligibilityFacts::new(false, 0),
            1 => EligibilityFacts::new(true, (i % 4 + 1) as u32),
            _ => EligibilityFacts::new(true, 0),
        };
        source.set(LeadId::new(format!("lead-{i:03}")), facts);
    }
}

fn build_router(
    config: RouterConfig,
    source: Arc<StaticEligibilitySource>,
    ledger: Arc<InMemoryConversionLedger>,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<Router> {
    let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(clock.clone()));
    let store = Arc::new(InMemoryStore::new(ids.clone()));
    let router = RouterBuilder::new()
        .config(config)
        .store(store)
        .eligibility(source)
        .ledger(ledger)
        .clock(clock)
        .id_generator(ids)
        .build()?;
    Ok(router)
}

fn print_json(label: &str, value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("── {label}\n{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn demo(config: RouterConfig, leads: usize, agents: usize) -> anyhow::Result<()> {
    // (A) 外部システムの代わり（eligibility と成約台帳）を用意
    let source = Arc::new(StaticEligibilitySource::new());
    let ledger = Arc::new(InMemoryConversionLedger::new());
    seed(&source, leads);

    let clock = FixedClock::new(Utc::now());
    let router = build_router(config, source.clone(), ledger.clone(), Arc::new(clock.clone()))?;

    // (B) スコアリング → ワークリスト生成
    let cycle = router.run_scoring_cycle().await?;
    tracing::info!(succeeded = cycle.totals.succeeded, "initial scoring done");
    let refreshed = router.refresh_all().await?;
    print_json("refresh", &refreshed)?;

    // (C) 途中で 1 件の事実が変わる（事前チェックで弾かれるはず）
    source.set("lead-000", EligibilityFacts::new(true, 0));

    // (D) エージェントが順番にリードを取って電話する
    let agent_ids: Vec<AgentId> = (0..agents.max(1)).map(|i| AgentId::new(format!("agent-{i}"))).collect();
    for (round, agent) in agent_ids.iter().cycle().take(agents.max(1) * 2).enumerate() {
        let Some(assignment) = router.request_next_lead(QueueType::Unsigned, agent).await? else {
            println!("{agent}: nothing to call");
            continue;
        };
        let outcome = if round % 2 == 0 {
            CallOutcome::NoAnswer
        } else {
            CallOutcome::Connected
        };
        let ack = router.complete_call(assignment.entry_id, outcome).await?;
        print_json(&format!("{agent} call"), &ack)?;
    }

    // (E) callback を予約して、受けるものと snooze するものを作る
    let first = agent_ids.first().cloned().context("at least one agent")?;
    let accepted = router
        .schedule_callback(LeadId::new("lead-001"), None, clock.now(), "customer asked for a call back")
        .await?;
    let entry = router.accept_callback(accepted.callback_id, first.clone()).await?;
    print_json("callback accepted", &entry)?;
    let later = router
        .schedule_callback(
            LeadId::new("lead-004"),
            Some(first),
            clock.now() + Duration::minutes(20),
            "call after lunch",
        )
        .await?;
    let snoozed = router.snooze_callback(later.callback_id, 2).await?;
    print_json("callback snoozed", &snoozed)?;

    // (F) 1 件は成約、もう 1 件は説明のつかない離脱にする
    source.set("lead-010", EligibilityFacts::new(true, 0));
    source.set("lead-007", EligibilityFacts::new(true, 0));
    ledger.record("lead-007", clock.now());
    router.run_scoring_cycle().await?;

    clock.advance(Duration::minutes(10));
    router.promote_due_callbacks().await?;
    let leaks = router.run_leak_scan().await?;
    print_json("leak scan", &leaks)?;
    print_json("potential leaks", &router.list_potential_leaks(24, 20).await?)?;

    // (G) 最後に状態を出す
    print_json("health", &router.get_queue_health().await?)?;
    print_json("recent transitions", &router.list_recent_transitions(1, 10).await?)?;
    Ok(())
}

async fn run(config: RouterConfig, leads: usize) -> anyhow::Result<()> {
    let source = Arc::new(StaticEligibilitySource::new());
    seed(&source, leads);
    let schedule = config.schedule.clone();
    let router = build_router(
        config,
        source,
        Arc::new(InMemoryConversionLedger::new()),
        Arc::new(SystemClock),
    )?;

    let jobs = JobGroup::spawn(Arc::new(router), &schedule);
    tracing::info!(jobs = jobs.len(), "periodic jobs started, Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    tracing::info!("shutting down");
    jobs.shutdown_and_join().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => RouterConfig::from_path(path).with_context(|| format!("loading {}", path.display()))?,
        None => RouterConfig::default(),
    };

    match cli.command {
        Command::Demo { agents } => demo(config, cli.leads, agents).await,
        Command::Run => run(config, cli.leads).await,
    }
}
