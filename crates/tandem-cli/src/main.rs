use std::env;
use std::error::Error;
use std::sync::Arc;

use tokio::time::{Duration, sleep};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tandem_core::app::{ChainScheduler, JobRegistry, SchedulerConfig, StateStream};
use tandem_core::domain::{JobSpec, JobState};
use tandem_core::impls::stage::INPUT_DATA_ID;
use tandem_core::impls::{ConstraintFlags, FirstWorker, SecondWorker, ThirdWorker};
use tandem_core::ports::ConstraintEvaluator;

const DATA_ID: &str = "001";
const STAGE3_TAG: &str = "stage3";
const ENV_NETWORK_DELAY_MS: &str = "TANDEM_NETWORK_DELAY_MS";

/// 終端状態まで読み、Succeeded なら message を表示する
async fn announce(mut stream: StateStream, message: &'static str) {
    while let Some(event) = stream.recv().await {
        tracing::debug!(job_id = %event.job_id, state = ?event.state, "observed");
        if event.state == JobState::Succeeded {
            println!("{message}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem_core=debug,tandem_cli=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // (A) 接続状態フラグ（最初はオフライン）と Job の登録
    let flags = Arc::new(ConstraintFlags::with_network(false));
    let registry = JobRegistry::new()
        .with(FirstWorker::KIND, Arc::new(FirstWorker))?
        .with(SecondWorker::KIND, Arc::new(SecondWorker))?
        .with(ThirdWorker::KIND, Arc::new(ThirdWorker))?;

    let config = SchedulerConfig::from_env();
    tracing::info!(?config, "scheduler config loaded");
    let scheduler = ChainScheduler::builder()
        .registry(registry)
        .evaluator(Arc::clone(&flags) as Arc<dyn ConstraintEvaluator>)
        .config(config)
        .expect_kinds(&[FirstWorker::KIND, SecondWorker::KIND, ThirdWorker::KIND])
        .build()?;

    // (B) chain 投入: first -> second -> third
    let handle = scheduler.submit(vec![
        JobSpec::builder(FirstWorker::KIND)
            .id("first")
            .input(INPUT_DATA_ID, DATA_ID)
            .requires_network()
            .build(),
        JobSpec::builder(SecondWorker::KIND)
            .id("second")
            .input(INPUT_DATA_ID, DATA_ID)
            .requires_network()
            .build(),
        JobSpec::builder(ThirdWorker::KIND)
            .id("third")
            .input(INPUT_DATA_ID, DATA_ID)
            .tag(STAGE3_TAG)
            .build(),
    ])?;
    tracing::info!(chain_id = %handle.chain_id(), "chain submitted");

    // (C) 購読: first / second は id、third は tag で
    let observers = [
        tokio::spawn(announce(scheduler.observe("first"), "First process is done")),
        tokio::spawn(announce(scheduler.observe("second"), "Second process is done")),
        tokio::spawn(announce(
            scheduler.observe_tag(STAGE3_TAG),
            "Third worker process is done",
        )),
    ];

    // (D) しばらくしてからオンラインにする
    let delay_ms = env::var(ENV_NETWORK_DELAY_MS)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1_500);
    sleep(Duration::from_millis(delay_ms)).await;
    tracing::info!("network connected");
    flags.set_network(true);

    let state = handle.wait().await;
    for observer in observers {
        observer.await?;
    }
    println!("chain {} finished: {state:?}", handle.chain_id());

    for job_id in handle.job_ids() {
        if let Some(snapshot) = scheduler.job_snapshot(job_id) {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }
    println!("counts: {}", serde_json::to_string(&scheduler.counts())?);
    Ok(())
}
