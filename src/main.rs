mod cli;
mod config;
mod domain;
mod engine;
mod notify;
mod report;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use config::Config;
use engine::alert::raise_alert;
use engine::attacker::Attacker;
use engine::orchestrator::{RunPhase, RunSettings, TrialOrchestrator};
use engine::sampler::HttpSampler;
use engine::selector::MethodSelector;
use notify::SlackNotifier;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "trialbench=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(errors) => {
            for error in &errors {
                println!("{error}");
            }
            std::process::exit(1);
        }
    };

    if cli.check {
        println!("configuration is valid");
        return Ok(());
    }

    let sampler = HttpSampler::new(&config.target_url, &config.headers, config.timeout)
        .context("failed to build HTTP client")?;
    let selector = MethodSelector::new(&config.method_ratio);
    let methods: Vec<String> = selector.methods().map(|m| m.to_string()).collect();
    tracing::info!(
        target_url = %config.target_url,
        threads = config.thread_num,
        trials = config.trial_num,
        methods = %methods.join(","),
        "starting benchmark"
    );

    let attacker = Attacker::new(
        Arc::new(sampler),
        selector,
        config.request_body.clone(),
        config.random_seed,
    );
    let settings = RunSettings {
        requests_per_worker: cli.requests_per_worker,
        warmup_requests: cli.warmup_requests,
        ..RunSettings::new(config.thread_num, config.trial_num)
    };

    let mut orchestrator = TrialOrchestrator::new(attacker, settings);
    let calculator = orchestrator.run().await.context("benchmark run failed")?;

    orchestrator.enter(RunPhase::Reporting);
    let result = calculator.metrics_result();
    print!("{}", report::render_summary(&result));

    let report_dir = cli.report_dir.unwrap_or_else(|| config.report_dir.clone());
    let path = report::write_report(&result, &report_dir, config.permanent)?;
    tracing::info!(path = %path.display(), "report written");

    if let Some(alert) = &config.alert {
        orchestrator.enter(RunPhase::Alerting);
        let notifier = SlackNotifier::new(alert.slack.clone())?;
        raise_alert(&calculator, &alert.thresholds, &notifier)
            .await
            .context("failed to deliver alert")?;
    }

    Ok(())
}
