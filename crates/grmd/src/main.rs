//! grmd - reconciliation daemon for the grievance redress core.
//!
//! Runs the three reconciliation jobs (integrity repair, escalation,
//! notification) on fixed intervals against the SQLite document store.
//! Each run is a self-contained batch pass; the jobs are idempotent and
//! safe to run concurrently with live edits to the same documents.

mod config;
mod webhook;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use grm_core::notify::Notifier;
use grm_core::pii::IssueKeyCipher;
use grm_core::reconcile::{check_issues, escalate_issues, notify_issues, JobContext};
use grm_core::sqlite::{SqliteDocumentStore, SqlitePiiVault};

use config::GrmdConfig;
use webhook::{DisabledNotifier, WebhookNotifier};

#[derive(Parser, Debug)]
#[command(name = "grmd", version, about = "Grievance reconciliation daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "/etc/grmd/config.toml")]
    config: PathBuf,

    /// Run a single pass of every job and exit.
    #[arg(long)]
    once: bool,
}

/// Everything a job run needs, shared across the interval loops.
struct Runtime {
    store: SqliteDocumentStore,
    vault: SqlitePiiVault,
    cipher: IssueKeyCipher,
    notifier: Box<dyn Notifier + Send + Sync>,
    deadline: Duration,
    write_retries: usize,
}

impl Runtime {
    fn context(&self) -> JobContext<'_> {
        JobContext {
            regions: &self.store,
            registry: &self.store,
            catalog: &self.store,
            issues: &self.store,
            vault: &self.vault,
            cipher: &self.cipher,
            notifier: self.notifier.as_ref(),
            deadline: Some(Instant::now() + self.deadline),
            write_retries: self.write_retries,
        }
    }

    fn run_check(&self) {
        let report = check_issues(&self.context());
        info!(
            updated = report.updated_issues,
            auto_ids = report.auto_increment_id_updated.len(),
            codes = report.internal_code_updated.len(),
            assignees = report.assignee_updated.len(),
            anonymized = report.pii_anonymized.len(),
            partial = report.deadline_reached,
            "integrity repair pass finished"
        );
        for e in &report.errors {
            warn!("integrity repair: {e}");
        }
    }

    fn run_escalate(&self) {
        let report = escalate_issues(&self.context());
        info!(
            updated = report.updated_issues,
            exhausted = report.escalation_exhausted.len(),
            partial = report.deadline_reached,
            "escalation pass finished"
        );
        // Exhausted escalations need operator attention, not retries.
        for id in &report.escalation_exhausted {
            warn!(issue = %id, "escalation exhausted at root region");
        }
        for e in &report.errors {
            warn!("escalation: {e}");
        }
    }

    fn run_notify(&self) {
        let report = notify_issues(&self.context());
        info!(
            updated = report.updated_issues,
            accepted = report.accepted_sent.len(),
            rejected = report.rejected_sent.len(),
            closed = report.closed_sent.len(),
            partial = report.deadline_reached,
            "notification pass finished"
        );
        for e in &report.errors {
            warn!("notification: {e}");
        }
    }
}

async fn job_loop(
    name: &'static str,
    period: Duration,
    runtime: Arc<Runtime>,
    run: fn(&Runtime),
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let runtime = runtime.clone();
        // Jobs are synchronous (SQLite + blocking HTTP); keep them off
        // the async workers.
        if let Err(e) = tokio::task::spawn_blocking(move || run(&runtime)).await {
            error!("{name} job panicked: {e}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let cfg = GrmdConfig::load_or_default(&args.config)?;
    info!(
        database = %cfg.database_path.display(),
        vault = %cfg.pii_vault_path.display(),
        "grmd v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let store = SqliteDocumentStore::open(&cfg.database_path)
        .with_context(|| format!("opening document store {}", cfg.database_path.display()))?;
    let vault = SqlitePiiVault::open(&cfg.pii_vault_path)
        .with_context(|| format!("opening PII vault {}", cfg.pii_vault_path.display()))?;

    let notify_enabled = cfg.webhook.is_some();
    let notifier: Box<dyn Notifier + Send + Sync> = match &cfg.webhook {
        Some(webhook) => Box::new(WebhookNotifier::new(
            webhook.url.clone(),
            Duration::from_secs(webhook.timeout_secs),
        )?),
        None => {
            warn!("no webhook configured, notification job disabled");
            Box::new(DisabledNotifier)
        }
    };

    let runtime = Arc::new(Runtime {
        store,
        vault,
        cipher: IssueKeyCipher,
        notifier,
        deadline: Duration::from_secs(cfg.jobs.deadline_secs),
        write_retries: cfg.jobs.write_retries,
    });

    if args.once {
        let once = runtime.clone();
        tokio::task::spawn_blocking(move || {
            once.run_check();
            once.run_escalate();
            if notify_enabled {
                once.run_notify();
            }
        })
        .await
        .context("one-shot pass panicked")?;
        return Ok(());
    }

    tokio::spawn(job_loop(
        "check_issues",
        Duration::from_secs(cfg.jobs.check_interval_secs),
        runtime.clone(),
        Runtime::run_check,
    ));
    tokio::spawn(job_loop(
        "escalate_issues",
        Duration::from_secs(cfg.jobs.escalate_interval_secs),
        runtime.clone(),
        Runtime::run_escalate,
    ));
    if notify_enabled {
        tokio::spawn(job_loop(
            "notify_issues",
            Duration::from_secs(cfg.jobs.notify_interval_secs),
            runtime.clone(),
            Runtime::run_notify,
        ));
    }
    info!("grmd ready");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
