//! Pagecraft background worker
//!
//! Runs the add-on expiration engine on cron schedules:
//! - mark lapsed subscriptions and add-ons expired
//! - send 7/3/1 day expiry warnings
//! - downgrade resources for expired add-ons
//!
//! Usage:
//!   pagecraft-worker                                run the scheduler
//!   pagecraft-worker run <mark|warn|process|all>    run phases once and print the summary

mod cache;
mod config;

use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use pagecraft_billing::{
    CacheInvalidator, EmailConfig, ExpirationService, FlyClient, MarkSummary,
    NoopCacheInvalidator, ProcessingSummary, WarningSummary,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::cache::RedisCacheInvalidator;
use crate::config::WorkerConfig;

/// Phases selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Mark,
    Warn,
    Process,
    All,
}

impl std::str::FromStr for Phase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mark" => Ok(Self::Mark),
            "warn" => Ok(Self::Warn),
            "process" => Ok(Self::Process),
            "all" => Ok(Self::All),
            other => anyhow::bail!("unknown phase {:?}, expected mark, warn, process or all", other),
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct RunReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    mark: Option<MarkSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    process: Option<ProcessingSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warn: Option<WarningSummary>,
}

impl RunReport {
    fn success(&self) -> bool {
        self.mark.as_ref().is_none_or(|s| s.success)
            && self.process.as_ref().is_none_or(|s| s.success)
            && self.warn.as_ref().is_none_or(|s| s.success)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let _ = dotenvy::dotenv();

    let config = WorkerConfig::from_env()?;
    init_tracing(config.json_logs);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let phase = match args.as_slice() {
        [] => None,
        [cmd, phase] if cmd == "run" => Some(phase.parse::<Phase>()?),
        _ => anyhow::bail!("usage: pagecraft-worker [run <mark|warn|process|all>]"),
    };

    let service = Arc::new(build_service(&config).await?);

    match phase {
        Some(phase) => {
            let report = run_once(&service, phase).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        None => {
            run_scheduler(service, &config).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pagecraft_worker=info,pagecraft_billing=info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn build_service(config: &WorkerConfig) -> anyhow::Result<ExpirationService> {
    let pool = pagecraft_shared::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("failed to connect to database")?;

    if config.run_migrations {
        pagecraft_shared::run_migrations(&pool)
            .await
            .context("failed to run migrations")?;
        tracing::info!("Database migrations applied");
    }

    let cache: Arc<dyn CacheInvalidator> = match &config.redis_url {
        Some(url) => match RedisCacheInvalidator::connect(url).await {
            Ok(redis) => Arc::new(redis),
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable - cache invalidation disabled");
                Arc::new(NoopCacheInvalidator)
            }
        },
        None => Arc::new(NoopCacheInvalidator),
    };

    let fly = FlyClient::from_config(config.fly_api_token.clone(), config.fly_app_name.clone());
    let email = EmailConfig::from_env();
    if !email.is_enabled() {
        tracing::warn!("RESEND_API_KEY not set - add-on emails will not be delivered");
    }

    Ok(ExpirationService::postgres(pool, email, fly, cache))
}

/// Run the selected phases once. `all` marks before processing so newly
/// lapsed add-ons are reconciled in the same run.
async fn run_once(service: &ExpirationService, phase: Phase) -> RunReport {
    let mut report = RunReport::default();
    if matches!(phase, Phase::Mark | Phase::All) {
        report.mark = Some(service.mark_expired_items().await);
    }
    if matches!(phase, Phase::Process | Phase::All) {
        report.process = Some(service.process_expired_addons().await);
    }
    if matches!(phase, Phase::Warn | Phase::All) {
        report.warn = Some(service.send_warning_emails().await);
    }
    report
}

/// Run `task` unless the previous tick of the same job still holds `busy`.
/// Returns whether the task ran.
async fn run_exclusive<F>(busy: &Mutex<()>, job: &'static str, task: F) -> bool
where
    F: Future<Output = ()>,
{
    let Ok(_running) = busy.try_lock() else {
        tracing::warn!(job, "Previous run still in progress - skipping this tick");
        return false;
    };
    task.await;
    true
}

/// Cron job whose ticks never overlap
fn exclusive_job<F, Fut>(schedule: &str, job: &'static str, run: F) -> anyhow::Result<Job>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let busy = Arc::new(Mutex::new(()));
    let scheduled = Job::new_async(schedule, move |_id, _sched| {
        let busy = busy.clone();
        let task = run();
        Box::pin(async move {
            run_exclusive(&busy, job, task).await;
        })
    })
    .with_context(|| format!("invalid schedule for {} job", job))?;
    Ok(scheduled)
}

async fn run_scheduler(service: Arc<ExpirationService>, config: &WorkerConfig) -> anyhow::Result<()> {
    let mut scheduler = JobScheduler::new().await?;

    let svc = service.clone();
    scheduler
        .add(exclusive_job(&config.mark_expired_cron, "mark", move || {
            let svc = svc.clone();
            async move {
                let summary = svc.mark_expired_items().await;
                if !summary.success {
                    tracing::error!(
                        errors = summary.subscriptions.errors.len() + summary.addons.errors.len(),
                        "Expiration marking finished with errors"
                    );
                }
            }
        })?)
        .await?;

    let svc = service.clone();
    scheduler
        .add(exclusive_job(&config.warning_emails_cron, "warn", move || {
            let svc = svc.clone();
            async move {
                let summary = svc.send_warning_emails().await;
                if !summary.success {
                    tracing::error!(failed = summary.failed, "Expiry warnings finished with errors");
                }
            }
        })?)
        .await?;

    let svc = service;
    scheduler
        .add(exclusive_job(&config.process_expired_cron, "process", move || {
            let svc = svc.clone();
            async move {
                let summary = svc.process_expired_addons().await;
                if !summary.success {
                    tracing::error!(failed = summary.failed, "Expired add-on processing finished with errors");
                }
            }
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!(
        mark = %config.mark_expired_cron,
        warn = %config.warning_emails_cron,
        process = %config.process_expired_cron,
        "Worker scheduler started"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down worker");
    scheduler.shutdown().await?;
    Ok(())
}
