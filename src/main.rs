// Page watcher daemon
//
// Loads a JSON config (first argument, or PAGEWATCH_CONFIG, or ./pagewatch.json),
// then ticks every configured target until Ctrl-C.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use kodegen_tools_pagewatch::clock::{SharedClock, SystemClock};
use kodegen_tools_pagewatch::config::CONFIG_PATH_ENV;
use kodegen_tools_pagewatch::{
    ChromiumSessionFactory, Components, LogNotifier, MonitorConfig, Notifier, Orchestrator, RateLimiter,
    ScheduleEvaluator, ScriptFetcher, SessionPool, SqliteStore, WebhookNotifier,
};

const DEFAULT_CONFIG_FILE: &str = "pagewatch.json";

fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = config_path();
    let mut config = MonitorConfig::load(&path)?;
    config.apply_env_overrides();
    config.validate().context("Invalid configuration after environment overrides")?;
    tracing::info!(config = %path.display(), targets = config.targets.len(), "Configuration loaded");

    let clock: SharedClock = Arc::new(SystemClock);

    let store_path = config.store_path();
    let store = Arc::new(
        SqliteStore::open(&store_path)
            .await
            .with_context(|| format!("Failed to open item store {}", store_path.display()))?,
    );

    let factory = Arc::new(ChromiumSessionFactory::new(config.browser.clone()));
    let mut targets = Vec::with_capacity(config.targets.len());
    for mut target in config.targets.clone() {
        factory
            .bind_target(&mut target)
            .await
            .with_context(|| format!("Failed to bind session for target {}", target.id))?;
        targets.push(target);
    }

    let pool = SessionPool::new(factory, config.pool.clone(), Arc::clone(&clock));

    let limiter = Arc::new(RateLimiter::new(Arc::clone(&clock)));
    for (name, limit) in &config.limits {
        limiter.register(name, *limit);
    }

    let notifier: Arc<dyn Notifier> = match &config.notifier.url {
        Some(url) => {
            let url = url::Url::parse(url).context("Invalid webhook URL")?;
            Arc::new(WebhookNotifier::new(
                url,
                std::time::Duration::from_secs(config.notifier.timeout_secs),
            )?)
        }
        None => {
            tracing::warn!("No webhook configured, new items are only logged");
            Arc::new(LogNotifier)
        }
    };

    let orchestrator = Orchestrator::new(
        Components {
            pool,
            limiter,
            store: Arc::clone(&store) as _,
            fetcher: Arc::new(ScriptFetcher::new(config.browser.clone())),
            notifier,
            evaluator: ScheduleEvaluator::new(config.schedule.clone()),
            clock,
        },
        config.runner.clone(),
    );

    for target in targets {
        orchestrator.add_target(target);
    }
    let broken = orchestrator.load_broken_targets().await?;
    if broken > 0 {
        tracing::warn!(broken, "Some targets stay suspended until reset");
    }

    let report = orchestrator
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    tracing::info!(closed = report.closed, forced = report.forced, "Session pool drained");
    store.close().await;
    Ok(())
}
