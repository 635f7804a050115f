//! Periodic sweeps run inside the worker
//!
//! - trigger cycle every `TRIGGER_INTERVAL_SECS`
//! - dispatch of due drafts every `DISPATCH_INTERVAL_SECS`
//! - promotion of due scheduled campaigns, requeue of campaigns stalled longer
//!   than `CAMPAIGN_STALE_SECS`, limiter and OTP housekeeping every
//!   `CAMPAIGN_INTERVAL_SECS`

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::App;
use crate::config::Config;
use crate::services::bulk_job_queue::BulkJobQueue;

/// Run `tick` every `period` until `token` is cancelled. A failed tick is
/// logged and the loop carries on.
pub async fn run_every<F, Fut>(name: &'static str, period: Duration, token: CancellationToken, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(task = name, period_secs = period.as_secs_f64(), "Scheduler task started");

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => {
                info!(task = name, "Scheduler task stopping");
                break;
            }

            _ = interval.tick() => {
                if let Err(e) = tick().await {
                    error!(task = name, error = %e, "Scheduled run failed");
                }
            }
        }
    }
}

async fn trigger_tick(app: &App) -> Result<()> {
    app.engine.run_cycle().await?;
    Ok(())
}

async fn dispatch_tick(app: &App, limit: i64) -> Result<()> {
    app.dispatcher.sweep_pending(limit).await?;
    Ok(())
}

/// Call `submit` for every id; a failure is logged and the rest still run.
/// Returns how many were submitted.
async fn submit_each<F, Fut>(ids: &[Uuid], submit: F) -> usize
where
    F: Fn(Uuid) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut submitted = 0;
    for &id in ids {
        match submit(id).await {
            Ok(()) => submitted += 1,
            Err(e) => warn!(bulk_sms = %id, error = %e, "Failed to queue campaign send, retrying next tick"),
        }
    }
    submitted
}

async fn campaign_tick(app: &App, queue: &BulkJobQueue, stale_after: chrono::Duration) -> Result<()> {
    let now = Utc::now();
    let mut ids = Vec::new();
    match app.bulk.promote_scheduled(now).await {
        Ok(promoted) => ids.extend(promoted),
        Err(e) => error!(error = %e, "Failed to promote scheduled campaigns"),
    }
    match app.bulk.recover_stalled(now, stale_after).await {
        Ok(stalled) => ids.extend(stalled),
        Err(e) => error!(error = %e, "Failed to recover stalled campaigns"),
    }

    if !ids.is_empty() {
        let submitted = submit_each(&ids, |id| async move {
            let owner = app.bulk.get(id).await.ok().and_then(|campaign| campaign.owner);
            queue.submit(id, owner).await.map(|_| ())
        })
        .await;
        debug!(submitted, total = ids.len(), "Campaign sends queued");
    }

    app.channel.limiter().cleanup();
    app.otp.purge_expired(now);
    debug!("Housekeeping finished");
    Ok(())
}

/// Spawn every periodic task
pub fn spawn_all(
    app: Arc<App>,
    queue: Arc<BulkJobQueue>,
    config: &Config,
    token: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let limit = config.dispatch_batch_limit;
    let stale_after = chrono::Duration::seconds(config.campaign_stale_after.as_secs() as i64);

    let app_trigger = app.clone();
    let trigger = tokio::spawn(run_every(
        "trigger_cycle",
        config.trigger_interval,
        token.clone(),
        move || {
            let app = app_trigger.clone();
            async move { trigger_tick(&app).await }
        },
    ));

    let app_dispatch = app.clone();
    let dispatch = tokio::spawn(run_every(
        "dispatch",
        config.dispatch_interval,
        token.clone(),
        move || {
            let app = app_dispatch.clone();
            async move { dispatch_tick(&app, limit).await }
        },
    ));

    let campaigns = tokio::spawn(run_every(
        "campaigns",
        config.campaign_interval,
        token,
        move || {
            let (app, queue) = (app.clone(), queue.clone());
            async move { campaign_tick(&app, &queue, stale_after).await }
        },
    ));

    vec![trigger, dispatch, campaigns]
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn run_every_ticks_until_cancelled() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();

        let counter = ticks.clone();
        let task = tokio::spawn(run_every("test", Duration::from_millis(10), token.clone(), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        }));

        tokio::time::sleep(Duration::from_millis(60)).await;
        token.cancel();
        task.await.unwrap();

        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several ticks, saw {}", seen);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn failing_tick_does_not_stop_loop() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();

        let counter = ticks.clone();
        let task = tokio::spawn(run_every("failing", Duration::from_millis(10), token.clone(), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow::anyhow!("store unavailable"))
            }
        }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        task.await.unwrap();
        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn one_failed_submit_does_not_skip_the_rest() {
        let ids = vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let broken = ids[0];
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let submitted = submit_each(&ids, |id| {
            let seen = seen.clone();
            async move {
                seen.lock().push(id);
                if id == broken {
                    anyhow::bail!("publish ack timed out");
                }
                anyhow::Ok(())
            }
        })
        .await;

        assert_eq!(submitted, 2);
        assert_eq!(*seen.lock(), ids);
    }

    #[tokio::test]
    async fn cancelled_before_start_never_ticks() {
        let token = CancellationToken::new();
        token.cancel();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        run_every("idle", Duration::from_millis(5), token, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        })
        .await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }
}
