//! Background maintenance tasks

use std::time::Duration;

use docket_monitor::spawn_sampler;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::pool::ConnectionPool;

/// Running maintenance tasks
///
/// Dropping the handle does not stop the tasks; call [`stop`](Self::stop) or
/// [`shutdown`](Self::shutdown), or close the pool.
pub struct MaintenanceHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Signal every task to stop
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && self.tasks.iter().any(|task| !task.is_finished())
    }

    /// Stop every task and wait for them to finish
    pub async fn shutdown(self) {
        self.token.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "maintenance task ended abnormally");
            }
        }
    }
}

impl ConnectionPool {
    /// Start the background tasks
    ///
    /// - validation pass every `leak_scan_interval`, preceded by a leak scan
    ///   when monitoring is enabled
    /// - aggressive cleanup every `cleanup_interval`
    /// - with a memory monitor: a cleanup as soon as pressure starts, plus
    ///   sampling when monitoring is enabled
    ///
    /// Must be called from within a tokio runtime. The tasks stop when the
    /// pool is closed.
    pub fn spawn_maintenance(&self) -> MaintenanceHandle {
        let token = self.shutdown_token().child_token();
        let config = self.config();
        let monitoring = config.monitoring_enabled();
        let mut tasks = Vec::new();

        tasks.push(self.spawn_periodic(
            if monitoring { "leak scan" } else { "validation" },
            config.leak_scan_interval(),
            token.clone(),
            move |pool| async move {
                if monitoring {
                    pool.run_leak_scan();
                }
                pool.run_validation_pass().await;
            },
        ));

        tasks.push(self.spawn_periodic(
            "cleanup",
            config.cleanup_interval(),
            token.clone(),
            |pool| async move {
                pool.run_cleanup().await;
            },
        ));

        if let Some(monitor) = self.memory_monitor() {
            if monitoring {
                tasks.push(spawn_sampler(monitor.clone(), token.clone()));
            }

            let pool = self.clone();
            let mut pressure = monitor.subscribe();
            let task_token = token.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = task_token.cancelled() => break,
                        changed = pressure.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let under_pressure = *pressure.borrow_and_update();
                            if under_pressure {
                                tracing::debug!("memory pressure started, running cleanup");
                                pool.run_cleanup().await;
                            }
                        }
                    }
                }
            }));
        }

        tracing::debug!(tasks = tasks.len(), monitoring, "pool maintenance started");
        MaintenanceHandle { token, tasks }
    }

    fn spawn_periodic<F, Fut>(
        &self,
        name: &'static str,
        period: Duration,
        token: CancellationToken,
        run: F,
    ) -> JoinHandle<()>
    where
        F: Fn(ConnectionPool) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let pool = self.clone();
        let period = period.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!(task = name, "maintenance task stopped");
                        break;
                    }
                    _ = ticker.tick() => run(pool.clone()).await,
                }
            }
        })
    }
}
