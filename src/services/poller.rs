use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::services::registry::{Supervisor, TickReport};

/// 连续出错达到该次数后改用退避间隔
const BACKOFF_AFTER_ERRORS: u32 = 3;

/// 后台轮询任务：周期性刷新所有条目的状态与资源读数
pub struct Poller {
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

impl Poller {
    pub fn spawn(supervisor: Arc<Supervisor>, interval: Duration, backoff: Duration) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let wake = Arc::new(Notify::new());

        let task = tokio::spawn(run_poll_loop(
            supervisor,
            interval,
            backoff,
            Arc::clone(&running),
            Arc::clone(&wake),
        ));
        log::info!("Poller started with {:?} interval", interval);

        Self { running, wake, task }
    }

    /// 请求停止并在 `timeout` 内等待任务结束，超时则中止任务。返回是否正常结束。
    pub async fn shutdown(self, timeout: Duration) -> bool {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();

        let mut task = self.task;
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => {
                log::info!("Poller stopped");
                true
            }
            Ok(Err(e)) => {
                log::warn!("Poller task ended abnormally: {}", e);
                false
            }
            Err(_) => {
                log::warn!("Poller did not stop within {:?}, aborting", timeout);
                task.abort();
                false
            }
        }
    }
}

async fn run_poll_loop(
    supervisor: Arc<Supervisor>,
    interval: Duration,
    backoff: Duration,
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
) {
    let mut failing_ticks = 0u32;

    while running.load(Ordering::SeqCst) {
        let report = supervisor.poll_once().await;
        log::trace!("Poll tick: {} polled, {} busy", report.polled, report.busy);
        if report.reconciled > 0 {
            log::debug!("Poll tick reconciled {} exited entries", report.reconciled);
        }

        failing_ticks = next_failing_ticks(failing_ticks, &report);

        if failing_ticks == BACKOFF_AFTER_ERRORS {
            log::warn!(
                "Polling failed {} times in a row, backing off to {:?}",
                failing_ticks,
                backoff
            );
        }
        let delay = next_delay(failing_ticks, interval, backoff);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = wake.notified() => {}
        }
    }
}

fn next_failing_ticks(failing_ticks: u32, report: &TickReport) -> u32 {
    if report.errors > 0 {
        failing_ticks.saturating_add(1)
    } else {
        0
    }
}

/// 连续出错的轮次达到阈值后使用退避间隔，任何一次无错轮次都会恢复正常间隔
fn next_delay(failing_ticks: u32, interval: Duration, backoff: Duration) -> Duration {
    if failing_ticks >= BACKOFF_AFTER_ERRORS {
        backoff
    } else {
        interval
    }
}


#[cfg(all(test, unix))]
mod process_tests {
    use super::*;
    use crate::services::event_log::EventLog;
    use crate::test_support::config_with_template;

    #[tokio::test]
    async fn poller_reconciles_exited_process() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_template(dir.path(), "sleep 0.4");
        let (interval, backoff) = (config.poll_interval, config.poll_backoff);
        let supervisor = Arc::new(Supervisor::new(Arc::new(config), EventLog::in_memory()));
        supervisor.add("Worker1", false).await.unwrap();
        supervisor.start("Worker1").await.unwrap();

        let poller = Poller::spawn(Arc::clone(&supervisor), interval, backoff);
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert!(!supervisor.snapshot().await[0].running);
        assert!(!supervisor.artifacts().artifact_path("Worker1").exists());
        assert!(poller.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn shutdown_returns_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_template(dir.path(), "exit 0");
        let supervisor = Arc::new(Supervisor::new(Arc::new(config), EventLog::in_memory()));

        let poller = Poller::spawn(supervisor, Duration::from_secs(60), Duration::from_secs(60));
        let started = std::time::Instant::now();
        assert!(poller.shutdown(Duration::from_secs(1)).await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
