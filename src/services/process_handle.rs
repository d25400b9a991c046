use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;

use crate::config::StopPolicy;
use crate::error::{Result, SupervisorError};
use crate::models::ResourceReading;
use crate::services::artifact::ArtifactManager;
use crate::services::event_log::{EventLog, LifecycleEvent};
use crate::services::resource_probe::{ProbeAttachment, ResourceProbe};
use crate::services::signal::{self, Delivery};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

const DESCENDANT_POLL_STEP: Duration = Duration::from_millis(50);

/// 进程句柄状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    NotStarted,
    Starting,
    Running,
    /// 退出码；被信号终止时为 None
    Exited(Option<i32>),
    /// 进程丢失但未观察到退出码
    Unknown,
    Cleaned,
}

impl HandleState {
    pub fn is_running(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    /// 已结束但尚未清理
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Exited(_) | Self::Unknown)
    }

    pub fn label(self) -> String {
        match self {
            Self::NotStarted => "not_started".to_string(),
            Self::Starting => "starting".to_string(),
            Self::Running => "running".to_string(),
            Self::Exited(Some(code)) => format!("exited({})", code),
            Self::Exited(None) => "exited(signal)".to_string(),
            Self::Unknown => "unknown".to_string(),
            Self::Cleaned => "stopped".to_string(),
        }
    }
}

/// 启动选项
#[derive(Debug, Clone, Copy, Default)]
pub struct LaunchOptions {
    /// 保留字段：模板进程总是无窗口启动
    pub minimized: bool,
}

/// 绑定到一个操作系统进程实例的句柄，每次启动都会新建
pub struct ProcessHandle {
    entry: String,
    artifact: PathBuf,
    child: Option<Child>,
    pid: Option<u32>,
    state: HandleState,
    attachment: ProbeAttachment,
    events: EventLog,
}

impl ProcessHandle {
    pub fn new(entry: impl Into<String>, artifact: PathBuf, events: EventLog) -> Self {
        Self {
            entry: entry.into(),
            artifact,
            child: None,
            pid: None,
            state: HandleState::NotStarted,
            attachment: ProbeAttachment::Unattached,
            events,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    /// 清理前始终存在
    pub fn artifact_path(&self) -> Option<&Path> {
        match self.state {
            HandleState::Cleaned => None,
            _ => Some(&self.artifact),
        }
    }

    /// 启动产物，并在短暂延迟后检查是否立即退出
    pub async fn start(
        &mut self,
        options: LaunchOptions,
        settle_delay: Duration,
        probe: &ResourceProbe,
    ) -> Result<HandleState> {
        if self.state != HandleState::NotStarted {
            return Err(SupervisorError::AlreadyRunning(self.entry.clone()));
        }
        if !self.artifact.is_file() {
            return Err(SupervisorError::ArtifactMissing(self.artifact.clone()));
        }

        self.state = HandleState::Starting;
        log::debug!(
            "Launching '{}' from '{}' (minimized={}, windowless)",
            self.entry,
            self.artifact.display(),
            options.minimized
        );

        let mut command = Command::new(&self.artifact);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        #[cfg(windows)]
        command.creation_flags(CREATE_NO_WINDOW);

        let spawned = command.spawn().and_then(|child| match child.id() {
            Some(pid) => Ok((child, pid)),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "child exited before its PID could be read",
            )),
        });
        let (mut child, pid) = match spawned {
            Ok(spawned) => spawned,
            Err(e) => {
                self.state = HandleState::Exited(None);
                let err = match e.kind() {
                    std::io::ErrorKind::PermissionDenied => SupervisorError::PermissionDenied(format!(
                        "cannot execute '{}'",
                        self.artifact.display()
                    )),
                    _ => SupervisorError::LaunchFailed {
                        name: self.entry.clone(),
                        reason: e.to_string(),
                    },
                };
                self.events.record(LifecycleEvent::LaunchFailed {
                    entry: self.entry.clone(),
                    error: err.to_string(),
                });
                return Err(err);
            }
        };

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(self.entry.clone(), "stdout", stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(self.entry.clone(), "stderr", stderr));
        }

        self.pid = Some(pid);
        self.child = Some(child);
        self.state = HandleState::Running;
        self.events.record(LifecycleEvent::Launched {
            entry: self.entry.clone(),
            pid,
        });
        self.attachment = probe.attach(pid);

        tokio::time::sleep(settle_delay).await;
        match self.try_reap() {
            Ok(Some(code)) => {
                self.state = HandleState::Exited(code);
                self.attachment = ProbeAttachment::Unattached;
                self.events.record(LifecycleEvent::ExitedEarly {
                    entry: self.entry.clone(),
                    pid,
                    code,
                });
            }
            Ok(None) => {}
            Err(e) => log::warn!("Failed to check '{}' (PID: {}) after launch: {}", self.entry, pid, e),
        }

        Ok(self.state)
    }

    fn try_reap(&mut self) -> Result<Option<Option<i32>>> {
        match self.child.as_mut() {
            Some(child) => Ok(child.try_wait()?.map(|status| status.code())),
            None => Ok(None),
        }
    }

    /// 非阻塞地查询退出状态，状态变化时记录事件
    pub fn poll(&mut self) -> Result<HandleState> {
        if !self.state.is_running() {
            return Ok(self.state);
        }
        let pid = self.pid.unwrap_or_default();

        match self.try_reap() {
            Ok(Some(code)) => {
                self.state = HandleState::Exited(code);
                self.attachment = ProbeAttachment::Unattached;
                self.events.record(LifecycleEvent::Exited {
                    entry: self.entry.clone(),
                    pid,
                    code,
                });
            }
            Ok(None) => {
                if let ProbeAttachment::Lost { .. } = self.attachment {
                    if signal::process_exists(pid) {
                        // 探针引用失效但进程仍在，下次采样重新附加
                        self.attachment = ProbeAttachment::Unattached;
                    } else {
                        self.mark_vanished(pid);
                    }
                }
            }
            Err(e) => {
                self.mark_vanished(pid);
                return Err(e);
            }
        }
        Ok(self.state)
    }

    fn mark_vanished(&mut self, pid: u32) {
        self.state = HandleState::Unknown;
        self.attachment = ProbeAttachment::Unattached;
        self.events.record(LifecycleEvent::Vanished {
            entry: self.entry.clone(),
            pid,
        });
    }

    /// 仅更新状态，不记录事件
    fn observe(&mut self) -> HandleState {
        if self.state.is_running() {
            match self.try_reap() {
                Ok(Some(code)) => self.state = HandleState::Exited(code),
                Ok(None) => {}
                Err(e) => {
                    log::warn!("Failed to query '{}': {}", self.entry, e);
                    self.state = HandleState::Unknown;
                }
            }
        }
        self.state
    }

    pub fn sample(&mut self, probe: &ResourceProbe) -> ResourceReading {
        match (self.state, self.pid) {
            (HandleState::Running, Some(pid)) => probe.sample(&mut self.attachment, pid),
            _ => ResourceReading::Unavailable,
        }
    }

    /// 轮询器使用：查询存活状态并采样资源
    pub fn refresh(&mut self, probe: &ResourceProbe) -> Result<(HandleState, ResourceReading)> {
        let state = self.poll()?;
        let reading = self.sample(probe);
        if matches!(self.attachment, ProbeAttachment::Lost { .. }) {
            let state = self.poll()?;
            return Ok((state, ResourceReading::Unavailable));
        }
        Ok((state, reading))
    }

    /// 两级终止：先终止子进程，再协作式终止，超时后强制结束。
    /// 返回进程是否确实已停止。
    pub async fn stop(&mut self, policy: &StopPolicy, probe: &ResourceProbe) -> bool {
        let state = self.poll().unwrap_or(HandleState::Unknown);
        let pid = match (state.is_running(), self.pid) {
            (true, Some(pid)) => pid,
            _ => return true,
        };

        self.events.record(LifecycleEvent::StopRequested {
            entry: self.entry.clone(),
            pid,
        });

        self.terminate_descendants(pid, policy.child_grace, probe).await;

        match signal::request_termination(pid) {
            Ok(Delivery::Sent) => {
                if self.wait_for_exit(policy.grace_period).await {
                    return self.finish_stop(pid);
                }
                log::warn!(
                    "'{}' (PID: {}) did not exit within {:?}, killing",
                    self.entry,
                    pid,
                    policy.grace_period
                );
            }
            Ok(Delivery::Unsupported) => {
                log::debug!("No cooperative termination on this platform, killing PID {}", pid);
            }
            Err(e) if e.is_vanished() => {
                log::debug!("PID {} was already gone when asked to terminate", pid);
            }
            Err(e) => log::warn!("Failed to request termination of '{}' (PID: {}): {}", self.entry, pid, e),
        }

        if self.observe().is_running() {
            if let Some(child) = self.child.as_mut() {
                if let Err(e) = child.start_kill() {
                    log::debug!("Kill of PID {} failed: {}", pid, e);
                }
            }
            self.wait_for_exit(policy.force_period).await;
        }

        self.finish_stop(pid)
    }

    async fn terminate_descendants(&self, pid: u32, grace: Duration, probe: &ResourceProbe) {
        for child_pid in probe.descendants(pid) {
            log::info!("Terminating child process {} of '{}'", child_pid, self.entry);
            if !probe.signal(child_pid, false) {
                continue;
            }
            if !wait_until_gone(probe, child_pid, grace).await {
                log::warn!("Child process {} ignored termination, killing", child_pid);
                probe.signal(child_pid, true);
            }
        }
    }

    async fn wait_for_exit(&mut self, limit: Duration) -> bool {
        let waited = match self.child.as_mut() {
            Some(child) => tokio::time::timeout(limit, child.wait()).await,
            None => return true,
        };
        match waited {
            Ok(Ok(status)) => {
                self.state = HandleState::Exited(status.code());
                true
            }
            Ok(Err(e)) => {
                log::warn!("Failed to wait for '{}': {}", self.entry, e);
                false
            }
            Err(_) => false,
        }
    }

    fn finish_stop(&mut self, pid: u32) -> bool {
        let state = self.observe();
        let alive = state.is_running() || (state == HandleState::Unknown && signal::process_exists(pid));
        if alive {
            self.events.record(LifecycleEvent::StopFailed {
                entry: self.entry.clone(),
                pid,
            });
            false
        } else {
            self.attachment = ProbeAttachment::Unattached;
            self.events.record(LifecycleEvent::Stopped {
                entry: self.entry.clone(),
                pid,
            });
            true
        }
    }

    /// 释放句柄并删除产物；同一句柄只执行一次，重复调用返回 false
    pub fn cleanup(&mut self, artifacts: &ArtifactManager) -> bool {
        if self.state == HandleState::Cleaned {
            return false;
        }

        if let Some(mut child) = self.child.take() {
            if matches!(child.try_wait(), Ok(None)) {
                log::warn!(
                    "Releasing '{}' (PID: {}) while it is still alive, killing it",
                    self.entry,
                    self.pid.unwrap_or_default()
                );
                // tokio 会在后台回收被丢弃的子进程
                if let Err(e) = child.start_kill() {
                    log::debug!("Kill of PID {} failed: {}", self.pid.unwrap_or_default(), e);
                }
            }
        }

        self.attachment = ProbeAttachment::Unattached;
        self.state = HandleState::Cleaned;
        artifacts.remove(&self.artifact);
        true
    }
}

async fn wait_until_gone(probe: &ResourceProbe, pid: u32, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if !probe.is_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(DESCENDANT_POLL_STEP).await;
    }
}

/// 尽力把子进程输出转到调试日志，避免管道写满阻塞子进程
async fn forward_output<R>(entry: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => log::debug!(
                "[{} {}] {}",
                entry,
                stream,
                String::from_utf8_lossy(&line).trim_end()
            ),
            Err(e) => {
                log::debug!("Stopped reading {} of '{}': {}", stream, entry, e);
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::SupervisorConfig;
    use crate::test_support::{config_with_template, pid_alive};

    struct Fixture {
        _dir: tempfile::TempDir,
        config: SupervisorConfig,
        artifacts: ArtifactManager,
        probe: ResourceProbe,
        events: EventLog,
    }

    fn fixture(body: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_template(dir.path(), body);
        let events = EventLog::in_memory();
        Fixture {
            artifacts: ArtifactManager::new(&config, events.clone()),
            probe: ResourceProbe::new(config.capabilities),
            events,
            config,
            _dir: dir,
        }
    }

    impl Fixture {
        fn handle(&self, name: &str) -> ProcessHandle {
            let path = self.artifacts.stage(name).unwrap();
            ProcessHandle::new(name, path, self.events.clone())
        }

        async fn start(&self, handle: &mut ProcessHandle) -> HandleState {
            handle
                .start(LaunchOptions::default(), self.config.settle_delay, &self.probe)
                .await
                .unwrap()
        }

        fn count(&self, predicate: impl Fn(&LifecycleEvent) -> bool) -> usize {
            self.events.count(predicate)
        }
    }

    #[tokio::test]
    async fn start_then_stop_long_running_process() {
        let fx = fixture("exec sleep 30");
        let mut handle = fx.handle("Worker1");

        assert_eq!(fx.start(&mut handle).await, HandleState::Running);
        let pid = handle.pid().unwrap();
        assert!(pid_alive(pid));
        assert_eq!(handle.poll().unwrap(), HandleState::Running);

        assert!(handle.stop(&fx.config.stop, &fx.probe).await);
        assert!(!handle.state().is_running());
        assert!(!pid_alive(pid));
        assert_eq!(fx.count(|e| matches!(e, LifecycleEvent::Stopped { .. })), 1);
    }

    #[tokio::test]
    async fn immediate_exit_is_detected_within_settle_window() {
        let fx = fixture("exit 1");
        let mut handle = fx.handle("Worker1");

        assert_eq!(fx.start(&mut handle).await, HandleState::Exited(Some(1)));
        assert_eq!(
            fx.count(|e| matches!(e, LifecycleEvent::ExitedEarly { code: Some(1), .. })),
            1
        );
        assert!(handle.cleanup(&fx.artifacts));
        assert!(!fx.artifacts.artifact_path("Worker1").exists());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let fx = fixture("exec sleep 30");
        let mut never_started = fx.handle("Idle");
        assert!(never_started.stop(&fx.config.stop, &fx.probe).await);

        let mut handle = fx.handle("Worker1");
        fx.start(&mut handle).await;
        assert!(handle.stop(&fx.config.stop, &fx.probe).await);
        assert!(handle.stop(&fx.config.stop, &fx.probe).await);

        assert_eq!(fx.count(|e| matches!(e, LifecycleEvent::StopRequested { .. })), 1);
    }

    #[tokio::test]
    async fn escalates_when_termination_is_ignored() {
        let fx = fixture("trap '' TERM\nwhile true; do sleep 1; done");
        let mut handle = fx.handle("Stubborn");
        fx.start(&mut handle).await;
        let pid = handle.pid().unwrap();

        let policy = fx.config.stop;
        let started = Instant::now();
        assert!(handle.stop(&policy, &fx.probe).await);
        let budget = policy.grace_period + policy.force_period + policy.child_grace + Duration::from_secs(1);

        assert!(started.elapsed() < budget);
        assert!(!pid_alive(pid));
    }

    #[tokio::test]
    async fn stop_cascades_to_child_processes() {
        let fx = fixture("sleep 30 &\necho $! > \"$0.child\"\nwait");
        let mut handle = fx.handle("Parent");
        fx.start(&mut handle).await;

        let marker = PathBuf::from(format!("{}.child", handle.artifact_path().unwrap().display()));
        let deadline = Instant::now() + Duration::from_secs(2);
        let child_pid: u32 = loop {
            if let Ok(text) = std::fs::read_to_string(&marker) {
                if let Ok(pid) = text.trim().parse() {
                    break pid;
                }
            }
            assert!(Instant::now() < deadline, "child pid was never written");
            tokio::time::sleep(Duration::from_millis(20)).await;
        };
        assert!(pid_alive(child_pid));

        assert!(handle.stop(&fx.config.stop, &fx.probe).await);
        if fx.probe.capabilities().process_tree {
            assert!(!pid_alive(child_pid));
        }
    }

    #[tokio::test]
    async fn cleanup_runs_at_most_once() {
        let fx = fixture("exec sleep 30");
        let mut handle = fx.handle("Worker1");
        fx.start(&mut handle).await;
        handle.stop(&fx.config.stop, &fx.probe).await;

        assert!(handle.cleanup(&fx.artifacts));
        assert!(!handle.cleanup(&fx.artifacts));
        assert_eq!(handle.state(), HandleState::Cleaned);
        assert!(handle.artifact_path().is_none());
        assert_eq!(fx.count(|e| matches!(e, LifecycleEvent::ArtifactRemoved { .. })), 1);
    }

    #[tokio::test]
    async fn cleanup_kills_process_that_is_still_alive() {
        let fx = fixture("exec sleep 30");
        let mut handle = fx.handle("Worker1");
        fx.start(&mut handle).await;
        let pid = handle.pid().unwrap();

        assert!(handle.cleanup(&fx.artifacts));
        let deadline = Instant::now() + Duration::from_secs(2);
        while pid_alive(pid) {
            assert!(Instant::now() < deadline, "released process kept running");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!fx.artifacts.artifact_path("Worker1").exists());
    }

    #[tokio::test]
    async fn handle_cannot_be_started_twice() {
        let fx = fixture("exec sleep 30");
        let mut handle = fx.handle("Worker1");
        fx.start(&mut handle).await;

        let err = handle
            .start(LaunchOptions::default(), fx.config.settle_delay, &fx.probe)
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::AlreadyRunning(_)));
        handle.stop(&fx.config.stop, &fx.probe).await;
    }

    #[tokio::test]
    async fn missing_artifact_is_rejected() {
        let fx = fixture("exit 0");
        let path = fx.artifacts.artifact_path("Ghost");
        let mut handle = ProcessHandle::new("Ghost", path, fx.events.clone());

        let err = handle
            .start(LaunchOptions::default(), fx.config.settle_delay, &fx.probe)
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::ArtifactMissing(_)));
        assert_eq!(handle.state(), HandleState::NotStarted);
    }

    #[tokio::test]
    async fn resource_readings_follow_liveness() {
        let fx = fixture("exec sleep 30");
        let mut handle = fx.handle("Worker1");
        fx.start(&mut handle).await;

        let (state, _) = handle.refresh(&fx.probe).unwrap();
        assert_eq!(state, HandleState::Running);
        if fx.probe.is_enabled() {
            let (_, reading) = handle.refresh(&fx.probe).unwrap();
            assert!(reading.resident_bytes().is_some());
        }

        handle.stop(&fx.config.stop, &fx.probe).await;
        assert_eq!(handle.sample(&fx.probe), ResourceReading::Unavailable);
    }
}
