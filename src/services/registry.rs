use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{watch, Mutex};

use crate::config::SupervisorConfig;
use crate::error::{Result, SupervisorError};
use crate::models::{EntryConfig, EntrySnapshot, ResourceReading};
use crate::services::artifact::{validate_name, ArtifactManager};
use crate::services::event_log::{EventLog, LifecycleEvent};
use crate::services::persistence;
use crate::services::process_handle::{HandleState, LaunchOptions, ProcessHandle};
use crate::services::resource_probe::ResourceProbe;

/// 一个受管条目。句柄槽由异步锁保护，同一时刻只有一个操作能作用于该条目。
pub struct Entry {
    name: String,
    minimized: bool,
    /// 条目已被删除，之后的启动请求一律拒绝
    retired: AtomicBool,
    slot: Mutex<Option<ProcessHandle>>,
    status: StdMutex<EntrySnapshot>,
}

impl Entry {
    fn new(name: String, minimized: bool) -> Arc<Self> {
        let status = EntrySnapshot::idle(name.clone(), minimized);
        Arc::new(Self {
            name,
            minimized,
            retired: AtomicBool::new(false),
            slot: Mutex::new(None),
            status: StdMutex::new(status),
        })
    }

    fn config(&self) -> EntryConfig {
        EntryConfig::new(self.name.clone(), self.minimized)
    }

    fn snapshot(&self) -> EntrySnapshot {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn publish(&self, handle: Option<&ProcessHandle>, reading: ResourceReading) {
        let mut snapshot = EntrySnapshot::idle(self.name.clone(), self.minimized);
        if let Some(handle) = handle {
            let state = handle.state();
            snapshot.running = state.is_running();
            snapshot.state = state.label();
            snapshot.pid = handle.pid().filter(|_| state.is_running());
        }
        let snapshot = snapshot.with_reading(reading);
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = snapshot;
    }
}

/// 启动结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    Started { pid: u32 },
    AlreadyRunning { pid: u32 },
    /// 在稳定窗口内退出，产物已清理
    ExitedEarly { code: Option<i32> },
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub loaded: usize,
    pub skipped: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub added: usize,
    pub skipped: usize,
    pub rejected: usize,
}

/// 一次轮询的统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub polled: usize,
    /// 正在被其他操作持有而跳过的条目
    pub busy: usize,
    pub reconciled: usize,
    pub errors: usize,
}

/// 批量操作的逐条结果，顺序与请求一致
#[derive(Debug)]
pub struct BatchReport<T> {
    pub results: Vec<(String, Result<T>)>,
}

impl<T> BatchReport<T> {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// 条目注册表：维护名称到条目的映射并协调所有生命周期操作
pub struct Supervisor {
    config: Arc<SupervisorConfig>,
    artifacts: ArtifactManager,
    probe: ResourceProbe,
    events: EventLog,
    entries: Mutex<Vec<Arc<Entry>>>,
    status_tx: watch::Sender<Vec<EntrySnapshot>>,
}

impl Supervisor {
    pub fn new(config: Arc<SupervisorConfig>, events: EventLog) -> Self {
        let (status_tx, _) = watch::channel(Vec::new());
        Self {
            artifacts: ArtifactManager::new(&config, events.clone()),
            probe: ResourceProbe::new(config.capabilities),
            events,
            entries: Mutex::new(Vec::new()),
            status_tx,
            config,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn artifacts(&self) -> &ArtifactManager {
        &self.artifacts
    }

    async fn find(&self, name: &str) -> Result<Arc<Entry>> {
        let name = name.trim();
        let entries = self.entries.lock().await;
        entries
            .iter()
            .find(|entry| entry.name == name)
            .cloned()
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))
    }

    pub async fn names(&self) -> Vec<String> {
        let entries = self.entries.lock().await;
        entries.iter().map(|entry| entry.name.clone()).collect()
    }

    pub async fn add(&self, name: &str, minimized: bool) -> Result<()> {
        let name = validate_name(name)?;
        {
            let mut entries = self.entries.lock().await;
            if entries.iter().any(|entry| entry.name == name) {
                return Err(SupervisorError::DuplicateName(name));
            }
            entries.push(Entry::new(name.clone(), minimized));
        }
        self.events.record(LifecycleEvent::EntryAdded { entry: name });
        self.publish().await;
        Ok(())
    }

    pub async fn start(&self, name: &str) -> Result<StartOutcome> {
        let entry = self.find(name).await?;
        let outcome = self.start_entry(&entry).await;
        self.publish().await;
        outcome
    }

    async fn start_entry(&self, entry: &Entry) -> Result<StartOutcome> {
        let mut slot = entry.slot.lock().await;
        if entry.retired.load(Ordering::SeqCst) {
            return Err(SupervisorError::NotFound(entry.name.clone()));
        }

        if let Some(handle) = slot.as_mut() {
            let state = handle.poll().unwrap_or(HandleState::Unknown);
            if state.is_running() {
                let pid = handle.pid().unwrap_or_default();
                self.events.record(LifecycleEvent::AlreadyRunning {
                    entry: entry.name.clone(),
                    pid,
                });
                return Ok(StartOutcome::AlreadyRunning { pid });
            }
            // 上一次运行留下的句柄
            self.cleanup_slot(entry, &mut slot);
        }

        let artifact = match self.artifacts.stage(&entry.name) {
            Ok(path) => path,
            Err(e) => {
                self.events.record(LifecycleEvent::LaunchFailed {
                    entry: entry.name.clone(),
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        let mut handle = ProcessHandle::new(entry.name.clone(), artifact, self.events.clone());
        let options = LaunchOptions {
            minimized: entry.minimized,
        };
        let result = handle
            .start(options, self.config.settle_delay, &self.probe)
            .await;
        let pid = handle.pid();
        *slot = Some(handle);

        match result {
            Ok(state) if state.is_running() => {
                entry.publish(slot.as_ref(), ResourceReading::Unavailable);
                Ok(StartOutcome::Started {
                    pid: pid.unwrap_or_default(),
                })
            }
            Ok(state) => {
                let code = match state {
                    HandleState::Exited(code) => code,
                    _ => None,
                };
                self.cleanup_slot(entry, &mut slot);
                Ok(StartOutcome::ExitedEarly { code })
            }
            Err(e) => {
                self.cleanup_slot(entry, &mut slot);
                Err(e)
            }
        }
    }

    /// 停止条目。返回 `Ok(false)` 表示进程在终止后仍然存活。
    pub async fn stop(&self, name: &str) -> Result<bool> {
        stopped_flag(self.stop_named(name).await)
    }

    async fn stop_named(&self, name: &str) -> Result<()> {
        let entry = self.find(name).await?;
        let result = self.stop_entry(&entry).await;
        self.publish().await;
        result
    }

    async fn stop_entry(&self, entry: &Entry) -> Result<()> {
        let mut slot = entry.slot.lock().await;
        let (stopped, pid) = match slot.as_mut() {
            Some(handle) => (
                handle.stop(&self.config.stop, &self.probe).await,
                handle.pid().unwrap_or_default(),
            ),
            None => {
                log::debug!("'{}' has no process to stop", entry.name);
                return Ok(());
            }
        };

        if stopped {
            self.cleanup_slot(entry, &mut slot);
            Ok(())
        } else {
            entry.publish(slot.as_ref(), ResourceReading::Unavailable);
            Err(SupervisorError::TerminationTimedOut(pid))
        }
    }

    /// 停止并清理后移除条目。返回 `Ok(false)` 表示进程未能确认停止。
    pub async fn delete(&self, name: &str) -> Result<bool> {
        stopped_flag(self.delete_named(name).await)
    }

    async fn delete_named(&self, name: &str) -> Result<()> {
        let entry = self.find(name).await?;
        let result = self.retire_entry(&entry).await;
        if let Err(SupervisorError::NotFound(_)) = result {
            return result;
        }

        {
            let mut entries = self.entries.lock().await;
            entries.retain(|other| !Arc::ptr_eq(other, &entry));
        }
        self.events.record(LifecycleEvent::EntryRemoved {
            entry: entry.name.clone(),
        });
        self.publish().await;
        result
    }

    /// 停止、清理并标记条目为已删除；不从集合中移除
    async fn retire_entry(&self, entry: &Entry) -> Result<()> {
        let mut slot = entry.slot.lock().await;
        if entry.retired.swap(true, Ordering::SeqCst) {
            return Err(SupervisorError::NotFound(entry.name.clone()));
        }
        self.teardown(entry, &mut slot).await
    }

    /// 停止并清理已标记删除的条目，调用方需持有句柄槽
    async fn teardown(&self, entry: &Entry, slot: &mut Option<ProcessHandle>) -> Result<()> {
        let mut outcome = Ok(());
        if let Some(handle) = slot.as_mut() {
            if !handle.stop(&self.config.stop, &self.probe).await {
                log::warn!(
                    "Removing '{}' although its process could not be confirmed stopped",
                    entry.name
                );
                outcome = Err(SupervisorError::TerminationTimedOut(
                    handle.pid().unwrap_or_default(),
                ));
            }
        }
        self.cleanup_slot(entry, slot);
        outcome
    }

    /// 释放句柄并删除产物。没有句柄时也会清理按名称推导出的残留产物。
    fn cleanup_slot(&self, entry: &Entry, slot: &mut Option<ProcessHandle>) {
        self.events.record(LifecycleEvent::CleanupRequested {
            entry: entry.name.clone(),
        });
        match slot.take() {
            Some(mut handle) => {
                handle.cleanup(&self.artifacts);
            }
            None => {
                self.artifacts
                    .remove(&self.artifacts.artifact_path(&entry.name));
            }
        }
        entry.publish(None, ResourceReading::Unavailable);
    }

    pub async fn batch_start(self: &Arc<Self>, names: &[String]) -> BatchReport<StartOutcome> {
        self.run_batch("start", names, |supervisor, name| async move {
            supervisor.start(&name).await
        })
        .await
    }

    pub async fn batch_stop(self: &Arc<Self>, names: &[String]) -> BatchReport<()> {
        self.run_batch("stop", names, |supervisor, name| async move {
            supervisor.stop_named(&name).await
        })
        .await
    }

    pub async fn batch_delete(self: &Arc<Self>, names: &[String]) -> BatchReport<()> {
        self.run_batch("delete", names, |supervisor, name| async move {
            supervisor.delete_named(&name).await
        })
        .await
    }

    /// 并发执行，单个条目失败不影响其他条目
    async fn run_batch<T, F, Fut>(self: &Arc<Self>, label: &str, names: &[String], op: F) -> BatchReport<T>
    where
        T: Send + 'static,
        F: Fn(Arc<Self>, String) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut seen = HashSet::new();
        let names: Vec<String> = names
            .iter()
            .map(|name| name.trim().to_string())
            .filter(|name| seen.insert(name.clone()))
            .collect();

        self.events.record(LifecycleEvent::note(format!(
            "batch {} of {} entries",
            label,
            names.len()
        )));

        let tasks: Vec<_> = names
            .iter()
            .map(|name| tokio::spawn(op(Arc::clone(self), name.clone())))
            .collect();

        let mut results = Vec::with_capacity(names.len());
        for (name, task) in names.into_iter().zip(tasks) {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => Err(SupervisorError::Io(e.into())),
            };
            if let Err(e) = &result {
                log::warn!("Batch {} failed for '{}': {}", label, name, e);
            }
            results.push((name, result));
        }

        let report = BatchReport { results };
        self.events.record(LifecycleEvent::note(format!(
            "batch {} finished: {} succeeded, {} failed",
            label,
            report.succeeded(),
            report.failed()
        )));
        report
    }

    /// 当前条目配置（用于保存快照）
    pub async fn save_snapshot(&self) -> Vec<EntryConfig> {
        let entries = self.entries.lock().await;
        entries.iter().map(|entry| entry.config()).collect()
    }

    /// 用快照完全替换条目集合；原有条目会被停止并清理。
    ///
    /// 原有条目在清理完成前留在集合中并标记为已删除：同名的添加会被视为重复，
    /// 启动请求返回 `NotFound`，新条目不会与尚未清理的旧产物共用路径。
    pub async fn load_snapshot(self: &Arc<Self>, configs: Vec<EntryConfig>) -> LoadSummary {
        let mut summary = LoadSummary::default();
        let mut seen = HashSet::new();
        let mut fresh = Vec::new();

        for config in configs {
            match validate_name(&config.name) {
                Ok(name) if seen.insert(name.clone()) => fresh.push(Entry::new(name, config.minimized)),
                Ok(name) => {
                    summary.skipped += 1;
                    log::warn!("Skipping duplicate entry '{}' in snapshot", name);
                }
                Err(e) => {
                    summary.skipped += 1;
                    log::warn!("Skipping entry {:?} in snapshot: {}", config.name, e);
                }
            }
        }

        let mut retiring = Vec::new();
        for entry in self.entries.lock().await.iter() {
            // 已被删除操作接管的条目只需等待其完成
            let owned = !entry.retired.swap(true, Ordering::SeqCst);
            retiring.push((Arc::clone(entry), owned));
        }
        let previous: Vec<Arc<Entry>> = retiring.iter().map(|(entry, _)| Arc::clone(entry)).collect();
        self.retire_all(retiring).await;

        {
            let mut entries = self.entries.lock().await;
            let added_meanwhile: Vec<Arc<Entry>> = entries
                .drain(..)
                .filter(|entry| !previous.iter().any(|old| Arc::ptr_eq(old, entry)))
                .collect();
            fresh.retain(|entry| {
                let taken = added_meanwhile.iter().any(|other| other.name == entry.name);
                if taken {
                    summary.skipped += 1;
                    log::warn!("Skipping '{}' from snapshot, it was added during the reload", entry.name);
                }
                !taken
            });
            summary.loaded = fresh.len();
            fresh.extend(added_meanwhile);
            *entries = fresh;
        }

        self.events.record(LifecycleEvent::note(format!(
            "loaded {} entries ({} skipped)",
            summary.loaded, summary.skipped
        )));
        self.publish().await;
        summary
    }

    /// 把当前条目写入快照文件，返回写入的条目数
    pub async fn save_to(&self, path: &Path) -> Result<usize> {
        let configs = self.save_snapshot().await;
        persistence::save_snapshot_file(path, &configs)?;
        self.events.record(LifecycleEvent::note(format!(
            "configuration saved to '{}'",
            path.display()
        )));
        Ok(configs.len())
    }

    /// 从快照文件加载。文件不存在时保持现有条目并返回 `None`；
    /// 格式错误时同样不改变现有条目。
    pub async fn load_from(self: &Arc<Self>, path: &Path) -> Result<Option<LoadSummary>> {
        match persistence::load_snapshot_file(path) {
            Ok(Some(configs)) => Ok(Some(self.load_snapshot(configs).await)),
            Ok(None) => {
                self.events.record(LifecycleEvent::note(format!(
                    "configuration file '{}' not found, keeping current entries",
                    path.display()
                )));
                Ok(None)
            }
            Err(e) => {
                self.events
                    .record(LifecycleEvent::note(format!("failed to load configuration: {}", e)));
                Err(e)
            }
        }
    }

    /// 等待所有条目停止并清理。`owned` 为 false 的条目由进行中的删除负责，
    /// 这里只等待其释放句柄槽。
    async fn retire_all(self: &Arc<Self>, entries: Vec<(Arc<Entry>, bool)>) {
        let tasks: Vec<_> = entries
            .into_iter()
            .map(|(entry, owned)| {
                let supervisor = Arc::clone(self);
                tokio::spawn(async move {
                    let mut slot = entry.slot.lock().await;
                    if !owned {
                        return;
                    }
                    if let Err(e) = supervisor.teardown(&entry, &mut slot).await {
                        log::warn!("Retired '{}' with errors: {}", entry.name, e);
                    }
                    supervisor.events.record(LifecycleEvent::EntryRemoved {
                        entry: entry.name.clone(),
                    });
                })
            })
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                log::error!("Failed to retire entry: {}", e);
            }
        }
    }

    /// 每行一个名称；已存在的名称跳过，非法名称拒绝
    pub async fn import_names(&self, text: &str) -> ImportSummary {
        let mut summary = ImportSummary::default();
        {
            let mut entries = self.entries.lock().await;
            for line in text.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if entries.iter().any(|entry| entry.name == line) {
                    summary.skipped += 1;
                    log::info!("'{}' already exists, skipping", line);
                    continue;
                }
                match validate_name(line) {
                    Ok(name) => {
                        entries.push(Entry::new(name.clone(), false));
                        self.events.record(LifecycleEvent::EntryAdded { entry: name });
                        summary.added += 1;
                    }
                    Err(e) => {
                        summary.rejected += 1;
                        log::warn!("Rejected imported name {:?}: {}", line, e);
                    }
                }
            }
        }

        self.events.record(LifecycleEvent::note(format!(
            "imported {} names ({} skipped, {} rejected)",
            summary.added, summary.skipped, summary.rejected
        )));
        self.publish().await;
        summary
    }

    pub async fn snapshot(&self) -> Vec<EntrySnapshot> {
        let entries = self.entries.lock().await;
        entries.iter().map(|entry| entry.snapshot()).collect()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<EntrySnapshot>> {
        self.status_tx.subscribe()
    }

    async fn publish(&self) {
        let snapshot = self.snapshot().await;
        self.status_tx.send_replace(snapshot);
    }

    /// 轮询所有空闲条目的状态与资源；正被其他操作持有的条目本轮跳过
    pub async fn poll_once(&self) -> TickReport {
        let entries: Vec<Arc<Entry>> = self.entries.lock().await.clone();
        let mut report = TickReport::default();

        for entry in entries {
            let mut slot = match entry.slot.try_lock() {
                Ok(slot) => slot,
                Err(_) => {
                    report.busy += 1;
                    continue;
                }
            };
            let Some(handle) = slot.as_mut() else {
                continue;
            };
            report.polled += 1;

            let reading = match handle.refresh(&self.probe) {
                Ok((_, reading)) => reading,
                Err(e) => {
                    report.errors += 1;
                    log::warn!("Failed to poll '{}': {}", entry.name, e);
                    ResourceReading::Unavailable
                }
            };

            if handle.state().is_finished() {
                report.reconciled += 1;
                self.cleanup_slot(&entry, &mut slot);
            } else {
                entry.publish(slot.as_ref(), reading);
            }
        }

        self.publish().await;
        report
    }

    /// 停止并清理所有条目，条目本身保留
    pub async fn shutdown(self: &Arc<Self>) {
        let entries: Vec<Arc<Entry>> = self.entries.lock().await.clone();
        log::info!("Shutting down {} entries", entries.len());

        let tasks: Vec<_> = entries
            .into_iter()
            .map(|entry| {
                let supervisor = Arc::clone(self);
                tokio::spawn(async move { supervisor.shutdown_entry(&entry).await })
            })
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                log::error!("Failed to shut down entry: {}", e);
            }
        }
        self.publish().await;
    }

    async fn shutdown_entry(&self, entry: &Entry) {
        let mut slot = entry.slot.lock().await;
        match slot.as_mut() {
            Some(handle) => {
                if !handle.stop(&self.config.stop, &self.probe).await {
                    log::warn!("'{}' did not stop cleanly during shutdown", entry.name);
                }
            }
            None if !self.artifacts.artifact_path(&entry.name).exists() => return,
            None => {}
        }
        self.cleanup_slot(entry, &mut slot);
    }
}

fn stopped_flag(result: Result<()>) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(SupervisorError::TerminationTimedOut(_)) => Ok(false),
        Err(e) => Err(e),
    }
}
