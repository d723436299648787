// corpus-core/src/registry.rs
//! 运行注册表 - 按房间或分组协调取消
//!
//! A run registers under its scope and receives a [`StopSignal`]. Cancelling a
//! scope flips the signal of every run registered under it; the controller
//! notices at its next wake-up.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rpc::RunScope;
use tokio::sync::watch;
use uuid::Uuid;

struct Entry {
    job: Uuid,
    stop: watch::Sender<bool>,
}

/// 线程安全的运行注册表
#[derive(Clone, Default)]
pub struct RunRegistry {
    runs: Arc<RwLock<HashMap<RunScope, Vec<Entry>>>>,
}

/// Receiving half of a run's cancellation flag
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the run is cancelled; never resolves if it was
    /// unregistered without being cancelled
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, scope: &RunScope, job: Uuid) -> StopSignal {
        let (stop, rx) = watch::channel(false);
        let mut runs = self.runs.write().unwrap_or_else(|p| p.into_inner());
        runs.entry(scope.clone()).or_default().push(Entry { job, stop });
        tracing::debug!("[Registry] {} registered on {}", job, scope.channel());
        StopSignal { rx }
    }

    /// 取消该范围内的所有运行，返回受影响的数量
    ///
    /// Cancelling an idle scope, or cancelling twice, is a no-op.
    pub fn cancel(&self, scope: &RunScope) -> usize {
        let runs = self.runs.read().unwrap_or_else(|p| p.into_inner());
        let Some(entries) = runs.get(scope) else {
            return 0;
        };
        let mut cancelled = 0;
        for entry in entries {
            if !*entry.stop.borrow() {
                entry.stop.send_replace(true);
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            tracing::info!("[Registry] cancelled {} run(s) on {}", cancelled, scope.channel());
        }
        cancelled
    }

    /// Cancel a single run wherever it is registered
    pub fn cancel_job(&self, job: Uuid) -> bool {
        let runs = self.runs.read().unwrap_or_else(|p| p.into_inner());
        runs.values()
            .flatten()
            .find(|entry| entry.job == job)
            .is_some_and(|entry| !entry.stop.send_replace(true))
    }

    /// 运行结束后注销
    pub fn finish(&self, scope: &RunScope, job: Uuid) {
        let mut runs = self.runs.write().unwrap_or_else(|p| p.into_inner());
        if let Some(entries) = runs.get_mut(scope) {
            entries.retain(|entry| entry.job != job);
            if entries.is_empty() {
                runs.remove(scope);
            }
        }
    }

    /// Jobs currently registered under `scope`
    pub fn active(&self, scope: &RunScope) -> Vec<Uuid> {
        let runs = self.runs.read().unwrap_or_else(|p| p.into_inner());
        runs.get(scope)
            .map(|entries| entries.iter().map(|entry| entry.job).collect())
            .unwrap_or_default()
    }
}
