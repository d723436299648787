// corpus-core/src/store.rs
//! 运行状态持久化
//! 使用 sled 保存中断或分页的运行，供后续恢复

use std::path::Path;

use sled::Db;
use uuid::Uuid;

use crate::error::StoreError;
use crate::state::PersistedRun;

/// Persisted runs keyed by job id
pub struct RunStore {
    db: Db,
}

impl RunStore {
    const RUN_PREFIX: &'static str = "run:";

    /// 创建或打开运行数据库
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        tracing::info!("[RunStore] opened {:?}", path);
        Ok(Self { db })
    }

    /// In-memory store, removed on drop
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn run_key(job: Uuid) -> Vec<u8> {
        format!("{}{}", Self::RUN_PREFIX, job).into_bytes()
    }

    pub fn save(&self, run: &PersistedRun) -> Result<(), StoreError> {
        let data = serde_json::to_vec(run)?;
        self.db.insert(Self::run_key(run.job_id), data)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn load(&self, job: Uuid) -> Result<Option<PersistedRun>, StoreError> {
        match self.db.get(Self::run_key(job))? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    pub fn remove(&self, job: Uuid) -> Result<bool, StoreError> {
        let removed = self.db.remove(Self::run_key(job))?.is_some();
        self.db.flush()?;
        Ok(removed)
    }

    /// 所有运行，最近更新的在前
    ///
    /// Records that no longer decode are skipped with a warning.
    pub fn list(&self) -> Result<Vec<PersistedRun>, StoreError> {
        let mut runs = Vec::new();
        for item in self.db.scan_prefix(Self::RUN_PREFIX.as_bytes()) {
            let (key, data) = item?;
            match serde_json::from_slice::<PersistedRun>(&data) {
                Ok(run) => runs.push(run),
                Err(e) => tracing::warn!("[RunStore] skipping {}: {}", String::from_utf8_lossy(&key), e),
            }
        }
        runs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(runs)
    }

    pub fn clear(&self) -> Result<usize, StoreError> {
        let count = self.db.scan_prefix(Self::RUN_PREFIX.as_bytes()).count();
        self.db.clear()?;
        self.db.flush()?;
        Ok(count)
    }

    /// 获取统计信息：(记录数, 磁盘大小)
    pub fn stats(&self) -> (usize, u64) {
        let count = self.db.scan_prefix(Self::RUN_PREFIX.as_bytes()).count();
        let size = self.db.size_on_disk().unwrap_or(0);
        (count, size)
    }
}
