// apps/corpusctl/src/command/runs.rs
//! 列出持久化的运行及其进度

use super::{format_size, open_store, Command};
use crate::config::Config;
use crate::error::Result;
use chrono::{DateTime, Local, Utc};
use corpus_core::{estimate, PersistedRun, RunStatus};
use rpc::ProgressStatus;
use uuid::Uuid;

pub struct RunsCommand {
    config: Config,
    filter: Option<String>,
    limit: usize,
}

/// What the estimator makes of a persisted run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub job: Uuid,
    pub status: ProgressStatus,
    pub results: u64,
    pub projected: u64,
    pub percent_words: f64,
    pub done: usize,
    pub total: usize,
    pub updated_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn of(run: &PersistedRun) -> Self {
        let progress = estimate(&run.progress_input());
        let status = match progress.status {
            RunStatus::Finished if run.hit_limit_at.is_some() => RunStatus::Satisfied,
            status => status,
        };
        Self {
            job: run.job_id,
            status: status.into(),
            results: run.total_results_so_far,
            projected: progress.projected_results,
            percent_words: progress.percent_words_done,
            done: run.done_shards.len(),
            total: run.all_shards.len(),
            updated_at: run.updated_at,
        }
    }

    pub fn updated_local(&self) -> String {
        self.updated_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

impl RunsCommand {
    pub fn new(config: Config, filter: Option<String>, limit: usize) -> Self {
        Self { config, filter, limit }
    }

    fn matches(run: &PersistedRun, filter: &str) -> bool {
        run.job_id.to_string().contains(filter) || run.all_shards.iter().any(|s| s.name.contains(filter))
    }
}

#[async_trait::async_trait]
impl Command for RunsCommand {
    async fn execute(&self) -> Result<()> {
        let path = self.config.run_store_dir();
        println!("🔍 持久化运行列表");
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        println!("📂 运行目录: {:?}", path);
        if let Some(ref filter) = self.filter {
            println!("🔎 过滤条件: {}", filter);
        }
        println!();

        let Some(store) = open_store(&path) else {
            return Ok(());
        };

        let runs = store.list()?;
        let mut displayed = 0;
        let mut matched = 0;
        for run in &runs {
            if let Some(ref filter) = self.filter {
                if !Self::matches(run, filter) {
                    continue;
                }
            }
            matched += 1;
            if displayed >= self.limit {
                continue;
            }

            let summary = RunSummary::of(run);
            println!(
                "📄 {}  {:<9} {:>8} 结果  预计 {:>8}  分片 {}/{}  {:>6.2}% 词  {}",
                summary.job,
                summary.status,
                summary.results,
                summary.projected,
                summary.done,
                summary.total,
                summary.percent_words,
                summary.updated_local()
            );
            displayed += 1;
        }

        let (count, size) = store.stats();
        println!();
        println!("────────────────────────────────────────────────────────────");
        println!("📊 统计信息:");
        println!("   • 运行记录: {}", count);
        println!("   • 匹配条目: {}", matched);
        println!("   • 显示条目数: {} / {}", displayed, self.limit);
        println!("   • 数据库大小: {}", format_size(size));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpus_core::Shard;
    use rpc::Requested;

    fn run(done: usize, results: u64, hit_limit_at: Option<u64>) -> PersistedRun {
        let all = vec![
            Shard::new(1, "c", "A", 100),
            Shard::new(1, "c", "B", 200),
            Shard::new(1, "c", "C", 700),
        ];
        PersistedRun {
            job_id: Uuid::new_v4(),
            done_shards: all[..done].to_vec(),
            current_shard: None,
            total_requested: Requested::Limit(50),
            total_results_so_far: results,
            hit_limit_at,
            result_bundle_id0: None,
            corpus_word_count: 1000,
            matches_seen: results,
            updated_at: Utc::now(),
            all_shards: all,
        }
    }

    #[test]
    fn summary_projects_partial_runs() {
        let summary = RunSummary::of(&run(2, 15, None));
        assert_eq!(summary.status, ProgressStatus::Partial);
        assert_eq!(summary.projected, 50);
        assert_eq!(summary.percent_words, 30.0);
        assert_eq!((summary.done, summary.total), (2, 3));
    }

    #[test]
    fn capped_last_shard_is_satisfied() {
        assert_eq!(RunSummary::of(&run(3, 50, Some(12))).status, ProgressStatus::Satisfied);
        assert_eq!(RunSummary::of(&run(3, 20, None)).status, ProgressStatus::Finished);
    }

    #[test]
    fn filter_matches_job_or_shard() {
        let r = run(1, 0, None);
        assert!(RunsCommand::matches(&r, "B"));
        assert!(RunsCommand::matches(&r, &r.job_id.to_string()[..8]));
        assert!(!RunsCommand::matches(&r, "zzz"));
    }
}
