// apps/corpusctl/src/command/show.rs
//! 显示单个运行的详情

use super::runs::RunSummary;
use super::{open_store, Command};
use crate::config::Config;
use crate::error::{Result, WrapErr};
use uuid::Uuid;

pub struct ShowCommand {
    config: Config,
    job: Uuid,
    json: bool,
}

impl ShowCommand {
    pub fn new(config: Config, job: Uuid, json: bool) -> Self {
        Self { config, job, json }
    }
}

#[async_trait::async_trait]
impl Command for ShowCommand {
    async fn execute(&self) -> Result<()> {
        let Some(store) = open_store(&self.config.run_store_dir()) else {
            return Ok(());
        };
        let Some(run) = store.load(self.job)? else {
            println!("❌ 没有运行记录: {}", self.job);
            return Ok(());
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&run).context("Serialize run error")?);
            return Ok(());
        }

        let summary = RunSummary::of(&run);
        println!("📄 运行: {}", run.job_id);
        println!("   • 状态: {}", summary.status);
        println!("   • 请求数量: {}", run.total_requested);
        println!("   • 已得结果: {}", summary.results);
        println!("   • 预计结果: {}", summary.projected);
        println!("   • 已扫描词数: {:.2}%", summary.percent_words);
        if let Some(marker) = run.hit_limit_at {
            println!("   • 上限截断位置: {}", marker);
        }
        if let Some(current) = &run.current_shard {
            println!("   • 当前分片: {}", current.name);
        }
        println!("   • 更新时间: {}", summary.updated_local());
        println!();
        println!("📋 分片 ({}/{}):", summary.done, summary.total);
        for shard in &run.all_shards {
            let mark = if run.done_shards.contains(shard) { "✅" } else { "⏳" };
            println!("   {} {:<28} {:>12}", mark, shard.name, shard.size_tokens);
        }

        Ok(())
    }
}
