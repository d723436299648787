// apps/corpusctl/src/command/clear_runs.rs
//! 清除持久化的运行

use super::{format_size, open_store, Command};
use crate::config::Config;
use crate::error::Result;

pub struct ClearRunsCommand {
    config: Config,
}

impl ClearRunsCommand {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl Command for ClearRunsCommand {
    async fn execute(&self) -> Result<()> {
        println!("\n🗑️  清除运行记录");
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        let path = self.config.run_store_dir();
        println!("📂 运行目录: {:?}\n", path);

        let Some(store) = open_store(&path) else {
            return Ok(());
        };
        let (_, size) = store.stats();
        let removed = store.clear()?;

        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        println!("✨ 清理完成！共删除 {} 条运行记录，原占用 {}", removed, format_size(size));

        Ok(())
    }
}
