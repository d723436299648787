pub mod catalog;
pub mod clear_runs;
pub mod config;
pub mod runs;
pub mod show;

use crate::error::Result;
use corpus_core::RunStore;
use std::path::Path;

pub use catalog::CatalogCommand;
pub use clear_runs::ClearRunsCommand;
pub use config::ConfigCommand;
pub use runs::RunsCommand;
pub use show::ShowCommand;

#[async_trait::async_trait]
pub trait Command {
    async fn execute(&self) -> Result<()>;
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Open the run store, or explain why it could not be opened
fn open_store(path: &Path) -> Option<RunStore> {
    if !path.exists() {
        println!("❌ 运行目录不存在: {:?}", path);
        return None;
    }
    match RunStore::open(path) {
        Ok(store) => Some(store),
        Err(e) => {
            println!("⚠️  无法打开运行数据库: {}", e);
            println!();
            println!("💡 提示: 数据库可能被其他进程锁定，请先停止正在执行查询的服务。");
            None
        }
    }
}
