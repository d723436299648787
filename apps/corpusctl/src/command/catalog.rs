// apps/corpusctl/src/command/catalog.rs
//! 列出分片目录

use super::Command;
use crate::config::Config;
use crate::error::{Result, WrapErr};
use corpus_core::{word_count, Shard, ShardCatalog};

pub struct CatalogCommand {
    config: Config,
    corpora: Vec<u32>,
    languages: Vec<String>,
}

impl CatalogCommand {
    pub fn new(config: Config, corpora: Vec<u32>, languages: Vec<String>) -> Self {
        Self { config, corpora, languages }
    }

    /// Shards a query over `corpora` would visit; every corpus when empty
    fn select(catalog: &ShardCatalog, corpora: &[u32], languages: &[String]) -> Result<Vec<Shard>> {
        let ids: Vec<u32> = if corpora.is_empty() {
            catalog.corpus_ids().collect()
        } else {
            corpora.to_vec()
        };
        Ok(catalog.shards_for(&ids, languages)?)
    }
}

#[async_trait::async_trait]
impl Command for CatalogCommand {
    async fn execute(&self) -> Result<()> {
        let dir = &self.config.catalog_dir;
        println!("📚 分片目录: {:?}", dir);
        if !dir.exists() {
            println!("❌ 目录不存在，请在配置文件中设置 catalog-dir");
            return Ok(());
        }

        let catalog = ShardCatalog::load_dir(dir).context("Load catalog error")?;
        let shards = Self::select(&catalog, &self.corpora, &self.languages)?;

        println!("────────────────────────────────────────────────────────────");
        println!("{:>7}  {:<28} {:>14}  {:<6} location", "corpus", "name", "tokens", "lang");
        for shard in &shards {
            println!(
                "{:>7}  {:<28} {:>14}  {:<6} {}",
                shard.corpus_id,
                shard.name,
                shard.size_tokens,
                shard.language.as_deref().unwrap_or("-"),
                shard.location
            );
        }
        println!("────────────────────────────────────────────────────────────");
        println!("📊 {} 个分片，共 {} 词", shards.len(), word_count(&shards));

        Ok(())
    }
}
