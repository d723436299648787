// apps/corpusctl/src/command/config.rs
//! 打印当前生效的配置

use super::Command;
use crate::config::Config;
use crate::error::{Result, WrapErr};

pub struct ConfigCommand {
    config: Config,
}

impl ConfigCommand {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl Command for ConfigCommand {
    async fn execute(&self) -> Result<()> {
        let rendered = toml::to_string_pretty(&self.config).context("Serialize configuration error")?;
        print!("{rendered}");
        Ok(())
    }
}
