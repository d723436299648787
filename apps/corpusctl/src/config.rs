use crate::error::{error, Result};
use config::{create_strategy, resolve_dir, AppStrategy};
use corpus_core::RunConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default = "default_config", deny_unknown_fields)]
pub struct Config {
    pub runtime_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// 分片目录：每个语料一个 JSON 文件
    pub catalog_dir: PathBuf,
    /// 调度、聚合与超时设置
    pub run: RunConfig,
}

fn default_config() -> Config {
    let Ok(strategy) = create_strategy() else {
        let base = std::env::temp_dir().join(config::constants::APP_NAME);
        return Config {
            runtime_dir: base.join("runtime"),
            cache_dir: base.join("cache"),
            catalog_dir: base.join("catalog"),
            run: RunConfig::default(),
        };
    };

    Config {
        runtime_dir: resolve_dir("RUNTIME_DIRECTORY", &strategy, |s| s.runtime_dir()),
        cache_dir: resolve_dir("CACHE_DIRECTORY", &strategy, |s| Some(s.cache_dir())),
        catalog_dir: resolve_dir("CATALOG_DIRECTORY", &strategy, |s| Some(s.data_dir().join("catalog"))),
        run: RunConfig::default(),
    }
}

impl Config {
    fn load_str(user_config_str: &str) -> Result<Config> {
        let user_config: Config = toml::from_str(user_config_str)?;
        user_config.validate()?;
        Ok(user_config)
    }

    fn validate(&self) -> Result<()> {
        if self.run.max_in_flight == 0 {
            return Err(error!("run.max-in-flight must be at least 1"));
        }
        if self.run.job_timeout_secs == 0 {
            return Err(error!("run.job-timeout-secs must be at least 1"));
        }
        if !(0.0..=10.0).contains(&self.run.scheduler.safety_buffer) {
            return Err(error!(
                "run.scheduler.safety-buffer must be between 0 and 10, got {}",
                self.run.scheduler.safety_buffer
            ));
        }
        Ok(())
    }

    /// 加载配置；`path` 为空时使用平台默认位置
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => create_strategy()?.config_dir().join(config::constants::CLI_CONFIG_FILE_NAME),
        };

        match std::fs::read_to_string(&config_path) {
            Ok(user_config_str) => Self::load_str(&user_config_str),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // 配置文件不存在，创建示例配置文件
                Self::create_example_config(&config_path)?;
                Self::load_str("")
            }
            Err(e) => Err(e.into()),
        }
    }

    /// sled 数据库所在目录
    pub fn run_store_dir(&self) -> PathBuf {
        self.cache_dir.join(config::constants::RUN_STORE_DIR_NAME)
    }

    fn create_example_config(config_path: &Path) -> Result<()> {
        use std::io::Write;

        // 确保配置目录存在
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let example_config = r#"# corpusctl 配置文件
#
# 此文件在首次运行时自动创建

# 分片目录：每个语料一个 JSON 文件
# {"corpus_id": 1, "shards": [{"location": "...", "name": "...", "size_tokens": 1000}]}
# catalog-dir = "/srv/corpora/catalog"

# 可选：自定义运行时目录
# runtime-dir = "/custom/runtime/path"

# 可选：自定义缓存目录（持久化的运行保存在 runs/ 下）
# cache-dir = "/custom/cache/path"

[run]
# simultaneous 模式下同时扫描的分片数
# max-in-flight = 4
# 超过此时间没有任何任务完成则超时
# job-timeout-secs = 300

[run.scheduler]
# safety-buffer = 0.1
# first-page-floor = 25

[run.aggregation]
# enumerable-kinds = ["plain"]
"#;

        let mut file = std::fs::File::create(config_path)?;
        file.write_all(example_config.as_bytes())?;

        eprintln!("\n📝 已创建配置文件: {:?}", config_path);
        eprintln!("💡 请编辑配置文件，设置 catalog-dir 指向分片目录\n");

        Ok(())
    }
}
