// corpus-core/src/lib.rs
//! 语料查询执行核心库
//!
//! Runs a query over a corpus split into shards of very different sizes:
//! - 按大小递增扫描分片，并按匹配密度跳转
//! - 结果合并与数量上限
//! - 进度估计与发布
//! - 取消、超时与分页续跑

pub mod aggregator;
pub mod bundle;
pub mod catalog;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod jobs;
pub mod publish;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod store;

// 重导出核心类型
pub use aggregator::{add_results, union_results, AddContext, CallbackKind, ShardResults};
pub use bundle::{Envelope, QueryMeta, RawRow, ResultBundle, ResultSetMeta};
pub use catalog::{word_count, Shard, ShardCatalog};
pub use config::{CapPolicy, ConfigError, RunConfig, SchedulerConfig};
pub use controller::{IterationController, Phase, RunReport, Services};
pub use engine::{DataEngine, Translation, Translator};
pub use error::{AggregateError, CatalogError, QueueError, RunError, SchedulerError, StoreError, TranslateError};
pub use estimator::{estimate, Progress, ProgressInput, RunStatus};
pub use jobs::{Completion, JobError, JobHandle, JobId, JobQueue, JobRequest, JobStatus, TokioJobQueue, Work};
pub use publish::{BroadcastPublisher, Published, Publisher};
pub use registry::{RunRegistry, StopSignal};
pub use scheduler::{decide_batch, SchedulerView};
pub use state::{PersistedRun, QueryState};
pub use store::RunStore;
