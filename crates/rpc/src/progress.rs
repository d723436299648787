use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Status carried by every progress message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProgressStatus {
    Started,
    Partial,
    Satisfied,
    Finished,
    Failed,
    Timeout,
    Stopped,
}

impl ProgressStatus {
    /// No further messages follow a terminal status for the same job.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressStatus::Started | ProgressStatus::Partial)
    }
}

/// Broadcast after every merged shard and on every terminal transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub status: ProgressStatus,
    pub job: Uuid,
    /// Matches found in the shard that was just merged
    pub batch_matches: u64,
    pub total_results_so_far: u64,
    pub percentage_done: f64,
    pub percentage_words_done: f64,
    pub hit_limit: Option<u64>,
    pub projected_results: u64,
    /// Names of shards merged so far
    pub done_batches: Vec<String>,
    pub total_batch_count: usize,
    /// Error text for `failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
