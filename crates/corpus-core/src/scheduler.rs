// corpus-core/src/scheduler.rs
//! Choosing the next shard to scan
//!
//! Shards are visited smallest first. Once a few matches are known, the
//! observed match density is used to jump straight to a shard expected to
//! satisfy the rest of the request alone, instead of scanning everything in
//! between.

use rpc::Requested;

use crate::catalog::{word_count, Shard};
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;

/// Read-only snapshot of the run state the scheduler decides on
#[derive(Debug, Clone, Copy)]
pub struct SchedulerView<'a> {
    /// Ascending by size
    pub all_shards: &'a [Shard],
    /// In merge order; the last entry is the most recently finished shard
    pub done_shards: &'a [Shard],
    pub current_shard: Option<&'a Shard>,
    pub results_so_far: u64,
    pub hit_limit_at: Option<u64>,
    pub total_requested: Requested,
    pub page_size: u64,
    pub unlimited: bool,
    pub single_shard: bool,
}

pub fn decide_batch<'a>(view: &SchedulerView<'a>, config: &SchedulerConfig) -> Result<&'a Shard, SchedulerError> {
    if let Some(current) = view.current_shard {
        return Ok(current);
    }

    if view.single_shard {
        let only = view.all_shards.first().ok_or(SchedulerError::NoShardAvailable)?;
        if view.done_shards.contains(only) {
            return Err(SchedulerError::ShardAlreadyDone(only.name.clone()));
        }
        return Ok(only);
    }

    if view.done_shards.is_empty() {
        return view.all_shards.first().ok_or(SchedulerError::NoShardAvailable);
    }

    if view.hit_limit_at.is_some() {
        if let Some(last) = view.done_shards.last() {
            if let Some(shard) = view.all_shards.iter().find(|s| *s == last) {
                return Ok(shard);
            }
        }
    }

    let processed = word_count(view.done_shards);
    let match_rate = (processed > 0).then(|| view.results_so_far as f64 / processed as f64);
    let unlimited = view.unlimited || view.total_requested.is_unlimited();
    let first_page = view.page_size.min(config.first_page_floor);

    let mut fallback = None;
    for shard in view.all_shards.iter().filter(|s| !view.done_shards.contains(s)) {
        if fallback.is_none() {
            fallback = Some(shard);
        }
        if unlimited || view.results_so_far < first_page {
            break;
        }
        let (Some(rate), Requested::Limit(total)) = (match_rate, view.total_requested) else {
            break;
        };
        let expected = shard.size_tokens as f64 * rate;
        let needed = total.saturating_sub(view.results_so_far) as f64;
        if expected >= needed * (1.0 + config.safety_buffer) {
            tracing::debug!(
                "[Scheduler] {} expected {:.1} matches, {:.0} needed",
                shard.name, expected, needed
            );
            return Ok(shard);
        }
    }

    fallback.ok_or(SchedulerError::NoShardAvailable)
}
