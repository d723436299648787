// corpus-core/src/estimator.rs
//! Progress estimation from aggregator state

use rpc::{ProgressStatus, Requested};

/// Where a run stands after a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Finished,
    Satisfied,
    Partial,
}

impl From<RunStatus> for ProgressStatus {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Finished => ProgressStatus::Finished,
            RunStatus::Satisfied => ProgressStatus::Satisfied,
            RunStatus::Partial => ProgressStatus::Partial,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressInput {
    /// Results counted toward the request (capped)
    pub matches_so_far: u64,
    /// Matches found in done shards, including those past the cap
    ///
    /// Projection extrapolates from this uncapped count, not from
    /// `matches_so_far`: once the cap is hit the capped count stops growing
    /// and would project the corpus total down to the request size.
    pub matches_seen: u64,
    /// Sum of sizes of done shards
    pub words_processed: u64,
    /// Sum of sizes of all shards in scope
    pub corpus_words: u64,
    pub total_requested: Requested,
    pub done_shards: usize,
    pub all_shards: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub status: RunStatus,
    pub projected_results: u64,
    pub percent_words_done: f64,
    pub percent_matches_done: f64,
}

pub fn estimate(input: &ProgressInput) -> Progress {
    let finished = input.done_shards >= input.all_shards;
    let status = if finished {
        RunStatus::Finished
    } else {
        match input.total_requested {
            Requested::Limit(total) if total > 0 && input.matches_so_far >= total => RunStatus::Satisfied,
            _ => RunStatus::Partial,
        }
    };

    let projected_results = if finished {
        input.matches_seen.max(input.matches_so_far)
    } else if input.words_processed == 0 {
        0
    } else {
        (input.corpus_words as f64 * input.matches_seen as f64 / input.words_processed as f64).round() as u64
    };

    let percent_words_done = if input.corpus_words == 0 {
        100.0
    } else {
        100.0 * input.words_processed as f64 / input.corpus_words as f64
    };

    let percent_matches_done = match input.total_requested {
        Requested::Limit(total) if total > 0 => {
            100.0 * input.matches_so_far.min(total) as f64 / total as f64
        }
        _ => percent_words_done,
    };

    Progress {
        status,
        projected_results,
        percent_words_done,
        percent_matches_done,
    }
}
