// corpus-core/src/state.rs
//! Per-run query state and its persisted form

use chrono::{DateTime, Utc};
use rpc::Requested;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bundle::{QueryMeta, ResultBundle};
use crate::catalog::{word_count, Shard, ShardCatalog};
use crate::error::RunError;
use crate::estimator::ProgressInput;
use crate::scheduler::SchedulerView;

/// Mutable state of one run, owned by exactly one controller
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState {
    pub job_id: Uuid,
    /// Ascending by size
    pub all_shards: Vec<Shard>,
    /// In merge order
    pub done_shards: Vec<Shard>,
    pub current_shard: Option<Shard>,
    pub total_requested: Requested,
    pub results_so_far: u64,
    /// Matches found in done shards, including those past the cap
    pub matches_seen: u64,
    pub hit_limit_at: Option<u64>,
    /// Matches of `current_shard` delivered by an earlier page
    pub restart_at: u64,
    pub offset: u64,
    pub page_size: u64,
    pub simultaneous: bool,
    pub result_bundle: ResultBundle,
    pub cancelled: bool,
}

/// What an interrupted or paged run is rebuilt from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRun {
    pub job_id: Uuid,
    pub all_shards: Vec<Shard>,
    pub done_shards: Vec<Shard>,
    pub current_shard: Option<Shard>,
    pub total_requested: Requested,
    pub total_results_so_far: u64,
    pub hit_limit_at: Option<u64>,
    pub result_bundle_id0: Option<QueryMeta>,
    pub corpus_word_count: u64,
    #[serde(default)]
    pub matches_seen: u64,
    pub updated_at: DateTime<Utc>,
}

impl PersistedRun {
    pub fn words_processed(&self) -> u64 {
        word_count(&self.done_shards)
    }

    pub fn progress_input(&self) -> ProgressInput {
        ProgressInput {
            matches_so_far: self.total_results_so_far,
            matches_seen: self.matches_seen,
            words_processed: self.words_processed(),
            corpus_words: self.corpus_word_count,
            total_requested: self.total_requested,
            done_shards: self.done_shards.len(),
            all_shards: self.all_shards.len(),
        }
    }
}

impl QueryState {
    pub fn fresh(
        job_id: Uuid,
        all_shards: Vec<Shard>,
        total_requested: Requested,
        page_size: u64,
        offset: u64,
        simultaneous: bool,
    ) -> Self {
        Self {
            job_id,
            all_shards,
            done_shards: Vec::new(),
            current_shard: None,
            total_requested,
            results_so_far: 0,
            matches_seen: 0,
            hit_limit_at: None,
            restart_at: 0,
            offset,
            page_size,
            simultaneous,
            result_bundle: ResultBundle::default(),
            cancelled: false,
        }
    }

    /// Rebuild a run from its persisted form.
    ///
    /// The new request may ask for more results than the original one. A
    /// capped scan continues on the same shard right after the last match
    /// that was delivered.
    pub fn resume(
        run: PersistedRun,
        catalog: &ShardCatalog,
        total_requested: Requested,
        page_size: u64,
        offset: u64,
    ) -> Result<Self, RunError> {
        if let Some(missing) = run.all_shards.iter().find(|s| !catalog.contains(s)) {
            return Err(RunError::InvalidResume(format!("shard '{}' is not in the catalog", missing.name)));
        }
        if let Some(stray) = run.done_shards.iter().find(|s| !run.all_shards.contains(s)) {
            return Err(RunError::InvalidResume(format!("done shard '{}' is not part of the run", stray.name)));
        }
        if let Some(current) = &run.current_shard {
            if !run.all_shards.contains(current) {
                return Err(RunError::InvalidResume(format!("current shard '{}' is not part of the run", current.name)));
            }
        }
        let words = word_count(&run.all_shards);
        if words != run.corpus_word_count {
            return Err(RunError::InvalidResume(format!(
                "corpus word count {} does not match shards ({words})",
                run.corpus_word_count
            )));
        }

        let (current_shard, restart_at) = match run.hit_limit_at {
            Some(marker) => {
                let last = run
                    .done_shards
                    .last()
                    .ok_or_else(|| RunError::InvalidResume("hit limit marker without a scanned shard".into()))?;
                if run.current_shard.as_ref().is_some_and(|c| c != last) {
                    return Err(RunError::InvalidResume("hit limit marker does not belong to the current shard".into()));
                }
                (Some(last.clone()), marker)
            }
            None => (run.current_shard, 0),
        };

        Ok(Self {
            job_id: run.job_id,
            all_shards: run.all_shards,
            done_shards: run.done_shards,
            current_shard,
            total_requested,
            results_so_far: run.total_results_so_far,
            matches_seen: run.matches_seen,
            hit_limit_at: run.hit_limit_at,
            restart_at,
            offset,
            page_size,
            simultaneous: false,
            result_bundle: run.result_bundle_id0.map(ResultBundle::with_meta).unwrap_or_default(),
            cancelled: false,
        })
    }

    pub fn to_persisted(&self) -> PersistedRun {
        PersistedRun {
            job_id: self.job_id,
            all_shards: self.all_shards.clone(),
            done_shards: self.done_shards.clone(),
            current_shard: self.current_shard.clone(),
            total_requested: self.total_requested,
            total_results_so_far: self.results_so_far,
            hit_limit_at: self.hit_limit_at,
            result_bundle_id0: self.result_bundle.meta.clone(),
            corpus_word_count: self.corpus_words(),
            matches_seen: self.matches_seen,
            updated_at: Utc::now(),
        }
    }

    pub fn unlimited(&self) -> bool {
        self.simultaneous || self.total_requested.is_unlimited()
    }

    /// The result cap, unless the run is unlimited
    pub fn cap(&self) -> Option<u64> {
        if self.unlimited() {
            None
        } else {
            self.total_requested.limit()
        }
    }

    pub fn is_done(&self, shard: &Shard) -> bool {
        self.done_shards.contains(shard)
    }

    /// Record `shard` as merged; false if it already was
    pub fn mark_done(&mut self, shard: &Shard) -> bool {
        if self.is_done(shard) {
            return false;
        }
        self.done_shards.push(shard.clone());
        true
    }

    pub fn words_processed(&self) -> u64 {
        word_count(&self.done_shards)
    }

    pub fn corpus_words(&self) -> u64 {
        word_count(&self.all_shards)
    }

    pub fn view(&self) -> SchedulerView<'_> {
        SchedulerView {
            all_shards: &self.all_shards,
            done_shards: &self.done_shards,
            current_shard: self.current_shard.as_ref(),
            results_so_far: self.results_so_far,
            hit_limit_at: self.hit_limit_at,
            total_requested: self.total_requested,
            page_size: self.page_size,
            unlimited: self.unlimited(),
            single_shard: self.all_shards.len() == 1,
        }
    }

    pub fn progress_input(&self) -> ProgressInput {
        ProgressInput {
            matches_so_far: self.results_so_far,
            matches_seen: self.matches_seen,
            words_processed: self.words_processed(),
            corpus_words: self.corpus_words(),
            // simultaneous runs scan everything regardless of the request
            total_requested: if self.unlimited() { Requested::Unlimited } else { self.total_requested },
            done_shards: self.done_shards.len(),
            all_shards: self.all_shards.len(),
        }
    }
}
