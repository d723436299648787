// corpus-core/src/aggregator.rs
//! Merging shard rows into the result bundle
//!
//! A shard is processed in two passes. The query pass counts matches of
//! every enumerable result set and keeps every aggregate row; the sentence
//! pass delivers the enumerable matches themselves together with their
//! sentence context. Only the sentence pass is subject to the result cap.

use std::collections::BTreeMap;

use rpc::Requested;
use serde_json::Value;

use crate::bundle::{Envelope, QueryMeta, RawRow, ResultBundle};
use crate::config::CapPolicy;
use crate::error::AggregateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Query,
    Sentences,
}

/// Paging position of the shard being merged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddContext {
    /// Results delivered by earlier shards of this run
    pub results_so_far_before: u64,
    pub unlimited: bool,
    /// Matches of this shard already delivered in an earlier page; they
    /// count toward the cap, so a page covers `offset..total_requested`
    pub offset: u64,
    /// Matches of this shard to skip when resuming a capped scan
    pub restart_at: u64,
    pub total_requested: Requested,
    pub kind: CallbackKind,
}

impl AddContext {
    fn cap(&self) -> Option<u64> {
        if self.unlimited {
            None
        } else {
            self.total_requested.limit()
        }
    }
}

/// What one callback contributed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShardResults {
    pub delta: ResultBundle,
    /// Matches counted for this shard (largest count among enumerable sets)
    pub match_count: u64,
    /// Per result set match counts
    pub counts: BTreeMap<u32, u64>,
}

#[derive(Default)]
struct SetCursor {
    restart_skipped: u64,
    offset_skipped: u64,
    counted: u64,
    appended: u64,
}

/// Merge one callback's rows into a fresh bundle delta.
///
/// `meta` is the run's metadata when already known; otherwise the rows must
/// carry it as result set `0`.
pub fn add_results(
    rows: &[RawRow],
    ctx: &AddContext,
    meta: Option<&QueryMeta>,
    policy: &CapPolicy,
) -> Result<ShardResults, AggregateError> {
    let envelopes = rows
        .iter()
        .map(|(id, payload)| Envelope::parse(*id, payload))
        .collect::<Result<Vec<_>, _>>()?;

    let mut delta = ResultBundle::default();
    for envelope in &envelopes {
        if let Envelope::Metadata(m) = envelope {
            if delta.meta.is_none() {
                delta.meta = Some(m.clone());
            }
        }
    }
    let meta = meta.or(delta.meta.as_ref()).cloned();

    let cap = ctx.cap();
    let mut cursors: BTreeMap<u32, SetCursor> = BTreeMap::new();

    for envelope in envelopes {
        match envelope {
            Envelope::Metadata(_) => {}
            Envelope::Sentence { content_id, payload } => {
                if ctx.kind == CallbackKind::Sentences {
                    delta.sentences.insert(content_id, payload);
                }
            }
            Envelope::Row { set, payload } => {
                let meta = meta.as_ref().ok_or(AggregateError::MissingMetadata)?;
                if !meta.is_enumerable(set, policy) {
                    // aggregates see every line, once, during the query pass
                    if ctx.kind == CallbackKind::Query {
                        delta.sets.entry(set).or_default().push(payload);
                    }
                    continue;
                }

                let cursor = cursors.entry(set).or_default();
                if cursor.restart_skipped < ctx.restart_at {
                    cursor.restart_skipped += 1;
                    continue;
                }
                match ctx.kind {
                    CallbackKind::Query => cursor.counted += 1,
                    CallbackKind::Sentences => {
                        if cursor.offset_skipped < ctx.offset {
                            cursor.offset_skipped += 1;
                            continue;
                        }
                        cursor.counted += 1;
                        let delivered = ctx.results_so_far_before + cursor.offset_skipped + cursor.appended;
                        let full = cap.is_some_and(|limit| delivered >= limit);
                        if !full {
                            cursor.appended += 1;
                            delta.sets.entry(set).or_default().push(payload);
                        }
                    }
                }
            }
        }
    }

    if let (Some(limit), Some(meta)) = (cap, meta.as_ref()) {
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        for (id, list) in delta.sets.iter_mut() {
            if meta.is_enumerable(*id, policy) {
                list.truncate(limit);
            }
        }
    }

    let counts: BTreeMap<u32, u64> = cursors.into_iter().map(|(id, c)| (id, c.counted)).collect();
    let match_count = counts.values().copied().max().unwrap_or(0);

    Ok(ShardResults {
        delta,
        match_count,
        counts,
    })
}

/// Merge `incoming` into `accumulated`.
///
/// Metadata is adopted only if missing, sentences are merged key by key and
/// result lists are concatenated. Nothing here guards against applying the
/// same shard twice; callers track applied job ids.
pub fn union_results(accumulated: &mut ResultBundle, incoming: ResultBundle) {
    if accumulated.meta.is_none() {
        accumulated.meta = incoming.meta;
    }
    accumulated.sentences.extend(incoming.sentences);
    for (id, rows) in incoming.sets {
        accumulated.sets.entry(id).or_default().extend(rows);
    }
}

/// The enumerable rows of a query pass, handed to the sentence job
pub fn enumerable_rows(rows: &[RawRow], meta: &QueryMeta, policy: &CapPolicy) -> Vec<RawRow> {
    rows.iter()
        .filter(|(id, _)| u32::try_from(*id).is_ok_and(|set| meta.is_enumerable(set, policy)))
        .cloned()
        .collect::<Vec<(i64, Value)>>()
}
