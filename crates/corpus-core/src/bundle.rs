// corpus-core/src/bundle.rs
//! Result bundle and the row envelopes that feed it
//!
//! Rows coming back from the data engine are `(result_set_id, payload)`
//! pairs. The id carries meaning by convention: `0` is query metadata,
//! `-1` is sentence context, anything positive is a result set described by
//! the metadata. [`Envelope`] makes that convention a type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::config::CapPolicy;
use crate::error::AggregateError;

/// Raw row as produced by the data engine
pub type RawRow = (i64, Value);

pub const METADATA_ID: i64 = 0;
pub const SENTENCES_ID: i64 = -1;

/// Static description of one result set, produced by the query translator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSetMeta {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResultSetMeta {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: None,
            extra: Map::new(),
        }
    }
}

/// Query metadata (result set id `0`)
///
/// Result set ids are 1-based positions in `result_sets`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMeta {
    pub result_sets: Vec<ResultSetMeta>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl QueryMeta {
    pub fn new(result_sets: Vec<ResultSetMeta>) -> Self {
        Self {
            result_sets,
            extra: Map::new(),
        }
    }

    pub fn kind_of(&self, id: u32) -> Option<&str> {
        let index = (id as usize).checked_sub(1)?;
        self.result_sets.get(index).map(|rs| rs.kind.as_str())
    }

    /// Whether result set `id` is a capped match list
    pub fn is_enumerable(&self, id: u32, policy: &CapPolicy) -> bool {
        self.kind_of(id).is_some_and(|kind| policy.is_enumerable(kind))
    }

    pub fn enumerable_ids(&self, policy: &CapPolicy) -> Vec<u32> {
        (1..=self.result_sets.len() as u32)
            .filter(|id| self.is_enumerable(*id, policy))
            .collect()
    }
}

/// Typed view of a raw row
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Metadata(QueryMeta),
    Sentence { content_id: String, payload: Value },
    Row { set: u32, payload: Value },
}

impl Envelope {
    pub fn parse(id: i64, payload: &Value) -> Result<Self, AggregateError> {
        match id {
            METADATA_ID => serde_json::from_value(payload.clone())
                .map(Envelope::Metadata)
                .map_err(|e| AggregateError::MalformedRow { id, reason: e.to_string() }),
            SENTENCES_ID => parse_sentence(payload),
            n if n > 0 => u32::try_from(n)
                .map(|set| Envelope::Row { set, payload: payload.clone() })
                .map_err(|_| AggregateError::MalformedRow { id, reason: "result set id out of range".into() }),
            _ => Err(AggregateError::MalformedRow { id, reason: "unknown result set id".into() }),
        }
    }
}

/// Sentence rows are `[content_id, ...context]`.
fn parse_sentence(payload: &Value) -> Result<Envelope, AggregateError> {
    let malformed = |reason: &str| AggregateError::MalformedRow { id: SENTENCES_ID, reason: reason.to_string() };

    let items = payload.as_array().ok_or_else(|| malformed("sentence row is not an array"))?;
    let (first, rest) = items.split_first().ok_or_else(|| malformed("sentence row is empty"))?;
    let content_id = match first {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return Err(malformed("sentence id must be a string or number")),
    };
    Ok(Envelope::Sentence {
        content_id,
        payload: Value::Array(rest.to_vec()),
    })
}

/// Accumulated results of a run, keyed by result set id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultBundle {
    /// id `0`, written once
    pub meta: Option<QueryMeta>,
    /// id `-1`, keyed by content id
    pub sentences: BTreeMap<String, Value>,
    /// ids `> 0`, in insertion (shard scan) order
    pub sets: BTreeMap<u32, Vec<Value>>,
}

impl ResultBundle {
    pub fn with_meta(meta: QueryMeta) -> Self {
        Self {
            meta: Some(meta),
            ..Default::default()
        }
    }

    pub fn set(&self, id: u32) -> &[Value] {
        self.sets.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_none() && self.sentences.is_empty() && self.sets.values().all(Vec::is_empty)
    }

    /// Cut every enumerable list down to `limit` entries
    pub fn truncate_enumerable(&mut self, limit: u64, policy: &CapPolicy) {
        let Some(meta) = &self.meta else { return };
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        for (id, rows) in self.sets.iter_mut() {
            if meta.is_enumerable(*id, policy) {
                rows.truncate(limit);
            }
        }
    }

    /// Raw form with integer keys, as the outer service forwards it
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        if let Some(meta) = &self.meta {
            out.insert(METADATA_ID.to_string(), serde_json::to_value(meta).unwrap_or(Value::Null));
        }
        if !self.sentences.is_empty() {
            let sentences: Map<String, Value> = self.sentences.clone().into_iter().collect();
            out.insert(SENTENCES_ID.to_string(), Value::Object(sentences));
        }
        for (id, rows) in &self.sets {
            out.insert(id.to_string(), Value::Array(rows.clone()));
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn meta() -> QueryMeta {
        serde_json::from_value(json!({
            "result_sets": [
                {"type": "plain", "name": "matches"},
                {"type": "analysis", "name": "freq", "attributes": ["lemma"]},
                {"type": "collocation"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_meta_classification() {
        let meta = meta();
        let policy = CapPolicy::default();
        assert!(meta.is_enumerable(1, &policy));
        assert!(!meta.is_enumerable(2, &policy));
        assert!(!meta.is_enumerable(4, &policy));
        assert_eq!(meta.enumerable_ids(&policy), vec![1]);
        assert!(meta.result_sets[1].extra.contains_key("attributes"));
    }

    #[rstest]
    #[case(json!(["s12", 3, ["the", "cat"]]), "s12")]
    #[case(json!([42, ["a"]]), "42")]
    fn test_parse_sentence(#[case] payload: Value, #[case] id: &str) {
        match Envelope::parse(SENTENCES_ID, &payload).unwrap() {
            Envelope::Sentence { content_id, payload } => {
                assert_eq!(content_id, id);
                assert!(payload.is_array());
            }
            other => panic!("unexpected envelope {other:?}"),
        }
    }

    #[rstest]
    #[case(SENTENCES_ID, json!([]))]
    #[case(SENTENCES_ID, json!({"id": 1}))]
    #[case(METADATA_ID, json!({"no_sets": true}))]
    #[case(-5, json!([1]))]
    fn test_parse_rejects(#[case] id: i64, #[case] payload: Value) {
        assert!(Envelope::parse(id, &payload).is_err());
    }

    #[test]
    fn test_truncate_enumerable_only() {
        let mut bundle = ResultBundle::with_meta(meta());
        bundle.sets.insert(1, (0..5).map(|i| json!(i)).collect());
        bundle.sets.insert(2, (0..5).map(|i| json!(i)).collect());
        bundle.truncate_enumerable(3, &CapPolicy::default());
        assert_eq!(bundle.set(1).len(), 3);
        assert_eq!(bundle.set(2).len(), 5);
    }

    #[test]
    fn test_to_json_keys() {
        let mut bundle = ResultBundle::with_meta(meta());
        bundle.sentences.insert("s1".into(), json!(["ctx"]));
        bundle.sets.insert(1, vec![json!("m")]);
        let value = bundle.to_json();
        assert!(value.get("0").is_some());
        assert_eq!(value["-1"]["s1"], json!(["ctx"]));
        assert_eq!(value["1"], json!(["m"]));
    }
}
