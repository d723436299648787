// corpus-core/src/catalog.rs
//! Shard catalog
//!
//! Every corpus is split into shards ("batches") of very different sizes.
//! The catalog is read once and shared read-only by all runs; shards always
//! come out in ascending size order so the scheduler can reason about them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::CatalogError;

/// One scannable partition of a corpus
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shard {
    pub corpus_id: u32,
    /// Where the data engine finds the shard (schema, directory, table prefix)
    pub location: String,
    pub name: String,
    pub size_tokens: u64,
    /// `None` applies to every language of the corpus
    #[serde(default)]
    pub language: Option<String>,
}

impl Shard {
    pub fn new(corpus_id: u32, location: impl Into<String>, name: impl Into<String>, size_tokens: u64) -> Self {
        Self {
            corpus_id,
            location: location.into(),
            name: name.into(),
            size_tokens,
            language: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    fn matches_language(&self, languages: &[String]) -> bool {
        match &self.language {
            None => true,
            Some(lang) => languages.is_empty() || languages.iter().any(|l| l == lang),
        }
    }
}

/// On-disk layout of one corpus file in the catalog directory
#[derive(Debug, Deserialize)]
struct CorpusFile {
    corpus_id: u32,
    shards: Vec<ShardEntry>,
}

#[derive(Debug, Deserialize)]
struct ShardEntry {
    location: String,
    name: String,
    size_tokens: u64,
    #[serde(default)]
    language: Option<String>,
}

/// Immutable per-corpus shard lists
#[derive(Debug, Clone, Default)]
pub struct ShardCatalog {
    corpora: BTreeMap<u32, Vec<Shard>>,
}

fn sort_ascending(shards: &mut [Shard]) {
    shards.sort_by(|a, b| {
        a.size_tokens
            .cmp(&b.size_tokens)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.corpus_id.cmp(&b.corpus_id))
    });
}

impl ShardCatalog {
    pub fn new(shards: impl IntoIterator<Item = Shard>) -> Self {
        let mut corpora: BTreeMap<u32, Vec<Shard>> = BTreeMap::new();
        for shard in shards {
            corpora.entry(shard.corpus_id).or_default().push(shard);
        }
        for list in corpora.values_mut() {
            sort_ascending(list);
        }
        Self { corpora }
    }

    /// 读取目录下所有 `*.json` 语料描述文件
    pub fn load_dir(dir: &Path) -> Result<Self, CatalogError> {
        let pattern = dir.join("*.json");
        let mut shards = Vec::new();

        for entry in glob::glob(&pattern.to_string_lossy())? {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    let path = e.path().to_path_buf();
                    return Err(CatalogError::Io { path, source: e.into_error() });
                }
            };
            let content = std::fs::read_to_string(&path)
                .map_err(|source| CatalogError::Io { path: path.clone(), source })?;
            let corpus: CorpusFile = serde_json::from_str(&content)
                .map_err(|source| CatalogError::Parse { path: path.clone(), source })?;

            tracing::debug!("[Catalog] {:?}: corpus {} with {} shards", path, corpus.corpus_id, corpus.shards.len());
            shards.extend(corpus.shards.into_iter().map(|s| Shard {
                corpus_id: corpus.corpus_id,
                location: s.location,
                name: s.name,
                size_tokens: s.size_tokens,
                language: s.language,
            }));
        }

        Ok(Self::new(shards))
    }

    pub fn corpus_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.corpora.keys().copied()
    }

    /// Shards of one corpus, ascending by size
    pub fn corpus(&self, corpus_id: u32) -> Option<&[Shard]> {
        self.corpora.get(&corpus_id).map(Vec::as_slice)
    }

    /// Shards of all requested corpora restricted to `languages`, ascending by size
    pub fn shards_for(&self, corpora: &[u32], languages: &[String]) -> Result<Vec<Shard>, CatalogError> {
        let mut seen = HashSet::new();
        let mut selected = Vec::new();
        for id in corpora {
            if !seen.insert(*id) {
                continue;
            }
            let shards = self.corpora.get(id).ok_or(CatalogError::UnknownCorpus(*id))?;
            selected.extend(shards.iter().filter(|s| s.matches_language(languages)).cloned());
        }
        sort_ascending(&mut selected);
        Ok(selected)
    }

    pub fn contains(&self, shard: &Shard) -> bool {
        self.corpora
            .get(&shard.corpus_id)
            .is_some_and(|list| list.contains(shard))
    }

    pub fn len(&self) -> usize {
        self.corpora.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Total tokens across `shards`
pub fn word_count<'a>(shards: impl IntoIterator<Item = &'a Shard>) -> u64 {
    shards.into_iter().map(|s| s.size_tokens).sum()
}
