/// Tantivy BM25 lexical index over chunk text
use super::Tokenizer;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tantivy::collector::{DocSetCollector, TopDocs};
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};
use thiserror::Error;
use tokio::sync::RwLock;

/// Analyzer registered for the `content` field; built by [`Tokenizer::analyzer`]
const CONTENT_ANALYZER: &str = "conflux_words";

#[derive(Error, Debug)]
pub enum LexicalIndexError {
    #[error("Lexical index is corrupted: {0}")]
    Corrupted(String),

    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Write failed: {0}")]
    WriteError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct LexicalIndexConfig {
    /// Directory for the on-disk index; `None` keeps it in RAM
    pub path: Option<PathBuf>,
    /// Tantivy writer memory budget
    pub writer_heap_bytes: usize,
}

impl Default for LexicalIndexConfig {
    fn default() -> Self {
        Self {
            path: None,
            writer_heap_bytes: 50_000_000,
        }
    }
}

/// A chunk as stored in the lexical index
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalEntry {
    pub chunk_id: String,
    pub file_id: String,
    pub content: String,
}

/// Keyword hit with its raw, unbounded BM25 score
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub chunk_id: String,
    pub score: f32,
}

#[derive(Clone, Copy)]
struct Fields {
    chunk_id: Field,
    file_id: Field,
    content: Field,
    seq: Field,
}

impl Fields {
    fn schema() -> (Schema, Self) {
        let mut builder = Schema::builder();

        let content_options = TextOptions::default()
            .set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer(CONTENT_ANALYZER)
                    .set_index_option(IndexRecordOption::WithFreqsAndPositions),
            )
            .set_stored();

        let fields = Self {
            chunk_id: builder.add_text_field("chunk_id", STRING | STORED),
            file_id: builder.add_text_field("file_id", STRING | STORED),
            content: builder.add_text_field("content", content_options),
            seq: builder.add_u64_field("seq", STORED),
        };
        (builder.build(), fields)
    }

    fn from_schema(schema: &Schema) -> Result<Self, LexicalIndexError> {
        let get = |name: &str| {
            schema.get_field(name).map_err(|_| {
                LexicalIndexError::Corrupted(format!("Missing '{}' field in schema", name))
            })
        };
        Ok(Self {
            chunk_id: get("chunk_id")?,
            file_id: get("file_id")?,
            content: get("content")?,
            seq: get("seq")?,
        })
    }
}

/// Open tantivy index plus an in-memory mirror of its documents.
///
/// The mirror is the corpus used for full rebuilds, kept in insertion order.
/// The writer sits behind its own mutex so commits can run on the blocking pool.
struct Engine {
    reader: IndexReader,
    writer: Arc<Mutex<IndexWriter>>,
    fields: Fields,
    entries: Vec<LexicalEntry>,
    ids: HashSet<String>,
    next_seq: u64,
}

enum LexicalState {
    Ready(Engine),
    Corrupted(String),
}

/// BM25 keyword index
///
/// Writers take the state lock exclusively and commit before releasing it, so
/// a reader sees either the previous or the next committed corpus.
pub struct LexicalIndex {
    tokenizer: Tokenizer,
    config: LexicalIndexConfig,
    state: RwLock<LexicalState>,
}

impl LexicalIndex {
    /// Open the index at the configured location, creating it when absent.
    ///
    /// An unreadable on-disk index does not fail construction: the index comes
    /// up corrupted and reports so until [`LexicalIndex::build`] replaces it.
    pub fn open(config: LexicalIndexConfig) -> Result<Self, LexicalIndexError> {
        let tokenizer = Tokenizer::new();
        let state = match Self::open_engine(&config, &tokenizer) {
            Ok(engine) => {
                tracing::info!("Lexical index opened with {} documents", engine.entries.len());
                LexicalState::Ready(engine)
            }
            Err(LexicalIndexError::Corrupted(reason)) => {
                tracing::error!("Lexical index is corrupted: {}", reason);
                LexicalState::Corrupted(reason)
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            tokenizer,
            config,
            state: RwLock::new(state),
        })
    }

    /// In-memory index, mostly for tests
    pub fn in_memory() -> Result<Self, LexicalIndexError> {
        Self::open(LexicalIndexConfig::default())
    }

    fn open_engine(
        config: &LexicalIndexConfig,
        tokenizer: &Tokenizer,
    ) -> Result<Engine, LexicalIndexError> {
        let index = match &config.path {
            Some(path) if path.join("meta.json").exists() => Index::open_in_dir(path)
                .map_err(|e| LexicalIndexError::Corrupted(e.to_string()))?,
            Some(path) => {
                std::fs::create_dir_all(path)?;
                let (schema, _) = Fields::schema();
                Index::create_in_dir(path, schema)
                    .map_err(|e| LexicalIndexError::InitializationError(e.to_string()))?
            }
            None => {
                let (schema, _) = Fields::schema();
                Index::create_in_ram(schema)
            }
        };

        index
            .tokenizers()
            .register(CONTENT_ANALYZER, tokenizer.analyzer());

        let fields = Fields::from_schema(&index.schema())?;

        let writer = index
            .writer_with_num_threads(1, config.writer_heap_bytes)
            .map_err(|e| LexicalIndexError::InitializationError(e.to_string()))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| LexicalIndexError::InitializationError(e.to_string()))?;

        let mut engine = Engine {
            reader,
            writer: Arc::new(Mutex::new(writer)),
            fields,
            entries: Vec::new(),
            ids: HashSet::new(),
            next_seq: 0,
        };
        engine.load_entries()?;
        Ok(engine)
    }

    /// Replace the whole corpus. Duplicate chunk ids keep their first occurrence.
    pub async fn build(&self, entries: Vec<LexicalEntry>) -> Result<usize, LexicalIndexError> {
        let mut state = self.state.write().await;

        if let LexicalState::Corrupted(_) = &*state {
            tracing::warn!("Recreating corrupted lexical index");
            if let Some(path) = &self.config.path {
                std::fs::remove_dir_all(path)?;
            }
            *state = LexicalState::Ready(Self::open_engine(&self.config, &self.tokenizer)?);
        }

        let LexicalState::Ready(engine) = &mut *state else {
            return Err(LexicalIndexError::Corrupted("index unavailable".to_string()));
        };

        let mut seen = HashSet::new();
        let entries: Vec<LexicalEntry> = entries
            .into_iter()
            .filter(|e| seen.insert(e.chunk_id.clone()))
            .collect();

        engine.replace_all(entries).await?;
        tracing::info!("Lexical index built with {} documents", engine.entries.len());
        Ok(engine.entries.len())
    }

    /// Append chunks without recomputing existing statistics.
    ///
    /// Already-indexed chunk ids are skipped. Returns the number added.
    pub async fn update(&self, entries: Vec<LexicalEntry>) -> Result<usize, LexicalIndexError> {
        let mut state = self.state.write().await;
        let engine = ready_mut(&mut state)?;

        let mut seen = HashSet::new();
        let mut fresh = Vec::new();
        for entry in entries {
            if engine.ids.contains(&entry.chunk_id) || !seen.insert(entry.chunk_id.clone()) {
                tracing::warn!("Chunk {} already in lexical index, skipping", entry.chunk_id);
                continue;
            }
            fresh.push(entry);
        }

        if fresh.is_empty() {
            return Ok(0);
        }

        let added = fresh.len();
        engine.append(fresh).await?;
        tracing::info!(
            "Added {} documents to lexical index ({} total)",
            added,
            engine.entries.len()
        );
        Ok(added)
    }

    /// Drop every chunk of `file_id` and rebuild from the survivors.
    ///
    /// Returns the number of chunks removed; no rebuild happens when it is 0.
    pub async fn remove(&self, file_id: &str) -> Result<usize, LexicalIndexError> {
        let mut state = self.state.write().await;
        let engine = ready_mut(&mut state)?;

        let before = engine.entries.len();
        let survivors: Vec<LexicalEntry> = engine
            .entries
            .iter()
            .filter(|e| e.file_id != file_id)
            .cloned()
            .collect();
        let removed = before - survivors.len();
        if removed == 0 {
            return Ok(0);
        }

        engine.replace_all(survivors).await?;
        tracing::info!(
            "Rebuilt lexical index: removed {} documents, {} remain",
            removed,
            engine.entries.len()
        );
        Ok(removed)
    }

    /// Tokenize `query` and search
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<LexicalHit>, LexicalIndexError> {
        let tokens = self.tokenizer.tokenize(query);
        self.search_tokens(&tokens, k).await
    }

    /// BM25 search over already-tokenized query terms.
    ///
    /// Any single matching term qualifies a document. An empty corpus or an
    /// empty token list yields no hits. `k` is capped at the corpus size.
    pub async fn search_tokens(
        &self,
        tokens: &[String],
        k: usize,
    ) -> Result<Vec<LexicalHit>, LexicalIndexError> {
        let state = self.state.read().await;
        let engine = ready(&state)?;

        if engine.entries.is_empty() || tokens.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let k = k.min(engine.entries.len());

        let clauses: Vec<(Occur, Box<dyn Query>)> = tokens
            .iter()
            .map(|token| {
                let term = Term::from_field_text(engine.fields.content, token);
                let query: Box<dyn Query> =
                    Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs));
                (Occur::Should, query)
            })
            .collect();
        let query = BooleanQuery::new(clauses);

        let searcher = engine.reader.searcher();
        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(k))
            .map_err(|e| LexicalIndexError::SearchError(e.to_string()))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| LexicalIndexError::SearchError(e.to_string()))?;
            let chunk_id = doc
                .get_first(engine.fields.chunk_id)
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    LexicalIndexError::SearchError("Missing chunk_id field".to_string())
                })?;
            hits.push(LexicalHit {
                chunk_id: chunk_id.to_string(),
                score,
            });
        }

        Ok(hits)
    }

    /// Number of indexed chunks (0 when corrupted)
    pub async fn len(&self) -> usize {
        match &*self.state.read().await {
            LexicalState::Ready(engine) => engine.entries.len(),
            LexicalState::Corrupted(_) => 0,
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, chunk_id: &str) -> bool {
        match &*self.state.read().await {
            LexicalState::Ready(engine) => engine.ids.contains(chunk_id),
            LexicalState::Corrupted(_) => false,
        }
    }

    /// Current availability, with the reason when unusable
    pub async fn status(&self) -> Result<(), LexicalIndexError> {
        ready(&*self.state.read().await).map(|_| ())
    }

    /// Bytes used by the on-disk index directory
    pub fn disk_size(&self) -> u64 {
        let Some(path) = &self.config.path else {
            return 0;
        };
        std::fs::read_dir(path)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.metadata().ok())
                    .filter(|m| m.is_file())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0)
    }
}

impl Engine {
    fn load_entries(&mut self) -> Result<(), LexicalIndexError> {
        let searcher = self.reader.searcher();
        let addresses = searcher
            .search(&AllQuery, &DocSetCollector)
            .map_err(|e| LexicalIndexError::Corrupted(e.to_string()))?;

        let mut loaded = Vec::with_capacity(addresses.len());
        for address in addresses {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| LexicalIndexError::Corrupted(e.to_string()))?;
            let text = |field: Field| {
                doc.get_first(field)
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .ok_or_else(|| LexicalIndexError::Corrupted("Stored document is incomplete".to_string()))
            };
            let seq = doc
                .get_first(self.fields.seq)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| LexicalIndexError::Corrupted("Stored document has no seq".to_string()))?;
            loaded.push((
                seq,
                LexicalEntry {
                    chunk_id: text(self.fields.chunk_id)?,
                    file_id: text(self.fields.file_id)?,
                    content: text(self.fields.content)?,
                },
            ));
        }

        loaded.sort_by_key(|(seq, _)| *seq);
        self.next_seq = loaded.last().map(|(seq, _)| seq + 1).unwrap_or(0);
        self.ids = loaded.iter().map(|(_, e)| e.chunk_id.clone()).collect();
        self.entries = loaded.into_iter().map(|(_, e)| e).collect();
        Ok(())
    }

    /// Stage `entries` (after clearing the index when `replace`), commit and
    /// reload the reader on the blocking pool. Hands the entries back on success.
    async fn commit_entries(
        &self,
        entries: Vec<LexicalEntry>,
        first_seq: u64,
        replace: bool,
    ) -> Result<Vec<LexicalEntry>, LexicalIndexError> {
        let writer = Arc::clone(&self.writer);
        let reader = self.reader.clone();
        let fields = self.fields;

        tokio::task::spawn_blocking(move || {
            let mut writer = writer
                .lock()
                .map_err(|_| LexicalIndexError::WriteError("writer lock poisoned".to_string()))?;

            let committed = stage(&writer, fields, &entries, first_seq, replace).and_then(|_| {
                writer
                    .commit()
                    .map(|_| ())
                    .map_err(|e| LexicalIndexError::WriteError(e.to_string()))
            });
            if let Err(e) = committed {
                let _ = writer.rollback();
                return Err(e);
            }

            reader
                .reload()
                .map_err(|e| LexicalIndexError::WriteError(e.to_string()))?;
            Ok::<_, LexicalIndexError>(entries)
        })
        .await
        .map_err(|e| LexicalIndexError::WriteError(format!("commit task failed: {}", e)))?
    }

    async fn append(&mut self, fresh: Vec<LexicalEntry>) -> Result<(), LexicalIndexError> {
        let first_seq = self.next_seq;
        let fresh = self.commit_entries(fresh, first_seq, false).await?;

        self.next_seq = first_seq + fresh.len() as u64;
        for entry in fresh {
            self.ids.insert(entry.chunk_id.clone());
            self.entries.push(entry);
        }
        Ok(())
    }

    async fn replace_all(&mut self, entries: Vec<LexicalEntry>) -> Result<(), LexicalIndexError> {
        let entries = self.commit_entries(entries, 0, true).await?;

        self.next_seq = entries.len() as u64;
        self.ids = entries.iter().map(|e| e.chunk_id.clone()).collect();
        self.entries = entries;
        Ok(())
    }
}

fn stage(
    writer: &IndexWriter,
    fields: Fields,
    entries: &[LexicalEntry],
    first_seq: u64,
    replace: bool,
) -> Result<(), LexicalIndexError> {
    if replace {
        writer
            .delete_all_documents()
            .map_err(|e| LexicalIndexError::WriteError(e.to_string()))?;
    }
    for (offset, entry) in entries.iter().enumerate() {
        writer
            .add_document(doc!(
                fields.chunk_id => entry.chunk_id.as_str(),
                fields.file_id => entry.file_id.as_str(),
                fields.content => entry.content.as_str(),
                fields.seq => first_seq + offset as u64,
            ))
            .map_err(|e| LexicalIndexError::WriteError(e.to_string()))?;
    }
    Ok(())
}

fn ready(state: &LexicalState) -> Result<&Engine, LexicalIndexError> {
    match state {
        LexicalState::Ready(engine) => Ok(engine),
        LexicalState::Corrupted(reason) => Err(LexicalIndexError::Corrupted(reason.clone())),
    }
}

fn ready_mut(state: &mut LexicalState) -> Result<&mut Engine, LexicalIndexError> {
    match state {
        LexicalState::Ready(engine) => Ok(engine),
        LexicalState::Corrupted(reason) => Err(LexicalIndexError::Corrupted(reason.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(chunk_id: &str, file_id: &str, content: &str) -> LexicalEntry {
        LexicalEntry {
            chunk_id: chunk_id.to_string(),
            file_id: file_id.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_empty_corpus_returns_nothing() {
        let index = LexicalIndex::in_memory().unwrap();
        assert!(index.search("anything", 10).await.unwrap().is_empty());
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn test_both_terms_rank_first() {
        let index = LexicalIndex::in_memory().unwrap();
        index
            .build(vec![
                entry("c1", "f1", "I like apple pie"),
                entry("c2", "f1", "banana split for dessert"),
                entry("c3", "f2", "apple and banana smoothie"),
            ])
            .await
            .unwrap();

        let hits = index.search("apple banana", 10).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk_id, "c3");
        assert!(hits.iter().all(|h| h.score > 0.0));
    }

    #[tokio::test]
    async fn test_query_tokenized_like_documents() {
        let index = LexicalIndex::in_memory().unwrap();
        index
            .update(vec![entry("c1", "f1", "Config_Value=42; see README")])
            .await
            .unwrap();

        assert_eq!(index.search("CONFIG", 5).await.unwrap().len(), 1);
        assert_eq!(index.search("readme!!", 5).await.unwrap().len(), 1);
        assert_eq!(index.search("value-42", 5).await.unwrap().len(), 1);
        assert!(index.search("configvalue", 5).await.unwrap().is_empty());
        assert!(index.search("...", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_limit_larger_than_corpus() {
        let index = LexicalIndex::in_memory().unwrap();
        index
            .update(vec![entry("c1", "f1", "apple"), entry("c2", "f1", "apple pie")])
            .await
            .unwrap();

        let hits = index.search("apple", usize::MAX).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_update_skips_existing_ids() {
        let index = LexicalIndex::in_memory().unwrap();
        assert_eq!(index.update(vec![entry("c1", "f1", "one")]).await.unwrap(), 1);
        assert_eq!(
            index
                .update(vec![entry("c1", "f1", "one"), entry("c2", "f1", "two")])
                .await
                .unwrap(),
            1
        );
        assert_eq!(index.len().await, 2);
    }

    #[tokio::test]
    async fn test_remove_rebuilds_without_file() {
        let index = LexicalIndex::in_memory().unwrap();
        index
            .build(vec![
                entry("a1", "fa", "zebra stripes"),
                entry("b1", "fb", "zebra crossing"),
            ])
            .await
            .unwrap();

        assert_eq!(index.remove("fa").await.unwrap(), 1);
        let hits = index.search("zebra stripes", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "b1");
        assert!(!index.contains("a1").await);
        assert_eq!(index.remove("fa").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reopen_restores_corpus_in_order() {
        let temp = TempDir::new().unwrap();
        let config = LexicalIndexConfig {
            path: Some(temp.path().join("lexical")),
            ..Default::default()
        };

        {
            let index = LexicalIndex::open(config.clone()).unwrap();
            index
                .update(vec![entry("c1", "f1", "first"), entry("c2", "f2", "second")])
                .await
                .unwrap();
            index.update(vec![entry("c3", "f1", "third")]).await.unwrap();
            index.remove("f2").await.unwrap();
        }

        let reopened = LexicalIndex::open(config).unwrap();
        assert_eq!(reopened.len().await, 2);
        assert!(reopened.contains("c3").await);
        assert_eq!(reopened.search("third", 5).await.unwrap()[0].chunk_id, "c3");
        assert!(reopened.disk_size() > 0);
    }

    #[tokio::test]
    async fn test_corrupted_directory_until_build() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("lexical");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("meta.json"), b"{not json").unwrap();

        let index = LexicalIndex::open(LexicalIndexConfig {
            path: Some(path),
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(
            index.status().await,
            Err(LexicalIndexError::Corrupted(_))
        ));
        assert!(index.search("x", 1).await.is_err());

        index.build(vec![entry("c1", "f1", "restored")]).await.unwrap();
        assert!(index.status().await.is_ok());
        assert_eq!(index.search("restored", 1).await.unwrap().len(), 1);
    }
}
