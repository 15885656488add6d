//! Vector memory tier over three named corpora. Grounded on the
//! teacher's `memory.rs` `MemoryStore` (Arrow record-batch construction,
//! open-or-create-table fallback, `nearest_to` query), generalized from
//! one table to three.

use crate::embedding::EmbeddingService;
use anyhow::{Context, Result};
use arrow::array::{Float32Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use serde_json::Value;
use std::sync::Arc;

const EMBEDDING_DIM: i32 = 1536;

pub const CORPUS_CONVERSATIONS: &str = "conversations";
pub const CORPUS_INSTRUCTION_PATTERNS: &str = "instruction_patterns";
pub const CORPUS_SESSION_SUMMARIES: &str = "session_summaries";

pub const CORPORA: &[&str] = &[CORPUS_CONVERSATIONS, CORPUS_INSTRUCTION_PATTERNS, CORPUS_SESSION_SUMMARIES];

pub struct VectorStore {
    conn: lancedb::Connection,
    embedding: Arc<dyn EmbeddingService>,
}

#[derive(Debug, Clone)]
pub struct Neighbor {
    pub text: String,
    pub metadata: Value,
}

impl VectorStore {
    pub async fn new(uri: &str, embedding: Arc<dyn EmbeddingService>) -> Result<Self> {
        let conn = lancedb::connect(uri).execute().await.context("failed to open vector store")?;
        Ok(VectorStore { conn, embedding })
    }

    pub async fn add(&self, corpus: &str, text: &str, metadata: Value) -> Result<()> {
        let vector = self.embedding.encode(text).await;
        if vector.is_empty() {
            // Embedding service unavailable; vector tier degrades to a
            // no-op per §4.3, structured/keyword search remains live.
            return Ok(());
        }

        let schema = Arc::new(Schema::new(vec![
            Field::new("text", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), EMBEDDING_DIM),
                false,
            ),
        ]));

        let text_array = StringArray::from(vec![text]);
        let metadata_array = StringArray::from(vec![metadata.to_string()]);
        let values = Float32Array::from(vector.clone());
        let vector_array = arrow::array::FixedSizeListArray::try_new(
            Arc::new(Field::new("item", DataType::Float32, true)),
            EMBEDDING_DIM,
            Arc::new(values),
            None,
        )?;

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(text_array), Arc::new(metadata_array), Arc::new(vector_array)],
        )?;

        let batches = arrow::record_batch::RecordBatchIterator::new(vec![Ok(batch)], schema.clone());

        match self.conn.open_table(corpus).execute().await {
            Ok(table) => {
                table.add(Box::new(batches)).execute().await?;
            }
            Err(_) => {
                self.conn.create_table(corpus, Box::new(batches)).execute().await?;
            }
        }
        Ok(())
    }

    pub async fn search(&self, corpus: &str, query: &str, limit: usize) -> Result<Vec<Neighbor>> {
        let vector = self.embedding.encode(query).await;
        if vector.is_empty() {
            return Ok(Vec::new());
        }
        let table = match self.conn.open_table(corpus).execute().await {
            Ok(t) => t,
            Err(_) => return Ok(Vec::new()),
        };

        let mut stream = table.query().nearest_to(vector)?.limit(limit).execute().await?;

        let mut results = Vec::new();
        while let Some(batch) = stream.try_next().await? {
            let texts = batch
                .column_by_name("text")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>().cloned());
            let metas = batch
                .column_by_name("metadata")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>().cloned());

            if let (Some(texts), Some(metas)) = (texts, metas) {
                for i in 0..texts.len() {
                    let text = texts.value(i).to_string();
                    let metadata: Value =
                        serde_json::from_str(metas.value(i)).unwrap_or(Value::Null);
                    results.push(Neighbor { text, metadata });
                }
            }
        }
        Ok(results)
    }

    /// Searches all three corpora, returning per-corpus top-k.
    pub async fn search_all(&self, query: &str, limit: usize) -> Vec<(&'static str, Vec<Neighbor>)> {
        let mut out = Vec::with_capacity(CORPORA.len());
        for corpus in CORPORA {
            let hits = self.search(corpus, query, limit).await.unwrap_or_default();
            out.push((*corpus, hits));
        }
        out
    }
}
