//! Lazy-loaded embedding service. Process-wide singleton per the
//! REDESIGN FLAGS resolution: a typed service locator behind a
//! `OnceCell` rather than a null-checked global.

use crate::llm::LLMClient;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OnceCell};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Loading,
    Ready,
    Failed,
}

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn encode(&self, text: &str) -> Vec<f32>;
    async fn encode_batch(&self, texts: &[String]) -> Vec<Vec<f32>>;
    fn start_loading(&self);
    async fn wait_until_ready(&self, timeout: Duration) -> bool;
}

pub struct OpenAiEmbeddingService {
    llm: Arc<LLMClient>,
    state_tx: watch::Sender<ReadyState>,
    state_rx: watch::Receiver<ReadyState>,
    loading: OnceCell<()>,
}

impl OpenAiEmbeddingService {
    pub fn new(llm: Arc<LLMClient>) -> Self {
        let (state_tx, state_rx) = watch::channel(ReadyState::Loading);
        OpenAiEmbeddingService { llm, state_tx, state_rx, loading: OnceCell::new() }
    }

    async fn probe(&self) {
        // A cheap readiness probe: the client is ready as soon as
        // credentials are present (no local model weights to load).
        let state = if self.llm.has_credentials() { ReadyState::Ready } else { ReadyState::Failed };
        let _ = self.state_tx.send(state);
    }

    /// Classifies a network failure by substring match per §4.1.
    pub fn is_network_error(message: &str) -> bool {
        let m = message.to_lowercase();
        ["ssl", "eof", "connection", "timeout", "closed", "http", "network", "client"]
            .iter()
            .any(|kw| m.contains(kw))
    }
}

#[async_trait]
impl EmbeddingService for OpenAiEmbeddingService {
    async fn encode(&self, text: &str) -> Vec<f32> {
        if !self.wait_until_ready(Duration::from_secs(5)).await {
            return Vec::new();
        }
        match self.llm.get_embedding(text).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "embedding request failed, degrading to empty vector");
                Vec::new()
            }
        }
    }

    async fn encode_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.encode(t).await);
        }
        out
    }

    fn start_loading(&self) {
        if self.loading.initialized() {
            return;
        }
        let tx = self.state_tx.clone();
        let llm = self.llm.clone();
        tokio::spawn(async move {
            let mut backoff = 1u64;
            for attempt in 0..3 {
                if llm.has_credentials() {
                    let _ = tx.send(ReadyState::Ready);
                    return;
                }
                if attempt < 2 {
                    tokio::time::sleep(Duration::from_secs(2u64.pow(backoff as u32))).await;
                    backoff += 1;
                }
            }
            let _ = tx.send(ReadyState::Failed);
        });
        // Best-effort: mark the cell initialized so repeat calls are
        // idempotent. The probe above drives the actual state.
        let _ = self.loading.set(());
    }

    async fn wait_until_ready(&self, timeout: Duration) -> bool {
        if *self.state_rx.borrow() == ReadyState::Loading {
            self.start_loading();
        }
        if *self.state_rx.borrow() != ReadyState::Loading {
            return *self.state_rx.borrow() == ReadyState::Ready;
        }
        let mut rx = self.state_rx.clone();
        let result = tokio::time::timeout(timeout, async {
            loop {
                if rx.changed().await.is_err() {
                    return false;
                }
                match *rx.borrow() {
                    ReadyState::Ready => return true,
                    ReadyState::Failed => return false,
                    ReadyState::Loading => continue,
                }
            }
        })
        .await;
        result.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_network_errors() {
        assert!(OpenAiEmbeddingService::is_network_error("Connection reset by peer"));
        assert!(OpenAiEmbeddingService::is_network_error("SSL handshake failed"));
        assert!(!OpenAiEmbeddingService::is_network_error("invalid api key"));
    }
}
