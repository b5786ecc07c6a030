//! LLM Router (C5)
//! Mission: route chat/completion calls across providers and models with key
//! rotation, cross-model fallback, and retry-with-backoff.

mod keypool;
mod provider;

pub use provider::{ChatMessage, ChatRequest, ChatResponse, LlmProvider, LlmError, OpenAiCompatProvider, ToolCall, ToolSpec};

use keypool::KeyPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// One entry in the router's ordered fallback chain.
pub struct ModelEntry {
    pub provider: Arc<dyn LlmProvider>,
    pub model: String,
}

pub struct LlmRouter {
    chain: Vec<ModelEntry>,
    key_pools: HashMap<String, KeyPool>,
    max_retries: u32,
}

impl LlmRouter {
    pub fn new(chain: Vec<ModelEntry>, keys_by_provider: HashMap<String, Vec<String>>, max_retries: u32) -> Self {
        let key_pools = keys_by_provider
            .into_iter()
            .map(|(provider, keys)| (provider, KeyPool::new(keys, Duration::from_secs(60))))
            .collect();
        Self {
            chain,
            key_pools,
            max_retries,
        }
    }

    /// Walk the fallback chain; within each model, rotate keys and retry with
    /// exponential backoff 1s -> 10s capped at `max_retries` attempts.
    pub async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let mut last_err = LlmError::NoModelsConfigured;
        for entry in &self.chain {
            match self.try_model(entry, request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!(provider = entry.provider.id(), model = %entry.model, error = %e, "model failed, falling back");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn try_model(&self, entry: &ModelEntry, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let pool = self.key_pools.get(entry.provider.id());
        let mut attempt = 0;
        loop {
            let key = match pool {
                Some(p) => match p.next_available() {
                    Some(k) => Some(k),
                    None => return Err(LlmError::AllKeysCoolingDown),
                },
                None => None,
            };
            let result = entry
                .provider
                .complete(&entry.model, request, key.as_deref())
                .await;
            match result {
                Ok(response) => return Ok(response),
                Err(LlmError::RateLimited) => {
                    if let (Some(pool), Some(key)) = (pool, &key) {
                        pool.mark_cooldown(key);
                    }
                    debug!(provider = entry.provider.id(), "rate limited, rotating key before retry");
                }
                Err(LlmError::Transient(ref msg)) if attempt < self.max_retries => {
                    let backoff = Duration::from_secs(1u64 << attempt.min(3)).min(Duration::from_secs(10));
                    debug!(attempt, backoff_secs = backoff.as_secs(), error = %msg, "transient failure, backing off");
                    sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
            attempt += 1;
            if attempt > self.max_retries {
                return Err(LlmError::Transient("retries exhausted".into()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        id: &'static str,
        fail_times: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        fn id(&self) -> &'static str {
            self.id
        }
        async fn complete(&self, _model: &str, _req: &ChatRequest, _key: Option<&str>) -> Result<ChatResponse, LlmError> {
            if self.fail_times.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(LlmError::Transient("boom".into()));
            }
            Ok(ChatResponse {
                content: "ok".into(),
                tool_calls: vec![],
                reasoning_blob: None,
            })
        }
    }

    #[tokio::test]
    async fn falls_back_to_next_model_on_hard_failure() {
        let primary = ModelEntry {
            provider: Arc::new(FlakyProvider { id: "p1", fail_times: AtomicU32::new(99) }),
            model: "m1".into(),
        };
        let fallback = ModelEntry {
            provider: Arc::new(FlakyProvider { id: "p2", fail_times: AtomicU32::new(0) }),
            model: "m2".into(),
        };
        let router = LlmRouter::new(vec![primary, fallback], HashMap::new(), 0);
        let request = ChatRequest {
            messages: vec![],
            tools: vec![],
            image_urls: vec![],
        };
        let response = router.complete(&request).await.unwrap();
        assert_eq!(response.content, "ok");
    }

    #[tokio::test]
    async fn retries_transient_within_same_model() {
        let entry = ModelEntry {
            provider: Arc::new(FlakyProvider { id: "p1", fail_times: AtomicU32::new(2) }),
            model: "m1".into(),
        };
        let router = LlmRouter::new(vec![entry], HashMap::new(), 3);
        let request = ChatRequest {
            messages: vec![],
            tools: vec![],
            image_urls: vec![],
        };
        let response = router.complete(&request).await.unwrap();
        assert_eq!(response.content, "ok");
    }
}
