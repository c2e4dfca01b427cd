//! Deterministic stand-ins for the embedding service and the chat model.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use campus_knowledge::embedding::{normalize, EmbeddingProvider};
use campus_knowledge::error::{PipelineError, Result};
use campus_knowledge::llm::{ChatModel, ChatRequest, ChatRole};
use campus_knowledge::prompts::REWRITE_INSTRUCTION;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "at", "by", "do", "does", "for", "from", "how", "is", "it", "of",
    "on", "the", "to", "what", "when", "where", "which", "who",
];

/// Bag-of-words embedder: every non-stopword token increments one
/// hash bucket. Texts sharing words score higher under cosine.
pub struct HashEmbedder {
    dims: usize,
    fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Arc<Self> {
        Arc::new(Self {
            dims,
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    /// Make every following call fail with `EmbeddingService`.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
        {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                % self.dims;
            v[bucket] += 1.0;
        }
        if v.iter().all(|x| *x == 0.0) {
            v[0] = 1.0;
        }
        normalize(&mut v);
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-test"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(PipelineError::EmbeddingService {
                provider: "hash-test".to_string(),
                message: "service unreachable".to_string(),
            });
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

type Responder = dyn Fn(&ChatRequest) -> Result<String> + Send + Sync;

/// Chat model driven by a closure. Records every request.
pub struct ScriptedModel {
    respond: Box<Responder>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new(respond: impl Fn(&ChatRequest) -> Result<String> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Rewrites by returning the last user message; answers with the first
    /// `facts` entry present in the system prompt, or a fixed fallback.
    pub fn grounded(facts: &[&str]) -> Arc<Self> {
        let facts: Vec<String> = facts.iter().map(|f| f.to_string()).collect();
        Self::new(move |request| {
            if is_rewrite(request) {
                return Ok(last_user(request));
            }
            let system = &request.messages[0].content;
            Ok(facts
                .iter()
                .find(|fact| system.contains(fact.as_str()))
                .cloned()
                .unwrap_or_else(|| "Please contact the college office for details.".to_string()))
        })
    }

    pub fn failing() -> Arc<Self> {
        Self::new(|_| {
            Err(PipelineError::ModelInvocation {
                message: "request timed out".to_string(),
                retryable: true,
            })
        })
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn answer_requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !is_rewrite(r))
            .cloned()
            .collect()
    }
}

pub fn is_rewrite(request: &ChatRequest) -> bool {
    request
        .messages
        .first()
        .is_some_and(|m| m.role == ChatRole::System && m.content == REWRITE_INSTRUCTION)
}

pub fn last_user(request: &ChatRequest) -> String {
    request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == ChatRole::User)
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted-test"
    }

    async fn generate(&self, request: ChatRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        (self.respond)(&request)
    }
}
