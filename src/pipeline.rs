//! The per-turn query pipeline.
//!
//! [`Assistant::process_turn`] runs, in order:
//!
//! 1. load the session history,
//! 2. rewrite the question into a standalone one ([`QueryRewriter`]),
//! 3. gate it on the college domain ([`DomainClassifier`]); in strict mode an
//!    off-domain question is refused here, before retrieval,
//! 4. embed the standalone question and search the vector index,
//! 5. synthesize the answer ([`AnswerSynthesizer`]),
//! 6. append the question and the reply to the history in one transaction.
//!
//! A failing step fails the whole turn: the caller gets a fixed error
//! message and the history is left untouched.
//!
//! # Example
//!
//! ```rust,ignore
//! let assistant = Assistant::builder()
//!     .embedder(embedder)
//!     .index(index, "college-knowledge")
//!     .chat_model(model)
//!     .conversations(store)
//!     .top_k(3)
//!     .build()?;
//!
//! let reply = assistant.process_turn(&session_id, "What are the library hours?").await;
//! ```

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::classifier::DomainClassifier;
use crate::config::DomainGate;
use crate::conversation::ConversationStore;
use crate::embedding::EmbeddingProvider;
use crate::error::{PipelineError, Result};
use crate::index::VectorIndex;
use crate::llm::ChatModel;
use crate::models::{ConversationTurn, SearchHit};
use crate::prompts::{GENERATION_FAILED, REFUSAL, SERVICE_UNAVAILABLE};
use crate::rewriter::QueryRewriter;
use crate::synthesizer::AnswerSynthesizer;

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// A grounded answer was generated and stored.
    Answered,
    /// The question was off-domain; the refusal was stored.
    Refused,
    /// A step failed; nothing was stored.
    Failed,
}

/// What the caller shows the user.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub text: String,
    pub outcome: Outcome,
    /// The rewritten question used for retrieval, when the turn got that far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standalone_question: Option<String>,
    /// Chunks the answer was conditioned on.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SearchHit>,
}

impl Reply {
    fn failed(error: &PipelineError) -> Self {
        Self {
            text: user_message(error).to_string(),
            outcome: Outcome::Failed,
            standalone_question: None,
            sources: Vec::new(),
        }
    }
}

/// The user-facing message for a failed turn.
pub fn user_message(error: &PipelineError) -> &'static str {
    match error {
        PipelineError::ModelInvocation { .. } => GENERATION_FAILED,
        _ => SERVICE_UNAVAILABLE,
    }
}

/// Retrieval-augmented college assistant. Cheap to clone; every
/// collaborator is shared.
#[derive(Clone)]
pub struct Assistant {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    index_name: String,
    conversations: Arc<dyn ConversationStore>,
    rewriter: QueryRewriter,
    synthesizer: AnswerSynthesizer,
    classifier: DomainClassifier,
    gate: DomainGate,
    top_k: usize,
}

impl std::fmt::Debug for Assistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assistant")
            .field("index_name", &self.index_name)
            .field("top_k", &self.top_k)
            .finish_non_exhaustive()
    }
}

impl Assistant {
    pub fn builder() -> AssistantBuilder {
        AssistantBuilder::default()
    }

    pub fn conversations(&self) -> &Arc<dyn ConversationStore> {
        &self.conversations
    }

    /// Answer one chat message. Never fails; errors become a
    /// [`Outcome::Failed`] reply with a fixed message.
    pub async fn process_turn(&self, session_id: &str, question: &str) -> Reply {
        match self.try_process_turn(session_id, question).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(session_id, error = %e, "turn failed");
                Reply::failed(&e)
            }
        }
    }

    /// Like [`process_turn`](Self::process_turn) but returns the error.
    pub async fn try_process_turn(&self, session_id: &str, question: &str) -> Result<Reply> {
        let question = question.trim();
        let history = self.conversations.history(session_id).await?;

        let standalone = match self.rewriter.rewrite(&history, question).await {
            Ok(standalone) => standalone,
            Err(e) => {
                warn!(session_id, error = %e, "rewrite failed, using the question as asked");
                question.to_string()
            }
        };

        let in_domain = self.classifier.is_in_domain(&standalone);
        if !in_domain {
            match self.gate {
                DomainGate::Strict => {
                    info!(session_id, question = %standalone, "refused off-domain question");
                    self.conversations
                        .append_exchange(session_id, question, REFUSAL)
                        .await?;
                    return Ok(Reply {
                        text: REFUSAL.to_string(),
                        outcome: Outcome::Refused,
                        standalone_question: Some(standalone),
                        sources: Vec::new(),
                    });
                }
                DomainGate::Advisory => {
                    info!(session_id, question = %standalone, "question looks off-domain, deferring to the model");
                }
            }
        }

        let hits = self.retrieve(&standalone).await?;
        let answer = self.synthesizer.answer(&standalone, &hits, &history).await?;
        let outcome = if answer == REFUSAL {
            Outcome::Refused
        } else {
            Outcome::Answered
        };

        self.conversations
            .append_exchange(session_id, question, &answer)
            .await?;
        info!(session_id, hits = hits.len(), outcome = ?outcome, "turn complete");

        Ok(Reply {
            text: answer,
            outcome,
            standalone_question: Some(standalone),
            sources: hits,
        })
    }

    /// Embed `query` and return the best `top_k` chunks.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<SearchHit>> {
        let vector = self.embedder.embed(query).await?;
        self.index.search(&self.index_name, &vector, self.top_k).await
    }

    pub async fn history(&self, session_id: &str) -> Result<Vec<ConversationTurn>> {
        self.conversations.history(session_id).await
    }

    pub async fn clear(&self, session_id: &str) -> Result<u64> {
        self.conversations.clear(session_id).await
    }
}

/// Builder for [`Assistant`]. Embedder, index, chat model and conversation
/// store are required.
#[derive(Default)]
pub struct AssistantBuilder {
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    index: Option<(Arc<dyn VectorIndex>, String)>,
    chat_model: Option<Arc<dyn ChatModel>>,
    conversations: Option<Arc<dyn ConversationStore>>,
    classifier: Option<DomainClassifier>,
    gate: DomainGate,
    top_k: Option<usize>,
}

impl AssistantBuilder {
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn index(mut self, index: Arc<dyn VectorIndex>, name: impl Into<String>) -> Self {
        self.index = Some((index, name.into()));
        self
    }

    pub fn chat_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.chat_model = Some(model);
        self
    }

    pub fn conversations(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.conversations = Some(store);
        self
    }

    pub fn classifier(mut self, classifier: DomainClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn gate(mut self, gate: DomainGate) -> Self {
        self.gate = gate;
        self
    }

    /// Number of chunks retrieved per turn (default 3).
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn build(self) -> Result<Assistant> {
        let missing = |what: &str| PipelineError::Config(format!("{} is required", what));

        let embedder = self.embedder.ok_or_else(|| missing("embedder"))?;
        let (index, index_name) = self.index.ok_or_else(|| missing("index"))?;
        let chat_model = self.chat_model.ok_or_else(|| missing("chat_model"))?;
        let conversations = self.conversations.ok_or_else(|| missing("conversations"))?;
        let top_k = self.top_k.unwrap_or(3);
        if top_k == 0 {
            return Err(PipelineError::Config("top_k must be >= 1".to_string()));
        }

        let classifier = self.classifier.unwrap_or_default();
        let synthesizer = match self.gate {
            DomainGate::Strict => {
                AnswerSynthesizer::new(chat_model.clone()).with_gate(classifier.clone())
            }
            DomainGate::Advisory => AnswerSynthesizer::new(chat_model.clone()),
        };

        Ok(Assistant {
            embedder,
            index,
            index_name,
            conversations,
            rewriter: QueryRewriter::new(chat_model),
            synthesizer,
            classifier,
            gate: self.gate,
            top_k,
        })
    }
}
