//! Follow-up question rewriting.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::llm::{ChatMessage, ChatModel, ChatRequest};
use crate::models::ConversationTurn;
use crate::prompts::REWRITE_INSTRUCTION;

/// Turns a follow-up question into one that stands on its own, using the
/// session's history. Holds no state between calls.
#[derive(Clone)]
pub struct QueryRewriter {
    model: Arc<dyn ChatModel>,
}

impl QueryRewriter {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Empty history returns `question` unchanged without calling the model.
    /// The model's output is only ever used as a search query; blank output
    /// falls back to `question`.
    pub async fn rewrite(&self, history: &[ConversationTurn], question: &str) -> Result<String> {
        if history.is_empty() {
            return Ok(question.to_string());
        }

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(REWRITE_INSTRUCTION));
        messages.extend(history.iter().map(ChatMessage::from));
        messages.push(ChatMessage::user(question));

        let request = ChatRequest {
            messages,
            temperature: Some(0.0),
            max_tokens: None,
        };
        let output = self.model.generate(request).await?;
        let standalone = output.trim().trim_matches('"').trim();

        if standalone.is_empty() {
            return Ok(question.to_string());
        }
        debug!(original = question, standalone, "rewrote question");
        Ok(standalone.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted {
        reply: String,
        calls: Mutex<Vec<ChatRequest>>,
    }

    impl Scripted {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatModel for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, request: ChatRequest) -> crate::error::Result<String> {
            self.calls.lock().unwrap().push(request);
            if self.reply == "<fail>" {
                return Err(PipelineError::ModelInvocation {
                    message: "down".to_string(),
                    retryable: true,
                });
            }
            Ok(self.reply.clone())
        }
    }

    fn history() -> Vec<ConversationTurn> {
        vec![
            ConversationTurn::human("Tell me about the boys hostel"),
            ConversationTurn::assistant("The boys hostel has 200 rooms."),
        ]
    }

    #[tokio::test]
    async fn test_empty_history_is_noop() {
        let model = Scripted::new("should not be used");
        let rewriter = QueryRewriter::new(model.clone());
        let out = rewriter.rewrite(&[], "What are the hostel fees?").await.unwrap();
        assert_eq!(out, "What are the hostel fees?");
        assert!(model.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prompt_layout() {
        let model = Scripted::new("  \"What are the boys hostel fees?\"\n");
        let rewriter = QueryRewriter::new(model.clone());
        let out = rewriter.rewrite(&history(), "What are its fees?").await.unwrap();
        assert_eq!(out, "What are the boys hostel fees?");

        let calls = model.calls.lock().unwrap();
        let messages = &calls[0].messages;
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], ChatMessage::system(REWRITE_INSTRUCTION));
        assert_eq!(messages[1], ChatMessage::user("Tell me about the boys hostel"));
        assert_eq!(messages[2], ChatMessage::assistant("The boys hostel has 200 rooms."));
        assert_eq!(messages[3], ChatMessage::user("What are its fees?"));
    }

    #[tokio::test]
    async fn test_blank_output_falls_back() {
        let rewriter = QueryRewriter::new(Scripted::new("   "));
        let out = rewriter.rewrite(&history(), "What are its fees?").await.unwrap();
        assert_eq!(out, "What are its fees?");
    }

    #[tokio::test]
    async fn test_model_failure_propagates() {
        let rewriter = QueryRewriter::new(Scripted::new("<fail>"));
        assert!(rewriter.rewrite(&history(), "and the fees?").await.is_err());
    }
}
