//! Grounded answer generation.
//!
//! The prompt is the system instruction with the retrieved chunk texts as
//! context, then the session history, then the standalone question. When a
//! domain gate is attached, off-domain questions get [`REFUSAL`] without a
//! model call.

use std::sync::Arc;

use crate::classifier::DomainClassifier;
use crate::error::{PipelineError, Result};
use crate::llm::{ChatMessage, ChatModel, ChatRequest};
use crate::models::{ConversationTurn, SearchHit};
use crate::prompts::{system_prompt, BANNED_PREFIXES, REFUSAL};

#[derive(Clone)]
pub struct AnswerSynthesizer {
    model: Arc<dyn ChatModel>,
    gate: Option<DomainClassifier>,
}

impl AnswerSynthesizer {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model, gate: None }
    }

    /// Refuse questions `classifier` rejects instead of asking the model.
    pub fn with_gate(mut self, classifier: DomainClassifier) -> Self {
        self.gate = Some(classifier);
        self
    }

    pub async fn answer(
        &self,
        question: &str,
        chunks: &[SearchHit],
        history: &[ConversationTurn],
    ) -> Result<String> {
        if let Some(gate) = &self.gate {
            if !gate.is_in_domain(question) {
                return Ok(REFUSAL.to_string());
            }
        }

        let request = ChatRequest::new(build_messages(question, chunks, history));
        let raw = self.model.generate(request).await?;
        let answer = strip_citations(&raw);
        if answer.is_empty() {
            return Err(PipelineError::ModelInvocation {
                message: "model returned an empty answer".to_string(),
                retryable: false,
            });
        }
        Ok(answer)
    }
}

pub fn build_messages(
    question: &str,
    chunks: &[SearchHit],
    history: &[ConversationTurn],
) -> Vec<ChatMessage> {
    let context = chunks
        .iter()
        .map(|hit| hit.text.trim())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system_prompt(&context)));
    messages.extend(history.iter().map(ChatMessage::from));
    messages.push(ChatMessage::user(question));
    messages
}

/// Drop lines that open with a citation phrase the prompt forbids.
pub fn strip_citations(answer: &str) -> String {
    answer
        .lines()
        .filter(|line| {
            let line = line.trim_start().trim_start_matches(['*', '_', '#', '>', ' ']);
            !BANNED_PREFIXES
                .iter()
                .any(|prefix| starts_with_ignore_case(line, prefix))
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentKind, SourceMetadata};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        reply: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatModel for Echo {
        fn model_name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, _request: ChatRequest) -> crate::error::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    fn echo(reply: &str) -> Arc<Echo> {
        Arc::new(Echo {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    fn hit(text: &str) -> SearchHit {
        SearchHit {
            id: "1".to_string(),
            text: text.to_string(),
            metadata: SourceMetadata {
                document_id: "library.txt".to_string(),
                kind: DocumentKind::Txt,
                page: None,
            },
            score: 0.9,
        }
    }

    #[test]
    fn test_message_layout() {
        let history = vec![
            ConversationTurn::human("hi"),
            ConversationTurn::assistant("hello"),
        ];
        let messages = build_messages(
            "What are the library hours?",
            &[hit("The library is open from 9 AM to 7 PM.")],
            &history,
        );
        assert_eq!(messages.len(), 4);
        assert!(messages[0]
            .content
            .contains("The library is open from 9 AM to 7 PM."));
        assert_eq!(messages[1], ChatMessage::user("hi"));
        assert_eq!(messages[2], ChatMessage::assistant("hello"));
        assert_eq!(messages[3], ChatMessage::user("What are the library hours?"));
    }

    #[tokio::test]
    async fn test_gate_refuses_without_model_call() {
        let model = echo("unused");
        let synth = AnswerSynthesizer::new(model.clone()).with_gate(DomainClassifier::default());
        let out = synth.answer("Who is Virat Kohli?", &[], &[]).await.unwrap();
        assert_eq!(out, REFUSAL);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ungated_synthesizer_asks_model() {
        let model = echo("Anything goes.");
        let synth = AnswerSynthesizer::new(model.clone());
        let out = synth.answer("Who is Virat Kohli?", &[], &[]).await.unwrap();
        assert_eq!(out, "Anything goes.");
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_answer_is_error() {
        let synth = AnswerSynthesizer::new(echo("Sources: prospectus.pdf"));
        let err = synth.answer("library hours?", &[], &[]).await.unwrap_err();
        assert!(matches!(err, PipelineError::ModelInvocation { .. }));
    }

    #[test]
    fn test_strip_citations() {
        let raw = "The library opens at 9 AM.\n\n**Sources:** library.txt\nreference: handbook";
        assert_eq!(strip_citations(raw), "The library opens at 9 AM.");
        assert_eq!(strip_citations("Fees are due in July."), "Fees are due in July.");
        assert_eq!(
            strip_citations("Hostel fees are due in July.\nThis information is based on the prospectus."),
            "Hostel fees are due in July."
        );
    }
}
