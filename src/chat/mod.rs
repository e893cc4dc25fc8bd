// Chat module
// Grounded prompt assembly and answer generation, with optional token streaming

pub mod completion;

#[cfg(test)]
mod tests;

use futures::StreamExt;
use serde::Serialize;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{Config, GenerationConfig};
use crate::retriever::{RetrievalResult, Retriever};
use crate::{GranthError, Result};

pub use completion::{
    ChatCompletionsClient, ChatMessage, CompletionRequest, GenerationProvider, Role, TokenStream,
};

/// Divider placed between context sources
pub const SOURCE_DIVIDER: &str = "\n\n---\n\n";

/// Receives streamed tokens as soon as they arrive
pub trait TokenSink: Send {
    fn on_token(&mut self, token: &str);
}

impl<F> TokenSink for F
where
    F: FnMut(&str) + Send,
{
    #[inline]
    fn on_token(&mut self, token: &str) {
        self(token);
    }
}

/// Sampling parameters and delivery mode for one answer
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub stream: bool,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_completion_tokens: u32,
}

impl Default for GenerationOptions {
    #[inline]
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default())
    }
}

impl GenerationOptions {
    #[inline]
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            stream: false,
            model: config.model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
            max_completion_tokens: config.max_completion_tokens,
        }
    }

    #[inline]
    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// One answered question; never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub query: String,
    pub context_text: String,
    pub answer: String,
}

/// Label each retrieved chunk as `Source N` and join them in retrieval order
#[inline]
pub fn build_context(result: &RetrievalResult) -> String {
    let mut context = String::new();
    for (index, chunk) in result.iter().enumerate() {
        if index > 0 {
            context.push_str(SOURCE_DIVIDER);
        }
        let _ = write!(context, "Source {}:\n{}", index + 1, chunk.text);
    }
    context
}

/// Instruction that restricts the model to the supplied context
#[inline]
pub fn system_prompt(context: &str) -> String {
    format!(
        "You are a helpful AI assistant. Answer questions based ONLY on the provided context.

FORMATTING RULES:
- Use clear headings with ## for main topics
- Use bullet points for lists
- Use **bold** for important terms
- Use proper paragraph spacing
- Keep responses well-structured and easy to read
- If providing steps, use numbered lists
- Include relevant examples when helpful

Context:
{context}

If the context doesn't contain enough information to answer the question, say so politely and suggest what additional information might be needed."
    )
}

/// The system and user messages sent for a query
#[inline]
pub fn build_messages(query: &str, context: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt(context)),
        ChatMessage::user(query),
    ]
}

/// Turns retrieved context into an answer
#[derive(Clone)]
pub struct AnswerComposer {
    generator: Arc<dyn GenerationProvider>,
}

impl AnswerComposer {
    #[inline]
    pub fn new(generator: Arc<dyn GenerationProvider>) -> Self {
        Self { generator }
    }

    /// Answer `query` from `retrieved`.
    ///
    /// When streaming, every non-empty delta reaches `sink` in provider order
    /// before the full text is returned. A failure after some tokens were
    /// delivered is still an error.
    #[inline]
    pub async fn compose(
        &self,
        query: &str,
        retrieved: &RetrievalResult,
        options: &GenerationOptions,
        sink: Option<&mut dyn TokenSink>,
    ) -> Result<ChatTurn> {
        let context_text = build_context(retrieved);
        let request = CompletionRequest {
            model: options.model.clone(),
            messages: build_messages(query, &context_text),
            temperature: options.temperature,
            top_p: options.top_p,
            max_completion_tokens: options.max_completion_tokens,
        };

        debug!(
            "Composing answer from {} sources (stream: {})",
            retrieved.len(),
            options.stream
        );

        let answer = if options.stream {
            self.stream_answer(&request, sink).await?
        } else {
            self.generator.complete(&request).await?
        };

        Ok(ChatTurn {
            query: query.to_string(),
            context_text,
            answer,
        })
    }

    async fn stream_answer(
        &self,
        request: &CompletionRequest,
        mut sink: Option<&mut dyn TokenSink>,
    ) -> Result<String> {
        let mut tokens = self.generator.complete_stream(request).await?;
        let mut answer = String::new();
        let mut delivered = 0_usize;

        while let Some(token) = tokens.next().await {
            let token = token.map_err(|e| match e {
                GranthError::TransientProvider(_) | GranthError::GenerationService(_) => e,
                other => GranthError::GenerationService(other.to_string()),
            })?;
            if token.is_empty() {
                continue;
            }

            answer.push_str(&token);
            if let Some(sink) = sink.as_deref_mut() {
                sink.on_token(&token);
            }
            delivered += 1;
        }

        debug!("Streamed {} tokens", delivered);
        Ok(answer)
    }
}

/// Retrieval followed by answer composition
#[derive(Clone)]
pub struct ChatService {
    retriever: Retriever,
    composer: AnswerComposer,
    defaults: GenerationOptions,
}

impl ChatService {
    #[inline]
    pub fn new(retriever: Retriever, generator: Arc<dyn GenerationProvider>) -> Self {
        Self {
            retriever,
            composer: AnswerComposer::new(generator),
            defaults: GenerationOptions::default(),
        }
    }

    #[inline]
    pub fn from_config(
        config: &Config,
        retriever: Retriever,
        generator: Arc<dyn GenerationProvider>,
    ) -> Self {
        Self::new(retriever, generator)
            .with_defaults(GenerationOptions::from_config(&config.generation))
    }

    #[inline]
    pub fn with_defaults(mut self, defaults: GenerationOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Generation options configured for this service
    #[inline]
    pub fn defaults(&self) -> &GenerationOptions {
        &self.defaults
    }

    #[inline]
    pub async fn chat(
        &self,
        query: &str,
        options: &GenerationOptions,
        sink: Option<&mut dyn TokenSink>,
    ) -> Result<ChatTurn> {
        if query.trim().is_empty() {
            return Err(GranthError::UnsupportedInput(
                "query must not be empty".to_string(),
            ));
        }

        let retrieved = self.retriever.retrieve(query).await?;
        info!("Answering query with {} retrieved sources", retrieved.len());

        self.composer
            .compose(query, &retrieved, options, sink)
            .await
    }
}
