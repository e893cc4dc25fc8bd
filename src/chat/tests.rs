use super::*;
use crate::database::InMemoryVectorStore;
use crate::retriever::RetrievedChunk;
use crate::testing::HashEmbeddings;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Generator that replays fixed tokens and records what it was asked
#[derive(Default)]
struct ScriptedGenerator {
    tokens: Vec<String>,
    /// Emit this error after all tokens instead of finishing cleanly
    fail_with: Option<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedGenerator {
    fn with_tokens(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(ToString::to_string).collect(),
            ..Default::default()
        }
    }

    fn last_request(&self) -> CompletionRequest {
        self.requests
            .lock()
            .expect("lock")
            .last()
            .cloned()
            .expect("a request was made")
    }
}

#[async_trait]
impl GenerationProvider for ScriptedGenerator {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.requests.lock().expect("lock").push(request.clone());
        Ok(self.tokens.concat())
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> Result<TokenStream> {
        self.requests.lock().expect("lock").push(request.clone());
        let mut items: Vec<Result<String>> = self.tokens.iter().cloned().map(Ok).collect();
        if let Some(message) = &self.fail_with {
            items.push(Err(GranthError::GenerationService(message.clone())));
        }
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

/// Stream that never yields and records when it is dropped
struct PendingStream {
    dropped: Arc<AtomicBool>,
}

impl futures::Stream for PendingStream {
    type Item = Result<String>;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        std::task::Poll::Pending
    }
}

impl Drop for PendingStream {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

struct StalledGenerator {
    dropped: Arc<AtomicBool>,
}

#[async_trait]
impl GenerationProvider for StalledGenerator {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        Ok(String::new())
    }

    async fn complete_stream(&self, _request: &CompletionRequest) -> Result<TokenStream> {
        Ok(Box::pin(PendingStream {
            dropped: Arc::clone(&self.dropped),
        }))
    }
}

fn retrieved(texts: &[&str]) -> RetrievalResult {
    RetrievalResult {
        chunks: texts
            .iter()
            .enumerate()
            .map(|(i, text)| RetrievedChunk {
                text: (*text).to_string(),
                metadata: crate::extract::Metadata::new(),
                score: 1.0 - i as f32 * 0.1,
            })
            .collect(),
    }
}

#[test]
fn context_labels_sources_in_order() {
    let context = build_context(&retrieved(&["first chunk", "second chunk"]));

    assert_eq!(
        context,
        "Source 1:\nfirst chunk\n\n---\n\nSource 2:\nsecond chunk"
    );
}

#[test]
fn empty_retrieval_gives_empty_context() {
    assert_eq!(build_context(&RetrievalResult::default()), "");
}

#[test]
fn system_prompt_embeds_context() {
    let prompt = system_prompt("Source 1:\nfacts");

    assert!(prompt.starts_with("You are a helpful AI assistant. Answer questions based ONLY on the provided context."));
    assert!(prompt.contains("- Use clear headings with ## for main topics"));
    assert!(prompt.contains("- If providing steps, use numbered lists"));
    assert!(prompt.contains("Context:\nSource 1:\nfacts\n\nIf the context doesn't contain enough information"));
    assert!(prompt.ends_with("suggest what additional information might be needed."));
}

#[test]
fn messages_are_system_then_user() {
    let messages = build_messages("What?", "ctx");

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(messages[1], ChatMessage::user("What?"));
}

#[test]
fn default_options_follow_generation_defaults() {
    let options = GenerationOptions::default();

    assert!(!options.stream);
    assert_eq!(options.model, "llama3.1-8b");
    assert!((options.temperature - 0.7).abs() < f32::EPSILON);
    assert!((options.top_p - 0.8).abs() < f32::EPSILON);
    assert_eq!(options.max_completion_tokens, 2000);
    assert!(options.streaming(true).stream);
}

#[tokio::test]
async fn non_streaming_returns_full_text() {
    let generator = Arc::new(ScriptedGenerator::with_tokens(&["Full ", "answer"]));
    let composer = AnswerComposer::new(Arc::clone(&generator) as Arc<dyn GenerationProvider>);
    let options = GenerationOptions {
        temperature: 0.2,
        ..Default::default()
    };

    let turn = composer
        .compose("question", &retrieved(&["ctx"]), &options, None)
        .await
        .expect("should compose");

    assert_eq!(turn.answer, "Full answer");
    assert_eq!(turn.query, "question");
    assert_eq!(turn.context_text, "Source 1:\nctx");

    let request = generator.last_request();
    assert_eq!(request.model, "llama3.1-8b");
    assert!((request.temperature - 0.2).abs() < f32::EPSILON);
    assert_eq!(request.max_completion_tokens, 2000);
    assert_eq!(request.messages[1].content, "question");
}

#[tokio::test]
async fn streaming_delivers_each_token_in_order() {
    let tokens = ["Rust ", "is ", "a ", "systems ", "language"];
    let composer = AnswerComposer::new(Arc::new(ScriptedGenerator::with_tokens(&tokens)));
    let options = GenerationOptions::default().streaming(true);
    let mut seen = Vec::new();
    let mut sink = |token: &str| seen.push(token.to_string());

    let turn = composer
        .compose("question", &retrieved(&["ctx"]), &options, Some(&mut sink))
        .await
        .expect("should compose");

    assert_eq!(seen, tokens);
    assert_eq!(turn.answer, tokens.concat());
}

#[tokio::test]
async fn streaming_skips_empty_deltas() {
    let composer = AnswerComposer::new(Arc::new(ScriptedGenerator::with_tokens(&[
        "a", "", "b",
    ])));
    let options = GenerationOptions::default().streaming(true);
    let mut count = 0_usize;
    let mut sink = |_: &str| count += 1;

    let turn = composer
        .compose("q", &RetrievalResult::default(), &options, Some(&mut sink))
        .await
        .expect("should compose");

    assert_eq!(count, 2);
    assert_eq!(turn.answer, "ab");
}

#[tokio::test]
async fn mid_stream_failure_is_an_error() {
    let generator = ScriptedGenerator {
        fail_with: Some("connection reset".to_string()),
        ..ScriptedGenerator::with_tokens(&["partial ", "answer"])
    };
    let composer = AnswerComposer::new(Arc::new(generator));
    let options = GenerationOptions::default().streaming(true);
    let mut seen = Vec::new();
    let mut sink = |token: &str| seen.push(token.to_string());

    let error = composer
        .compose("q", &retrieved(&["ctx"]), &options, Some(&mut sink))
        .await
        .expect_err("stream failed");

    assert!(matches!(error, GranthError::GenerationService(_)));
    assert_eq!(seen, vec!["partial ", "answer"]);
}

#[tokio::test]
async fn streaming_without_sink_still_returns_text() {
    let composer = AnswerComposer::new(Arc::new(ScriptedGenerator::with_tokens(&["x", "y"])));

    let turn = composer
        .compose(
            "q",
            &RetrievalResult::default(),
            &GenerationOptions::default().streaming(true),
            None,
        )
        .await
        .expect("should compose");

    assert_eq!(turn.answer, "xy");
}

#[tokio::test]
async fn abandoning_the_call_drops_the_stream() {
    let dropped = Arc::new(AtomicBool::new(false));
    let composer = AnswerComposer::new(Arc::new(StalledGenerator {
        dropped: Arc::clone(&dropped),
    }));
    let options = GenerationOptions::default().streaming(true);

    let result = tokio::time::timeout(
        Duration::from_millis(20),
        composer.compose("q", &RetrievalResult::default(), &options, None),
    )
    .await;

    assert!(result.is_err());
    assert!(dropped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn chat_with_empty_collection_still_answers() {
    let generator = Arc::new(ScriptedGenerator::with_tokens(&["I don't know."]));
    let retriever = Retriever::new(
        Arc::new(HashEmbeddings::default()),
        Arc::new(InMemoryVectorStore::new()),
    );
    let service = ChatService::new(
        retriever,
        Arc::clone(&generator) as Arc<dyn GenerationProvider>,
    );

    let turn = service
        .chat("anything?", service.defaults(), None)
        .await
        .expect("should answer");

    assert_eq!(turn.answer, "I don't know.");
    assert!(turn.context_text.is_empty());
    assert!(generator.last_request().messages[0].content.contains("Context:\n\n"));
}

#[tokio::test]
async fn chat_rejects_blank_query() {
    let retriever = Retriever::new(
        Arc::new(HashEmbeddings::default()),
        Arc::new(InMemoryVectorStore::new()),
    );
    let service = ChatService::new(retriever, Arc::new(ScriptedGenerator::default()));

    let error = service
        .chat("   ", &GenerationOptions::default(), None)
        .await
        .expect_err("blank query");

    assert!(error.is_input_error());
}

#[test]
fn service_defaults_come_from_config() {
    let mut config = Config::default();
    config.generation.model = "llama-3.3-70b".to_string();
    config.generation.max_completion_tokens = 512;
    let retriever = Retriever::new(
        Arc::new(HashEmbeddings::default()),
        Arc::new(InMemoryVectorStore::new()),
    );

    let service = ChatService::from_config(&config, retriever, Arc::new(ScriptedGenerator::default()));

    assert_eq!(service.defaults().model, "llama-3.3-70b");
    assert_eq!(service.defaults().max_completion_tokens, 512);
}
