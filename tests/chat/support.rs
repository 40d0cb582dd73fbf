//! Scripted model provider and engine builder for chat tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use concierge::chat::cache::ResponseCache;
use concierge::chat::{ChatEngine, ChatSettings, Inbound};
use concierge::config::Config;
use concierge::knowledge::{KnowledgeBase, KnowledgeError, KnowledgeSnippet, NullKnowledgeBase};
use concierge::providers::{
    CompletionRequest, CompletionResponse, ContentPart, LlmProvider, ProviderError, StopReason,
    UsageStats,
};
use concierge::store::{Channel, Store};

/// Provider that replays canned responses and records every request.
#[derive(Default)]
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<CompletionResponse, String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_text(&self, text: &str) {
        self.push(Ok(text_response(text)));
    }

    pub fn push_tool_call(&self, id: &str, name: &str, input: Value) {
        self.push(Ok(CompletionResponse {
            content: vec![ContentPart::ToolUse {
                id: id.to_owned(),
                name: name.to_owned(),
                input,
            }],
            stop_reason: StopReason::ToolUse,
            usage: usage(),
            model: "scripted".to_owned(),
        }));
    }

    pub fn push_error(&self) {
        self.push(Err("upstream unavailable".to_owned()));
    }

    fn push(&self, response: Result<CompletionResponse, String>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(response);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

fn usage() -> UsageStats {
    UsageStats {
        input_tokens: 40,
        output_tokens: 10,
    }
}

pub fn text_response(text: &str) -> CompletionResponse {
    CompletionResponse {
        content: vec![ContentPart::Text {
            text: text.to_owned(),
        }],
        stop_reason: StopReason::EndTurn,
        usage: usage(),
        model: "scripted".to_owned(),
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front());
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(ProviderError::Parse(message)),
            None => Err(ProviderError::Parse("script exhausted".to_owned())),
        }
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}

/// Knowledge base returning fixed snippets.
pub struct FixedKnowledge(pub Vec<KnowledgeSnippet>);

#[async_trait]
impl KnowledgeBase for FixedKnowledge {
    async fn search(
        &self,
        _query: &str,
        top_k: u32,
    ) -> Result<Vec<KnowledgeSnippet>, KnowledgeError> {
        let take = usize::try_from(top_k).unwrap_or(usize::MAX);
        Ok(self.0.iter().take(take).cloned().collect())
    }
}

/// Knowledge base whose index is down.
pub struct BrokenKnowledge;

#[async_trait]
impl KnowledgeBase for BrokenKnowledge {
    async fn search(
        &self,
        _query: &str,
        _top_k: u32,
    ) -> Result<Vec<KnowledgeSnippet>, KnowledgeError> {
        Err(KnowledgeError::Parse("index offline".to_owned()))
    }
}

pub fn settings() -> ChatSettings {
    let mut config = Config::default();
    config.business.name = "Kopi Nusantara".to_owned();
    config.business.opening_hours = "every day, 08:00 to 22:00".to_owned();
    config.business.address = "Jl. Braga 10, Bandung".to_owned();
    config.business.phone = "+62 22 1234567".to_owned();
    config.llm.max_tool_rounds = 3;
    ChatSettings::from_config(&config)
}

pub fn engine_with(
    store: &Store,
    provider: Option<Arc<ScriptedProvider>>,
    knowledge: Arc<dyn KnowledgeBase>,
    settings: ChatSettings,
) -> ChatEngine {
    let provider = provider.map(|p| p as Arc<dyn LlmProvider>);
    let cache = Arc::new(ResponseCache::new(Duration::from_secs(3600), 100));
    ChatEngine::new(store.clone(), provider, knowledge, cache, settings)
}

pub fn engine(store: &Store, provider: Option<Arc<ScriptedProvider>>) -> ChatEngine {
    engine_with(store, provider, Arc::new(NullKnowledgeBase), settings())
}

pub fn whatsapp(contact: &str, text: &str) -> Inbound {
    Inbound {
        channel: Channel::WhatsApp,
        contact: contact.to_owned(),
        name: Some("Test Customer".to_owned()),
        text: text.to_owned(),
    }
}
