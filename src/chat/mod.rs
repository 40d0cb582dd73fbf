//! The decision path for an incoming customer message.
//!
//! [`ChatEngine::handle`] records the message, then answers from the
//! cheapest source that can: nothing at all while a human owns the
//! conversation, a pattern template, the response cache, and only then the
//! language model with knowledge snippets and tools. When the model is
//! unavailable the customer gets an apology that offers a human agent.

pub mod budget;
pub mod cache;
pub mod context;
pub mod patterns;
pub mod templates;
pub mod tools;

use std::sync::Arc;

use tracing::{debug, info, warn};

use self::budget::DailyBudget;
use self::cache::ResponseCache;
use self::patterns::Intent;
use self::tools::{ToolContext, ToolOutcome};
use crate::config::{BusinessConfig, Config, LlmConfig};
use crate::knowledge::{KnowledgeBase, KnowledgeSnippet};
use crate::providers::{
    extract_text, CompletionRequest, ContentPart, LlmProvider, Message, MessageContent, Role,
    StopReason,
};
use crate::store::{
    Channel, Conversation, ConversationStatus, Customer, MessageSource, Sender, Store, StoreError,
};

/// Longest customer message accepted.
pub const MAX_MESSAGE_CHARS: usize = 4_000;

/// Reason recorded when the customer asks for a person directly.
const CUSTOMER_HANDOFF_REASON: &str = "customer asked for a human agent";

/// A customer message arriving on any channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Channel the message arrived on.
    pub channel: Channel,
    /// Phone number, or `web:<session>` for anonymous web chats.
    pub contact: String,
    /// Display name, if the channel provides one.
    pub name: Option<String>,
    /// Message text.
    pub text: String,
}

/// What to send back to the customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Send this text.
    Text {
        /// Reply text.
        text: String,
        /// Where the text came from.
        source: MessageSource,
    },
    /// Say nothing; a human agent owns the conversation.
    Silent,
}

impl Reply {
    /// The reply text, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            Self::Silent => None,
        }
    }
}

/// Result of handling one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatOutcome {
    /// Conversation the message was filed under.
    pub conversation_id: String,
    /// Customer who sent it.
    pub customer_id: String,
    /// Id of the stored customer message.
    pub message_id: i64,
    /// Reply to deliver.
    pub reply: Reply,
    /// Handoff opened while handling the message.
    pub handoff_id: Option<String>,
}

/// Errors from the chat pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The message was empty after trimming.
    #[error("message text must not be empty")]
    EmptyMessage,
    /// The message exceeded [`MAX_MESSAGE_CHARS`].
    #[error("message is longer than {MAX_MESSAGE_CHARS} characters")]
    MessageTooLong,
}

/// Static inputs of the chat pipeline.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    /// Business profile for templates and the system prompt.
    pub business: BusinessConfig,
    /// Model call settings.
    pub llm: LlmConfig,
    /// Knowledge snippets per question.
    pub knowledge_top_k: u32,
}

impl ChatSettings {
    /// Extract the chat settings from the full configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            business: config.business.clone(),
            llm: config.llm.clone(),
            knowledge_top_k: config.knowledge.top_k,
        }
    }
}

/// Answer from the model path.
struct ModelAnswer {
    text: String,
    used_tools: bool,
    handoff_id: Option<String>,
}

/// Customer-message pipeline shared by all channels.
pub struct ChatEngine {
    store: Store,
    provider: Option<Arc<dyn LlmProvider>>,
    knowledge: Arc<dyn KnowledgeBase>,
    cache: Arc<ResponseCache>,
    budget: DailyBudget,
    settings: ChatSettings,
}

impl std::fmt::Debug for ChatEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatEngine")
            .field(
                "model",
                &self.provider.as_ref().map(|p| p.model_id().to_owned()),
            )
            .field("cache", &self.cache.stats())
            .finish_non_exhaustive()
    }
}

impl ChatEngine {
    /// Assemble an engine. Without a provider every question the patterns
    /// and cache cannot answer gets the fallback reply.
    pub fn new(
        store: Store,
        provider: Option<Arc<dyn LlmProvider>>,
        knowledge: Arc<dyn KnowledgeBase>,
        cache: Arc<ResponseCache>,
        settings: ChatSettings,
    ) -> Self {
        let budget = DailyBudget::new(settings.llm.daily_token_limit);
        Self {
            store,
            provider,
            knowledge,
            cache,
            budget,
            settings,
        }
    }

    /// The response cache, for dashboard stats and purging.
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// The daily model token budget.
    pub fn budget(&self) -> &DailyBudget {
        &self.budget
    }

    /// Record an inbound message and decide the reply.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError`] for empty or over-long messages and database
    /// failures. Model and knowledge failures are absorbed into the fallback
    /// reply.
    pub async fn handle(&self, inbound: Inbound) -> Result<ChatOutcome, ChatError> {
        let text = inbound.text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ChatError::MessageTooLong);
        }

        let customer = self
            .store
            .find_or_create_customer(&inbound.contact, inbound.name.as_deref(), inbound.channel)
            .await?;
        let conversation = self
            .store
            .open_or_start_conversation(&customer.id, inbound.channel)
            .await?;
        let stored = self
            .store
            .add_message(
                &conversation.id,
                Sender::Customer,
                MessageSource::Customer,
                text,
                None,
            )
            .await?;

        let mut outcome = ChatOutcome {
            conversation_id: conversation.id.clone(),
            customer_id: customer.id.clone(),
            message_id: stored.id,
            reply: Reply::Silent,
            handoff_id: None,
        };

        if conversation.status == ConversationStatus::Redirected {
            debug!(conversation_id = %conversation.id, "conversation is with an agent, bot silent");
            return Ok(outcome);
        }

        let (reply_text, source) = if let Some(intent) = patterns::classify(text) {
            let (reply, handoff_id) = self.answer_intent(&intent, &customer, &conversation).await?;
            outcome.handoff_id = handoff_id;
            info!(
                conversation_id = %conversation.id,
                intent = intent.label(),
                source = "pattern",
                "answered without model"
            );
            (reply, MessageSource::Pattern)
        } else if let Some(cached) = self.cache.get(text) {
            info!(conversation_id = %conversation.id, source = "cache", "answered from cache");
            (cached, MessageSource::Cache)
        } else {
            match self.ask_model(text, &customer, &conversation).await? {
                Some(answer) => {
                    if !answer.used_tools && answer.handoff_id.is_none() {
                        self.cache.insert(text, &answer.text);
                    }
                    info!(
                        conversation_id = %conversation.id,
                        source = "llm",
                        used_tools = answer.used_tools,
                        "answered by model"
                    );
                    outcome.handoff_id = answer.handoff_id;
                    (answer.text, MessageSource::Llm)
                }
                None => (templates::fallback(), MessageSource::System),
            }
        };

        self.store
            .add_message(&conversation.id, Sender::Bot, source, &reply_text, None)
            .await?;
        outcome.reply = Reply::Text {
            text: reply_text,
            source,
        };
        Ok(outcome)
    }

    async fn answer_intent(
        &self,
        intent: &Intent,
        customer: &Customer,
        conversation: &Conversation,
    ) -> Result<(String, Option<String>), ChatError> {
        let business = &self.settings.business;
        let reply = match intent {
            Intent::Greeting => templates::greeting(business),
            Intent::Thanks => templates::thanks(),
            Intent::Goodbye => templates::goodbye(business),
            Intent::BusinessHours => templates::business_hours(business),
            Intent::Location => templates::location(business),
            Intent::Services => {
                let services = self.store.list_services(false).await?;
                templates::services(business, &services)
            }
            Intent::HumanAgent => {
                let request = self
                    .store
                    .request_handoff(&conversation.id, CUSTOMER_HANDOFF_REASON)
                    .await?;
                return Ok((templates::handoff_requested(), Some(request.handoff.id)));
            }
            Intent::OrderStatus { order_number } => {
                match self.store.order_for_contact(order_number, &customer.phone).await {
                    Ok(order) => templates::order_status(business, &order),
                    Err(StoreError::NotFound { .. }) => templates::order_not_found(order_number),
                    Err(e) => return Err(e.into()),
                }
            }
            Intent::Shipping { order_number } => {
                match self.store.order_for_contact(order_number, &customer.phone).await {
                    Ok(order) => match self.store.shipping_for_order(&order.order_number).await {
                        Ok(info) => templates::shipping(&order, Some(&info)),
                        Err(StoreError::NotFound { .. }) => templates::shipping(&order, None),
                        Err(e) => return Err(e.into()),
                    },
                    Err(StoreError::NotFound { .. }) => templates::order_not_found(order_number),
                    Err(e) => return Err(e.into()),
                }
            }
            Intent::CancelOrder { order_number } => {
                match self.store.order_for_contact(order_number, &customer.phone).await {
                    Ok(order) => match self
                        .store
                        .cancel_order(&order.order_number, Some("cancelled by customer via chat"))
                        .await
                    {
                        Ok(cancelled) => templates::order_cancelled(&cancelled),
                        Err(StoreError::NotCancellable {
                            order_number,
                            status,
                        }) => templates::order_not_cancellable(&order_number, &status),
                        Err(e) => return Err(e.into()),
                    },
                    Err(StoreError::NotFound { .. }) => templates::order_not_found(order_number),
                    Err(e) => return Err(e.into()),
                }
            }
            Intent::BookingStatus { booking_number } => {
                match self
                    .store
                    .booking_for_contact(booking_number, &customer.phone)
                    .await
                {
                    Ok(booking) => templates::booking_status(&booking),
                    Err(StoreError::NotFound { .. }) => {
                        templates::booking_not_found(booking_number)
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };
        Ok((reply, None))
    }

    /// Run the model with tools. `Ok(None)` means the model could not be
    /// used (no provider, budget spent, provider error, empty answer).
    async fn ask_model(
        &self,
        text: &str,
        customer: &Customer,
        conversation: &Conversation,
    ) -> Result<Option<ModelAnswer>, ChatError> {
        let Some(provider) = self.provider.as_ref() else {
            debug!("no model provider configured");
            return Ok(None);
        };
        if let Err(e) = self.budget.check() {
            warn!(error = %e, "model budget exhausted, using fallback");
            return Ok(None);
        }

        let snippets = self.retrieve(text).await;
        let system = context::system_prompt(&self.settings.business, &snippets, conversation.channel);

        let history_limit = usize::try_from(self.settings.llm.history_messages).unwrap_or(usize::MAX);
        let stored = self
            .store
            .recent_messages(&conversation.id, history_limit)
            .await?;
        let mut messages = context::trim_history(
            context::history_messages(&stored),
            self.settings.llm.history_token_budget,
        );
        if messages.last().map(|m| m.role) != Some(Role::User) {
            messages.push(Message::user(text));
        }

        let ctx = ToolContext {
            store: &self.store,
            customer,
            conversation_id: &conversation.id,
        };
        let max_rounds = self.settings.llm.max_tool_rounds.max(1);
        let mut used_tools = false;
        let mut handoff_id = None;

        for round in 1..=max_rounds {
            let tools = if round < max_rounds {
                tools::definitions()
            } else {
                Vec::new()
            };
            let request = CompletionRequest {
                messages: messages.clone(),
                system: Some(system.clone()),
                tools,
                max_tokens: Some(self.settings.llm.max_tokens),
            };

            let response = match provider.complete(request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, conversation_id = %conversation.id, "model call failed");
                    return Ok(None);
                }
            };
            self.budget.record(response.usage.total());

            let calls: Vec<(String, String, serde_json::Value)> = response
                .tool_calls()
                .into_iter()
                .map(|(id, name, input)| (id.to_owned(), name.to_owned(), input.clone()))
                .collect();

            if calls.is_empty() || response.stop_reason != StopReason::ToolUse {
                let text = extract_text(&response.content);
                if text.is_empty() {
                    if handoff_id.is_some() {
                        return Ok(Some(ModelAnswer {
                            text: templates::handoff_requested(),
                            used_tools,
                            handoff_id,
                        }));
                    }
                    warn!(conversation_id = %conversation.id, "model returned no text");
                    return Ok(None);
                }
                return Ok(Some(ModelAnswer {
                    text,
                    used_tools,
                    handoff_id,
                }));
            }

            used_tools = true;
            messages.push(Message {
                role: Role::Assistant,
                content: MessageContent::Parts(response.content.clone()),
            });
            let mut results = Vec::with_capacity(calls.len());
            for (id, name, input) in &calls {
                let ToolOutcome {
                    content,
                    is_error,
                    handoff_requested,
                } = tools::dispatch(ctx, name, input).await;
                if handoff_requested {
                    handoff_id = self
                        .store
                        .open_handoff_for_conversation(&conversation.id)
                        .await?
                        .map(|h| h.id);
                }
                results.push(ContentPart::ToolResult {
                    tool_use_id: id.clone(),
                    content,
                    is_error,
                });
            }
            messages.push(Message {
                role: Role::User,
                content: MessageContent::Parts(results),
            });
        }

        warn!(conversation_id = %conversation.id, "tool rounds exhausted without an answer");
        Ok(None)
    }

    async fn retrieve(&self, text: &str) -> Vec<KnowledgeSnippet> {
        match self
            .knowledge
            .search(text, self.settings.knowledge_top_k)
            .await
        {
            Ok(snippets) => snippets,
            Err(e) => {
                warn!(error = %e, "knowledge search failed, answering without it");
                Vec::new()
            }
        }
    }
}
