//! System prompt assembly and conversation history for model calls.
//!
//! The prompt carries the business profile, retrieved knowledge and the
//! channel, never customer identity, so answers that used no tools can be
//! shared through the response cache.

use crate::config::BusinessConfig;
use crate::knowledge::KnowledgeSnippet;
use crate::providers::{Message, MessageContent, Role};
use crate::store::{Channel, ChatMessage, Sender};

/// Roughly four characters per token; overestimates for English and
/// Indonesian, which keeps requests under budget.
const CHARS_PER_TOKEN: u64 = 4;

/// Build the system prompt.
pub fn system_prompt(
    business: &BusinessConfig,
    snippets: &[KnowledgeSnippet],
    channel: Channel,
) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(format!(
        "You are the customer support assistant for {name}, {description}. Answer briefly \
         and politely, in the language the customer writes in (English or Indonesian). \
         Use the tools to look up orders, stock and services instead of guessing. If you \
         cannot help, or the customer is upset, offer to connect them with a human agent \
         and call request_human_agent when they accept.",
        name = business.name,
        description = business.description,
    ));

    sections.push(format!(
        "## Business\nOpening hours: {}\nAddress: {}\nPhone: {}\nCurrency: {}",
        business.opening_hours, business.address, business.phone, business.currency
    ));

    if !snippets.is_empty() {
        let mut knowledge = String::from(
            "## Knowledge base\nUse these excerpts when relevant. Do not invent policies \
             that are not listed.\n",
        );
        for snippet in snippets {
            match &snippet.source {
                Some(source) => {
                    knowledge.push_str(&format!("- [{source}] {}\n", snippet.text.trim()))
                }
                None => knowledge.push_str(&format!("- {}\n", snippet.text.trim())),
            }
        }
        sections.push(knowledge);
    }

    let style = match channel {
        Channel::WhatsApp => "The customer is on WhatsApp: plain text only, no markdown tables.",
        Channel::Web => "The customer is on the website chat widget.",
    };
    sections.push(format!("## Channel\n{style}"));

    sections.join("\n\n")
}

/// Map stored messages to model history.
///
/// Customer messages become user turns; bot and agent messages become
/// assistant turns; workflow messages are dropped. Consecutive turns of the
/// same role are merged and leading assistant turns are removed, since the
/// model expects strictly alternating roles starting with the user.
pub fn history_messages(history: &[ChatMessage]) -> Vec<Message> {
    let mut messages: Vec<Message> = Vec::new();
    for stored in history {
        let role = match stored.sender {
            Sender::Customer => Role::User,
            Sender::Bot | Sender::Agent => Role::Assistant,
            Sender::System => continue,
        };
        if messages.is_empty() && role == Role::Assistant {
            continue;
        }
        match messages.last_mut() {
            Some(last) if last.role == role => {
                let merged = format!("{}\n{}", last.content.text(), stored.content);
                last.content = MessageContent::Text(merged);
            }
            _ => messages.push(Message {
                role,
                content: MessageContent::Text(stored.content.clone()),
            }),
        }
    }
    messages
}

/// Drop the oldest turns until the history fits `budget` estimated tokens.
/// The newest message is always kept, and the result still starts with a
/// user turn.
pub fn trim_history(messages: Vec<Message>, budget: u64) -> Vec<Message> {
    let mut total: u64 = messages.iter().map(estimate_message_tokens).sum();
    let mut start = 0;
    let last = messages.len().saturating_sub(1);
    while total > budget && start < last {
        total = total.saturating_sub(estimate_message_tokens(&messages[start]));
        start = start.saturating_add(1);
    }
    while start < last && messages[start].role != Role::User {
        start = start.saturating_add(1);
    }
    messages.into_iter().skip(start).collect()
}

/// Estimate tokens for a piece of text.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = u64::try_from(text.chars().count()).unwrap_or(u64::MAX);
    chars.saturating_add(CHARS_PER_TOKEN.saturating_sub(1)) / CHARS_PER_TOKEN
}

fn estimate_message_tokens(message: &Message) -> u64 {
    estimate_tokens(&message.content.text())
}
