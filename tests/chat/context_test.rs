//! Prompt and history assembly tests.

use concierge::chat::context::{history_messages, system_prompt, trim_history};
use concierge::config::BusinessConfig;
use concierge::knowledge::KnowledgeSnippet;
use concierge::providers::{Message, MessageContent, Role};
use concierge::store::{Channel, ChatMessage, MessageSource, Sender};

fn stored(id: i64, sender: Sender, content: &str) -> ChatMessage {
    let source = match sender {
        Sender::Customer => MessageSource::Customer,
        Sender::Bot => MessageSource::Llm,
        Sender::Agent => MessageSource::Agent,
        Sender::System => MessageSource::System,
    };
    ChatMessage {
        id,
        conversation_id: "c1".to_owned(),
        sender,
        source,
        content: content.to_owned(),
        agent_id: None,
        created_at: "2026-01-01 10:00:00".to_owned(),
    }
}

fn snippet(text: &str, source: Option<&str>) -> KnowledgeSnippet {
    KnowledgeSnippet {
        id: "k1".to_owned(),
        text: text.to_owned(),
        source: source.map(str::to_owned),
        score: 0.9,
    }
}

#[test]
fn prompt_carries_business_profile_and_knowledge() {
    let business = BusinessConfig {
        name: "Kopi Nusantara".to_owned(),
        opening_hours: "08:00-22:00".to_owned(),
        ..BusinessConfig::default()
    };
    let prompt = system_prompt(
        &business,
        &[
            snippet("Returns are accepted within 7 days.", Some("returns.md")),
            snippet("  Free shipping above IDR 300,000. ", None),
        ],
        Channel::WhatsApp,
    );

    assert!(prompt.contains("Kopi Nusantara"));
    assert!(prompt.contains("Opening hours: 08:00-22:00"));
    assert!(prompt.contains("- [returns.md] Returns are accepted within 7 days."));
    assert!(prompt.contains("- Free shipping above IDR 300,000.\n"));
    assert!(prompt.contains("WhatsApp"));
    assert!(prompt.contains("request_human_agent"));
}

#[test]
fn prompt_without_knowledge_has_no_knowledge_section() {
    let prompt = system_prompt(&BusinessConfig::default(), &[], Channel::Web);
    assert!(!prompt.contains("## Knowledge base"));
    assert!(prompt.contains("website chat widget"));
}

#[test]
fn history_alternates_and_starts_with_the_customer() {
    let history = vec![
        stored(1, Sender::Bot, "Welcome back!"),
        stored(2, Sender::Customer, "hi"),
        stored(3, Sender::Customer, "do you have decaf?"),
        stored(4, Sender::System, "Rina joined the conversation."),
        stored(5, Sender::Agent, "Yes, we do."),
        stored(6, Sender::Customer, "great"),
    ];
    let messages = history_messages(&history);

    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(
        messages[0].content,
        MessageContent::Text("hi\ndo you have decaf?".to_owned())
    );
    assert_eq!(messages[1], Message::assistant("Yes, we do."));
    assert_eq!(messages[2], Message::user("great"));
}

#[test]
fn trimming_within_budget_keeps_everything() {
    let messages = vec![
        Message::user("short"),
        Message::assistant("reply"),
        Message::user("again"),
    ];
    assert_eq!(trim_history(messages.clone(), 1_000), messages);
}

#[test]
fn trimming_never_drops_the_newest_message() {
    let messages = vec![Message::user("x".repeat(10_000))];
    let trimmed = trim_history(messages, 10);
    assert_eq!(trimmed.len(), 1);
}
