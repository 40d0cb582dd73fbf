//! Coverage for config parsing, overrides and secret resolution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use concierge::config::{config_path_with, Config, LlmConfig};

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn default_llm_values() {
    let llm = LlmConfig::default();
    assert_eq!(llm.api_key_env, "ANTHROPIC_API_KEY");
    assert_eq!(llm.max_tokens, 1024);
    assert_eq!(llm.history_messages, 20);
    assert_eq!(llm.max_tool_rounds, 4);
    assert_eq!(llm.daily_token_limit, 2_000_000);
}

#[test]
fn parse_minimal_config() {
    let toml_str = r#"
[server]
bind = "0.0.0.0:9000"

[business]
name = "Kopi Nusantara"
"#;
    let config = match Config::from_toml(toml_str) {
        Ok(config) => config,
        Err(err) => panic!("minimal config should parse: {err}"),
    };
    assert_eq!(config.server.bind, "0.0.0.0:9000");
    assert_eq!(config.business.name, "Kopi Nusantara");
    // Unset fields fall back to defaults.
    assert_eq!(config.business.currency, "IDR");
    assert_eq!(config.cache.ttl_secs, 3600);
    assert!(config.validate().is_ok());
}

#[test]
fn parse_full_config() {
    let toml_str = r#"
[server]
bind = "127.0.0.1:8080"
cors_origins = ["https://shop.example"]

[database]
url = "sqlite:///var/lib/concierge/concierge.db"
max_connections = 8

[llm]
model = "claude-haiku-4-5"
max_tool_rounds = 2

[knowledge]
index_host = "https://faq-abc123.svc.pinecone.io"
namespace = "faq"
top_k = 3

[cache]
ttl_secs = 600
max_entries = 50

[whatsapp]
account_sid = "AC123"
from_number = "+14155238886"

[logging]
dir = "/var/log/concierge"
"#;
    let config = match Config::from_toml(toml_str) {
        Ok(config) => config,
        Err(err) => panic!("full config should parse: {err}"),
    };
    assert_eq!(config.server.cors_origins, vec!["https://shop.example"]);
    assert_eq!(config.database.max_connections, 8);
    assert_eq!(config.llm.model, "claude-haiku-4-5");
    assert_eq!(config.llm.max_tool_rounds, 2);
    assert_eq!(config.knowledge.namespace, "faq");
    assert_eq!(config.knowledge.top_k, 3);
    assert_eq!(config.cache.max_entries, 50);
    assert_eq!(config.whatsapp.account_sid.as_deref(), Some("AC123"));
    assert_eq!(config.logging.dir, PathBuf::from("/var/log/concierge"));
    assert!(config.validate().is_ok());
}

#[test]
fn malformed_toml_is_an_error() {
    assert!(Config::from_toml("[server\nbind = 1").is_err());
    assert!(Config::from_toml("[cache]\nttl_secs = \"soon\"").is_err());
}

#[test]
fn validation_rejects_bad_values() {
    let mut config = Config::default();
    config.server.bind = "not-an-address".to_owned();
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.cache.max_entries = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.knowledge.index_host = Some("not a url".to_owned());
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.whatsapp.account_sid = Some("AC123".to_owned());
    assert!(config.validate().is_err());
}

#[test]
fn env_overrides_file_values() {
    let mut config = Config::default();
    config.apply_overrides(env_from(&[
        ("CONCIERGE_BIND", "0.0.0.0:7000"),
        ("CONCIERGE_DATABASE_URL", "sqlite::memory:"),
        ("CONCIERGE_CACHE_TTL_SECS", "120"),
        ("CONCIERGE_LOG_DIR", "/tmp/concierge-logs"),
    ]));
    assert_eq!(config.server.bind, "0.0.0.0:7000");
    assert_eq!(config.database.url, "sqlite::memory:");
    assert_eq!(config.cache.ttl_secs, 120);
    assert_eq!(config.logging.dir, PathBuf::from("/tmp/concierge-logs"));
}

#[test]
fn invalid_numeric_override_is_ignored() {
    let mut config = Config::default();
    config.apply_overrides(env_from(&[("CONCIERGE_CACHE_TTL_SECS", "forever")]));
    assert_eq!(config.cache.ttl_secs, 3600);
}

#[test]
fn secrets_resolve_from_named_variables() {
    let mut config = Config::default();
    config.llm.api_key_env = "SHOP_ANTHROPIC_KEY".to_owned();
    let secrets = config.resolve_secrets(env_from(&[
        ("SHOP_ANTHROPIC_KEY", "sk-ant-test"),
        ("MIDTRANS_SERVER_KEY", "SB-Mid-server-abc"),
        ("TWILIO_AUTH_TOKEN", "   "),
    ]));
    assert_eq!(secrets.anthropic_api_key.as_deref(), Some("sk-ant-test"));
    assert_eq!(secrets.payment_server_key.as_deref(), Some("SB-Mid-server-abc"));
    // Blank values count as unset.
    assert_eq!(secrets.twilio_auth_token, None);
    assert_eq!(secrets.knowledge_api_key, None);

    let debug = format!("{secrets:?}");
    assert!(!debug.contains("sk-ant-test"));
    assert!(!debug.contains("SB-Mid-server-abc"));
}

#[test]
fn missing_file_yields_defaults() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let config = match Config::load_file(&tmp.path().join("absent.toml")) {
        Ok(config) => config,
        Err(err) => panic!("missing file should fall back to defaults: {err}"),
    };
    assert_eq!(config.server.bind, "127.0.0.1:8080");
}

#[test]
fn file_is_loaded_and_parse_errors_name_the_path() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let good = tmp.path().join("concierge.toml");
    std::fs::write(&good, "[business]\nname = \"Klinik Sehat\"\n").expect("write");
    let config = Config::load_file(&good).expect("should load");
    assert_eq!(config.business.name, "Klinik Sehat");

    let bad = tmp.path().join("broken.toml");
    std::fs::write(&bad, "[business\n").expect("write");
    let err = match Config::load_file(&bad) {
        Ok(_) => panic!("broken file should not load"),
        Err(err) => err,
    };
    assert!(err.to_string().contains("broken.toml"));
}

#[test]
fn config_path_defaults_to_working_directory() {
    assert_eq!(config_path_with(|_| None), Path::new("concierge.toml"));
}
