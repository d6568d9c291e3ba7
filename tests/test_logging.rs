//! Tests for logging configuration and format parsing
//!
//! Tests the pure functions in the logging module that handle log format and
//! level parsing and filter construction.

use botbridge::observability::logging::{build_filter, parse_level, LogFormat};
use tracing::Level;

#[test]
fn test_log_format_parse_json() {
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
    assert_eq!(LogFormat::parse("Json"), LogFormat::Json);
}

#[test]
fn test_log_format_parse_pretty() {
    assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
}

#[test]
fn test_log_format_parse_compact() {
    assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
    assert_eq!(LogFormat::parse("Compact"), LogFormat::Compact);
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    for input in ["invalid", "", "xml", "123"] {
        assert_eq!(LogFormat::parse(input), LogFormat::Json, "input {input:?}");
    }
}

#[test]
fn test_log_level_parse_is_case_insensitive() {
    assert_eq!(parse_level("error"), Level::ERROR);
    assert_eq!(parse_level("Warn"), Level::WARN);
    assert_eq!(parse_level("INFO"), Level::INFO);
    assert_eq!(parse_level("debug"), Level::DEBUG);
    assert_eq!(parse_level("TrAcE"), Level::TRACE);
}

#[test]
fn test_log_level_invalid_defaults_to_info() {
    assert_eq!(parse_level("verbose"), Level::INFO);
    assert_eq!(parse_level(""), Level::INFO);
}

#[test]
fn test_default_filter_quiets_dependencies() {
    let filter = build_filter(Level::TRACE, None).to_string().to_lowercase();
    assert!(filter.contains("trace"));
    assert!(filter.contains("rumqttc=warn"));
    assert!(filter.contains("hyper=warn"));
}

#[test]
fn test_rust_log_replaces_level_filter() {
    let filter = build_filter(Level::ERROR, Some("botbridge::bridge=debug,rumqttc=info"))
        .to_string()
        .to_lowercase();
    assert!(filter.contains("botbridge::bridge=debug"));
    assert!(filter.contains("rumqttc=info"));
    assert!(!filter.contains("warp=warn"));
}

#[test]
fn test_invalid_rust_log_is_ignored() {
    let filter = build_filter(Level::WARN, Some("botbridge=[[["))
        .to_string()
        .to_lowercase();
    assert!(filter.contains("warn"));
    assert!(filter.contains("rumqttc=warn"));
}

#[test]
fn test_bridge_span_accepts_optional_fields() {
    let span = botbridge::bridge_span!("publish", worker_id = "bot-1", command = "start");
    let _guard = span.enter();
    let span = botbridge::bridge_span!("connect");
    drop(span);
}
