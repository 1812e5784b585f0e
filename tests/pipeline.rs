//! End-to-end pipeline scenarios: events emitted on the raw bus flow
//! through the summarizer and surface as narrations, with the LLM and all
//! audio hardware unavailable (degraded mode).

use std::time::Duration;

use serde_json::json;

use echo_rs::bus::Bus;
use echo_rs::config::LlmConfig;
use echo_rs::events::{
    BlockReason, EventKind, EventSource, Narration, Priority, RawEvent, SummaryMethod,
};
use echo_rs::summarizer::Summarizer;

fn unreachable_llm() -> LlmConfig {
    LlmConfig {
        base_url: "http://127.0.0.1:1".into(),
        timeout: 0.5,
        ..LlmConfig::default()
    }
}

fn tool_event(session: &str, tool: &str, input: serde_json::Value) -> RawEvent {
    let mut event = RawEvent::new(EventKind::ToolExecuted, session, EventSource::Hook);
    event.tool_name = Some(tool.to_string());
    event.tool_input = Some(input);
    event
}

async fn recv_narration(sub: &mut echo_rs::bus::Subscription<Narration>) -> Narration {
    tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("narration should arrive within the window")
        .expect("bus should stay open")
}

#[tokio::test]
async fn tool_narration_flows_end_to_end() {
    let raw_bus: Bus<RawEvent> = Bus::new();
    let narration_bus: Bus<Narration> = Bus::new();
    let mut narrations = narration_bus.subscribe();

    let summarizer = Summarizer::new(raw_bus.clone(), narration_bus.clone(), &unreachable_llm());
    summarizer.start().await;

    raw_bus.emit(tool_event("s1", "Bash", json!({"command": "npm test"})));

    let narration = recv_narration(&mut narrations).await;
    assert_eq!(narration.text, "Ran command: npm test");
    assert_eq!(narration.priority, Priority::Normal);
    assert_eq!(narration.method, SummaryMethod::Template);
    assert_eq!(narration.session_id, "s1");

    summarizer.stop().await;
}

#[tokio::test]
async fn rapid_edits_batch_into_one_narration() {
    let raw_bus: Bus<RawEvent> = Bus::new();
    let narration_bus: Bus<Narration> = Bus::new();
    let mut narrations = narration_bus.subscribe();

    let summarizer = Summarizer::new(raw_bus.clone(), narration_bus.clone(), &unreachable_llm());
    summarizer.start().await;

    for path in ["/a.ts", "/b.ts", "/c.ts"] {
        raw_bus.emit(tool_event("s1", "Edit", json!({ "file_path": path })));
    }

    let narration = recv_narration(&mut narrations).await;
    assert_eq!(narration.text, "Edited 3 files.");
    assert_eq!(narration.priority, Priority::Normal);
    assert_eq!(narration.method, SummaryMethod::Template);

    summarizer.stop().await;
}

#[tokio::test]
async fn blocked_event_is_critical_and_carries_options() {
    let raw_bus: Bus<RawEvent> = Bus::new();
    let narration_bus: Bus<Narration> = Bus::new();
    let mut narrations = narration_bus.subscribe();

    let summarizer = Summarizer::new(raw_bus.clone(), narration_bus.clone(), &unreachable_llm());
    summarizer.start().await;

    let mut blocked = RawEvent::new(EventKind::AgentBlocked, "s1", EventSource::Hook);
    blocked.block_reason = Some(BlockReason::PermissionPrompt);
    blocked.message = Some("Allow edit of auth.ts?".into());
    blocked.options = Some(vec!["Allow".into(), "Deny".into()]);
    raw_bus.emit(blocked);

    let narration = recv_narration(&mut narrations).await;
    assert_eq!(narration.priority, Priority::Critical);
    assert_eq!(narration.block_reason, Some(BlockReason::PermissionPrompt));
    assert_eq!(
        narration.options,
        Some(vec!["Allow".to_string(), "Deny".to_string()])
    );
    assert!(narration.text.starts_with(
        "The agent needs your permission and is waiting for your answer."
    ));
    assert!(narration.text.ends_with("Option one: Allow. Option two: Deny."));

    summarizer.stop().await;
}

#[tokio::test]
async fn degraded_mode_still_narrates_on_the_bus() {
    // Full graph with every external collaborator unavailable: narrations
    // must still reach the narration bus and nothing may panic.
    let mut config = echo_rs::config::Config::default();
    config.llm.base_url = "http://127.0.0.1:1".into();
    config.llm.timeout = 0.5;

    let state = echo_rs::build_app(&config);
    let mut narrations = state.narration_bus.subscribe();
    state.start().await;

    assert!(!state.speaker.tts_available());

    state
        .raw_bus
        .emit(tool_event("s1", "Bash", json!({"command": "npm test"})));

    let narration = tokio::time::timeout(Duration::from_secs(5), narrations.recv())
        .await
        .expect("narration should arrive")
        .unwrap();
    assert_eq!(narration.text, "Ran command: npm test");

    state.stop().await;
}

#[tokio::test]
async fn batch_flushes_before_a_stop_event() {
    let raw_bus: Bus<RawEvent> = Bus::new();
    let narration_bus: Bus<Narration> = Bus::new();
    let mut narrations = narration_bus.subscribe();

    let summarizer = Summarizer::new(raw_bus.clone(), narration_bus.clone(), &unreachable_llm());
    summarizer.start().await;

    raw_bus.emit(tool_event("s1", "Edit", json!({"file_path": "/a.ts"})));
    raw_bus.emit(RawEvent::new(EventKind::AgentStopped, "s1", EventSource::Hook));

    let first = recv_narration(&mut narrations).await;
    assert_eq!(first.text, "Edited a file.");
    let second = recv_narration(&mut narrations).await;
    assert_eq!(second.text, "Agent finished.");

    summarizer.stop().await;
}
