//! Event dispatcher tests: envelope parsing, ASR routing and reply capture.
mod common;

use aria_server::dispatcher::EventDispatcher;
use common::{harness, settle, DeviceCall};
use serde_json::json;
use std::sync::Arc;

fn envelope(namespace: &str, name: &str, payload: serde_json::Value) -> String {
    let line = json!({
        "header": { "namespace": namespace, "name": name },
        "payload": payload,
    });
    json!({
        "event": "instruction",
        "data": { "NewLine": line.to_string() },
    })
    .to_string()
}

fn final_asr(text: &str) -> String {
    envelope(
        "SpeechRecognizer",
        "RecognizeResult",
        json!({ "is_final": true, "results": [{ "text": text }] }),
    )
}

#[tokio::test(start_paused = true)]
async fn final_asr_reaches_the_orchestrator() {
    let h = harness(&[("hello.mp3", 3.0)], &[]).await;
    let dispatcher = EventDispatcher::new(Arc::clone(&h.orchestrator));

    dispatcher.dispatch(&final_asr("播放hello")).await;
    settle().await;

    assert!(h
        .device
        .speaks()
        .contains(&"好的，找到1首歌曲".to_string()));
    assert_eq!(h.device.plays().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn non_final_and_empty_results_are_ignored() {
    let h = harness(&[("hello.mp3", 3.0)], &[]).await;
    let dispatcher = EventDispatcher::new(Arc::clone(&h.orchestrator));

    dispatcher
        .dispatch(&envelope(
            "SpeechRecognizer",
            "RecognizeResult",
            json!({ "is_final": false, "results": [{ "text": "播放hello" }] }),
        ))
        .await;
    dispatcher
        .dispatch(&envelope(
            "SpeechRecognizer",
            "RecognizeResult",
            json!({ "is_final": true, "results": [] }),
        ))
        .await;
    settle().await;

    assert!(h.device.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn malformed_events_are_dropped_silently() {
    let h = harness(&[("hello.mp3", 3.0)], &[]).await;
    let dispatcher = EventDispatcher::new(Arc::clone(&h.orchestrator));

    dispatcher.dispatch("not json at all").await;
    dispatcher.dispatch(r#"{"event": "heartbeat"}"#).await;
    dispatcher
        .dispatch(r#"{"event": "instruction", "data": {}}"#)
        .await;
    dispatcher
        .dispatch(r#"{"event": "instruction", "data": {"NewLine": "{broken"}}"#)
        .await;
    settle().await;

    assert!(h.device.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn reply_event_is_captured_and_interrupts_when_armed() {
    let h = harness(&[("hello.mp3", 3.0)], &[]).await;
    let dispatcher = EventDispatcher::new(Arc::clone(&h.orchestrator));
    h.orchestrator.arm_reply_interrupt("voice search").await;

    dispatcher
        .dispatch(&envelope(
            "SpeechSynthesizer",
            "Speak",
            json!({ "text": "为你播放周杰伦的歌" }),
        ))
        .await;
    settle().await;

    assert_eq!(h.device.stops(), 1);
    assert_eq!(
        h.orchestrator.last_reply_text().await,
        "为你播放周杰伦的歌"
    );
}

#[tokio::test(start_paused = true)]
async fn reply_text_is_found_in_nested_payloads() {
    let h = harness(&[("hello.mp3", 3.0)], &[]).await;
    let dispatcher = EventDispatcher::new(Arc::clone(&h.orchestrator));

    dispatcher
        .dispatch(&envelope(
            "Dialog",
            "Result",
            json!({
                "directives": [
                    { "instruction": { "nlp_reply": "现在是下午三点" } }
                ]
            }),
        ))
        .await;
    settle().await;

    // Captured (namespace hint "dialog") but disarmed, so no stop.
    assert_eq!(h.orchestrator.last_reply_text().await, "现在是下午三点");
    assert_eq!(h.device.stops(), 0);
}

#[tokio::test(start_paused = true)]
async fn asr_results_are_never_reply_candidates() {
    let h = harness(&[("hello.mp3", 3.0)], &[]).await;
    let dispatcher = EventDispatcher::new(Arc::clone(&h.orchestrator));
    h.orchestrator.arm_reply_interrupt("voice search").await;

    // ASR events carry a "text" key, but must never be treated as replies.
    dispatcher
        .dispatch(&envelope(
            "SpeechRecognizer",
            "RecognizeResult",
            json!({ "is_final": false, "results": [{ "text": "停止播放" }] }),
        ))
        .await;
    settle().await;

    assert_eq!(h.orchestrator.last_reply_text().await, "");
    assert_eq!(h.device.stops(), 0);
}

#[tokio::test(start_paused = true)]
async fn unrelated_namespaces_are_not_captured() {
    let h = harness(&[("hello.mp3", 3.0)], &[]).await;
    let dispatcher = EventDispatcher::new(Arc::clone(&h.orchestrator));

    dispatcher
        .dispatch(&envelope(
            "SystemMonitor",
            "Heartbeat",
            json!({ "text": "ok" }),
        ))
        .await;
    settle().await;

    assert_eq!(h.orchestrator.last_reply_text().await, "");
    assert!(h.device.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_command_via_event_goes_idle() {
    let h = harness(&[("hello.mp3", 30.0)], &[]).await;
    let dispatcher = EventDispatcher::new(Arc::clone(&h.orchestrator));

    dispatcher.dispatch(&final_asr("播放hello")).await;
    settle().await;
    assert!(h.orchestrator.status().await.current.is_some());

    dispatcher.dispatch(&final_asr("停止播放")).await;
    settle().await;
    let status = h.orchestrator.status().await;
    assert!(status.current.is_none());
    assert_eq!(status.queued, 0);
    assert!(!status.timer_armed);

    // A spoken count from the play plus at least two stops.
    assert!(h.device.calls().contains(&DeviceCall::Stop));
}
