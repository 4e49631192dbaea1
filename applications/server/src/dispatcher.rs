/// Event dispatching - from speaker bridge envelopes to orchestrator calls
///
/// The speaker wraps everything in `{"event": "instruction", "data":
/// {"NewLine": "<json line>"}}`; the inner line carries `header` and
/// `payload`. Anything that fails to parse is not an event of interest and
/// is dropped without a sound.
use crate::orchestrator::Orchestrator;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Keys whose string values are reply-text candidates.
///
/// Both hint lists below and these key lists are an initial allow-list
/// distilled from observed event traces, not a protocol: tune them against
/// real devices rather than treating misses as bugs.
const REPLY_TEXT_KEYS: &[&str] = &[
    "text",
    "reply",
    "answer",
    "content",
    "tts",
    "say",
    "speech",
    "nlp_reply",
    "reply_text",
    "display_text",
];

/// Keys recursed into while hunting for reply text.
const RECURSE_KEYS: &[&str] = &[
    "payload",
    "data",
    "results",
    "result",
    "instruction",
    "directives",
    "cards",
];

const REPLY_NAMESPACE_HINTS: &[&str] = &["tts", "speechsynthesizer", "nlp", "dialog", "assistant"];
const REPLY_NAME_HINTS: &[&str] = &["reply", "respond", "speak"];

pub struct EventDispatcher {
    orchestrator: Arc<Orchestrator>,
}

impl EventDispatcher {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Handle one raw event envelope.
    pub async fn dispatch(&self, raw: &str) {
        let Ok(envelope) = serde_json::from_str::<Value>(raw) else {
            return;
        };
        if envelope.get("event").and_then(Value::as_str) != Some("instruction") {
            return;
        }
        let Some(raw_line) = envelope
            .get("data")
            .and_then(|data| data.get("NewLine"))
            .and_then(Value::as_str)
        else {
            return;
        };
        let Ok(line) = serde_json::from_str::<Value>(raw_line) else {
            return;
        };

        let namespace = header_field(&line, "namespace");
        let name = header_field(&line, "name");
        self.try_capture_reply(namespace, name, &line).await;

        if namespace != "SpeechRecognizer" || name != "RecognizeResult" {
            return;
        }
        let Some(payload) = line.get("payload") else {
            return;
        };
        if payload.get("is_final").and_then(Value::as_bool) != Some(true) {
            return;
        }
        let text = payload
            .get("results")
            .and_then(|results| results.get(0))
            .and_then(|first| first.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("");
        if text.is_empty() {
            return;
        }
        self.orchestrator.on_final_asr(text).await;
    }

    /// Route a possible assistant reply to the orchestrator. ASR results are
    /// never replies, whatever text they carry.
    async fn try_capture_reply(&self, namespace: &str, name: &str, line: &Value) {
        if namespace == "SpeechRecognizer" && name == "RecognizeResult" {
            return;
        }

        let mut texts = Vec::new();
        if let Some(payload) = line.get("payload") {
            collect_candidate_texts(payload, &mut texts);
        }
        collect_candidate_texts(line, &mut texts);
        let mut seen = HashSet::new();
        texts.retain(|text| seen.insert(text.clone()));
        if texts.is_empty() {
            return;
        }

        let namespace_lower = namespace.to_lowercase();
        let name_lower = name.to_lowercase();
        let maybe_reply = REPLY_NAMESPACE_HINTS
            .iter()
            .any(|hint| namespace_lower.contains(hint))
            || REPLY_NAME_HINTS.iter().any(|hint| name_lower.contains(hint));
        if !maybe_reply {
            return;
        }

        self.orchestrator
            .capture_reply(namespace, name, &texts[0])
            .await;
    }
}

fn header_field<'a>(line: &'a Value, field: &str) -> &'a str {
    line.get("header")
        .and_then(|header| header.get(field))
        .and_then(Value::as_str)
        .unwrap_or("")
}

/// Depth-first sweep for reply text: strings under the direct keys count,
/// the recurse keys and every array element are walked further.
fn collect_candidate_texts(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(text) => {
            let text = text.trim();
            if !text.is_empty() {
                out.push(text.to_string());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_candidate_texts(item, out);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                let key_lower = key.to_lowercase();
                if REPLY_TEXT_KEYS.contains(&key_lower.as_str()) {
                    if let Value::String(text) = item {
                        let text = text.trim();
                        if !text.is_empty() {
                            out.push(text.to_string());
                        }
                    }
                }
                if RECURSE_KEYS.contains(&key_lower.as_str()) {
                    collect_candidate_texts(item, out);
                }
            }
        }
        _ => {}
    }
}

/// Accept speaker-bridge connections and feed every line through the
/// dispatcher. A connection failing only drops that connection.
pub async fn serve_events(listener: TcpListener, dispatcher: Arc<EventDispatcher>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(%err, "event listener accept failed");
                continue;
            }
        };
        info!(%peer, "speaker bridge connected");
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                dispatcher.dispatch(&line).await;
            }
            info!(%peer, "speaker bridge disconnected");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collects_direct_keys_and_recurses() {
        let value = json!({
            "text": "第一",
            "ignored": "nope",
            "payload": {
                "reply": "第二",
                "results": [
                    {"display_text": "第三"},
                    "裸字符串会被忽略吗"
                ]
            }
        });
        let mut texts = Vec::new();
        collect_candidate_texts(&value, &mut texts);
        assert!(texts.contains(&"第一".to_string()));
        assert!(texts.contains(&"第二".to_string()));
        assert!(texts.contains(&"第三".to_string()));
        // Array elements are walked as values, so bare strings count too.
        assert!(texts.contains(&"裸字符串会被忽略吗".to_string()));
        assert!(!texts.contains(&"nope".to_string()));
    }

    #[test]
    fn blank_and_non_string_values_are_skipped() {
        let value = json!({
            "text": "  ",
            "reply": 42,
            "content": null,
            "data": {"say": " hi "}
        });
        let mut texts = Vec::new();
        collect_candidate_texts(&value, &mut texts);
        assert_eq!(texts, vec!["hi".to_string()]);
    }
}
