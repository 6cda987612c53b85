//! Mock model endpoints for integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A local server speaking the OpenAI chat-completions and Anthropic
/// messages wire formats.
pub struct MockModelServer {
    server: MockServer,
}

impl MockModelServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn base_url(&self) -> String {
        self.server.uri()
    }

    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Request bodies received so far, in arrival order.
    pub async fn request_bodies(&self) -> Vec<Value> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|r| serde_json::from_slice(&r.body).expect("request body is JSON"))
            .collect()
    }

    /// Answer chat completions whose body contains `marker` with `content`.
    pub async fn openai_reply(&self, marker: &str, content: &str) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains(marker))
            .respond_with(ResponseTemplate::new(200).set_body_json(openai_body(content)))
            .mount(&self.server)
            .await;
    }

    /// Fail chat completions whose body contains `marker`.
    pub async fn openai_failure(&self, marker: &str, status: u16) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains(marker))
            .respond_with(ResponseTemplate::new(status).set_body_string("upstream unavailable"))
            .mount(&self.server)
            .await;
    }

    /// Answer Anthropic messages whose body contains `marker` with `text`.
    pub async fn anthropic_reply(&self, marker: &str, text: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_string_contains(marker))
            .respond_with(ResponseTemplate::new(200).set_body_json(anthropic_body(text)))
            .mount(&self.server)
            .await;
    }
}

pub fn openai_body(content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    })
}

pub fn anthropic_body(text: &str) -> Value {
    json!({
        "id": "msg_test",
        "type": "message",
        "role": "assistant",
        "content": [{ "type": "text", "text": text }],
        "stop_reason": "end_turn"
    })
}
