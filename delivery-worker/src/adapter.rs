use std::time;

use delivery_common::message::Message;
use reqwest::header;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{AdapterError, InvalidRequestError, RetryableError};

/// Upper bound on how much of an adapter's error response ends up in the failure record.
const MAX_ERROR_BODY_BYTES: usize = 1024;

#[derive(Serialize)]
struct SendRequest<'a> {
    message: &'a Message,
    recipient_id: &'a str,
}

/// HTTP client for the adapter contract: `POST {endpoint}/send`.
#[derive(Clone)]
pub struct AdapterClient {
    client: reqwest::Client,
}

impl AdapterClient {
    pub fn new(request_timeout: time::Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(request_timeout)?,
        })
    }

    /// Make one delivery attempt of `message` to `recipient_id` through the adapter at `endpoint`.
    ///
    /// On a 2xx the adapter's body is handed back: parsed JSON, or the raw text wrapped as
    /// `{"status": "ok", "raw": ...}` when it is not JSON.
    pub async fn send(
        &self,
        endpoint: &str,
        message: &Message,
        recipient_id: &str,
    ) -> Result<Value, AdapterError> {
        let url: reqwest::Url = format!("{}/send", endpoint.trim_end_matches('/'))
            .parse()
            .map_err(InvalidRequestError::Url)?;
        let body = serde_json::to_vec(&SendRequest {
            message,
            recipient_id,
        })
        .map_err(InvalidRequestError::Encoding)?;

        let response = self
            .client
            .post(url)
            .body(body)
            .send()
            .await
            .map_err(RetryableError::Transport)?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(RetryableError::Transport)?;

        if !status.is_success() {
            return Err(RetryableError::Status {
                status: status.as_u16(),
                body: truncate_body(text),
            }
            .into());
        }

        Ok(serde_json::from_str(&text).unwrap_or_else(|_| json!({"status": "ok", "raw": text})))
    }
}

fn build_http_client(request_timeout: time::Duration) -> reqwest::Result<reqwest::Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .user_agent("Delivery Worker")
        .timeout(request_timeout)
        .build()
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY_BYTES {
        let mut end = MAX_ERROR_BODY_BYTES;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn message() -> Message {
        serde_json::from_value(json!({
            "message_id": "m1",
            "conversation_id": "c1",
            "sender_id": "u1",
            "recipient_ids": ["tg_1"],
            "payload_type": "text",
            "payload_ref": "hello",
        }))
        .unwrap()
    }

    fn client() -> AdapterClient {
        AdapterClient::new(time::Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_send_posts_message_and_recipient() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/send")
                .header("content-type", "application/json")
                .json_body_partial(r#"{"recipient_id": "tg_1", "message": {"message_id": "m1"}}"#);
            then.status(200).json_body(json!({"status": "sent", "id": "x"}));
        });

        let response = client()
            .send(&server.base_url(), &message(), "tg_1")
            .await
            .expect("delivery should succeed");

        mock.assert();
        assert_eq!(response, json!({"status": "sent", "id": "x"}));
    }

    #[tokio::test]
    async fn test_non_json_body_is_wrapped() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/send");
            then.status(202).body("queued");
        });

        let response = client()
            .send(&format!("{}/", server.base_url()), &message(), "tg_1")
            .await
            .expect("delivery should succeed");

        assert_eq!(response, json!({"status": "ok", "raw": "queued"}));
    }

    #[tokio::test]
    async fn test_error_status_is_retryable() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/send");
            then.status(400).body("unknown recipient");
        });

        let error = client()
            .send(&server.base_url(), &message(), "tg_1")
            .await
            .expect_err("delivery should fail");

        assert!(error.is_retryable());
        assert_eq!(error.to_string(), "Adapter returned 400: unknown recipient");
    }

    #[tokio::test]
    async fn test_error_body_is_truncated() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/send");
            then.status(503).body("x".repeat(4096));
        });

        let error = client()
            .send(&server.base_url(), &message(), "tg_1")
            .await
            .expect_err("delivery should fail");

        match error {
            AdapterError::Retryable(RetryableError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body.len(), MAX_ERROR_BODY_BYTES);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_adapter_is_retryable() {
        // Nothing listens on port 1.
        let error = client()
            .send("http://127.0.0.1:1", &message(), "tg_1")
            .await
            .expect_err("delivery should fail");

        assert!(matches!(
            error,
            AdapterError::Retryable(RetryableError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_not_retryable() {
        let error = client()
            .send("not a url", &message(), "tg_1")
            .await
            .expect_err("delivery should fail");

        assert!(!error.is_retryable());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let body = "é".repeat(MAX_ERROR_BODY_BYTES);

        let truncated = truncate_body(body);

        assert!(truncated.len() <= MAX_ERROR_BODY_BYTES);
        assert!(truncated.chars().all(|c| c == 'é'));
    }
}
