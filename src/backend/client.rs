//! HTTP client for the conversational backend.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};
use tracing::debug;

use crate::config::GatewayConfig;
use crate::errors::BackendError;

use super::api::{BackendApi, BackendSession, CommitOutcome, NewSessionRequest};

pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    authorization_token: Option<String>,
}

impl BackendClient {
    pub fn new(config: &GatewayConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs_f64(config.backend_connect_timeout))
            .read_timeout(Duration::from_secs_f64(config.backend_sock_read_timeout))
            .timeout(Duration::from_secs_f64(config.backend_request_timeout))
            .build()?;
        Ok(Self {
            http,
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            authorization_token: config.authorization_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.authorization_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.as_u16() == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Permission(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Response {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn get_json(&self, path: &str) -> Result<Value, BackendError> {
        let response = self.authorize(self.http.get(self.url(path))).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value, BackendError> {
        let response = self
            .authorize(self.http.post(self.url(path)))
            .json(&body)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[async_trait]
impl BackendApi for BackendClient {
    async fn capabilities(&self) -> Result<Value, BackendError> {
        self.get_json("/capabilities").await
    }

    async fn create_session(
        &self,
        request: NewSessionRequest,
    ) -> Result<BackendSession, BackendError> {
        let body = json!({
            "user_id": request.user_id,
            "name": request.name,
            "type": "sip",
            "conversation_id": request.conversation_id,
            "communication_id": request.communication_id,
            "args": [],
            "kwargs": request.kwargs,
        });
        let part = reqwest::multipart::Part::text(body.to_string())
            .mime_str("application/json")
            .map_err(|e| BackendError::Malformed(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("body", part);

        let response = self
            .authorize(self.http.post(self.url("/session_v2")))
            .multipart(form)
            .send()
            .await?;
        let payload: Value = Self::check(response).await?.json().await?;

        let session_id = payload
            .pointer("/session/session_id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BackendError::Malformed("session_v2 response missing session.session_id".into())
            })?
            .to_string();
        let greeting = payload
            .get("greeting")
            .and_then(Value::as_str)
            .map(str::to_string);
        debug!(session_id, has_greeting = greeting.is_some(), "Backend session created");
        Ok(BackendSession {
            session_id,
            greeting,
        })
    }

    async fn start(&self, session_id: &str, message: &str) -> Result<Value, BackendError> {
        self.post_json(
            &format!("/session/{session_id}/start"),
            json!({ "message": message, "kwargs": {} }),
        )
        .await
    }

    async fn commit(&self, session_id: &str) -> Result<CommitOutcome, BackendError> {
        let payload = self
            .post_json(&format!("/session/{session_id}/commit"), json!({}))
            .await?;
        Ok(CommitOutcome {
            response: payload
                .get("response")
                .and_then(Value::as_str)
                .map(str::to_string),
            session_ends: payload
                .pointer("/metadata/SESSION_ENDS")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    async fn rollback(&self, session_id: &str) -> Result<Value, BackendError> {
        self.post_json(&format!("/session/{session_id}/rollback"), json!({}))
            .await
    }

    async fn synthesize(&self, session_id: &str, text: &str) -> Result<Bytes, BackendError> {
        let response = self
            .authorize(
                self.http
                    .get(self.url(&format!("/session/{session_id}/synthesize")))
                    .query(&[("text", text), ("format", "wav")]),
            )
            .send()
            .await?;
        Ok(Self::check(response).await?.bytes().await?)
    }

    async fn transcribe(&self, wav: Vec<u8>) -> Result<String, BackendError> {
        let response = self
            .authorize(self.http.post(self.url("/transcribe")))
            .header(reqwest::header::CONTENT_TYPE, "audio/wav")
            .body(wav)
            .send()
            .await?;
        let payload: Value = Self::check(response).await?.json().await?;
        let text = match &payload {
            Value::String(text) => text.clone(),
            Value::Object(map) => map
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        };
        Ok(text)
    }

    async fn close_session(&self, session_id: &str, status: &str) -> Result<(), BackendError> {
        self.post_json(
            &format!("/session/{session_id}/close"),
            json!({ "status": status }),
        )
        .await?;
        Ok(())
    }
}
