//! Active-call registry and the gateway root that dispatches SIP events and
//! control-plane requests.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::backend::{BackendApi, NewSessionRequest};
use crate::config::GatewayConfig;
use crate::core::Conversation;
use crate::core::vad::SpeechModel;
use crate::errors::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::sip::{CallActions, CallId, CallLifecycle, SipDriver};

#[derive(Default)]
struct RegistryInner {
    calls: HashMap<CallId, Arc<Conversation>>,
    session_calls: HashMap<String, CallId>,
}

/// Mapping `call_id -> Conversation` and `session_id -> call_id`, mutated
/// only under one lock. For every session entry there is a call entry whose
/// conversation carries that session id.
#[derive(Default)]
pub struct CallRegistry {
    inner: Mutex<RegistryInner>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, conversation: Arc<Conversation>) {
        let mut inner = self.inner.lock();
        let call_id = conversation.call_id();
        if let Some(session_id) = conversation.session_id() {
            inner.session_calls.insert(session_id, call_id);
        }
        inner.calls.insert(call_id, conversation);
    }

    /// Bind a backend session to a registered call.
    pub fn bind_session(&self, conversation: &Arc<Conversation>, session_id: &str) {
        conversation.bind_session(session_id);
        let mut inner = self.inner.lock();
        inner.calls.insert(conversation.call_id(), Arc::clone(conversation));
        inner
            .session_calls
            .insert(session_id.to_string(), conversation.call_id());
    }

    pub fn by_call_id(&self, call_id: CallId) -> Option<Arc<Conversation>> {
        self.inner.lock().calls.get(&call_id).cloned()
    }

    pub fn by_session_id(&self, session_id: &str) -> Option<Arc<Conversation>> {
        let inner = self.inner.lock();
        inner
            .session_calls
            .get(session_id)
            .and_then(|call_id| inner.calls.get(call_id))
            .cloned()
    }

    /// Remove a call and stop its event stream.
    pub fn remove(&self, call_id: CallId) {
        let conversation = {
            let mut inner = self.inner.lock();
            let Some(conversation) = inner.calls.remove(&call_id) else {
                return;
            };
            if let Some(session_id) = conversation.session_id() {
                inner.session_calls.remove(&session_id);
            }
            conversation
        };
        conversation.stop_stream();
    }

    pub fn active_calls(&self) -> usize {
        self.inner.lock().calls.len()
    }

    /// Drain everything at shutdown, stopping event streams.
    pub fn clear(&self) {
        let conversations: Vec<Arc<Conversation>> = {
            let mut inner = self.inner.lock();
            inner.session_calls.clear();
            inner.calls.drain().map(|(_, c)| c).collect()
        };
        for conversation in conversations {
            conversation.stop_stream();
        }
    }
}

/// Application root: owns the registry, the backend client, metrics, the
/// loaded VAD model, and the (optional, late-bound) SIP driver.
pub struct Gateway {
    pub config: Arc<GatewayConfig>,
    backend: Arc<dyn BackendApi>,
    metrics: Arc<Metrics>,
    vad_model: Arc<dyn SpeechModel>,
    registry: CallRegistry,
    driver: RwLock<Option<Arc<dyn SipDriver>>>,
}

impl Gateway {
    pub fn new(
        config: Arc<GatewayConfig>,
        backend: Arc<dyn BackendApi>,
        metrics: Arc<Metrics>,
        vad_model: Arc<dyn SpeechModel>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            backend,
            metrics,
            vad_model,
            registry: CallRegistry::new(),
            driver: RwLock::new(None),
        })
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn registry(&self) -> &CallRegistry {
        &self.registry
    }

    /// Attach the SIP driver adapter. Until this happens, `/call` answers
    /// 503.
    pub fn attach_driver(&self, driver: Arc<dyn SipDriver>) {
        *self.driver.write() = Some(driver);
    }

    fn driver(&self) -> Option<Arc<dyn SipDriver>> {
        self.driver.read().clone()
    }

    fn new_conversation(&self, actions: Arc<dyn CallActions>) -> Arc<Conversation> {
        Conversation::new(
            actions.call_id(),
            actions,
            Arc::clone(&self.backend),
            Arc::clone(&self.metrics),
            Arc::clone(&self.config),
            Arc::clone(&self.vad_model),
        )
    }

    /// SIP registration progress from the account adapter.
    pub fn on_reg_state(&self, status_code: u16, reason: &str) {
        if status_code / 100 == 5 {
            error!(status_code, reason, "SIP registration server error");
        } else if status_code == 408 {
            warn!(status_code, reason, "SIP registration timeout");
        } else if status_code == 200 {
            info!("SIP registration successful");
        } else if status_code != 0 {
            warn!(status_code, reason, "SIP registration failed");
        }
    }

    /// Inbound call from the account adapter.
    pub async fn on_incoming_call(&self, actions: Arc<dyn CallActions>, remote_uri: &str) {
        if !self.config.sip.allow_inbound_calls {
            info!(call_id = actions.call_id(), "Inbound call rejected (disabled)");
            let _ = actions.hangup(403);
            return;
        }
        info!(call_id = actions.call_id(), remote_uri, "Incoming call");

        let _ = actions.answer(180);
        let conversation = self.new_conversation(Arc::clone(&actions));
        self.registry.register(Arc::clone(&conversation));

        let request = NewSessionRequest {
            user_id: remote_uri.to_string(),
            name: String::new(),
            conversation_id: String::new(),
            communication_id: None,
            kwargs: json!({}),
        };
        match self.backend.create_session(request).await {
            Ok(session) => {
                self.registry.bind_session(&conversation, &session.session_id);
                conversation.set_greeting(session.greeting);
                conversation.connect_stream();
                if let Err(err) = actions.answer(200) {
                    error!(error = %err, "Failed to answer inbound call");
                }
            }
            Err(err) => {
                error!(error = %err, call_id = actions.call_id(), "Inbound call backend error");
                let _ = actions.hangup(503);
                self.registry.remove(actions.call_id());
            }
        }
    }

    /// Call lifecycle event from the call adapter.
    pub fn on_call_state(&self, call_id: CallId, lifecycle: CallLifecycle, last_status_code: u16) {
        let Some(conversation) = self.registry.by_call_id(call_id) else {
            return;
        };
        conversation.on_call_state(lifecycle, last_status_code);
        if lifecycle == CallLifecycle::Disconnected {
            self.registry.remove(call_id);
        }
    }

    pub fn on_call_media_state(&self, call_id: CallId) {
        if let Some(conversation) = self.registry.by_call_id(call_id) {
            conversation.on_call_media_state();
        }
    }

    pub fn on_transfer_status(
        &self,
        call_id: CallId,
        status_code: u16,
        is_final: bool,
        reason: &str,
    ) {
        if let Some(conversation) = self.registry.by_call_id(call_id) {
            conversation.on_transfer_status(status_code, is_final, reason);
        }
    }

    /// `POST /call`: create a backend session, dial out, and bind the two.
    pub async fn handle_call_request(&self, body: Value) -> AppResult<Value> {
        self.metrics.increment_request();

        let Some(to_uri) = body.get("to_uri").and_then(Value::as_str) else {
            return Err(AppError::BadRequest("to_uri is required".into()));
        };
        let env_info = body
            .get("env_info")
            .filter(|v| v.is_object())
            .cloned()
            .unwrap_or_else(|| json!({}));
        let communication_id = body
            .get("communication_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        info!(to_uri, ?communication_id, "Making outbound call");

        let Some(driver) = self.driver() else {
            return Err(AppError::ServiceUnavailable("sip not initialized".into()));
        };

        let session = self
            .backend
            .create_session(NewSessionRequest {
                user_id: to_uri.to_string(),
                name: String::new(),
                conversation_id: String::new(),
                communication_id,
                kwargs: env_info,
            })
            .await?;

        let actions = driver
            .create_call()
            .map_err(|err| AppError::InternalServerError(format!("call setup failed: {err}")))?;
        let conversation = self.new_conversation(actions);
        self.registry.register(Arc::clone(&conversation));
        self.registry.bind_session(&conversation, &session.session_id);
        conversation.set_greeting(session.greeting);
        conversation.connect_stream();

        if let Err(err) = conversation.make_call(to_uri) {
            self.registry.remove(conversation.call_id());
            return Err(AppError::InternalServerError(format!(
                "call setup failed: {err}"
            )));
        }

        Ok(json!({ "message": "ok", "session_id": session.session_id }))
    }

    /// `POST /transfer/{session_id}`: store a pending warm-transfer target.
    pub async fn handle_transfer_request(
        &self,
        session_id: &str,
        body: Value,
    ) -> AppResult<Value> {
        self.metrics.increment_request();

        let Some(to_uri) = body.get("to_uri").and_then(Value::as_str) else {
            return Err(AppError::BadRequest("to_uri is required".into()));
        };
        let transfer_delay = body
            .get("transfer_delay")
            .and_then(Value::as_f64)
            .unwrap_or(1.0);

        let Some(conversation) = self.registry.by_session_id(session_id) else {
            return Err(AppError::NotFound("session not found".into()));
        };

        match conversation.lifecycle() {
            Ok(lifecycle) if lifecycle.is_confirmed() => {}
            Ok(_) => {
                return Err(AppError::BadRequest("call is not active".into()));
            }
            Err(err) => {
                error!(error = %err, session_id, "Failed to inspect call state");
                return Err(AppError::InternalServerError("call state error".into()));
            }
        }

        conversation.set_transfer_target(to_uri, transfer_delay);
        info!(to_uri, transfer_delay, session_id, "Transfer target set");
        Ok(json!({
            "status": "ok",
            "message": "Successfully transferred",
            "session_id": session_id,
            "to_uri": to_uri,
        }))
    }
}
