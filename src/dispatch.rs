//! The callback dispatch pipeline: verify, decrypt, de-duplicate, classify,
//! route.
//!
//! Per inbound delivery the pipeline is: signature check -> decrypt -> parse
//! -> jittered admission -> ledger record -> classify -> spawn handler ->
//! answer the platform. The HTTP response goes out as soon as admission and
//! classification are done; the platform treats 200 as "received", not
//! "processed", and the spawned task owns the single ledger completion
//! update. Verification or decrypt failures never escape this module: they
//! map to an empty response body, and the raw ciphertext is never logged.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;

use crate::crypto::WecomCrypto;
use crate::dedup::{admission_jitter, DedupStore};
use crate::envelope::{fingerprint, CallbackQuery, DecryptedEvent, EncryptedEnvelope};
use crate::handlers::{CommandContext, CommandGroup};
use crate::ledger::{ProcessUpdate, ProcessingLedger, REDACTED_PLACEHOLDER};
use crate::outbound::ReplySender;
use crate::registry::{CommandRegistry, DispatchDecision, GroupId};

const SOURCE: &str = "wecom";
const TIMEOUT_REPLY: &str = "服务响应超时，请稍后再试。";

/// Terminal state of one delivery, as seen by the HTTP layer.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Signature, decrypt, or parse failure. Responds with an empty body.
    Rejected,
    /// Admission lost within the ttl window. Success-shaped response, no
    /// handler run; a duplicate is not an error.
    Duplicate,
    /// Registry referenced an action no group implements. Failure response
    /// for this request only.
    Failed,
    /// Admitted and routed. `task` is the spawned handler execution (absent
    /// for no-op pass-through).
    Admitted { task: Option<JoinHandle<()>> },
}

pub struct CallbackDispatcher {
    crypto: WecomCrypto,
    registry: CommandRegistry,
    groups: HashMap<GroupId, Arc<dyn CommandGroup>>,
    dedup: Arc<dyn DedupStore>,
    ledger: Arc<dyn ProcessingLedger>,
    sender: Arc<dyn ReplySender>,
    agent_id: String,
    dedup_ttl: Duration,
    jitter_enabled: bool,
}

impl CallbackDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        crypto: WecomCrypto,
        registry: CommandRegistry,
        groups: Vec<Arc<dyn CommandGroup>>,
        dedup: Arc<dyn DedupStore>,
        ledger: Arc<dyn ProcessingLedger>,
        sender: Arc<dyn ReplySender>,
        agent_id: String,
        dedup_ttl: Duration,
    ) -> Self {
        let groups = groups
            .into_iter()
            .map(|g| (g.group_id(), g))
            .collect();
        Self {
            crypto,
            registry,
            groups,
            dedup,
            ledger,
            sender,
            agent_id,
            dedup_ttl,
            jitter_enabled: true,
        }
    }

    /// Disables the pre-admission jitter. The admission check itself stays
    /// atomic; this only exists for deterministic tests.
    pub fn without_jitter(mut self) -> Self {
        self.jitter_enabled = false;
        self
    }

    /// Synchronous challenge path for endpoint registration. Returns the
    /// decrypted echo on success and an empty string on any failure; the
    /// platform treats an empty body as "unverified" and may retry.
    pub fn verify_challenge(&self, query: &CallbackQuery) -> String {
        let Some(echostr) = query.echostr.as_deref() else {
            tracing::warn!("challenge request without echostr");
            return String::new();
        };
        match self.crypto.verify_challenge(
            &query.msg_signature,
            &query.timestamp,
            &query.nonce,
            echostr,
        ) {
            Ok(plain) => plain,
            Err(err) => {
                tracing::warn!("challenge verification failed: {err}");
                String::new()
            }
        }
    }

    /// Runs the full pipeline for one event delivery.
    pub async fn dispatch(&self, query: &CallbackQuery, body: &str) -> DispatchOutcome {
        let Some(envelope) = EncryptedEnvelope::parse(body) else {
            tracing::warn!(body_len = body.len(), "callback body empty or unparsable");
            return DispatchOutcome::Rejected;
        };

        if !self.crypto.verify_signature(
            &query.msg_signature,
            &query.timestamp,
            &query.nonce,
            &envelope.encrypt,
        ) {
            tracing::warn!(timestamp = %query.timestamp, "callback signature mismatch");
            return DispatchOutcome::Rejected;
        }

        let plaintext = match self.crypto.decrypt(&envelope.encrypt) {
            Ok(plain) => plain,
            Err(err) => {
                // Never log the ciphertext itself.
                tracing::warn!(
                    ciphertext_len = envelope.encrypt.len(),
                    "callback decrypt failed: {err}"
                );
                return DispatchOutcome::Rejected;
            }
        };

        let Some(event) = DecryptedEvent::parse(&plaintext) else {
            tracing::warn!("decrypted callback is not a recognized message");
            return DispatchOutcome::Rejected;
        };

        // Jitter thins out races between near-simultaneous duplicate
        // deliveries; the store's set-if-absent is what decides.
        if self.jitter_enabled {
            tokio::time::sleep(admission_jitter()).await;
        }
        let key = fingerprint(&self.agent_id, &plaintext);
        if !self.dedup.try_admit(&key, self.dedup_ttl) {
            tracing::info!(
                msg_type = %event.msg_type,
                from = %event.from_user,
                "duplicate delivery suppressed"
            );
            return DispatchOutcome::Duplicate;
        }

        let raw_params = json!({
            "msg_signature": query.msg_signature,
            "timestamp": query.timestamp,
            "nonce": query.nonce,
            "encrypt": REDACTED_PLACEHOLDER,
        })
        .to_string();
        let record_id = match self.ledger.add_queue(SOURCE, &raw_params).await {
            Ok(id) => Some(id),
            Err(err) => {
                // Observability only; the reply path keeps going.
                tracing::error!("ledger add_queue failed: {err}");
                None
            }
        };

        tracing::info!(
            msg_type = %event.msg_type,
            from = %event.from_user,
            event = event.event.as_deref().unwrap_or(""),
            event_key = event.event_key.as_deref().unwrap_or(""),
            "callback admitted"
        );

        let decision = match self.registry.classify(&event) {
            Ok(decision) => decision,
            Err(err) => {
                tracing::error!("classification failed: {err}");
                self.finish_record(record_id, &event, false, &err.to_string())
                    .await;
                return DispatchOutcome::Failed;
            }
        };

        match decision {
            DispatchDecision::Noop => {
                self.finish_record(record_id, &event, true, "noop").await;
                DispatchOutcome::Admitted { task: None }
            }
            DispatchDecision::Invoke {
                group,
                action,
                content,
                trace_id,
            } => {
                // Registry construction guarantees the group exists.
                let Some(handler) = self.groups.get(&group).cloned() else {
                    tracing::error!(group = group.code(), "no handler registered for group");
                    self.finish_record(record_id, &event, false, "missing handler")
                        .await;
                    return DispatchOutcome::Failed;
                };

                let ctx = CommandContext {
                    sender: event.from_user.clone(),
                    content,
                    trace_id,
                };
                let ledger = Arc::clone(&self.ledger);
                let sender = Arc::clone(&self.sender);
                let decrypted_summary = event_summary(&event);
                let task = tokio::spawn(async move {
                    let (succeed, result) = match handler.execute(action, &ctx).await {
                        Ok(sent) => (true, if sent { "replied" } else { "no-reply" }.to_string()),
                        Err(err) if err.is_timeout() => {
                            tracing::warn!("handler timed out: {err}");
                            if let Err(send_err) =
                                sender.send_text(&ctx.sender, TIMEOUT_REPLY).await
                            {
                                tracing::warn!("timeout notice send failed: {send_err}");
                            }
                            (false, err.to_string())
                        }
                        Err(err) => {
                            tracing::error!("handler failed: {err}");
                            (false, err.to_string())
                        }
                    };
                    if let Some(id) = record_id {
                        let update = ProcessUpdate {
                            decrypted_params: Some(decrypted_summary),
                            is_succeed: succeed,
                            result: Some(result),
                        };
                        if let Err(err) = ledger.update_process(id, update).await {
                            tracing::error!("ledger update_process failed: {err}");
                        }
                    }
                });
                DispatchOutcome::Admitted { task: Some(task) }
            }
        }
    }

    async fn finish_record(
        &self,
        record_id: Option<i64>,
        event: &DecryptedEvent,
        succeed: bool,
        result: &str,
    ) {
        let Some(id) = record_id else { return };
        let update = ProcessUpdate {
            decrypted_params: Some(event_summary(event)),
            is_succeed: succeed,
            result: Some(result.to_string()),
        };
        if let Err(err) = self.ledger.update_process(id, update).await {
            tracing::error!("ledger update_process failed: {err}");
        }
    }
}

/// Decrypted structured fields persisted for diagnosis. Text content is kept;
/// the encrypted blob never reaches the ledger.
fn event_summary(event: &DecryptedEvent) -> String {
    json!({
        "msg_type": event.msg_type,
        "from_user": event.from_user,
        "content": event.content,
        "event": event.event,
        "event_key": event.event_key,
        "create_time": event.create_time,
    })
    .to_string()
}
