//! Callback endpoint handlers: GET challenge verification and POST event
//! delivery.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::response::IntoResponse;

use super::AppState;
use crate::dispatch::DispatchOutcome;
use crate::envelope::CallbackQuery;

/// Opaque body the platform accepts as "delivery received".
const SUCCESS_TOKEN: &str = "success";

/// GET: one-time endpoint registration. Success echoes the decrypted
/// challenge verbatim; failure is an empty body, never an error status.
pub(super) async fn handle_verify(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> impl IntoResponse {
    state.dispatcher.verify_challenge(&query)
}

/// POST: encrypted event delivery.
pub(super) async fn handle_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    body: Bytes,
) -> impl IntoResponse {
    let body = String::from_utf8_lossy(&body);
    match state.dispatcher.dispatch(&query, &body).await {
        // Duplicates still acknowledge: the platform already delivered once.
        DispatchOutcome::Admitted { .. } | DispatchOutcome::Duplicate => SUCCESS_TOKEN,
        DispatchOutcome::Rejected | DispatchOutcome::Failed => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AiConfig, KeywordRule};
    use crate::crypto::WecomCrypto;
    use crate::dedup::MemoryDedupStore;
    use crate::dispatch::CallbackDispatcher;
    use crate::handlers::testing::{FakeAi, FakeSender};
    use crate::handlers::{implemented_actions, AiGroup, CommandGroup};
    use crate::ledger::NoopLedger;
    use crate::outbound::ReplySender;
    use crate::registry::CommandRegistry;
    use std::sync::Arc;
    use std::time::Duration;

    const TEST_KEY: &str = "abcdefghijklmnopqrstuvwxyz0123456789ABCDEFG";

    fn state() -> (AppState, WecomCrypto) {
        let crypto = WecomCrypto::new("token123", TEST_KEY).unwrap();
        let sender = Arc::new(FakeSender::default());
        let groups: Vec<Arc<dyn CommandGroup>> = vec![Arc::new(AiGroup::new(
            Arc::new(FakeAi::default()),
            Arc::clone(&sender) as Arc<dyn ReplySender>,
            AiConfig::default(),
        ))];
        let registry = CommandRegistry::new(
            vec!["alice".to_string()],
            vec![KeywordRule {
                prefix: "#提问".to_string(),
                group: 0,
                action: 2,
            }],
            implemented_actions(&groups),
        )
        .unwrap();
        let dispatcher = CallbackDispatcher::new(
            crypto.clone(),
            registry,
            groups,
            Arc::new(MemoryDedupStore::new(100)),
            Arc::new(NoopLedger),
            sender,
            "7".to_string(),
            Duration::from_secs(30),
        )
        .without_jitter();
        (
            AppState {
                dispatcher: Arc::new(dispatcher),
            },
            crypto,
        )
    }

    #[tokio::test]
    async fn verify_echoes_challenge_plaintext() {
        let (state, crypto) = state();
        let reply = crypto.encrypt("ping-42", "n1", "1700000000", "corp").unwrap();
        let query = CallbackQuery {
            msg_signature: reply.signature,
            timestamp: reply.timestamp,
            nonce: reply.nonce,
            echostr: Some(reply.encrypt),
        };
        assert_eq!(state.dispatcher.verify_challenge(&query), "ping-42");
    }

    #[tokio::test]
    async fn verify_with_corrupt_echostr_returns_empty() {
        use sha1::{Digest, Sha1};

        let (state, _crypto) = state();
        // Odd-length base64 that survives re-padding but decodes to garbage.
        // Sign it correctly so the decrypt path itself is exercised.
        let corrupt = "abcde";
        let mut parts = vec!["token123", "1700000000", "n1", corrupt];
        parts.sort_unstable();
        let mut sha = Sha1::new();
        sha.update(parts.join(""));
        let query = CallbackQuery {
            msg_signature: hex::encode(sha.finalize()),
            timestamp: "1700000000".to_string(),
            nonce: "n1".to_string(),
            echostr: Some(corrupt.to_string()),
        };
        assert_eq!(state.dispatcher.verify_challenge(&query), "");
    }

    #[tokio::test]
    async fn callback_answers_success_token() {
        let (state, crypto) = state();
        let plain = "<xml><FromUserName><![CDATA[alice]]></FromUserName>\
                     <MsgType><![CDATA[text]]></MsgType>\
                     <Content><![CDATA[hi]]></Content></xml>";
        let reply = crypto.encrypt(plain, "n1", "1700000000", "corp").unwrap();
        let query = CallbackQuery {
            msg_signature: reply.signature,
            timestamp: reply.timestamp,
            nonce: reply.nonce,
            echostr: None,
        };
        let body = format!("<xml><Encrypt><![CDATA[{}]]></Encrypt></xml>", reply.encrypt);
        let response = handle_callback(State(state), Query(query), Bytes::from(body))
            .await
            .into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], SUCCESS_TOKEN.as_bytes());
    }

    #[tokio::test]
    async fn callback_with_bad_signature_answers_empty_body() {
        let (state, crypto) = state();
        let reply = crypto
            .encrypt("<xml><MsgType><![CDATA[text]]></MsgType></xml>", "n1", "1700000000", "corp")
            .unwrap();
        let query = CallbackQuery {
            msg_signature: "deadbeef".to_string(),
            timestamp: reply.timestamp,
            nonce: reply.nonce,
            echostr: None,
        };
        let body = format!("<xml><Encrypt><![CDATA[{}]]></Encrypt></xml>", reply.encrypt);
        let response = handle_callback(State(state), Query(query), Bytes::from(body))
            .await
            .into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(bytes.is_empty());
    }
}
