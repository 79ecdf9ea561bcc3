//! Wire formats for the callback: query params, the encrypted XML envelope,
//! the decrypted message body, and the dedup fingerprint.

use quick_xml::de::from_str as xml_from_str;
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Query parameters carried on both the GET challenge and POST delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub msg_signature: String,
    pub timestamp: String,
    pub nonce: String,
    pub echostr: Option<String>,
}

/// Outer transport envelope: `<xml><Encrypt>base64</Encrypt></xml>`.
#[derive(Debug, Deserialize)]
#[serde(rename = "xml")]
pub struct EncryptedEnvelope {
    #[serde(rename = "Encrypt")]
    pub encrypt: String,
}

impl EncryptedEnvelope {
    pub fn parse(body: &str) -> Option<Self> {
        let envelope: Self = xml_from_str(body).ok()?;
        if envelope.encrypt.trim().is_empty() {
            return None;
        }
        Some(envelope)
    }
}

/// Decrypted message body. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename = "xml")]
pub struct DecryptedEvent {
    #[serde(rename = "ToUserName", default)]
    pub to_user: String,
    #[serde(rename = "FromUserName", default)]
    pub from_user: String,
    #[serde(rename = "CreateTime", default)]
    pub create_time: i64,
    #[serde(rename = "MsgType", default)]
    pub msg_type: String,
    #[serde(rename = "Content", default)]
    pub content: Option<String>,
    #[serde(rename = "Event", default)]
    pub event: Option<String>,
    #[serde(rename = "EventKey", default)]
    pub event_key: Option<String>,
    #[serde(rename = "MsgId", default)]
    pub msg_id: Option<String>,
    #[serde(rename = "AgentID", default)]
    pub agent_id: Option<String>,
}

impl DecryptedEvent {
    pub fn parse(plaintext: &str) -> Option<Self> {
        let event: Self = xml_from_str(plaintext).ok()?;
        if event.msg_type.is_empty() {
            return None;
        }
        Some(event)
    }

    pub fn is_text(&self) -> bool {
        self.msg_type == "text"
    }

    pub fn is_menu_click(&self) -> bool {
        self.msg_type == "event" && self.event.as_deref() == Some("click")
    }
}

/// Content hash over the decrypted plaintext, scoped per app so two apps
/// never contend for the same admission key.
pub fn fingerprint(agent_id: &str, plaintext: &str) -> String {
    let digest = Sha256::digest(plaintext.as_bytes());
    format!("cb:{}:{}", agent_id, hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_encrypted_envelope() {
        let body = "<xml><ToUserName><![CDATA[corp]]></ToUserName><Encrypt><![CDATA[AAAA]]></Encrypt></xml>";
        let envelope = EncryptedEnvelope::parse(body).unwrap();
        assert_eq!(envelope.encrypt, "AAAA");
    }

    #[test]
    fn rejects_envelope_without_ciphertext() {
        assert!(EncryptedEnvelope::parse("<xml><Encrypt></Encrypt></xml>").is_none());
        assert!(EncryptedEnvelope::parse("not xml at all").is_none());
    }

    #[test]
    fn parses_text_message() {
        let plain = "<xml>\
            <ToUserName><![CDATA[corp]]></ToUserName>\
            <FromUserName><![CDATA[alice]]></FromUserName>\
            <CreateTime>1700000000</CreateTime>\
            <MsgType><![CDATA[text]]></MsgType>\
            <Content><![CDATA[#提问 今天天气]]></Content>\
            <MsgId>12345</MsgId>\
            <AgentID>7</AgentID>\
            </xml>";
        let event = DecryptedEvent::parse(plain).unwrap();
        assert!(event.is_text());
        assert_eq!(event.from_user, "alice");
        assert_eq!(event.content.as_deref(), Some("#提问 今天天气"));
        assert_eq!(event.create_time, 1_700_000_000);
    }

    #[test]
    fn parses_menu_click_event() {
        let plain = "<xml>\
            <FromUserName><![CDATA[bob]]></FromUserName>\
            <MsgType><![CDATA[event]]></MsgType>\
            <Event><![CDATA[click]]></Event>\
            <EventKey><![CDATA[#sendmsg#_0_4#12345]]></EventKey>\
            </xml>";
        let event = DecryptedEvent::parse(plain).unwrap();
        assert!(event.is_menu_click());
        assert_eq!(event.event_key.as_deref(), Some("#sendmsg#_0_4#12345"));
    }

    #[test]
    fn missing_msg_type_is_unparsable() {
        assert!(DecryptedEvent::parse("<xml><Content>hi</Content></xml>").is_none());
    }

    #[test]
    fn fingerprint_is_stable_and_app_scoped() {
        let a = fingerprint("7", "<xml>same</xml>");
        let b = fingerprint("7", "<xml>same</xml>");
        let c = fingerprint("8", "<xml>same</xml>");
        let d = fingerprint("7", "<xml>other</xml>");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert!(a.starts_with("cb:7:"));
    }
}
