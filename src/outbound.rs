//! Outbound reply channel: WeChat Work `message/send` with a cached corp
//! access token.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::WecomConfig;
use crate::error::SendError;

const WECOM_API_BASE: &str = "https://qyapi.weixin.qq.com/cgi-bin";
/// Refresh the cached token this many seconds before its stated expiry.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 300;
const SEND_TIMEOUT_SECS: u64 = 30;

/// Opaque platform result passed back verbatim to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub errcode: i64,
    pub errmsg: String,
}

#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn send_text(&self, to_user: &str, text: &str) -> Result<SendReceipt, SendError>;
}

#[derive(Default)]
struct CachedToken {
    token: String,
    expires_at: i64,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        !self.token.is_empty()
            && chrono::Utc::now().timestamp() < self.expires_at - TOKEN_REFRESH_MARGIN_SECS
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    errcode: i64,
    errmsg: String,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct BusinessResponse {
    errcode: i64,
    errmsg: String,
}

pub struct WecomSender {
    config: WecomConfig,
    client: reqwest::Client,
    token_cache: Mutex<CachedToken>,
}

impl WecomSender {
    pub fn new(config: WecomConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            config,
            client,
            token_cache: Mutex::new(CachedToken::default()),
        }
    }

    async fn access_token(&self) -> Result<String, SendError> {
        let mut cache = self.token_cache.lock().await;
        if cache.is_valid() {
            return Ok(cache.token.clone());
        }

        let response = self
            .client
            .get(format!("{WECOM_API_BASE}/gettoken"))
            .query(&[
                ("corpid", self.config.corp_id.as_str()),
                ("corpsecret", self.config.corp_secret.as_str()),
            ])
            .send()
            .await
            .map_err(map_send_err)?;

        let body: TokenResponse = response.json().await.map_err(map_send_err)?;
        if body.errcode != 0 {
            return Err(SendError::Platform {
                errcode: body.errcode,
                errmsg: body.errmsg,
            });
        }

        let token = body.access_token.unwrap_or_default();
        if token.is_empty() {
            return Err(SendError::Platform {
                errcode: -1,
                errmsg: "gettoken returned no access_token".to_string(),
            });
        }

        cache.token = token.clone();
        cache.expires_at = chrono::Utc::now().timestamp() + body.expires_in.unwrap_or(7200);
        Ok(token)
    }
}

fn map_send_err(err: reqwest::Error) -> SendError {
    if err.is_timeout() {
        SendError::Timeout
    } else {
        SendError::Http(err)
    }
}

#[async_trait]
impl ReplySender for WecomSender {
    async fn send_text(&self, to_user: &str, text: &str) -> Result<SendReceipt, SendError> {
        let token = self.access_token().await?;
        let payload = json!({
            "touser": to_user,
            "msgtype": "text",
            "agentid": self.config.agent_id,
            "text": {"content": text},
        });

        let response = self
            .client
            .post(format!("{WECOM_API_BASE}/message/send"))
            .query(&[("access_token", token.as_str())])
            .json(&payload)
            .send()
            .await
            .map_err(map_send_err)?;

        let body: BusinessResponse = response.json().await.map_err(map_send_err)?;
        if body.errcode != 0 {
            return Err(SendError::Platform {
                errcode: body.errcode,
                errmsg: body.errmsg,
            });
        }
        Ok(SendReceipt {
            errcode: body.errcode,
            errmsg: body.errmsg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_cache_respects_refresh_margin() {
        let now = chrono::Utc::now().timestamp();
        let fresh = CachedToken {
            token: "t".to_string(),
            expires_at: now + 7200,
        };
        assert!(fresh.is_valid());

        let expiring = CachedToken {
            token: "t".to_string(),
            expires_at: now + TOKEN_REFRESH_MARGIN_SECS - 1,
        };
        assert!(!expiring.is_valid());

        assert!(!CachedToken::default().is_valid());
    }

    #[test]
    fn business_response_requires_zero_errcode() {
        let ok: BusinessResponse = serde_json::from_str(r#"{"errcode":0,"errmsg":"ok"}"#).unwrap();
        assert_eq!(ok.errcode, 0);
        let expired: BusinessResponse =
            serde_json::from_str(r#"{"errcode":93000,"errmsg":"expired"}"#).unwrap();
        assert_ne!(expired.errcode, 0);
    }
}
