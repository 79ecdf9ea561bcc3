//! AI capability group: keyword and menu actions that delegate to the
//! completion backend and forward the answer to the reply channel.

use async_trait::async_trait;
use std::sync::Arc;

use super::{CommandContext, CommandGroup};
use crate::ai::AiClient;
use crate::config::AiConfig;
use crate::error::HandlerError;
use crate::outbound::ReplySender;
use crate::registry::GroupId;

pub const ACTION_QUESTION: u16 = 2;
pub const ACTION_FACT: u16 = 3;
pub const ACTION_CHAT: u16 = 4;

const PERSONA_QUESTION: &str =
    "你是一个严谨的问答助手，直接回答用户的问题，不要闲聊。";
const PERSONA_FACT: &str =
    "你是一个资料查询助手，给出简明准确的事实性回答，并注明不确定之处。";
const PERSONA_CHAT: &str = "你是一个友好的办公助手，用简洁自然的语气回复。";

const BIZ_CODE: &str = "wecom_callback";

pub struct AiGroup {
    ai: Arc<dyn AiClient>,
    sender: Arc<dyn ReplySender>,
    config: AiConfig,
}

impl AiGroup {
    pub fn new(ai: Arc<dyn AiClient>, sender: Arc<dyn ReplySender>, config: AiConfig) -> Self {
        Self { ai, sender, config }
    }

    fn persona_for(action: u16) -> &'static str {
        match action {
            ACTION_QUESTION => PERSONA_QUESTION,
            ACTION_FACT => PERSONA_FACT,
            _ => PERSONA_CHAT,
        }
    }

    async fn answer_and_reply(
        &self,
        action: u16,
        ctx: &CommandContext,
    ) -> Result<bool, HandlerError> {
        let prompt = ctx.content.trim();
        if prompt.is_empty() {
            return Ok(false);
        }

        let extra = ctx
            .trace_id
            .as_deref()
            .map(|trace| serde_json::json!({"trace_id": trace}));
        let completion = self
            .ai
            .answer(prompt, Self::persona_for(action), &ctx.sender, BIZ_CODE, extra)
            .await?;
        let reply = format!("{}{}", completion.text, self.config.disclaimer);
        self.sender.send_text(&ctx.sender, &reply).await?;
        Ok(true)
    }
}

#[async_trait]
impl CommandGroup for AiGroup {
    fn group_id(&self) -> GroupId {
        GroupId::Ai
    }

    fn actions(&self) -> &'static [u16] {
        &[ACTION_QUESTION, ACTION_FACT, ACTION_CHAT]
    }

    async fn execute(&self, action: u16, ctx: &CommandContext) -> Result<bool, HandlerError> {
        match action {
            ACTION_QUESTION | ACTION_FACT => self.answer_and_reply(action, ctx).await,
            ACTION_CHAT => {
                // Menu-triggered chat has no typed content; greet instead.
                if ctx.content.trim().is_empty() {
                    self.sender
                        .send_text(&ctx.sender, "你好，请直接输入想咨询的内容。")
                        .await?;
                    return Ok(true);
                }
                self.answer_and_reply(action, ctx).await
            }
            _ => Ok(false),
        }
    }
}
