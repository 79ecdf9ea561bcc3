//! Menu capability groups with fixed, non-AI replies.

use async_trait::async_trait;
use std::sync::Arc;

use super::{CommandContext, CommandGroup};
use crate::error::HandlerError;
use crate::outbound::ReplySender;
use crate::registry::GroupId;

pub const OPS_ACTION_STATUS: u16 = 1;
pub const OPS_ACTION_RESTART_REPORT: u16 = 2;

pub const UTIL_ACTION_HELP: u16 = 1;
pub const UTIL_ACTION_PING: u16 = 2;

/// Maintenance menu: host status and restart notices.
pub struct OpsGroup {
    sender: Arc<dyn ReplySender>,
}

impl OpsGroup {
    pub fn new(sender: Arc<dyn ReplySender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl CommandGroup for OpsGroup {
    fn group_id(&self) -> GroupId {
        GroupId::Ops
    }

    fn actions(&self) -> &'static [u16] {
        &[OPS_ACTION_STATUS, OPS_ACTION_RESTART_REPORT]
    }

    async fn execute(&self, action: u16, ctx: &CommandContext) -> Result<bool, HandlerError> {
        let text = match action {
            OPS_ACTION_STATUS => "服务运行正常。",
            OPS_ACTION_RESTART_REPORT => "重启请求已记录，请通过运维通道确认执行。",
            _ => return Ok(false),
        };
        self.sender.send_text(&ctx.sender, text).await?;
        Ok(true)
    }
}

/// Utility menu: help text and liveness ping.
pub struct UtilGroup {
    sender: Arc<dyn ReplySender>,
}

impl UtilGroup {
    pub fn new(sender: Arc<dyn ReplySender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl CommandGroup for UtilGroup {
    fn group_id(&self) -> GroupId {
        GroupId::Util
    }

    fn actions(&self) -> &'static [u16] {
        &[UTIL_ACTION_HELP, UTIL_ACTION_PING]
    }

    async fn execute(&self, action: u16, ctx: &CommandContext) -> Result<bool, HandlerError> {
        let text = match action {
            UTIL_ACTION_HELP => {
                "可用指令: #提问 <问题> 向 AI 提问, #查询 <关键词> 查询资料。菜单项见应用面板。"
            }
            UTIL_ACTION_PING => "pong",
            _ => return Ok(false),
        };
        self.sender.send_text(&ctx.sender, text).await?;
        Ok(true)
    }
}
