//! Command handlers, one long-lived instance per capability group.
//!
//! Handlers are constructed once at startup with their collaborators injected
//! and shared across requests. Request-scoped data (sender, content, trace id)
//! travels in [`CommandContext`] by value, so concurrent dispatches never race
//! on handler state.

mod ai_group;
mod menu;

pub use ai_group::AiGroup;
pub use menu::{OpsGroup, UtilGroup};

use async_trait::async_trait;

use crate::error::HandlerError;
use crate::registry::GroupId;

/// Request-scoped inputs for one action invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    pub sender: String,
    pub content: String,
    pub trace_id: Option<String>,
}

#[async_trait]
pub trait CommandGroup: Send + Sync {
    fn group_id(&self) -> GroupId;

    /// The closed set of action codes this group implements. Used to build
    /// and eagerly validate the dispatch table.
    fn actions(&self) -> &'static [u16];

    /// Runs one action. `Ok(true)` means a reply was sent.
    async fn execute(&self, action: u16, ctx: &CommandContext) -> Result<bool, HandlerError>;
}

/// Flattens the handler set into the `(group, action)` pairs the registry
/// validates against.
pub fn implemented_actions(groups: &[std::sync::Arc<dyn CommandGroup>]) -> Vec<(u16, u16)> {
    groups
        .iter()
        .flat_map(|g| {
            let code = g.group_id().code();
            g.actions().iter().map(move |action| (code, *action))
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fakes for handler and dispatcher tests.

    use super::*;
    use crate::ai::{AiClient, Completion};
    use crate::error::{AiError, SendError};
    use crate::outbound::{ReplySender, SendReceipt};
    use parking_lot::Mutex;

    /// Records every prompt it is asked and answers with a fixed string.
    #[derive(Default)]
    pub struct FakeAi {
        pub calls: Mutex<Vec<(String, String)>>,
        pub fail_with_timeout: bool,
    }

    #[async_trait]
    impl AiClient for FakeAi {
        async fn answer(
            &self,
            content: &str,
            persona: &str,
            _user: &str,
            _biz_code: &str,
            _extra: Option<serde_json::Value>,
        ) -> Result<Completion, AiError> {
            if self.fail_with_timeout {
                return Err(AiError::Timeout);
            }
            self.calls
                .lock()
                .push((content.to_string(), persona.to_string()));
            Ok(Completion {
                text: format!("answer to: {content}"),
                artifact_id: "art-1".to_string(),
            })
        }
    }

    /// Records every outbound text.
    #[derive(Default)]
    pub struct FakeSender {
        pub sent: Mutex<Vec<(String, String)>>,
        pub fail: bool,
    }

    #[async_trait]
    impl ReplySender for FakeSender {
        async fn send_text(&self, to_user: &str, text: &str) -> Result<SendReceipt, SendError> {
            if self.fail {
                return Err(SendError::Platform {
                    errcode: 93000,
                    errmsg: "expired".to_string(),
                });
            }
            self.sent.lock().push((to_user.to_string(), text.to_string()));
            Ok(SendReceipt {
                errcode: 0,
                errmsg: "ok".to_string(),
            })
        }
    }
}
