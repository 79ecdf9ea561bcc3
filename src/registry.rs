//! Command classification: maps a decrypted event to a capability group and
//! action.
//!
//! The dispatch table is assembled at startup from the handler set and every
//! configured keyword rule is validated against it then, so a rule naming a
//! nonexistent action fails construction instead of failing per request.
//! Unmatched events classify as `Noop` and pass through silently.

use std::collections::HashSet;

use crate::config::KeywordRule;
use crate::envelope::DecryptedEvent;
use crate::error::UnknownAction;

/// Capability groups, keyed by the numeric code used in menu event-keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupId {
    Ai,
    Ops,
    Util,
}

impl GroupId {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Ai),
            1 => Some(Self::Ops),
            2 => Some(Self::Util),
            _ => None,
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Self::Ai => 0,
            Self::Ops => 1,
            Self::Util => 2,
        }
    }
}

/// Where an event should go. `Noop` is an explicit pass-through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchDecision {
    Noop,
    Invoke {
        group: GroupId,
        action: u16,
        content: String,
        trace_id: Option<String>,
    },
}

/// Parsed 4-field menu event-key: `#<ns>#_<group>_<action>#<trace>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuKey {
    pub namespace: String,
    pub group: u16,
    pub action: u16,
    pub trace_id: String,
}

pub fn parse_menu_key(raw: &str) -> Option<MenuKey> {
    let parts: Vec<&str> = raw.split('#').collect();
    // Leading '#' yields an empty first segment.
    let [empty, namespace, selector, trace_id] = parts.as_slice() else {
        return None;
    };
    if !empty.is_empty() || namespace.is_empty() {
        return None;
    }

    let selector_parts: Vec<&str> = selector.split('_').collect();
    let [lead, group, action] = selector_parts.as_slice() else {
        return None;
    };
    if !lead.is_empty() {
        return None;
    }

    Some(MenuKey {
        namespace: (*namespace).to_string(),
        group: group.parse().ok()?,
        action: action.parse().ok()?,
        trace_id: (*trace_id).to_string(),
    })
}

/// Fixed classification table for one app.
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    admin_users: Vec<String>,
    keyword_rules: Vec<KeywordRule>,
    table: HashSet<(u16, u16)>,
}

impl CommandRegistry {
    /// Builds the registry, eagerly validating every keyword rule against the
    /// implemented `(group, action)` pairs.
    pub fn new(
        admin_users: Vec<String>,
        keyword_rules: Vec<KeywordRule>,
        implemented: impl IntoIterator<Item = (u16, u16)>,
    ) -> Result<Self, UnknownAction> {
        let table: HashSet<(u16, u16)> = implemented.into_iter().collect();
        for rule in &keyword_rules {
            if !table.contains(&(rule.group, rule.action)) {
                return Err(UnknownAction {
                    group: rule.group,
                    action: rule.action,
                });
            }
        }
        Ok(Self {
            admin_users,
            keyword_rules,
            table,
        })
    }

    fn is_admin(&self, sender: &str) -> bool {
        self.admin_users.iter().any(|u| u == sender)
    }

    /// First match wins; classification is a pure function of the event.
    pub fn classify(&self, event: &DecryptedEvent) -> Result<DispatchDecision, UnknownAction> {
        if event.is_text() {
            if !self.is_admin(&event.from_user) {
                return Ok(DispatchDecision::Noop);
            }
            let content = event.content.as_deref().unwrap_or("");
            for rule in &self.keyword_rules {
                if let Some(rest) = strip_prefix_ignore_case(content, &rule.prefix) {
                    let group = GroupId::from_code(rule.group).ok_or(UnknownAction {
                        group: rule.group,
                        action: rule.action,
                    })?;
                    return Ok(DispatchDecision::Invoke {
                        group,
                        action: rule.action,
                        content: rest.trim().to_string(),
                        trace_id: None,
                    });
                }
            }
            return Ok(DispatchDecision::Noop);
        }

        if event.is_menu_click() {
            let Some(key) = event.event_key.as_deref().and_then(parse_menu_key) else {
                return Ok(DispatchDecision::Noop);
            };
            let Some(group) = GroupId::from_code(key.group) else {
                // Unrecognized group codes pass through, not an error.
                return Ok(DispatchDecision::Noop);
            };
            if !self.table.contains(&(key.group, key.action)) {
                // A known group reached with an unimplemented action is a
                // config/programming error and must not be swallowed.
                return Err(UnknownAction {
                    group: key.group,
                    action: key.action,
                });
            }
            return Ok(DispatchDecision::Invoke {
                group,
                action: key.action,
                content: String::new(),
                trace_id: Some(key.trace_id),
            });
        }

        Ok(DispatchDecision::Noop)
    }
}

fn strip_prefix_ignore_case<'a>(content: &'a str, prefix: &str) -> Option<&'a str> {
    let content = content.trim_start();
    if content.len() < prefix.len() {
        return None;
    }
    let (head, rest) = content.split_at_checked(prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(rest)
    } else {
        None
    }
}
