//! WeChat Work callback bridge.
//!
//! Bridges the platform's encrypted webhook callbacks to an AI-completion
//! backend and a small set of host-automation operations. The core is the
//! dispatch pipeline in [`dispatch`]: verify, decrypt, de-duplicate,
//! classify, route.

pub mod ai;
pub mod config;
pub mod crypto;
pub mod dedup;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod ledger;
pub mod ops;
pub mod outbound;
pub mod registry;
