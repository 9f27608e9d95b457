//! Per-call state tracking
//!
//! Each call walks `RECEIVED → AUTHENTICATING`, then either stops in a
//! rejection or continues `AUTHORIZED → INVOKING` to `SUCCEEDED` or
//! `FAILED`. The finished outcome is logged and attached to the response.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallState {
    Received,
    Authenticating,
    RejectedNoToken,
    RejectedBadScope,
    Authorized,
    Invoking,
    Succeeded,
    Failed,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Received => "RECEIVED",
            CallState::Authenticating => "AUTHENTICATING",
            CallState::RejectedNoToken => "REJECTED_NO_TOKEN",
            CallState::RejectedBadScope => "REJECTED_BAD_SCOPE",
            CallState::Authorized => "AUTHORIZED",
            CallState::Invoking => "INVOKING",
            CallState::Succeeded => "SUCCEEDED",
            CallState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallState::RejectedNoToken
                | CallState::RejectedBadScope
                | CallState::Succeeded
                | CallState::Failed
        )
    }

    /// Whether `next` may follow this state.
    fn permits(&self, next: CallState) -> bool {
        use CallState::*;
        matches!(
            (self, next),
            (Received, Authenticating)
                | (Authenticating, RejectedNoToken)
                | (Authenticating, RejectedBadScope)
                | (Authenticating, Authorized)
                | (Authorized, Invoking)
                | (Invoking, Succeeded)
                | (Invoking, Failed)
        )
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The path one call took through the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOutcome {
    pub request_id: Ulid,
    /// `METHOD path` of the matched route
    pub route: String,
    pub states: Vec<CallState>,
}

impl CallOutcome {
    pub fn received(route: impl Into<String>) -> Self {
        Self {
            request_id: Ulid::new(),
            route: route.into(),
            states: vec![CallState::Received],
        }
    }

    pub fn state(&self) -> CallState {
        self.states.last().copied().unwrap_or(CallState::Received)
    }

    /// Move to `next`. Transitions the state machine does not allow are
    /// ignored and logged.
    pub fn advance(&mut self, next: CallState) {
        let current = self.state();
        if current.permits(next) {
            self.states.push(next);
            if next.is_terminal() {
                self.log_terminal();
            }
        } else {
            warn!(
                "Call {} cannot move from {} to {}",
                self.request_id, current, next
            );
        }
    }

    pub fn invoked(&self) -> bool {
        self.states.contains(&CallState::Invoking)
    }

    fn log_terminal(&self) {
        match self.state() {
            CallState::Succeeded => info!(
                request_id = %self.request_id,
                route = %self.route,
                "Call {}",
                self.state()
            ),
            state => warn!(
                request_id = %self.request_id,
                route = %self.route,
                "Call {}",
                state
            ),
        }
    }
}
