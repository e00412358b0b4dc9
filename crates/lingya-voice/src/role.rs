//! Role (persona) switch coordination.
//!
//! Tracks the active and pending persona, collapses duplicate requests, and
//! turns the gateway's `voice.role_status` reports into outcomes the session
//! acts on. Nothing is retried automatically.

use crate::protocol::{RoleDescriptor, RoleStatusKind, RoleStatusPayload};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Latest role status as surfaced to the caller. Not retained beyond the
/// most recent report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleStatus {
    pub role_id: String,
    pub status: RoleStatusKind,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub previous_role: Option<String>,
    #[serde(default)]
    pub phase: Option<String>,
}

/// What `request_switch` decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchDecision {
    /// Already active or already pending.
    Duplicate,
    /// Recorded as pending; the session isn't ready to send it yet.
    Deferred,
    /// Recorded as pending and a `voice.switch` should go out now.
    Send,
}

/// What a status report meant for the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleOutcome {
    /// The reported role is now active.
    Activated { role_id: String },
    /// The pending switch was rejected; the active role is unchanged.
    Rejected { role_id: String, message: String },
    /// Informational (`switching`, unknown statuses, stale reports).
    PassThrough,
}

#[derive(Debug, Default)]
pub struct RoleSwitchCoordinator {
    active: Option<String>,
    pending: Option<String>,
    requested_at: Option<Instant>,
    last_status: Option<RoleStatus>,
    catalog: BTreeMap<String, RoleDescriptor>,
}

impl RoleSwitchCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_role(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn pending_role(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    pub fn last_status(&self) -> Option<&RoleStatus> {
        self.last_status.as_ref()
    }

    pub fn catalog(&self) -> &BTreeMap<String, RoleDescriptor> {
        &self.catalog
    }

    /// Ask for `role_id`. `can_send` is true when the transport is open and
    /// the session is past `awaiting_ack`.
    pub fn request_switch(&mut self, role_id: &str, can_send: bool) -> SwitchDecision {
        let role_id = role_id.trim();
        if self.active.as_deref() == Some(role_id) || self.pending.as_deref() == Some(role_id) {
            debug!(role_id, "role: duplicate request ignored");
            return SwitchDecision::Duplicate;
        }
        self.pending = Some(role_id.to_string());
        self.requested_at = Some(Instant::now());
        if can_send {
            info!(role_id, from = ?self.active, "role: switch requested");
            SwitchDecision::Send
        } else {
            debug!(role_id, "role: switch recorded, not sendable yet");
            SwitchDecision::Deferred
        }
    }

    /// The gateway acknowledged the session with `role_id`. Any pending
    /// request is settled by the ack.
    pub fn adopt_acknowledged(&mut self, role_id: &str) {
        self.active = Some(role_id.to_string());
        self.pending = None;
        self.requested_at = None;
    }

    /// The switch request never left; forget it.
    pub fn abandon_pending(&mut self) -> Option<String> {
        self.requested_at = None;
        self.pending.take()
    }

    /// Fold one `voice.role_status` report.
    pub fn on_status(&mut self, payload: &RoleStatusPayload) -> (RoleStatus, RoleOutcome) {
        let role_id = payload
            .role_id
            .clone()
            .or_else(|| self.pending.clone())
            .or_else(|| self.active.clone())
            .unwrap_or_default();
        let local_latency = self
            .requested_at
            .map(|t| t.elapsed().as_millis() as u64);
        let status = RoleStatus {
            role_id: role_id.clone(),
            status: payload.status,
            message: payload.message.clone(),
            latency_ms: payload.latency_ms.or(local_latency),
            previous_role: payload.previous_role.clone(),
            phase: payload.phase.clone(),
        };

        let outcome = match payload.status {
            RoleStatusKind::Active => match self.pending.clone().as_deref() {
                Some(pending) if pending == role_id => {
                    info!(role_id = %role_id, latency_ms = ?status.latency_ms, "role: switch complete");
                    self.adopt_acknowledged(&role_id);
                    RoleOutcome::Activated { role_id }
                }
                Some(pending) => {
                    debug!(pending, reported = %role_id, "role: stale active report ignored");
                    RoleOutcome::PassThrough
                }
                None => {
                    self.active = Some(role_id.clone());
                    RoleOutcome::Activated { role_id }
                }
            },
            RoleStatusKind::Error => {
                let message = payload
                    .message
                    .clone()
                    .unwrap_or_else(|| "unknown_error".to_string());
                match self.pending.clone() {
                    Some(pending) if payload.role_id.as_deref().is_some_and(|r| r != pending) => {
                        debug!(pending = %pending, reported = %role_id, %message, "role: stale error report ignored");
                        RoleOutcome::PassThrough
                    }
                    Some(pending) => {
                        self.pending = None;
                        self.requested_at = None;
                        warn!(role_id = %pending, %message, active = ?self.active, "role: switch rejected");
                        RoleOutcome::Rejected {
                            role_id: pending,
                            message,
                        }
                    }
                    None => {
                        warn!(role_id = %role_id, %message, "role: error report with nothing pending");
                        RoleOutcome::Rejected { role_id, message }
                    }
                }
            }
            RoleStatusKind::Switching | RoleStatusKind::Other => RoleOutcome::PassThrough,
        };

        self.last_status = Some(status.clone());
        (status, outcome)
    }

    pub fn set_catalog(&mut self, roles: BTreeMap<String, RoleDescriptor>) {
        self.catalog = roles;
    }

    /// Teardown: the session's roles are gone, the catalog is kept.
    pub fn reset(&mut self) {
        self.active = None;
        self.pending = None;
        self.requested_at = None;
        self.last_status = None;
    }
}
