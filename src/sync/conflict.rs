//! Conflict detection and resolution for whole-file sync.
//!
//! Change detection compares content hashes against the fingerprint both
//! sides last agreed on. The policy only matters when both sides moved.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::sync::hash::Fingerprint;

/// Strategy for resolving a true conflict (both sides changed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Overwrite the remote with the local copy.
    PreferLocal,
    /// Overwrite the local copy with the remote.
    PreferServer,
    /// Keep whichever side was modified last (default).
    #[default]
    PreferNewer,
}

impl ConflictPolicy {
    /// Get a human-readable description of the policy.
    pub fn description(&self) -> &'static str {
        match self {
            Self::PreferLocal => "Always keep the local copy",
            Self::PreferServer => "Always keep the server copy",
            Self::PreferNewer => "Keep the most recently modified copy",
        }
    }
}

/// What one sync attempt should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// Upload the local copy.
    Push,
    /// Download and replace the local copy.
    Pull,
    /// Both sides already agree.
    NoOp,
    /// No policy can settle this; needs the user.
    ConflictUnresolvable,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Push => "push",
            Self::Pull => "pull",
            Self::NoOp => "no-op",
            Self::ConflictUnresolvable => "conflict",
        })
    }
}

/// Decide what to do given the local copy, the remote (if any) and the last
/// fingerprint both sides agreed on.
pub fn decide(
    local: &Fingerprint,
    remote: Option<&Fingerprint>,
    last_synced: Option<&Fingerprint>,
    policy: ConflictPolicy,
) -> SyncAction {
    let Some(remote) = remote else {
        return SyncAction::Push;
    };

    if local.same_content(remote) {
        return SyncAction::NoOp;
    }

    // Never agreed before: both sides count as changed
    let (local_changed, remote_changed) = match last_synced {
        Some(last) => (!local.same_content(last), !remote.same_content(last)),
        None => (true, true),
    };

    match (local_changed, remote_changed) {
        (true, false) => SyncAction::Push,
        (false, true) => SyncAction::Pull,
        _ => resolve_divergence(local, remote, policy),
    }
}

fn resolve_divergence(local: &Fingerprint, remote: &Fingerprint, policy: ConflictPolicy) -> SyncAction {
    match policy {
        ConflictPolicy::PreferLocal => SyncAction::Push,
        ConflictPolicy::PreferServer => SyncAction::Pull,
        ConflictPolicy::PreferNewer => match (local.modified_at, remote.modified_at) {
            (Some(local_time), Some(remote_time)) if remote_time > local_time => SyncAction::Pull,
            // Ties and an unknown remote time keep the local copy
            _ => SyncAction::Push,
        },
    }
}
