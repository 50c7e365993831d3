//! Last-Write-Wins conflict resolution.
//!
//! Shared by the server's conditional write and the client's merge so both
//! sides agree on which copy of a secret survives.

/// Conflict resolution outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Accept the incoming copy (absent locally, or strictly newer).
    AcceptIncoming,
    /// Keep what is already stored (equal or newer).
    KeepExisting,
}

pub struct ConflictResolver;

impl ConflictResolver {
    /// Decide between a stored version (if any) and an incoming one.
    ///
    /// Tombstones are not special: a deleted secret carries a version like
    /// any other write, so a later live write resurrects it and an equal or
    /// older one is ignored.
    pub fn resolve(existing: Option<i64>, incoming: i64) -> Resolution {
        match existing {
            None => Resolution::AcceptIncoming,
            Some(stored) if incoming > stored => Resolution::AcceptIncoming,
            Some(_) => Resolution::KeepExisting,
        }
    }

    /// Version for a local mutation of a secret currently at `current`.
    ///
    /// Uses wall-clock seconds but never goes backwards or repeats, so two
    /// edits within the same second still order correctly.
    pub fn next_version(current: i64, now: i64) -> i64 {
        now.max(current.saturating_add(1))
    }
}
