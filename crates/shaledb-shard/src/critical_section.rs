//! Three-phase critical sections for metadata-changing operations.
//!
//! A critical section moves `open -> catch-up -> commit -> open`. Catch-up
//! blocks new writes while letting reads drain; commit blocks both until
//! the metadata mutation is durable. Each section is tagged with an opaque
//! reason document so a resumed holder can re-enter idempotently while a
//! different operation is rejected.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use shaledb_routing::NamespaceIdentity;

use crate::error::ShardError;

/// The phase a held critical section is in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CriticalSectionPhase {
    /// New writes are blocked; reads still drain.
    CatchUp,
    /// Reads and writes are both blocked.
    Commit,
}

#[derive(Clone, Debug)]
struct HeldSection {
    reason: serde_json::Value,
    phase: CriticalSectionPhase,
}

/// A critical section attached to one database or collection entry.
#[derive(Debug)]
pub struct CriticalSection {
    held: Option<HeldSection>,
    /// Bumped on every release; waiters subscribe before blocking.
    release_tx: watch::Sender<u64>,
    release_epoch: u64,
}

impl CriticalSection {
    /// Creates an open (not held) critical section.
    pub fn new() -> Self {
        let (release_tx, _) = watch::channel(0);
        CriticalSection {
            held: None,
            release_tx,
            release_epoch: 0,
        }
    }

    /// Returns the held phase, or None when the section is open.
    pub fn phase(&self) -> Option<CriticalSectionPhase> {
        self.held.as_ref().map(|h| h.phase)
    }

    /// Returns the reason document of the current holder, if any.
    pub fn reason(&self) -> Option<&serde_json::Value> {
        self.held.as_ref().map(|h| &h.reason)
    }

    /// Returns a signal for waiting out the current holder, or None when
    /// the section is open.
    pub fn signal(&self) -> Option<CriticalSectionSignal> {
        self.held.as_ref().map(|h| CriticalSectionSignal {
            phase: h.phase,
            released: self.release_tx.subscribe(),
        })
    }

    /// Enters the catch-up phase. Re-entering with the same reason is an
    /// idempotent no-op; a different reason is a conflict.
    pub fn enter_catch_up(
        &mut self,
        ns: &NamespaceIdentity,
        reason: serde_json::Value,
    ) -> Result<(), ShardError> {
        match &self.held {
            None => {
                self.held = Some(HeldSection {
                    reason,
                    phase: CriticalSectionPhase::CatchUp,
                });
                Ok(())
            }
            Some(held) if held.reason == reason => Ok(()),
            Some(held) => Err(conflicting_holder(ns, &held.reason, &reason)),
        }
    }

    /// Advances to the commit phase. Requires the section to be held with
    /// the same reason.
    pub fn enter_commit(
        &mut self,
        ns: &NamespaceIdentity,
        reason: serde_json::Value,
    ) -> Result<(), ShardError> {
        match &mut self.held {
            None => Err(ShardError::CriticalSectionNotHeld(ns.clone())),
            Some(held) if held.reason == reason => {
                held.phase = CriticalSectionPhase::Commit;
                Ok(())
            }
            Some(held) => Err(conflicting_holder(ns, &held.reason, &reason)),
        }
    }

    /// Releases the section and wakes waiters. Exiting an open section is
    /// a no-op so a resumed holder can release idempotently.
    pub fn exit(
        &mut self,
        ns: &NamespaceIdentity,
        reason: &serde_json::Value,
    ) -> Result<(), ShardError> {
        match &self.held {
            None => Ok(()),
            Some(held) if held.reason == *reason => {
                self.held = None;
                self.release_epoch += 1;
                let _ = self.release_tx.send(self.release_epoch);
                Ok(())
            }
            Some(held) => Err(conflicting_holder(ns, &held.reason, reason)),
        }
    }
}

impl Default for CriticalSection {
    fn default() -> Self {
        Self::new()
    }
}

fn conflicting_holder(
    ns: &NamespaceIdentity,
    holder: &serde_json::Value,
    entrant: &serde_json::Value,
) -> ShardError {
    ShardError::ConflictingOperation(format!(
        "critical section on {} held for {} cannot serve {}",
        ns, holder, entrant
    ))
}

/// Handed to operations that must wait for the active critical section to
/// be released.
pub struct CriticalSectionSignal {
    phase: CriticalSectionPhase,
    released: watch::Receiver<u64>,
}

impl CriticalSectionSignal {
    /// The phase the section was in when the signal was taken.
    pub fn phase(&self) -> CriticalSectionPhase {
        self.phase
    }

    /// Waits until the section is released. Returns immediately if the
    /// release happened after this signal was taken.
    pub async fn released(mut self) {
        // A send between signal() and this await leaves the value unseen,
        // so changed() completes without a wakeup race.
        let _ = self.released.changed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ns() -> NamespaceIdentity {
        NamespaceIdentity::new(None, "db", "coll").unwrap()
    }

    #[test]
    fn test_phases_advance_and_release() {
        let mut cs = CriticalSection::new();
        assert!(cs.phase().is_none());
        assert!(cs.signal().is_none());

        let reason = json!({"command": "dropCollection"});
        cs.enter_catch_up(&ns(), reason.clone()).unwrap();
        assert_eq!(cs.phase(), Some(CriticalSectionPhase::CatchUp));

        cs.enter_commit(&ns(), reason.clone()).unwrap();
        assert_eq!(cs.phase(), Some(CriticalSectionPhase::Commit));

        cs.exit(&ns(), &reason).unwrap();
        assert!(cs.phase().is_none());
    }

    #[test]
    fn test_reentrant_enter_with_same_reason_is_noop() {
        let mut cs = CriticalSection::new();
        let reason = json!({"command": "moveChunk", "session": 1});
        cs.enter_catch_up(&ns(), reason.clone()).unwrap();
        cs.enter_catch_up(&ns(), reason.clone()).unwrap();
        assert_eq!(cs.phase(), Some(CriticalSectionPhase::CatchUp));

        cs.enter_commit(&ns(), reason.clone()).unwrap();
        cs.enter_commit(&ns(), reason).unwrap();
        assert_eq!(cs.phase(), Some(CriticalSectionPhase::Commit));
    }

    #[test]
    fn test_conflicting_reason_rejected() {
        let mut cs = CriticalSection::new();
        cs.enter_catch_up(&ns(), json!({"op": "a"})).unwrap();

        let err = cs.enter_catch_up(&ns(), json!({"op": "b"})).unwrap_err();
        assert!(matches!(err, ShardError::ConflictingOperation(_)));

        let err = cs.enter_commit(&ns(), json!({"op": "b"})).unwrap_err();
        assert!(matches!(err, ShardError::ConflictingOperation(_)));

        let err = cs.exit(&ns(), &json!({"op": "b"})).unwrap_err();
        assert!(matches!(err, ShardError::ConflictingOperation(_)));
    }

    #[test]
    fn test_commit_requires_held_section() {
        let mut cs = CriticalSection::new();
        let err = cs.enter_commit(&ns(), json!({"op": "a"})).unwrap_err();
        assert!(matches!(err, ShardError::CriticalSectionNotHeld(_)));
    }

    #[test]
    fn test_exit_open_section_is_noop() {
        let mut cs = CriticalSection::new();
        cs.exit(&ns(), &json!({"op": "a"})).unwrap();
    }

    #[tokio::test]
    async fn test_signal_wakes_on_release() {
        let mut cs = CriticalSection::new();
        let reason = json!({"op": "a"});
        cs.enter_catch_up(&ns(), reason.clone()).unwrap();

        let signal = cs.signal().unwrap();
        assert_eq!(signal.phase(), CriticalSectionPhase::CatchUp);

        cs.exit(&ns(), &reason).unwrap();
        // Release happened after the signal was taken: must not hang.
        signal.released().await;
    }
}
