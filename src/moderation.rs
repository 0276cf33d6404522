//! Moderation state
//!
//! Report bookkeeping and the per-session ban state machine:
//! UNBANNED → (report threshold reached) → BANNED → (timer) → UNBANNED.
//! Each ban owns exactly one unban timer; the timer posts an `Unban`
//! command back into the engine so the state flip happens on the actor,
//! and teardown of a session aborts its timer instead of leaking it.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::engine::EngineCommand;
use crate::error::AppError;
use crate::session::{Session, SessionId};

/// What a successful report did to the target.
#[derive(Debug, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Report recorded, target below the ban threshold
    Reported,
    /// This report crossed the threshold; the caller must ban the target
    Banned,
}

/// Per-server moderation state: thresholds and the live unban timers.
#[derive(Debug)]
pub struct Moderation {
    /// Distinct reporters required to trigger a ban
    reports_to_ban: usize,
    /// How long a ban lasts
    ban_time: Duration,
    /// One-shot unban timer per banned session
    unban_timers: HashMap<SessionId, JoinHandle<()>>,
}

impl Moderation {
    pub fn new(reports_to_ban: usize, ban_time: Duration) -> Self {
        Self {
            reports_to_ban,
            ban_time,
            unban_timers: HashMap::new(),
        }
    }

    /// Ban duration in whole seconds, for user-facing notices.
    pub fn ban_seconds(&self) -> u64 {
        self.ban_time.as_secs()
    }

    /// Record a report against `target`.
    ///
    /// Fails with `SelfReport` when reporter and target are the same
    /// session, and with `AlreadyReported` when this reporter is already in
    /// the target's report set; neither failure mutates anything. Returns
    /// `Banned` exactly when this report crosses the threshold on an
    /// unbanned target; an already banned target just accumulates reports.
    pub fn report(
        &self,
        reporter: SessionId,
        target: &mut Session,
    ) -> Result<ReportOutcome, AppError> {
        if reporter == target.id {
            return Err(AppError::SelfReport);
        }
        if !target.reported_by.insert(reporter) {
            return Err(AppError::AlreadyReported(target.username.clone()));
        }
        if !target.is_banned && target.reported_by.len() >= self.reports_to_ban {
            Ok(ReportOutcome::Banned)
        } else {
            Ok(ReportOutcome::Reported)
        }
    }

    /// Transition a session to banned and start its unban timer.
    ///
    /// A stale timer (from a ban that was never released, which should not
    /// happen) is aborted so the new ban restarts the clock from zero.
    pub fn ban(&mut self, session: &mut Session, cmd_tx: mpsc::Sender<EngineCommand>) {
        session.is_banned = true;
        info!(
            "Session {} ({}) banned for {} seconds",
            session.id,
            session.username,
            self.ban_time.as_secs()
        );

        if let Some(stale) = self.unban_timers.remove(&session.id) {
            stale.abort();
        }

        let session_id = session.id;
        let ban_time = self.ban_time;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(ban_time).await;
            let _ = cmd_tx.send(EngineCommand::Unban { session_id }).await;
        });
        self.unban_timers.insert(session_id, handle);
    }

    /// Release a ban: clear the flag and empty the report set.
    ///
    /// Returns false when the session was not banned (e.g. the timer fired
    /// after the session was already torn down and recreated).
    pub fn unban(&mut self, session: &mut Session) -> bool {
        self.unban_timers.remove(&session.id);
        if !session.is_banned {
            return false;
        }
        session.is_banned = false;
        session.reported_by.clear();
        info!("Session {} ({}) unbanned", session.id, session.username);
        true
    }

    /// Drop any pending unban timer for a removed session.
    pub fn forget(&mut self, session_id: SessionId) {
        if let Some(timer) = self.unban_timers.remove(&session_id) {
            timer.abort();
        }
    }
}
