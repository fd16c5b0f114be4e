//! Structured observability hooks for compile session lifecycle events.
//!
//! This module provides:
//! - Session-scoped tracing spans via [`SessionSpan`]
//! - Emission functions for session start and finish
//!
//! Events are emitted at `info!` level. Failure severity for individual
//! artifacts is decided by the session itself; the finish event only
//! records the outcome.

use tracing::{info, Span};
use uuid::Uuid;

use crate::error::SessionError;
use crate::program::ProgramCategory;
use crate::session::SessionOutcome;

/// A tracing span tagged with a fresh session id.
///
/// Attach it to the session future with [`tracing::Instrument`] so every
/// compile log line carries the session id and category.
pub struct SessionSpan {
    id: Uuid,
    span: Span,
}

impl SessionSpan {
    pub fn new(category: ProgramCategory) -> Self {
        let id = Uuid::new_v4();
        let span = tracing::info_span!("bpf.session", session_id = %id, category = %category);
        Self { id, span }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

/// Emit event: session started.
pub fn emit_session_started(session_id: Uuid, category: ProgramCategory, debug_enabled: bool) {
    info!(
        event = "session.started",
        session_id = %session_id,
        category = %category,
        debug = debug_enabled,
    );
}

/// Emit event: session finished, successfully or not.
pub fn emit_session_finished(
    session_id: Uuid,
    category: ProgramCategory,
    result: &Result<SessionOutcome, SessionError>,
) {
    match result {
        Ok(outcome) => info!(
            event = "session.finished",
            session_id = %session_id,
            category = %category,
            artifacts = outcome.artifacts.len(),
            success = true,
        ),
        Err(err) if err.is_cancelled() => info!(
            event = "session.aborted",
            session_id = %session_id,
            category = %category,
            stage = %err.stage,
        ),
        Err(err) => info!(
            event = "session.finished",
            session_id = %session_id,
            category = %category,
            stage = %err.stage,
            success = false,
        ),
    }
}
