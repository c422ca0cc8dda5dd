//! Session identity
//!
//! The (session id, last sequence, resumable) triple established at READY
//! and required for RESUME.

/// Identity of a gateway session
///
/// Created on READY, updated on every dispatch, cleared when the server
/// invalidates the session.
#[derive(Debug, Clone, Default)]
pub struct SessionIdentity {
    session_id: Option<String>,
    last_sequence: u64,
    resumable: bool,
    resume_url: Option<String>,
}

impl SessionIdentity {
    /// Empty identity; nothing to resume
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the identity delivered by READY
    pub fn establish(&mut self, session_id: impl Into<String>, resume_url: Option<String>) {
        self.session_id = Some(session_id.into());
        self.resume_url = resume_url;
        self.resumable = true;
    }

    /// Track the sequence of a dispatch
    ///
    /// Sequence numbers are monotonic; a stale replay never lowers it.
    pub fn record_dispatch(&mut self, sequence: u64) {
        if sequence > self.last_sequence {
            self.last_sequence = sequence;
        }
    }

    /// Drop the identity; the next connection must IDENTIFY
    pub fn invalidate(&mut self) {
        self.session_id = None;
        self.last_sequence = 0;
        self.resumable = false;
        self.resume_url = None;
    }

    /// Whether a RESUME may be attempted
    ///
    /// Requires the resumable flag plus a non-empty id and a positive
    /// sequence.
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        self.resumable
            && self.session_id.as_deref().is_some_and(|id| !id.is_empty())
            && self.last_sequence > 0
    }

    /// The session id, if established
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Last observed dispatch sequence; zero before the first dispatch
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Sequence to put in a heartbeat: None before the first dispatch
    #[must_use]
    pub fn heartbeat_sequence(&self) -> Option<u64> {
        (self.last_sequence > 0).then_some(self.last_sequence)
    }

    /// Gateway URL to use for a resume, if the server provided one
    #[must_use]
    pub fn resume_url(&self) -> Option<&str> {
        self.resume_url.as_deref()
    }
}
