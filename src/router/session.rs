use std::time::{Duration, Instant};

/// Default time after which a session is considered stale.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(5 * 60);

/// Authentication state of one router session.
///
/// The console never says when a session expires, so freshness is judged
/// purely by the time since the last successful login.
#[derive(Debug, Clone)]
pub struct SessionState {
    authenticated_since: Option<Instant>,
    ttl: Duration,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

impl SessionState {
    pub fn new(ttl: Duration) -> Self {
        Self {
            authenticated_since: None,
            ttl,
        }
    }

    pub fn authenticated_since(&self) -> Option<Instant> {
        self.authenticated_since
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// True if a login happened less than `ttl` ago.
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Instant::now())
    }

    pub fn is_fresh_at(&self, now: Instant) -> bool {
        match self.authenticated_since {
            Some(since) => now.saturating_duration_since(since) <= self.ttl,
            None => false,
        }
    }

    pub fn mark_authenticated(&mut self) {
        self.authenticated_since = Some(Instant::now());
    }

    /// Forget the session so the next freshness check forces a login.
    ///
    /// Only called from `ArrisClient::list_forwards`, when the listing page
    /// has no forward table (most likely a logged-out session).
    pub fn invalidate(&mut self) {
        self.authenticated_since = None;
    }
}
