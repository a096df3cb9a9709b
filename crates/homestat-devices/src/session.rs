//! Per-source session token cache.

use std::fmt;

/// Session token of one device, plus the re-login allowance of the
/// current cycle.
#[derive(Default)]
pub(crate) struct Session {
    token: Option<String>,
    relogged: bool,
}

impl Session {
    /// Reset the re-login allowance at the start of a poll cycle.
    pub(crate) fn begin_cycle(&mut self) {
        self.relogged = false;
    }

    pub(crate) fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub(crate) fn store(&mut self, token: String) {
        self.token = Some(token);
    }

    /// Drop the token after the device refused it.
    ///
    /// Returns `true` if the caller may log in again within this cycle.
    pub(crate) fn invalidate(&mut self) -> bool {
        self.token = None;
        if self.relogged {
            false
        } else {
            self.relogged = true;
            true
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("relogged", &self.relogged)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_relogin_per_cycle() {
        let mut session = Session::default();
        session.store("abc".to_string());

        assert!(session.invalidate());
        assert!(session.token().is_none());
        session.store("def".to_string());
        assert!(!session.invalidate());

        session.begin_cycle();
        assert!(session.invalidate());
    }

    #[test]
    fn debug_hides_token() {
        let mut session = Session::default();
        session.store("s3cr3t-token".to_string());
        assert!(!format!("{session:?}").contains("s3cr3t"));
    }
}
