//! Shared-secret gate for mutating the knowledge store.
//!
//! The gate supports two ways of presenting the secret:
//!
//! - [`AdminMode::Password`]: the secret is presented explicitly (a CLI flag,
//!   an HTTP header, an unlock request) before an upload is accepted.
//! - [`AdminMode::TriggerPhrase`]: the secret is typed into the ordinary
//!   question input; instead of being asked, it unlocks the session.
//!
//! Whether an unlock survives a mutation is an [`AuthPolicy`]. Under
//! [`AuthPolicy::LatchForSession`] the session stays unlocked until it ends;
//! under [`AuthPolicy::ReAuthEveryMutation`] each unlock authorizes exactly
//! one mutation.

use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AdminMode {
    #[default]
    Password,
    TriggerPhrase,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthPolicy {
    #[serde(rename = "reauth")]
    ReAuthEveryMutation,
    #[default]
    #[serde(rename = "latch")]
    LatchForSession,
}

/// Per-interaction admin capability. Never persisted.
#[derive(Debug, Default, Clone)]
pub struct AdminSession {
    is_unlocked: bool,
}

impl AdminSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_unlocked(&self) -> bool {
        self.is_unlocked
    }
}

/// What a line of user input turned out to be.
#[derive(Debug, PartialEq, Eq)]
pub enum Screened<'a> {
    /// Blank input; nothing to do.
    Empty,
    /// The trigger phrase; the session is now unlocked.
    Unlocked,
    /// An ordinary question.
    Question(&'a str),
}

#[derive(Debug, Clone)]
pub struct AdminGate {
    mode: AdminMode,
    policy: AuthPolicy,
    secret: String,
}

impl AdminGate {
    pub fn new(mode: AdminMode, policy: AuthPolicy, secret: impl Into<String>) -> Self {
        Self {
            mode,
            policy,
            secret: secret.into(),
        }
    }

    /// Exact, case-sensitive comparison.
    pub fn check(presented: &str, expected: &str) -> bool {
        presented == expected
    }

    pub fn mode(&self) -> AdminMode {
        self.mode
    }

    pub fn policy(&self) -> AuthPolicy {
        self.policy
    }

    /// Unlocks `session` if `presented` matches the secret. Returns the match result.
    pub fn unlock(&self, session: &mut AdminSession, presented: &str) -> bool {
        let ok = Self::check(presented, &self.secret);
        if ok {
            session.is_unlocked = true;
            info!("admin session unlocked");
        }
        ok
    }

    /// Classifies a line of question input.
    ///
    /// In trigger-phrase mode an exact match of the secret unlocks the
    /// session and is not treated as a question. In password mode every
    /// non-blank line is a question.
    pub fn screen<'a>(&self, session: &mut AdminSession, input: &'a str) -> Screened<'a> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Screened::Empty;
        }
        if self.mode == AdminMode::TriggerPhrase && self.unlock(session, trimmed) {
            return Screened::Unlocked;
        }
        Screened::Question(trimmed)
    }

    /// Whether [`authorize_mutation`](Self::authorize_mutation) would
    /// succeed, without changing the session.
    pub fn may_mutate(&self, session: &AdminSession, presented: Option<&str>) -> bool {
        session.is_unlocked || presented.is_some_and(|p| Self::check(p, &self.secret))
    }

    /// Decides whether a mutation may proceed.
    ///
    /// A presented secret that matches unlocks the session first. The
    /// reauth policy then consumes the unlock so the next mutation needs a
    /// fresh one.
    pub fn authorize_mutation(&self, session: &mut AdminSession, presented: Option<&str>) -> bool {
        if let Some(p) = presented {
            self.unlock(session, p);
        }
        if !session.is_unlocked {
            return false;
        }
        if self.policy == AuthPolicy::ReAuthEveryMutation {
            session.is_unlocked = false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "Hunter2";

    #[test]
    fn check_matches_only_exact_secret() {
        assert!(AdminGate::check(SECRET, SECRET));
        for wrong in ["", "hunter2", "HUNTER2", "Hunter2 ", " Hunter2", "Hunter"] {
            assert!(!AdminGate::check(wrong, SECRET), "{:?} should not match", wrong);
        }
    }

    #[test]
    fn latch_policy_keeps_session_unlocked() {
        let gate = AdminGate::new(AdminMode::Password, AuthPolicy::LatchForSession, SECRET);
        let mut session = AdminSession::new();
        assert!(!gate.authorize_mutation(&mut session, None));
        assert!(gate.authorize_mutation(&mut session, Some(SECRET)));
        assert!(gate.authorize_mutation(&mut session, None));
        assert!(session.is_unlocked());
    }

    #[test]
    fn reauth_policy_consumes_unlock() {
        let gate = AdminGate::new(AdminMode::Password, AuthPolicy::ReAuthEveryMutation, SECRET);
        let mut session = AdminSession::new();
        assert!(gate.unlock(&mut session, SECRET));
        assert!(gate.authorize_mutation(&mut session, None));
        assert!(!gate.authorize_mutation(&mut session, None));
        assert!(gate.authorize_mutation(&mut session, Some(SECRET)));
        assert!(!session.is_unlocked());
    }

    #[test]
    fn may_mutate_does_not_consume_unlock() {
        let gate = AdminGate::new(AdminMode::Password, AuthPolicy::ReAuthEveryMutation, SECRET);
        let mut session = AdminSession::new();
        assert!(!gate.may_mutate(&session, None));
        assert!(!gate.may_mutate(&session, Some("hunter2")));
        assert!(gate.may_mutate(&session, Some(SECRET)));
        assert!(!session.is_unlocked());

        gate.unlock(&mut session, SECRET);
        assert!(gate.may_mutate(&session, None));
        assert!(gate.may_mutate(&session, None));
        assert!(gate.authorize_mutation(&mut session, None));
        assert!(!gate.may_mutate(&session, None));
    }

    #[test]
    fn wrong_secret_never_unlocks() {
        let gate = AdminGate::new(AdminMode::Password, AuthPolicy::LatchForSession, SECRET);
        let mut session = AdminSession::new();
        assert!(!gate.unlock(&mut session, "hunter2"));
        assert!(!gate.authorize_mutation(&mut session, Some("")));
        assert!(!session.is_unlocked());
    }

    #[test]
    fn trigger_phrase_unlocks_instead_of_asking() {
        let gate = AdminGate::new(AdminMode::TriggerPhrase, AuthPolicy::LatchForSession, "admin123");
        let mut session = AdminSession::new();
        assert_eq!(gate.screen(&mut session, "   "), Screened::Empty);
        assert_eq!(
            gate.screen(&mut session, "what is the refund window?"),
            Screened::Question("what is the refund window?")
        );
        assert!(!session.is_unlocked());
        assert_eq!(gate.screen(&mut session, "admin123\n"), Screened::Unlocked);
        assert!(session.is_unlocked());
    }

    #[test]
    fn password_mode_treats_secret_as_question() {
        let gate = AdminGate::new(AdminMode::Password, AuthPolicy::LatchForSession, "admin123");
        let mut session = AdminSession::new();
        assert_eq!(
            gate.screen(&mut session, "admin123"),
            Screened::Question("admin123")
        );
        assert!(!session.is_unlocked());
    }
}
