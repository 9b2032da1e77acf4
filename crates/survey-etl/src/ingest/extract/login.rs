//! Login state machine
//!
//! The portal login is modelled as an explicit finite-state machine driven by
//! [`LoginEvent`]s. It performs no I/O: the extractor observes the browser,
//! feeds the outcome in as an event and acts on the resulting state. This keeps
//! the retry bound and the terminal states checkable without a browser.
//!
//! ```text
//! Init --Start--> NavigatingLogin --FormDetected--> FormReady --Submitted--> Submitting
//!   Submitting --Navigated--> Authenticated
//!   Submitting --Rejected(captcha), attempts left--> NavigatingLogin
//!   Submitting --Rejected(captcha), no attempts left--> Failed(login-exhausted)
//!   Submitting --Rejected(other)--> Failed(login-rejected)
//!   any non-terminal --Aborted(reason)--> Failed(reason)
//! ```

use crate::error::{ExtractionError, ExtractionReason};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginState {
    Init,
    NavigatingLogin,
    FormReady,
    Submitting,
    Authenticated,
    Failed(ExtractionReason),
}

impl LoginState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoginState::Authenticated | LoginState::Failed(_))
    }

    fn name(&self) -> &'static str {
        match self {
            LoginState::Init => "init",
            LoginState::NavigatingLogin => "navigating-login",
            LoginState::FormReady => "form-ready",
            LoginState::Submitting => "submitting",
            LoginState::Authenticated => "authenticated",
            LoginState::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginEvent {
    /// Begin loading the login page
    Start,
    /// The login form is present on the page
    FormDetected,
    /// Credentials (and any CAPTCHA solution) were filled and the form sent
    Submitted,
    /// The submission navigated away from the login page
    Navigated,
    /// The portal displayed an error message after submission
    Rejected(String),
    /// A step failed outside the login protocol itself
    Aborted(ExtractionReason),
}

/// Per-dataset login bookkeeping, discarded when extraction ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSession {
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
}

impl LoginSession {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt_count: 0,
            max_attempts,
            last_error: None,
        }
    }

    pub fn attempts_remaining(&self) -> bool {
        self.attempt_count < self.max_attempts
    }
}

#[derive(Debug, Clone)]
pub struct LoginMachine {
    state: LoginState,
    session: LoginSession,
    captcha_token: String,
}

impl LoginMachine {
    /// `captcha_token` is matched case-insensitively against rejection messages
    pub fn new(max_attempts: u32, captcha_token: &str) -> Self {
        Self {
            state: LoginState::Init,
            session: LoginSession::new(max_attempts),
            captcha_token: captcha_token.to_lowercase(),
        }
    }

    pub fn state(&self) -> &LoginState {
        &self.state
    }

    pub fn session(&self) -> &LoginSession {
        &self.session
    }

    pub fn is_captcha_error(&self, message: &str) -> bool {
        !self.captcha_token.is_empty() && message.to_lowercase().contains(&self.captcha_token)
    }

    /// Apply one event and return the new state
    ///
    /// An event that is not valid in the current state leaves the machine
    /// untouched and returns an error.
    pub fn apply(&mut self, event: LoginEvent) -> Result<&LoginState, ExtractionError> {
        let next = match (&self.state, event) {
            (LoginState::Init, LoginEvent::Start) => LoginState::NavigatingLogin,
            (LoginState::NavigatingLogin, LoginEvent::FormDetected) => LoginState::FormReady,
            (LoginState::FormReady, LoginEvent::Submitted) => {
                self.session.attempt_count += 1;
                LoginState::Submitting
            }
            (LoginState::Submitting, LoginEvent::Navigated) => LoginState::Authenticated,
            (LoginState::Submitting, LoginEvent::Rejected(message)) => {
                let captcha = self.is_captcha_error(&message);
                self.session.last_error = Some(message);
                match (captcha, self.session.attempts_remaining()) {
                    (true, true) => LoginState::NavigatingLogin,
                    (true, false) => LoginState::Failed(ExtractionReason::LoginExhausted),
                    (false, _) => LoginState::Failed(ExtractionReason::LoginRejected),
                }
            }
            (state, LoginEvent::Aborted(reason)) if !state.is_terminal() => {
                LoginState::Failed(reason)
            }
            (state, event) => {
                return Err(ExtractionError::new(
                    ExtractionReason::Browser,
                    format!("invalid login transition from {} on {:?}", state.name(), event),
                ))
            }
        };

        self.state = next;
        Ok(&self.state)
    }

    /// Error describing a `Failed` state, `None` otherwise
    pub fn failure(&self) -> Option<ExtractionError> {
        let LoginState::Failed(reason) = self.state else {
            return None;
        };

        let detail = match reason {
            ExtractionReason::LoginExhausted => format!(
                "CAPTCHA rejected on all {} login attempts (last error: {})",
                self.session.max_attempts,
                self.session.last_error.as_deref().unwrap_or("none")
            ),
            ExtractionReason::LoginRejected => format!(
                "login rejected: {}",
                self.session.last_error.as_deref().unwrap_or("unknown error")
            ),
            other => format!("login aborted ({}) after {} attempt(s)", other, self.session.attempt_count),
        };
        Some(ExtractionError::new(reason, detail))
    }
}
