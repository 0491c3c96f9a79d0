use crate::model::Role;
use crate::session::{Session, SessionStore};
use log::debug;

/// Where anonymous visitors are sent.
pub const LOGIN_VIEW: &str = "/";
/// Where signed-in visitors without the required role are sent.
pub const DEFAULT_VIEW: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Render,
    RedirectToLogin,
    RedirectToDefault,
}

impl GuardDecision {
    pub fn location(self) -> Option<&'static str> {
        match self {
            GuardDecision::Render => None,
            GuardDecision::RedirectToLogin => Some(LOGIN_VIEW),
            GuardDecision::RedirectToDefault => Some(DEFAULT_VIEW),
        }
    }
}

pub fn decide(session: Option<&Session>, required: Option<Role>) -> GuardDecision {
    let session = match session {
        Some(session) if !session.credential.is_empty() => session,
        _ => return GuardDecision::RedirectToLogin,
    };
    match (required, session.identity.role) {
        (None, _) => GuardDecision::Render,
        (Some(Role::Admin), Role::Admin) | (Some(Role::User), Role::User) => GuardDecision::Render,
        (Some(Role::Admin), Role::User) | (Some(Role::User), Role::Admin) => {
            GuardDecision::RedirectToDefault
        }
    }
}

/// Like [`guard`], but hands back the session when the view may render.
pub fn admit<S: SessionStore + ?Sized>(
    store: &S,
    required: Option<Role>,
) -> Result<Session, GuardDecision> {
    let session = match store.get() {
        Ok(session) => session,
        Err(err) => {
            debug!("treating unreadable session as signed out: {}", err);
            None
        }
    };
    match decide(session.as_ref(), required) {
        GuardDecision::Render => session.ok_or(GuardDecision::RedirectToLogin),
        decision => Err(decision),
    }
}

pub fn guard<S: SessionStore + ?Sized>(store: &S, required: Option<Role>) -> GuardDecision {
    match admit(store, required) {
        Ok(_) => GuardDecision::Render,
        Err(decision) => decision,
    }
}
