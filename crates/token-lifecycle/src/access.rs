//! Access votes for starting or completing a consent flow
//!
//! Voters return `Allow`, `Forbid` or `Abstain`. Any forbid wins, otherwise
//! any allow wins; with no opinion the result is `Neutral`, which callers
//! treat as a denial for everyone but the administrator.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessVote {
    Allow,
    Forbid,
    Abstain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessDecision {
    Allowed,
    Forbidden,
    Neutral,
}

impl AccessDecision {
    pub fn is_allowed(self) -> bool {
        self == AccessDecision::Allowed
    }
}

/// Who is making the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Holder of the administrative bypass capability
    Admin,
    User(String),
    Anonymous,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        matches!(self, Principal::Admin)
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Principal::User(name) => Some(name),
            Principal::Admin | Principal::Anonymous => None,
        }
    }
}

/// What a voter is asked about.
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    pub principal: &'a Principal,
    pub credential_id: Option<&'a str>,
    /// Credential type named by the caller, if any
    pub kind: Option<&'a str>,
}

/// Combine votes: forbid wins, then allow, else neutral.
pub fn aggregate(votes: impl IntoIterator<Item = AccessVote>) -> AccessDecision {
    let mut allowed = false;
    for vote in votes {
        match vote {
            AccessVote::Forbid => return AccessDecision::Forbidden,
            AccessVote::Allow => allowed = true,
            AccessVote::Abstain => {}
        }
    }
    if allowed {
        AccessDecision::Allowed
    } else {
        AccessDecision::Neutral
    }
}
