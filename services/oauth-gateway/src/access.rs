//! Config-driven access voter
//!
//! Turns `[[access.rules]]` into a voter for the lifecycle hooks. A rule
//! naming the principal in `deny` forbids; one naming it (or `"*"`) in
//! `allow` allows; anything else abstains.

use token_lifecycle::{AccessRequest, AccessVote};

use crate::config::AccessRule;

const WILDCARD: &str = "*";

fn applies(rule: &AccessRule, credential_id: Option<&str>) -> bool {
    rule.credential == WILDCARD || credential_id == Some(rule.credential.as_str())
}

fn lists(names: &[String], principal: &str) -> bool {
    names.iter().any(|n| n == principal || n == WILDCARD)
}

/// Vote on `request` against `rules`.
pub fn vote(rules: &[AccessRule], request: &AccessRequest<'_>) -> AccessVote {
    let Some(principal) = request.principal.name() else {
        return AccessVote::Abstain;
    };
    let mut vote = AccessVote::Abstain;
    for rule in rules.iter().filter(|r| applies(r, request.credential_id)) {
        if lists(&rule.deny, principal) {
            return AccessVote::Forbid;
        }
        if lists(&rule.allow, principal) {
            vote = AccessVote::Allow;
        }
    }
    vote
}

/// Voter closure for `Hooks::with_voter`.
pub fn voter(rules: Vec<AccessRule>) -> impl Fn(&AccessRequest<'_>) -> AccessVote + Send + Sync {
    move |request| vote(&rules, request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use token_lifecycle::Principal;

    fn rule(credential: &str, allow: &[&str], deny: &[&str]) -> AccessRule {
        AccessRule {
            credential: credential.into(),
            allow: allow.iter().map(|s| s.to_string()).collect(),
            deny: deny.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn ask(rules: &[AccessRule], who: &Principal, credential: &str) -> AccessVote {
        vote(
            rules,
            &AccessRequest {
                principal: who,
                credential_id: Some(credential),
                kind: None,
            },
        )
    }

    #[test]
    fn allow_list_matches_named_principals() {
        let rules = vec![rule("calendar-bot", &["ana"], &[])];
        let ana = Principal::User("ana".into());
        let ben = Principal::User("ben".into());

        assert_eq!(ask(&rules, &ana, "calendar-bot"), AccessVote::Allow);
        assert_eq!(ask(&rules, &ben, "calendar-bot"), AccessVote::Abstain);
        assert_eq!(ask(&rules, &ana, "drive-bot"), AccessVote::Abstain);
    }

    #[test]
    fn deny_beats_wildcard_allow() {
        let rules = vec![
            rule("*", &["*"], &[]),
            rule("calendar-bot", &[], &["mallory"]),
        ];
        let mallory = Principal::User("mallory".into());
        let ana = Principal::User("ana".into());

        assert_eq!(ask(&rules, &mallory, "calendar-bot"), AccessVote::Forbid);
        assert_eq!(ask(&rules, &mallory, "drive-bot"), AccessVote::Allow);
        assert_eq!(ask(&rules, &ana, "calendar-bot"), AccessVote::Allow);
    }

    #[test]
    fn anonymous_never_matches() {
        let rules = vec![rule("*", &["*"], &[])];
        assert_eq!(
            ask(&rules, &Principal::Anonymous, "calendar-bot"),
            AccessVote::Abstain
        );
    }

    #[test]
    fn rules_without_credential_id_only_match_wildcards() {
        let rules = vec![rule("calendar-bot", &["ana"], &[])];
        let ana = Principal::User("ana".into());
        let request = AccessRequest {
            principal: &ana,
            credential_id: None,
            kind: Some("user_delegated"),
        };
        assert_eq!(vote(&rules, &request), AccessVote::Abstain);

        let voter = voter(vec![rule("*", &["ana"], &[])]);
        assert_eq!(voter(&request), AccessVote::Allow);
    }
}
