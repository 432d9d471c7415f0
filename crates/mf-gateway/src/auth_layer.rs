//! Identity adapter: turn request headers into an [`ActorContext`].
//!
//! Token verification happens upstream (identity provider / app check);
//! by the time a request reaches this service the trusted fronting
//! layer has stamped the identity headers. This adapter only shapes
//! them into the actor model.

use axum::http::HeaderMap;

use mf_core::actor::{ActorContext, ActorMode, Delegation};
use mf_core::DomainError;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

pub fn actor_from_headers(headers: &HeaderMap) -> Result<ActorContext, DomainError> {
    let uid = header(headers, "x-uid")
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| DomainError::unauthenticated("authentication required"))?
        .to_string();

    let mode = match header(headers, "x-auth-mode").unwrap_or("session") {
        "session" => ActorMode::Session,
        "delegated-agent" => ActorMode::DelegatedAgent,
        "personal-access-token" => ActorMode::PersonalAccessToken,
        other => {
            return Err(DomainError::unauthenticated(format!(
                "unknown auth mode `{other}`"
            )));
        }
    };

    let scopes: Vec<String> = header(headers, "x-scopes")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let delegations: Vec<Delegation> = header(headers, "x-delegations")
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();

    let agent_client_id = header(headers, "x-agent-client-id")
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let token_id = header(headers, "x-token-id")
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    if mode == ActorMode::DelegatedAgent && agent_client_id.is_none() {
        return Err(DomainError::unauthenticated(
            "delegated agents must present an agent client id",
        ));
    }
    if mode == ActorMode::PersonalAccessToken && token_id.is_none() {
        return Err(DomainError::unauthenticated(
            "personal access tokens must present a token id",
        ));
    }

    Ok(ActorContext {
        mode,
        uid,
        scopes,
        agent_client_id,
        token_id,
        staff: header(headers, "x-staff").is_some_and(|v| v.eq_ignore_ascii_case("true")),
        delegations,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn missing_uid_is_unauthenticated() {
        let err = actor_from_headers(&headers(&[])).unwrap_err();
        assert_eq!(err.http_status(), 401);
    }

    #[test]
    fn session_defaults() {
        let actor = actor_from_headers(&headers(&[("x-uid", "u1")])).unwrap();
        assert_eq!(actor.mode, ActorMode::Session);
        assert_eq!(actor.uid, "u1");
        assert!(!actor.staff);
    }

    #[test]
    fn staff_flag_parses() {
        let actor =
            actor_from_headers(&headers(&[("x-uid", "s1"), ("x-staff", "TRUE")])).unwrap();
        assert!(actor.staff);
    }

    #[test]
    fn pat_requires_token_id() {
        let err = actor_from_headers(&headers(&[
            ("x-uid", "u1"),
            ("x-auth-mode", "personal-access-token"),
        ]))
        .unwrap_err();
        assert_eq!(err.http_status(), 401);

        let actor = actor_from_headers(&headers(&[
            ("x-uid", "u1"),
            ("x-auth-mode", "personal-access-token"),
            ("x-token-id", "tok1"),
            ("x-scopes", "reservations:read, library:read"),
        ]))
        .unwrap();
        assert_eq!(actor.mode, ActorMode::PersonalAccessToken);
        assert_eq!(actor.scopes.len(), 2);
    }

    #[test]
    fn delegated_requires_client_id_and_parses_delegations() {
        let err = actor_from_headers(&headers(&[
            ("x-uid", "agent1"),
            ("x-auth-mode", "delegated-agent"),
        ]))
        .unwrap_err();
        assert_eq!(err.http_status(), 401);

        let actor = actor_from_headers(&headers(&[
            ("x-uid", "agent1"),
            ("x-auth-mode", "delegated-agent"),
            ("x-agent-client-id", "client-9"),
            (
                "x-delegations",
                r#"[{"owner_uid":"u1","scopes":["reservations:write"]}]"#,
            ),
        ]))
        .unwrap();
        assert_eq!(actor.delegations.len(), 1);
        assert_eq!(actor.delegations[0].owner_uid, "u1");
    }
}
