//! The per-request authentication decision procedure.
//!
//! Reconciles three independent signals into one allow/deny decision: the
//! session token presented by the request, the stored session record, and the
//! device fingerprint recomputed from the current request. Regular users are
//! pinned to one device; the admin
//! sentinel is exempt. A narrowly-scoped recovery branch repairs session
//! records that lost their subject marker but still carry the admin marker.
//!
//! Every rejection is terminal for the request. The gate never mutates
//! storage directly; it asks the session store for touches, invalidations,
//! and repairs.

use axum::http::HeaderMap;
use std::net::SocketAddr;

use super::audit::{AuditEvent, AuditSink, MismatchReason};
use super::device::{fingerprint, resolve_client_ip, resolve_user_agent, token_digest};
use super::directory::UserDirectory;
use super::error::AuthError;
use super::session::extract_session_token;
use super::session_store::{SessionRecord, SessionStore, now_unix};
use super::state::AuthState;
use super::subject::{AuthenticatedSubject, SubjectId};

/// Classification of the route being guarded.
///
/// Recovery only ever fires on `Admin` routes; the session-check endpoint is
/// `Check` so a corrupted record is reported, not silently repaired, there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteClass {
    User,
    Admin,
    Check,
}

/// The explicit predicate behind the recovery branch: the subject marker is
/// gone but the secondary admin marker survived. Nothing else qualifies.
///
/// This is a deliberate, bounded trust decision: the backing store's
/// lazy-write behavior can desync individual fields, and losing the subject
/// marker on an operator session would otherwise force a re-login on a
/// low-privilege, operator-only surface.
fn partial_admin_evidence(record: &SessionRecord) -> bool {
    record.subject.is_none() && record.admin_marker
}

/// Decide whether this request carries an authenticated subject.
///
/// # Errors
/// Returns the taxonomy error describing why the request was rejected.
pub async fn authenticate(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    route: RouteClass,
    state: &AuthState,
) -> Result<AuthenticatedSubject, AuthError> {
    // 1. No session identifier at all.
    let Some(token) = extract_session_token(headers) else {
        return Err(AuthError::NoSession);
    };

    let record = state.sessions().find_by_token(&token).await?;

    // 2. Unknown token, or a record whose subject marker is gone.
    let Some(record) = record else {
        return Err(AuthError::SessionExpired);
    };

    let now = now_unix();

    match record.subject {
        None => {
            if route == RouteClass::Admin
                && record.is_live(now)
                && partial_admin_evidence(&record)
            {
                // Repair the record and let the request through as admin.
                state
                    .sessions()
                    .restore_subject(&token, SubjectId::Admin)
                    .await?;
                state.audit().record(AuditEvent::SessionRecovered {
                    token_digest: token_digest(&token),
                });
                state.sessions().touch(&token).await;
                return Ok(AuthenticatedSubject {
                    id: SubjectId::Admin,
                    is_admin: true,
                    session_token: token,
                });
            }
            Err(AuthError::SessionExpired)
        }
        // 3. Admin sentinel: the fingerprint check is skipped entirely.
        Some(SubjectId::Admin) => {
            if !record.is_live(now) {
                return Err(AuthError::SessionExpired);
            }
            // When the sentinel maps to a concrete directory account, a
            // blocked or deleted account still locks the panel out.
            let backing = state
                .users()
                .find_by_username(state.admin().username())
                .await?;
            if backing.is_some_and(|user| user.is_blocked || user.is_deleted) {
                state.sessions().invalidate(&token).await?;
                state.audit().record(AuditEvent::SessionInvalidated {
                    subject: SubjectId::Admin.as_string(),
                    reason: "admin account disabled",
                });
                return Err(AuthError::Forbidden);
            }
            state.sessions().touch(&token).await;
            Ok(AuthenticatedSubject {
                id: SubjectId::Admin,
                is_admin: true,
                session_token: token,
            })
        }
        // 4. Regular user: full device-binding check. The active flag is
        // deliberately not consulted yet: a session invalidated by a newer
        // login elsewhere must surface as a device mismatch below, not as a
        // plain expiry.
        Some(SubjectId::User(user_id)) => {
            if record.is_expired(now) {
                return Err(AuthError::SessionExpired);
            }

            let Some(user) = state.users().find_by_id(user_id).await? else {
                state.sessions().invalidate(&token).await?;
                return Err(AuthError::UserNotFound);
            };
            if user.is_deleted || user.is_blocked {
                state.sessions().invalidate(&token).await?;
                state.audit().record(AuditEvent::SessionInvalidated {
                    subject: SubjectId::User(user_id).as_string(),
                    reason: "account disabled",
                });
                return Err(AuthError::Forbidden);
            }

            // No binding at all means the login never completed; force a
            // fresh authentication rather than trusting a half-written state.
            let Some(binding) = user.binding else {
                state.sessions().invalidate(&token).await?;
                return Err(AuthError::SessionExpired);
            };

            // Recompute the fingerprint from the *current* request, reusing
            // the presented token rather than minting a new one.
            let current_fingerprint = fingerprint(
                &resolve_user_agent(headers),
                &resolve_client_ip(headers, peer),
            );

            if binding.session_token != token {
                // A second, later login elsewhere superseded this session.
                state.audit().record(AuditEvent::DeviceMismatch {
                    subject: SubjectId::User(user_id).as_string(),
                    bound_fingerprint: binding.fingerprint,
                    presented_fingerprint: current_fingerprint,
                    reason: MismatchReason::SupersededToken,
                });
                return Err(AuthError::DeviceMismatch);
            }

            if binding.fingerprint != current_fingerprint {
                // Same token, different device signature: copied cookie or
                // spoofed client. Deny rather than guess.
                state.audit().record(AuditEvent::DeviceMismatch {
                    subject: SubjectId::User(user_id).as_string(),
                    bound_fingerprint: binding.fingerprint,
                    presented_fingerprint: current_fingerprint,
                    reason: MismatchReason::FingerprintChanged,
                });
                return Err(AuthError::DeviceMismatch);
            }

            // Bound and matching but explicitly logged out.
            if !record.active {
                return Err(AuthError::SessionExpired);
            }

            state.sessions().touch(&token).await;
            // Directory admin flags never grant panel access; only the
            // sentinel subject does.
            Ok(AuthenticatedSubject {
                id: SubjectId::User(user_id),
                is_admin: false,
                session_token: token,
            })
        }
    }
}

/// Gate for user-facing protected routes.
///
/// # Errors
/// Returns the rejection produced by [`authenticate`].
pub async fn require_user(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    state: &AuthState,
) -> Result<AuthenticatedSubject, AuthError> {
    authenticate(headers, peer, RouteClass::User, state).await
}

/// Gate for admin-protected routes; non-admin subjects are rejected.
///
/// # Errors
/// Returns the rejection produced by [`authenticate`], or `Forbidden` for
/// authenticated non-admin subjects.
pub async fn require_admin(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    state: &AuthState,
) -> Result<AuthenticatedSubject, AuthError> {
    let subject = authenticate(headers, peer, RouteClass::Admin, state).await?;
    if !subject.is_admin {
        return Err(AuthError::Forbidden);
    }
    Ok(subject)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::audit::MemoryAuditSink;
    use crate::api::handlers::auth::directory::{CreateOutcome, DeviceBinding, MemoryUserDirectory};
    use crate::api::handlers::auth::session_store::{MemorySessionStore, NewSession};
    use crate::api::handlers::auth::state::AuthConfig;
    use crate::api::handlers::auth::verifier::{AdminCredentials, hash_password};
    use axum::http::{HeaderMap, HeaderValue};
    use secrecy::SecretString;
    use std::sync::Arc;
    use uuid::Uuid;

    struct Harness {
        state: AuthState,
        sessions: Arc<MemorySessionStore>,
        users: Arc<MemoryUserDirectory>,
        audit: Arc<MemoryAuditSink>,
    }

    fn harness() -> Harness {
        let sessions = Arc::new(MemorySessionStore::new());
        let users = Arc::new(MemoryUserDirectory::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let state = AuthState::new(
            AuthConfig::new("https://keystand.dev".to_string()),
            AdminCredentials::new("admin".to_string(), SecretString::from("hunter2")),
            sessions.clone(),
            users.clone(),
            audit.clone(),
        );
        Harness {
            state,
            sessions,
            users,
            audit,
        }
    }

    fn request_headers(token: Option<&str>, user_agent: &str, ip: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            headers.insert(
                axum::http::header::COOKIE,
                HeaderValue::from_str(&format!("keystand_session={token}")).expect("cookie"),
            );
        }
        headers.insert(
            axum::http::header::USER_AGENT,
            HeaderValue::from_str(user_agent).expect("ua"),
        );
        headers.insert("x-forwarded-for", HeaderValue::from_str(ip).expect("ip"));
        headers
    }

    async fn bound_user(h: &Harness, username: &str, user_agent: &str, ip: &str) -> (Uuid, String) {
        let hash = hash_password("pw1").expect("hash");
        let CreateOutcome::Created(user) =
            h.users.create(username, &hash).await.expect("create")
        else {
            panic!("expected created");
        };
        let fp = fingerprint(user_agent, ip);
        let record = h
            .sessions
            .create(NewSession {
                subject: SubjectId::User(user.id),
                fingerprint: fp.clone(),
                user_agent: user_agent.to_string(),
                ip: ip.to_string(),
                ttl_seconds: 3600,
            })
            .await
            .expect("session");
        h.users
            .set_binding(
                user.id,
                Some(DeviceBinding {
                    session_token: record.token.clone(),
                    fingerprint: fp,
                }),
            )
            .await
            .expect("bind");
        (user.id, record.token)
    }

    #[tokio::test]
    async fn missing_token_is_no_session() {
        let h = harness();
        let headers = request_headers(None, "ua", "203.0.113.9");
        let err = authenticate(&headers, None, RouteClass::User, &h.state)
            .await
            .expect_err("should reject");
        assert_eq!(err.kind(), "no_session");
    }

    #[tokio::test]
    async fn unknown_token_is_session_expired() {
        let h = harness();
        let headers = request_headers(Some("bogus"), "ua", "203.0.113.9");
        let err = authenticate(&headers, None, RouteClass::User, &h.state)
            .await
            .expect_err("should reject");
        assert_eq!(err.kind(), "session_expired");
    }

    #[tokio::test]
    async fn matching_binding_is_allowed() {
        let h = harness();
        let (user_id, token) = bound_user(&h, "alice", "Mozilla/5.0", "203.0.113.9").await;
        let headers = request_headers(Some(&token), "Mozilla/5.0", "203.0.113.9");

        let subject = authenticate(&headers, None, RouteClass::User, &h.state)
            .await
            .expect("should allow");
        assert_eq!(subject.id, SubjectId::User(user_id));
        assert!(!subject.is_admin);
        assert_eq!(subject.session_token, token);
    }

    #[tokio::test]
    async fn changed_fingerprint_is_device_mismatch() {
        let h = harness();
        let (_, token) = bound_user(&h, "alice", "Mozilla/5.0", "203.0.113.9").await;
        let headers = request_headers(Some(&token), "curl/8.0", "203.0.113.9");

        let err = authenticate(&headers, None, RouteClass::User, &h.state)
            .await
            .expect_err("should reject");
        assert_eq!(err.kind(), "device_mismatch");

        let events = h.audit.events();
        assert!(events.iter().any(|event| matches!(
            event,
            AuditEvent::DeviceMismatch {
                reason: MismatchReason::FingerprintChanged,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn superseded_token_is_device_mismatch() {
        let h = harness();
        let (user_id, old_token) = bound_user(&h, "alice", "Mozilla/5.0", "203.0.113.9").await;

        // A later login on another device overwrites the binding.
        let new_fp = fingerprint("Safari/17.0", "198.51.100.7");
        let new_record = h
            .sessions
            .create(NewSession {
                subject: SubjectId::User(user_id),
                fingerprint: new_fp.clone(),
                user_agent: "Safari/17.0".to_string(),
                ip: "198.51.100.7".to_string(),
                ttl_seconds: 3600,
            })
            .await
            .expect("session");
        h.users
            .set_binding(
                user_id,
                Some(DeviceBinding {
                    session_token: new_record.token.clone(),
                    fingerprint: new_fp,
                }),
            )
            .await
            .expect("bind");

        // The old device presents its original, still-stored session.
        let headers = request_headers(Some(&old_token), "Mozilla/5.0", "203.0.113.9");
        let err = authenticate(&headers, None, RouteClass::User, &h.state)
            .await
            .expect_err("should reject");
        assert_eq!(err.kind(), "device_mismatch");

        let events = h.audit.events();
        assert!(events.iter().any(|event| matches!(
            event,
            AuditEvent::DeviceMismatch {
                reason: MismatchReason::SupersededToken,
                ..
            }
        )));

        // The new device sails through.
        let headers = request_headers(Some(&new_record.token), "Safari/17.0", "198.51.100.7");
        assert!(
            authenticate(&headers, None, RouteClass::User, &h.state)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn admin_skips_fingerprint_check() {
        let h = harness();
        let record = h
            .sessions
            .create(NewSession {
                subject: SubjectId::Admin,
                fingerprint: fingerprint("Mozilla/5.0", "203.0.113.9"),
                user_agent: "Mozilla/5.0".to_string(),
                ip: "203.0.113.9".to_string(),
                ttl_seconds: 3600,
            })
            .await
            .expect("session");

        // Entirely different device signature; still allowed.
        let headers = request_headers(Some(&record.token), "curl/8.0", "198.51.100.7");
        let subject = authenticate(&headers, None, RouteClass::Admin, &h.state)
            .await
            .expect("should allow");
        assert!(subject.is_admin);
        assert_eq!(subject.id, SubjectId::Admin);
    }

    #[tokio::test]
    async fn two_admin_sessions_coexist() {
        let h = harness();
        let mut tokens = Vec::new();
        for (ua, ip) in [("Mozilla/5.0", "203.0.113.9"), ("Safari/17.0", "198.51.100.7")] {
            let record = h
                .sessions
                .create(NewSession {
                    subject: SubjectId::Admin,
                    fingerprint: fingerprint(ua, ip),
                    user_agent: (*ua).to_string(),
                    ip: (*ip).to_string(),
                    ttl_seconds: 3600,
                })
                .await
                .expect("session");
            tokens.push((record.token, ua, ip));
        }

        for (token, ua, ip) in &tokens {
            let headers = request_headers(Some(token), ua, ip);
            assert!(
                authenticate(&headers, None, RouteClass::Admin, &h.state)
                    .await
                    .is_ok(),
                "both admin sessions must stay valid"
            );
        }
    }

    #[tokio::test]
    async fn expired_session_is_rejected() {
        let h = harness();
        let (_, token) = bound_user(&h, "alice", "Mozilla/5.0", "203.0.113.9").await;

        let mut record = h
            .sessions
            .find_by_token(&token)
            .await
            .expect("find")
            .expect("record");
        record.expires_at_unix = now_unix() - 1;
        h.sessions.insert_raw(record).await;

        let headers = request_headers(Some(&token), "Mozilla/5.0", "203.0.113.9");
        let err = authenticate(&headers, None, RouteClass::User, &h.state)
            .await
            .expect_err("should reject");
        assert_eq!(err.kind(), "session_expired");
    }

    #[tokio::test]
    async fn missing_binding_invalidates_and_expires() {
        let h = harness();
        let (user_id, token) = bound_user(&h, "alice", "Mozilla/5.0", "203.0.113.9").await;
        h.users.set_binding(user_id, None).await.expect("unbind");

        let headers = request_headers(Some(&token), "Mozilla/5.0", "203.0.113.9");
        let err = authenticate(&headers, None, RouteClass::User, &h.state)
            .await
            .expect_err("should reject");
        assert_eq!(err.kind(), "session_expired");

        let record = h
            .sessions
            .find_by_token(&token)
            .await
            .expect("find")
            .expect("record");
        assert!(!record.active);
    }

    #[tokio::test]
    async fn blocked_user_is_forbidden_and_invalidated() {
        let h = harness();
        let (user_id, token) = bound_user(&h, "mallory", "Mozilla/5.0", "203.0.113.9").await;
        let mut user = h
            .users
            .find_by_id(user_id)
            .await
            .expect("find")
            .expect("user");
        user.is_blocked = true;
        h.users.insert_raw(user).await;

        let headers = request_headers(Some(&token), "Mozilla/5.0", "203.0.113.9");
        let err = authenticate(&headers, None, RouteClass::User, &h.state)
            .await
            .expect_err("should reject");
        assert_eq!(err.kind(), "forbidden");

        let record = h
            .sessions
            .find_by_token(&token)
            .await
            .expect("find")
            .expect("record");
        assert!(!record.active);
    }

    #[tokio::test]
    async fn vanished_user_is_user_not_found() {
        let h = harness();
        let record = h
            .sessions
            .create(NewSession {
                subject: SubjectId::User(Uuid::new_v4()),
                fingerprint: fingerprint("Mozilla/5.0", "203.0.113.9"),
                user_agent: "Mozilla/5.0".to_string(),
                ip: "203.0.113.9".to_string(),
                ttl_seconds: 3600,
            })
            .await
            .expect("session");

        let headers = request_headers(Some(&record.token), "Mozilla/5.0", "203.0.113.9");
        let err = authenticate(&headers, None, RouteClass::User, &h.state)
            .await
            .expect_err("should reject");
        assert_eq!(err.kind(), "user_not_found");
    }

    fn corrupt_record(token: &str, admin_marker: bool) -> SessionRecord {
        let now = now_unix();
        SessionRecord {
            token: token.to_string(),
            subject: None,
            admin_marker,
            fingerprint: fingerprint("Mozilla/5.0", "203.0.113.9"),
            user_agent: "Mozilla/5.0".to_string(),
            ip: "203.0.113.9".to_string(),
            created_at_unix: now,
            last_activity_unix: now,
            expires_at_unix: now + 3600,
            active: true,
            logout_at_unix: None,
        }
    }

    #[tokio::test]
    async fn recovery_repairs_admin_record_on_admin_route() {
        let h = harness();
        h.sessions.insert_raw(corrupt_record("corrupt", true)).await;

        let headers = request_headers(Some("corrupt"), "Mozilla/5.0", "203.0.113.9");
        let subject = authenticate(&headers, None, RouteClass::Admin, &h.state)
            .await
            .expect("should recover");
        assert!(subject.is_admin);

        // The record was repaired in place.
        let record = h
            .sessions
            .find_by_token("corrupt")
            .await
            .expect("find")
            .expect("record");
        assert_eq!(record.subject, Some(SubjectId::Admin));

        let events = h.audit.events();
        assert!(events
            .iter()
            .any(|event| matches!(event, AuditEvent::SessionRecovered { .. })));
    }

    #[tokio::test]
    async fn recovery_never_fires_off_admin_routes() {
        let h = harness();
        h.sessions.insert_raw(corrupt_record("corrupt", true)).await;

        for route in [RouteClass::User, RouteClass::Check] {
            let headers = request_headers(Some("corrupt"), "Mozilla/5.0", "203.0.113.9");
            let err = authenticate(&headers, None, route, &h.state)
                .await
                .expect_err("should reject");
            assert_eq!(err.kind(), "session_expired");
        }

        // Still corrupt: no silent repair happened.
        let record = h
            .sessions
            .find_by_token("corrupt")
            .await
            .expect("find")
            .expect("record");
        assert_eq!(record.subject, None);
    }

    #[tokio::test]
    async fn recovery_requires_admin_marker() {
        let h = harness();
        h.sessions
            .insert_raw(corrupt_record("corrupt", false))
            .await;

        let headers = request_headers(Some("corrupt"), "Mozilla/5.0", "203.0.113.9");
        let err = authenticate(&headers, None, RouteClass::Admin, &h.state)
            .await
            .expect_err("should reject");
        assert_eq!(err.kind(), "session_expired");
    }

    #[tokio::test]
    async fn require_admin_rejects_regular_users() {
        let h = harness();
        let (_, token) = bound_user(&h, "alice", "Mozilla/5.0", "203.0.113.9").await;
        let headers = request_headers(Some(&token), "Mozilla/5.0", "203.0.113.9");

        let err = require_admin(&headers, None, &h.state)
            .await
            .expect_err("should reject");
        assert_eq!(err.kind(), "forbidden");
    }

    #[tokio::test]
    async fn directory_admin_flag_does_not_grant_panel_access() {
        let h = harness();
        let (user_id, token) = bound_user(&h, "operator", "Mozilla/5.0", "203.0.113.9").await;
        let mut user = h
            .users
            .find_by_id(user_id)
            .await
            .expect("find")
            .expect("user");
        user.is_admin = true;
        h.users.insert_raw(user).await;

        let headers = request_headers(Some(&token), "Mozilla/5.0", "203.0.113.9");
        let subject = require_user(&headers, None, &h.state)
            .await
            .expect("should allow");
        assert!(!subject.is_admin, "only the sentinel subject is admin");

        let err = require_admin(&headers, None, &h.state)
            .await
            .expect_err("should reject");
        assert_eq!(err.kind(), "forbidden");
    }

    #[tokio::test]
    async fn peer_address_feeds_fingerprint_when_unproxied() {
        use std::net::{IpAddr, Ipv4Addr};

        let h = harness();
        let (_, token) = bound_user(&h, "alice", "Mozilla/5.0", "203.0.113.9").await;

        // No forwarding headers at all; the transport peer is the client IP.
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_str(&format!("keystand_session={token}")).expect("cookie"),
        );
        headers.insert(
            axum::http::header::USER_AGENT,
            HeaderValue::from_static("Mozilla/5.0"),
        );

        let bound_peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)), 50412);
        assert!(
            authenticate(&headers, Some(bound_peer), RouteClass::User, &h.state)
                .await
                .is_ok(),
            "matching peer address must satisfy the binding"
        );

        let other_peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7)), 50412);
        let err = authenticate(&headers, Some(other_peer), RouteClass::User, &h.state)
            .await
            .expect_err("should reject");
        assert_eq!(err.kind(), "device_mismatch");
    }
}
