//! Structured audit trail for security-relevant auth decisions.
//!
//! Side channel only: a sink failure must never fail the enclosing request,
//! so `record` is infallible from the caller's point of view. Events carry
//! fingerprint and token digests, never raw user-agents or tokens.

use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Why a device-mismatch rejection fired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MismatchReason {
    /// A newer login elsewhere superseded the presented token.
    SupersededToken,
    /// Same token, different user-agent/IP signature.
    FingerprintChanged,
}

impl MismatchReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SupersededToken => "superseded_token",
            Self::FingerprintChanged => "fingerprint_changed",
        }
    }
}

#[derive(Clone, Debug)]
pub enum AuditEvent {
    LoginSucceeded {
        subject: String,
        admin_path: bool,
    },
    LoginFailed {
        admin_path: bool,
        /// Whether the username resolved to a known account. Internal detail;
        /// the HTTP response stays generic either way.
        username_known: bool,
    },
    DeviceMismatch {
        subject: String,
        bound_fingerprint: String,
        presented_fingerprint: String,
        reason: MismatchReason,
    },
    SessionRecovered {
        token_digest: String,
    },
    SessionInvalidated {
        subject: String,
        reason: &'static str,
    },
    BalanceAdjusted {
        user: Uuid,
        previous_cents: i64,
        new_cents: i64,
    },
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Production sink: structured tracing events under the `audit` target.
#[derive(Clone, Debug)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match event {
            AuditEvent::LoginSucceeded {
                subject,
                admin_path,
            } => {
                info!(target: "audit", subject, admin_path, "login succeeded");
            }
            AuditEvent::LoginFailed {
                admin_path,
                username_known,
            } => {
                warn!(target: "audit", admin_path, username_known, "login failed");
            }
            AuditEvent::DeviceMismatch {
                subject,
                bound_fingerprint,
                presented_fingerprint,
                reason,
            } => {
                warn!(
                    target: "audit",
                    subject,
                    bound_fingerprint,
                    presented_fingerprint,
                    reason = reason.as_str(),
                    "device mismatch rejected"
                );
            }
            AuditEvent::SessionRecovered { token_digest } => {
                warn!(target: "audit", token_digest, "admin session recovered");
            }
            AuditEvent::SessionInvalidated { subject, reason } => {
                info!(target: "audit", subject, reason, "session invalidated");
            }
            AuditEvent::BalanceAdjusted {
                user,
                previous_cents,
                new_cents,
            } => {
                info!(
                    target: "audit",
                    user = %user,
                    previous_cents,
                    new_cents,
                    "admin adjusted user balance"
                );
            }
        }
    }
}

/// Collecting sink for tests: events are held in memory for assertions.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        // A poisoned lock drops the event rather than panicking the request.
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AuditEvent, AuditSink, MemoryAuditSink, MismatchReason};

    #[test]
    fn memory_sink_collects_events() {
        let sink = MemoryAuditSink::new();
        sink.record(AuditEvent::SessionRecovered {
            token_digest: "abcd".to_string(),
        });
        sink.record(AuditEvent::LoginFailed {
            admin_path: false,
            username_known: true,
        });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], AuditEvent::SessionRecovered { .. }));
    }

    #[test]
    fn mismatch_reason_labels() {
        assert_eq!(MismatchReason::SupersededToken.as_str(), "superseded_token");
        assert_eq!(
            MismatchReason::FingerprintChanged.as_str(),
            "fingerprint_changed"
        );
    }
}
