//! Security audit trail
//!
//! Classifies security events by type, keeps the most recent ones in a
//! fixed-capacity ring (oldest evicted first) and fans each new event out
//! to registered observers without blocking the caller.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default number of retained events
pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

// ============================================================================
// Event types
// ============================================================================

pub const IP_BLOCKED: &str = "IP_BLOCKED";
pub const BRUTE_FORCE_DETECTED: &str = "BRUTE_FORCE_DETECTED";
pub const SQL_INJECTION: &str = "SQL_INJECTION";
pub const XSS_ATTEMPT: &str = "XSS_ATTEMPT";
pub const CSRF_DETECTED: &str = "CSRF_DETECTED";
pub const MALICIOUS_PAYLOAD: &str = "MALICIOUS_PAYLOAD";
pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
pub const REQUEST_BLOCKED: &str = "REQUEST_BLOCKED";
pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
pub const SUSPICIOUS_ACTIVITY: &str = "SUSPICIOUS_ACTIVITY";
pub const REQUEST_TOO_LARGE: &str = "REQUEST_TOO_LARGE";
pub const URI_TOO_LONG: &str = "URI_TOO_LONG";
pub const INVALID_INPUT: &str = "INVALID_INPUT";

pub const SERVICE_REGISTERED: &str = "SERVICE_REGISTERED";
pub const SERVICE_UPDATED: &str = "SERVICE_UPDATED";
pub const SERVICE_DECOMMISSIONED: &str = "SERVICE_DECOMMISSIONED";
pub const SERVICE_ROTATED: &str = "SERVICE_ROTATED";
pub const SERVICE_FAILOVER: &str = "SERVICE_FAILOVER";
pub const SERVICE_FAILBACK: &str = "SERVICE_FAILBACK";

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Critical => "CRITICAL",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        })
    }
}

/// Action taken on the request that produced the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Blocked,
    Suspicious,
    Allowed,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Blocked => "BLOCKED",
            Action::Suspicious => "SUSPICIOUS",
            Action::Allowed => "ALLOWED",
        })
    }
}

/// Severity of an event type; unknown types are informational
pub fn classify_severity(event_type: &str) -> Severity {
    match event_type {
        IP_BLOCKED | BRUTE_FORCE_DETECTED | SQL_INJECTION | XSS_ATTEMPT | CSRF_DETECTED
        | MALICIOUS_PAYLOAD | INVALID_TOKEN => Severity::Critical,
        REQUEST_BLOCKED | RATE_LIMIT_EXCEEDED | SUSPICIOUS_ACTIVITY | REQUEST_TOO_LARGE
        | URI_TOO_LONG | INVALID_INPUT => Severity::Warning,
        _ => Severity::Info,
    }
}

/// Action for an event type; unknown types are allowed
pub fn classify_action(event_type: &str) -> Action {
    match event_type {
        IP_BLOCKED | REQUEST_BLOCKED | RATE_LIMIT_EXCEEDED | SQL_INJECTION | XSS_ATTEMPT
        | CSRF_DETECTED | MALICIOUS_PAYLOAD => Action::Blocked,
        SUSPICIOUS_ACTIVITY | INVALID_INPUT | REQUEST_TOO_LARGE | URI_TOO_LONG => {
            Action::Suspicious
        }
        _ => Action::Allowed,
    }
}

/// A classified security event, immutable once logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub ip: String,
    pub details: String,
    pub severity: Severity,
    pub action: Action,
}

impl SecurityEvent {
    fn classify(event_type: &str, ip: &str, details: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            ip: ip.to_string(),
            details: details.to_string(),
            severity: classify_severity(event_type),
            action: classify_action(event_type),
        }
    }
}

/// Aggregate counts over a window of recent events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityStatistics {
    pub total_events: usize,
    pub critical_events: usize,
    pub warning_events: usize,
    pub info_events: usize,
    pub blocked_events: usize,
    pub suspicious_events: usize,
    pub allowed_events: usize,
    pub unique_ips: usize,
    pub recent_events: Vec<SecurityEvent>,
}

// ============================================================================
// Audit log
// ============================================================================

/// Observer invoked for every logged event
pub type EventCallback = Arc<dyn Fn(SecurityEvent) + Send + Sync>;

/// Bounded, thread-safe audit trail
pub struct SecurityAuditLog {
    events: RwLock<VecDeque<SecurityEvent>>,
    callbacks: RwLock<Vec<EventCallback>>,
    capacity: usize,
}

impl fmt::Debug for SecurityAuditLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityAuditLog")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl Default for SecurityAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityAuditLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }

    /// Create a log retaining at most `capacity` events (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: RwLock::new(VecDeque::with_capacity(capacity.min(DEFAULT_AUDIT_CAPACITY))),
            callbacks: RwLock::new(Vec::new()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Classify, append and dispatch an event
    pub fn log_security_event(&self, event_type: &str, ip: &str, details: &str) -> SecurityEvent {
        let event = SecurityEvent::classify(event_type, ip, details);

        {
            let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
            if events.len() >= self.capacity {
                events.pop_front();
            }
            events.push_back(event.clone());
        }

        if event.severity == Severity::Critical {
            warn!(
                event_type = %event.event_type,
                ip = %event.ip,
                details = %event.details,
                "SECURITY CRITICAL: audit event"
            );
        } else {
            debug!(
                event_type = %event.event_type,
                ip = %event.ip,
                severity = %event.severity,
                action = %event.action,
                "Audit event logged"
            );
        }

        self.dispatch(&event);
        event
    }

    fn dispatch(&self, event: &SecurityEvent) {
        let callbacks: Vec<EventCallback> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for callback in callbacks {
            let event = event.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn_blocking(move || callback(event));
                }
                Err(_) => {
                    std::thread::spawn(move || callback(event));
                }
            }
        }
    }

    /// Subscribe an observer to every subsequently logged event
    pub fn register_callback<F>(&self, callback: F)
    where
        F: Fn(SecurityEvent) + Send + Sync + 'static,
    {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    fn newest_matching<P>(&self, limit: usize, predicate: P) -> Vec<SecurityEvent>
    where
        P: Fn(&SecurityEvent) -> bool,
    {
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        events
            .iter()
            .rev()
            .filter(|e| predicate(e))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Up to `limit` most recent events, newest first
    pub fn recent_events(&self, limit: usize) -> Vec<SecurityEvent> {
        self.newest_matching(limit, |_| true)
    }

    /// Up to `limit` most recent events from `ip`, newest first
    pub fn events_by_ip(&self, ip: &str, limit: usize) -> Vec<SecurityEvent> {
        self.newest_matching(limit, |e| e.ip == ip)
    }

    /// Up to `limit` most recent events of `event_type`, newest first
    pub fn events_by_type(&self, event_type: &str, limit: usize) -> Vec<SecurityEvent> {
        self.newest_matching(limit, |e| e.event_type == event_type)
    }

    /// Statistics over the `recent` most recent events
    pub fn security_statistics(&self, recent: usize) -> SecurityStatistics {
        let window = self.recent_events(recent);

        let mut stats = SecurityStatistics {
            total_events: window.len(),
            ..Default::default()
        };
        let mut ips = HashSet::new();

        for event in &window {
            ips.insert(event.ip.as_str());
            match event.severity {
                Severity::Critical => stats.critical_events += 1,
                Severity::Warning => stats.warning_events += 1,
                Severity::Info => stats.info_events += 1,
            }
            match event.action {
                Action::Blocked => stats.blocked_events += 1,
                Action::Suspicious => stats.suspicious_events += 1,
                Action::Allowed => stats.allowed_events += 1,
            }
        }

        stats.unique_ips = ips.len();
        stats.recent_events = window;
        stats
    }

    /// Drop all retained events; callbacks stay registered
    pub fn clear(&self) {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
