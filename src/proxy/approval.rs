//! Human-in-the-loop approval gate
//!
//! When approval mode is on at admission time, an exchange registers a ticket
//! and suspends until an operator delivers a verdict or the deadline passes.
//! Each ticket owns a capacity-1 channel: delivery is a non-blocking
//! `try_send`, so the first verdict wins and every later one is rejected.

use crate::providers::canned::OverrideAction;
use crate::proxy::types::ExchangeId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// What an operator submits for a pending exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approve,
    Override(OverrideAction),
}

/// Terminal outcome of the approval step, recorded against the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Overridden(OverrideAction),
    TimedOut,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Overridden(OverrideAction::Error400) => "override:error_400",
            Decision::Overridden(OverrideAction::Error500) => "override:error_500",
            Decision::Overridden(OverrideAction::ContentSensitive) => {
                "override:content_sensitive"
            }
            Decision::TimedOut => "timed_out",
        }
    }
}

impl From<Verdict> for Decision {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Approve => Decision::Approved,
            Verdict::Override(action) => Decision::Overridden(action),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ApprovalError {
    /// No live ticket, whether it never existed or was already resolved
    #[error("Request not pending approval")]
    NotPending,

    #[error("Request already pending approval")]
    AlreadyPending,
}

/// Operator-facing view of a waiting exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingTicket {
    pub request_id: ExchangeId,
    pub provider: String,
    pub endpoint: String,
    pub waiting_since: DateTime<Utc>,
}

struct Ticket {
    slot: mpsc::Sender<Verdict>,
    info: PendingTicket,
}

#[derive(Default)]
struct GateState {
    enabled: bool,
    tickets: HashMap<ExchangeId, Ticket>,
}

/// Approval toggle plus the table of waiting exchanges
pub struct ApprovalGate {
    state: Arc<Mutex<GateState>>,
    timeout: Duration,
}

impl ApprovalGate {
    pub fn new(timeout: Duration, enabled: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(GateState {
                enabled,
                tickets: HashMap::new(),
            })),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Flip approval mode, returning the new value
    pub fn toggle(&self) -> bool {
        let enabled = {
            let mut state = self.state.lock();
            state.enabled = !state.enabled;
            state.enabled
        };
        info!(enabled, "Approval mode changed");
        enabled
    }

    /// Admission check, performed exactly once per exchange.
    ///
    /// Returns `None` when approval mode is off. Exchanges admitted while it
    /// is off are never gated, even if the mode is switched on afterwards.
    pub fn admit(
        &self,
        id: ExchangeId,
        provider: &str,
        endpoint: &str,
    ) -> Result<Option<PendingApproval>, ApprovalError> {
        let mut state = self.state.lock();
        if !state.enabled {
            return Ok(None);
        }
        if state.tickets.contains_key(&id) {
            return Err(ApprovalError::AlreadyPending);
        }

        let (slot, receiver) = mpsc::channel(1);
        state.tickets.insert(
            id,
            Ticket {
                slot,
                info: PendingTicket {
                    request_id: id,
                    provider: provider.to_string(),
                    endpoint: endpoint.to_string(),
                    waiting_since: Utc::now(),
                },
            },
        );
        debug!(request_id = %id, "Approval ticket created");

        Ok(Some(PendingApproval {
            id,
            receiver,
            state: Arc::clone(&self.state),
            timeout: self.timeout,
        }))
    }

    /// Hand a verdict to a waiting exchange without blocking.
    pub fn deliver(&self, id: ExchangeId, verdict: Verdict) -> Result<(), ApprovalError> {
        let ticket = self
            .state
            .lock()
            .tickets
            .remove(&id)
            .ok_or(ApprovalError::NotPending)?;
        ticket
            .slot
            .try_send(verdict)
            .map_err(|_| ApprovalError::NotPending)
    }

    /// Waiting exchanges, oldest first
    pub fn pending(&self) -> Vec<PendingTicket> {
        let mut pending: Vec<PendingTicket> = self
            .state
            .lock()
            .tickets
            .values()
            .map(|t| t.info.clone())
            .collect();
        pending.sort_by_key(|t| t.waiting_since);
        pending
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().tickets.len()
    }
}

/// A registered ticket awaiting its verdict. Dropping it removes the ticket.
pub struct PendingApproval {
    id: ExchangeId,
    receiver: mpsc::Receiver<Verdict>,
    state: Arc<Mutex<GateState>>,
    timeout: Duration,
}

impl PendingApproval {
    /// Suspend until a verdict arrives or the deadline elapses
    pub async fn wait(mut self) -> Decision {
        match tokio::time::timeout(self.timeout, self.receiver.recv()).await {
            Ok(Some(verdict)) => verdict.into(),
            Ok(None) => Decision::TimedOut,
            Err(_) => {
                // Close first so a concurrent deliverer either landed before
                // this point or observes a closed slot.
                self.receiver.close();
                match self.receiver.try_recv() {
                    Ok(verdict) => verdict.into(),
                    Err(_) => Decision::TimedOut,
                }
            }
        }
    }
}

impl Drop for PendingApproval {
    fn drop(&mut self) {
        self.state.lock().tickets.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(enabled: bool) -> ApprovalGate {
        ApprovalGate::new(Duration::from_millis(50), enabled)
    }

    #[test]
    fn test_disabled_gate_admits_without_ticket() {
        let gate = gate(false);
        let admitted = gate.admit(ExchangeId::generate(), "openai", "/openai/v1/models");
        assert!(matches!(admitted, Ok(None)));
        assert_eq!(gate.pending_count(), 0);
    }

    #[test]
    fn test_second_ticket_for_same_exchange_is_rejected() {
        let gate = gate(true);
        let id = ExchangeId::generate();
        let _pending = gate.admit(id, "openai", "/openai/v1/models").unwrap();
        assert!(matches!(
            gate.admit(id, "openai", "/openai/v1/models"),
            Err(ApprovalError::AlreadyPending)
        ));
        assert_eq!(gate.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_first_verdict_wins() {
        let gate = gate(true);
        let id = ExchangeId::generate();
        let pending = gate.admit(id, "openai", "/openai/v1/models").unwrap().unwrap();

        assert_eq!(gate.deliver(id, Verdict::Approve), Ok(()));
        assert_eq!(
            gate.deliver(id, Verdict::Override(OverrideAction::Error500)),
            Err(ApprovalError::NotPending)
        );
        assert_eq!(pending.wait().await, Decision::Approved);
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_override_verdict_is_delivered() {
        let gate = Arc::new(gate(true));
        let id = ExchangeId::generate();
        let pending = gate.admit(id, "replicate", "/replicate/v1/predictions").unwrap().unwrap();

        let deliverer = Arc::clone(&gate);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            deliverer
                .deliver(id, Verdict::Override(OverrideAction::ContentSensitive))
                .unwrap();
        });

        assert_eq!(
            pending.wait().await,
            Decision::Overridden(OverrideAction::ContentSensitive)
        );
    }

    #[tokio::test]
    async fn test_deadline_yields_timed_out_and_clears_ticket() {
        let gate = gate(true);
        let id = ExchangeId::generate();
        let pending = gate.admit(id, "openai", "/openai/v1/models").unwrap().unwrap();

        let started = std::time::Instant::now();
        assert_eq!(pending.wait().await, Decision::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(50));

        assert_eq!(gate.pending_count(), 0);
        assert_eq!(gate.deliver(id, Verdict::Approve), Err(ApprovalError::NotPending));
    }

    #[test]
    fn test_unknown_exchange_is_not_pending() {
        let gate = gate(true);
        assert_eq!(
            gate.deliver(ExchangeId::generate(), Verdict::Approve),
            Err(ApprovalError::NotPending)
        );
    }

    #[test]
    fn test_toggle_and_pending_listing() {
        let gate = gate(false);
        assert!(gate.toggle());
        let first = ExchangeId::generate();
        let _a = gate.admit(first, "openai", "/openai/v1/a").unwrap();
        let _b = gate.admit(ExchangeId::generate(), "openai", "/openai/v1/b").unwrap();

        assert!(!gate.toggle());
        let pending = gate.pending();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().any(|t| t.request_id == first));
        assert!(pending[0].waiting_since <= pending[1].waiting_since);
    }
}
