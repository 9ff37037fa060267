//! Collaborator seams.
//!
//! The core owns no persistence. The ledger, the provider configurations and the stored
//! instruments live behind these traits, and any backend satisfying the contracts can host the
//! engine. Implementations must be safe to share across threads; the engine itself takes no locks
//! and expects the *caller* to serialize operations per reference (see
//! [`PaymentApiWorkflow`](crate::PaymentApiWorkflow)).

use thiserror::Error;

use crate::{
    event::{EventId, PaymentEvent},
    instrument::PaymentInstrument,
    provider::ProviderConfiguration,
};

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("The ledger already contains an event with guid {0}")]
    DuplicateEvent(EventId),
    #[error("Ledger backend failure: {0}")]
    Backend(String),
}

/// The append-only event store.
///
/// `append` must be atomic and durable, and `stream_for` must return events in stable append
/// order per reference. Events are never updated or deleted.
pub trait LedgerStore: Send + Sync {
    fn append(&self, event: PaymentEvent) -> Result<(), LedgerError>;

    fn stream_for(&self, reference_id: &str) -> Result<Vec<PaymentEvent>, LedgerError>;
}

/// GUID-keyed lookup of persisted provider configurations.
pub trait ProviderConfigStore: Send + Sync {
    fn find_by_guid(&self, guid: &str) -> Option<ProviderConfiguration>;
}

#[derive(Debug, Clone, Error)]
pub enum InstrumentStoreError {
    #[error("Instrument store backend failure: {0}")]
    Backend(String),
}

/// Storage for instruments created through the instrument-creation wizard.
pub trait InstrumentStore: Send + Sync {
    fn save(&self, instrument: PaymentInstrument) -> Result<(), InstrumentStoreError>;

    fn find_by_guid(&self, guid: &str) -> Option<PaymentInstrument>;
}
