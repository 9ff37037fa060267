use ppa_common::MoneyError;
use thiserror::Error;

use crate::{
    event::{EventBuilderError, EventId},
    provider::InstrumentCreationError,
    traits::{InstrumentStoreError, LedgerError},
};

/// Errors raised across the processor boundary.
///
/// Only pre-call validation and infrastructure problems surface here. A provider call that fails
/// is *not* an error: it is captured as a FAILED ledger event and returned inside the response
/// envelope, so that the attempt is always on record.
#[derive(Debug, Clone, Error)]
pub enum PaymentApiError {
    #[error("Payment provider configuration '{0}' is missing")]
    ConfigurationMissing(String),
    #[error("No payment provider plugin is registered under the key '{0}'")]
    PluginNotRegistered(String),
    #[error("The mandatory {0} capability is absent for payment provider '{1}'")]
    CapabilityUnsupported(&'static str, String),
    #[error(transparent)]
    EventBuilder(#[from] EventBuilderError),
    #[error(transparent)]
    Money(#[from] MoneyError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    InstrumentStore(#[from] InstrumentStoreError),
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("Reservation modification failed: {0}")]
    ModificationFailed(String),
    #[error("The ledger for reference '{reference}' is inconsistent: {reason}")]
    LedgerInconsistent { reference: String, reason: String },
    #[error("No open reservation found for event {0}")]
    ReservationNotFound(EventId),
    #[error("Attempting to reverse a payment event that is not an approved charge")]
    NonReversibleEvent,
    #[error("No unlimited payment instrument is available to absorb a reservation increase")]
    UnlimitedInstrumentNotFound,
    #[error("The payment instrument display name must not be empty")]
    EmptyInstrumentName,
    #[error(transparent)]
    InstrumentCreation(#[from] InstrumentCreationError),
}
