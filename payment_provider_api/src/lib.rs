//! Payment Provider API
//!
//! The payment event ledger and transaction-processor orchestration core. It coordinates monetary
//! transactions — reserve, modify, cancel, charge, credit, reverse-charge and instrument creation
//! — against pluggable, unreliable external payment providers, while maintaining an append-only
//! event ledger that is the sole source of truth for how much money is in what state for a given
//! reference.
//!
//! The library is divided into three main sections:
//! 1. The ledger model ([`mod@event`], [`mod@history`]): immutable [`PaymentEvent`] records built
//!    through a validated [`PaymentEventBuilder`], and the [`history::PaymentHistory`] projector
//!    that folds a stream into aggregate state (open reservations, charged and credited totals),
//!    respecting `parent_guid` compensation chains.
//! 2. The provider contract ([`mod@provider`], [`mod@traits`]): capability-based plugin
//!    interfaces where every capability is optional, the per-call configuration resolver, and the
//!    collaborator seams for the ledger, configuration and instrument stores. In-memory reference
//!    implementations live in [`mod@store`].
//! 3. The transaction processors ([`mod@processors`]) and the [`PaymentApiWorkflow`] facade
//!    composing them. Every provider outcome — approval, decline or timeout — is wrapped into a
//!    ledger event and returned in the response envelope; provider failures never cross the
//!    processor boundary as errors.
//!
//! The core is synchronous, stateless and takes no locks: callers must serialize operations per
//! reference (an order-level lock) around any read-validate-act sequence.

pub mod errors;
pub mod event;
pub mod history;
pub mod instrument;
pub mod processors;
pub mod provider;
pub mod store;
pub mod traits;
pub mod transaction;
mod workflow;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use errors::PaymentApiError;
pub use event::{EventId, PaymentEvent, PaymentEventBuilder, PaymentStatus, TransactionType};
pub use ppa_common::{MoneyError, MoneyValue};
pub use workflow::PaymentApiWorkflow;
