//! The transaction processors.
//!
//! One module per transaction type. Each processor encapsulates a single request/response
//! contract: resolve the provider, ask [`PaymentHistory`] whether the operation is legal, invoke
//! the provider capability, wrap the outcome — success, decline or timeout — into payment events,
//! and append them to the ledger. Shared collaborators travel in a [`ProcessorContext`] passed to
//! every processor at construction time.

mod cancel;
mod charge;
mod credit;
mod instrument_creation;
mod modify;
mod reservation;

use std::{cmp::Ordering, collections::HashMap, sync::Arc};

pub use cancel::CancelReservationProcessor;
pub use charge::ChargeProcessor;
pub use credit::CreditProcessor;
pub use instrument_creation::{PaymentInstrumentCreationProcessor, DISPLAY_NAME_FIELD};
pub use modify::ModifyReservationProcessor;
pub use reservation::{ReservationProcessor, ReservationIntent, SIMULATED_MODIFY_KEY};

use ppa_common::{MoneyError, MoneyValue};

use crate::{
    errors::PaymentApiError,
    event::PaymentEvent,
    history::PaymentHistory,
    instrument::OrderInstrument,
    provider::{PaymentProvider, ProviderResolver},
    traits::LedgerStore,
    transaction::IDEMPOTENCY_KEY,
};

//--------------------------------------   ProcessorContext   --------------------------------------------------------

/// The collaborators every processor needs: the provider resolver, the history projector and the
/// ledger store.
#[derive(Clone)]
pub struct ProcessorContext {
    pub(crate) resolver: Arc<ProviderResolver>,
    pub(crate) history: PaymentHistory,
    pub(crate) ledger: Arc<dyn LedgerStore>,
}

impl ProcessorContext {
    pub fn new(resolver: Arc<ProviderResolver>, ledger: Arc<dyn LedgerStore>) -> Self {
        Self { resolver, history: PaymentHistory::new(), ledger }
    }

    pub(crate) fn stream(&self, reference_id: &str) -> Result<Vec<PaymentEvent>, PaymentApiError> {
        Ok(self.ledger.stream_for(reference_id)?)
    }

    pub(crate) fn append(&self, event: &PaymentEvent) -> Result<(), PaymentApiError> {
        Ok(self.ledger.append(event.clone())?)
    }

    pub(crate) fn provider_for(&self, instrument: &OrderInstrument) -> Result<PaymentProvider, PaymentApiError> {
        self.resolver.resolve(&instrument.instrument.provider_configuration_guid)
    }
}

//--------------------------------------      Shared helpers  --------------------------------------------------------

/// Event data for a new ledger entry: the provider response payload, plus the caller's
/// idempotency key when one was supplied.
pub(crate) fn merged_event_data(
    custom_data: &HashMap<String, String>,
    response_data: HashMap<String, String>,
) -> HashMap<String, String> {
    let mut data = response_data;
    if let Some(key) = custom_data.get(IDEMPOTENCY_KEY) {
        data.insert(IDEMPOTENCY_KEY.to_string(), key.clone());
    }
    data
}

/// All events of a reference share one currency; a new operation must match it.
pub(crate) fn ensure_stream_currency(
    stream: &[PaymentEvent],
    amount: &MoneyValue,
) -> Result<(), PaymentApiError> {
    match stream.first() {
        Some(first) if !first.amount.same_currency(amount) => Err(MoneyError::CurrencyMismatch {
            left: first.amount.currency().to_string(),
            right: amount.currency().to_string(),
        }
        .into()),
        _ => Ok(()),
    }
}

/// The instrument an event was recorded against. Events driving compensation flows always carry
/// one; its absence means the ledger was tampered with.
pub(crate) fn instrument_of(event: &PaymentEvent) -> Result<OrderInstrument, PaymentApiError> {
    event.instrument.clone().ok_or_else(|| PaymentApiError::LedgerInconsistent {
        reference: event.reference_id.clone(),
        reason: format!("event {} carries no payment instrument", event.guid),
    })
}

pub(crate) fn min_of(left: &MoneyValue, right: &MoneyValue) -> Result<MoneyValue, PaymentApiError> {
    if left.compare(right)? == Ordering::Greater {
        Ok(right.clone())
    } else {
        Ok(left.clone())
    }
}
