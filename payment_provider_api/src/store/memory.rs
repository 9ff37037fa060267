//! In-memory reference implementations of the collaborator traits.
//!
//! These back the test suites and embedded deployments. The ledger keeps one global append-order
//! vector and filters per reference, which preserves stable per-reference ordering.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{
    event::PaymentEvent,
    instrument::PaymentInstrument,
    provider::ProviderConfiguration,
    traits::{InstrumentStore, InstrumentStoreError, LedgerError, LedgerStore, ProviderConfigStore},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

//--------------------------------------    InMemoryLedger    --------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    events: Mutex<Vec<PaymentEvent>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event in the ledger, in append order, regardless of reference.
    pub fn all_events(&self) -> Vec<PaymentEvent> {
        lock(&self.events).clone()
    }
}

impl LedgerStore for InMemoryLedger {
    fn append(&self, event: PaymentEvent) -> Result<(), LedgerError> {
        let mut events = lock(&self.events);
        if events.iter().any(|existing| existing.guid == event.guid) {
            return Err(LedgerError::DuplicateEvent(event.guid));
        }
        events.push(event);
        Ok(())
    }

    fn stream_for(&self, reference_id: &str) -> Result<Vec<PaymentEvent>, LedgerError> {
        let events = lock(&self.events);
        Ok(events.iter().filter(|event| event.reference_id == reference_id).cloned().collect())
    }
}

//--------------------------------------  InMemoryConfigStore --------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    configurations: Mutex<HashMap<String, ProviderConfiguration>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, configuration: ProviderConfiguration) {
        lock(&self.configurations).insert(configuration.guid.clone(), configuration);
    }
}

impl ProviderConfigStore for InMemoryConfigStore {
    fn find_by_guid(&self, guid: &str) -> Option<ProviderConfiguration> {
        lock(&self.configurations).get(guid).cloned()
    }
}

//------------------------------------ InMemoryInstrumentStore -------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryInstrumentStore {
    instruments: Mutex<HashMap<String, PaymentInstrument>>,
}

impl InMemoryInstrumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InstrumentStore for InMemoryInstrumentStore {
    fn save(&self, instrument: PaymentInstrument) -> Result<(), InstrumentStoreError> {
        lock(&self.instruments).insert(instrument.guid.clone(), instrument);
        Ok(())
    }

    fn find_by_guid(&self, guid: &str) -> Option<PaymentInstrument> {
        lock(&self.instruments).get(guid).cloned()
    }
}

#[cfg(test)]
mod test {
    use ppa_common::MoneyValue;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::event::{EventId, PaymentEventBuilder, PaymentStatus, TransactionType};

    fn event(reference: &str) -> PaymentEvent {
        PaymentEventBuilder::new()
            .with_payment_type(TransactionType::Reserve)
            .with_payment_status(PaymentStatus::Approved)
            .with_reference_id(reference)
            .with_amount(MoneyValue::new(dec!(10), "USD"))
            .build()
            .unwrap()
    }

    #[test]
    fn streams_are_per_reference_in_append_order() {
        let ledger = InMemoryLedger::new();
        let first = event("order-1");
        let second = event("order-2");
        let third = event("order-1");
        ledger.append(first.clone()).unwrap();
        ledger.append(second).unwrap();
        ledger.append(third.clone()).unwrap();

        let stream = ledger.stream_for("order-1").unwrap();
        assert_eq!(stream, vec![first, third]);
        assert!(ledger.stream_for("order-3").unwrap().is_empty());
    }

    #[test]
    fn duplicate_guids_are_rejected() {
        let ledger = InMemoryLedger::new();
        let mut duplicate = event("order-1");
        duplicate.guid = EventId::from("fixed");
        ledger.append(duplicate.clone()).unwrap();
        let err = ledger.append(duplicate).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateEvent(guid) if guid.as_str() == "fixed"));
    }

    #[test]
    fn instrument_store_round_trip() {
        let store = InMemoryInstrumentStore::new();
        let instrument = PaymentInstrument::new("Visa ending 4242", "cfg-1");
        let guid = instrument.guid.clone();
        store.save(instrument.clone()).unwrap();
        assert_eq!(store.find_by_guid(&guid), Some(instrument));
        assert!(store.find_by_guid("unknown").is_none());
    }
}
