//! Request and response envelopes for the transaction processors.
//!
//! Every request carries at minimum the amount, the instrument reference(s) it applies to, the
//! reference id (via the [`OrderContext`]) and a free-form custom-data map that is forwarded to the
//! provider untouched. The response carries only the payment events the operation produced —
//! success or failure is derived from the event statuses, never from a separate flag.

use std::collections::HashMap;

use ppa_common::MoneyValue;
use serde::{Deserialize, Serialize};

use crate::{
    event::{EventId, PaymentEvent},
    instrument::OrderInstrument,
};

/// Custom-data key under which callers may supply an idempotency key. Any event produced for a
/// request carrying the key has it copied into its `payment_event_data` verbatim, so that a caller
/// retrying a logical operation can deduplicate against the stream. The core itself performs no
/// deduplication.
pub const IDEMPOTENCY_KEY: &str = "idempotency-key";

//--------------------------------------     OrderContext     --------------------------------------------------------

/// Order-level context forwarded to providers with every capability call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderContext {
    /// The business reference all resulting events are recorded under.
    pub order_number: String,
    pub order_total: MoneyValue,
    pub customer_email: Option<String>,
}

impl OrderContext {
    pub fn new<S: Into<String>>(order_number: S, order_total: MoneyValue) -> Self {
        Self { order_number: order_number.into(), order_total, customer_email: None }
    }
}

//--------------------------------------       Requests       --------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub instrument: OrderInstrument,
    pub amount: MoneyValue,
    pub order_context: OrderContext,
    pub custom_data: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ModifyReservationRequest {
    /// Instruments available to absorb an increase when no reservation is open.
    pub instruments: Vec<OrderInstrument>,
    /// The new target total for the reference (open reservations plus charges).
    pub amount: MoneyValue,
    pub order_context: OrderContext,
    pub custom_data: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct CancelReservationRequest {
    /// The reservation event to cancel.
    pub reservation_guid: EventId,
    pub order_context: OrderContext,
    pub custom_data: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct CancelAllReservationsRequest {
    pub order_context: OrderContext,
    pub custom_data: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub amount: MoneyValue,
    pub order_context: OrderContext,
    pub custom_data: HashMap<String, String>,
    /// True when this is the last charge for the order; leftovers of partially charged
    /// reservations are then released rather than re-reserved.
    pub final_payment: bool,
}

#[derive(Debug, Clone)]
pub struct CreditRequest {
    pub amount: MoneyValue,
    pub order_context: OrderContext,
    pub custom_data: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ManualCreditRequest {
    pub amount: MoneyValue,
    pub order_context: OrderContext,
    pub custom_data: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ReverseChargeRequest {
    /// The approved charge event to reverse.
    pub charge_guid: EventId,
    pub amount: MoneyValue,
    pub order_context: OrderContext,
    pub custom_data: HashMap<String, String>,
}

//--------------------------------------  PaymentApiResponse  --------------------------------------------------------

/// The envelope every processor operation returns: the events it produced, nothing else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentApiResponse {
    pub events: Vec<PaymentEvent>,
}

impl PaymentApiResponse {
    pub fn new(events: Vec<PaymentEvent>) -> Self {
        Self { events }
    }

    pub fn empty() -> Self {
        Self { events: Vec::new() }
    }

    /// Derived success view: the operation succeeded if none of the produced events failed.
    pub fn is_success(&self) -> bool {
        self.events.iter().all(|event| !event.is_failed())
    }

    /// The last failed event, if any. Carries the operator and customer messages for the failure.
    pub fn last_failure(&self) -> Option<&PaymentEvent> {
        self.events.iter().rev().find(|event| event.is_failed())
    }
}
