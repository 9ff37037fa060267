use std::{collections::HashMap, fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use ppa_common::MoneyValue;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::instrument::OrderInstrument;

//--------------------------------------       EventId        --------------------------------------------------------

/// A lightweight wrapper around the string identifying a single ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    /// A fresh random identifier, unique for all practical purposes.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        Self(format!("{:032x}", rng.gen::<u128>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<S: Into<String>> From<S> for EventId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

//--------------------------------------   TransactionType    --------------------------------------------------------

/// The closed set of transaction types a ledger entry can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    Reserve,
    ModifyReserve,
    CancelReserve,
    Charge,
    Credit,
    ManualCredit,
    ReverseCharge,
}

impl Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::Reserve => write!(f, "Reserve"),
            TransactionType::ModifyReserve => write!(f, "ModifyReserve"),
            TransactionType::CancelReserve => write!(f, "CancelReserve"),
            TransactionType::Charge => write!(f, "Charge"),
            TransactionType::Credit => write!(f, "Credit"),
            TransactionType::ManualCredit => write!(f, "ManualCredit"),
            TransactionType::ReverseCharge => write!(f, "ReverseCharge"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Invalid transaction type: {0}")]
pub struct TransactionTypeConversionError(String);

impl FromStr for TransactionType {
    type Err = TransactionTypeConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Reserve" => Ok(Self::Reserve),
            "ModifyReserve" => Ok(Self::ModifyReserve),
            "CancelReserve" => Ok(Self::CancelReserve),
            "Charge" => Ok(Self::Charge),
            "Credit" => Ok(Self::Credit),
            "ManualCredit" => Ok(Self::ManualCredit),
            "ReverseCharge" => Ok(Self::ReverseCharge),
            s => Err(TransactionTypeConversionError(s.to_string())),
        }
    }
}

//--------------------------------------     PaymentStatus    --------------------------------------------------------

/// The outcome recorded for a transaction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    /// The provider accepted the operation.
    Approved,
    /// The operation was deliberately not attempted (e.g. the provider lacks the capability and the
    /// effect is achieved some other way, or not at all, without harm).
    Skipped,
    /// The provider rejected the operation, or the call did not complete.
    Failed,
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Approved => write!(f, "Approved"),
            PaymentStatus::Skipped => write!(f, "Skipped"),
            PaymentStatus::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Invalid payment status: {0}")]
pub struct PaymentStatusConversionError(String);

impl FromStr for PaymentStatus {
    type Err = PaymentStatusConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Approved" => Ok(Self::Approved),
            "Skipped" => Ok(Self::Skipped),
            "Failed" => Ok(Self::Failed),
            s => Err(PaymentStatusConversionError(s.to_string())),
        }
    }
}

//--------------------------------------     PaymentEvent     --------------------------------------------------------

/// One immutable entry in the payment ledger.
///
/// Events are only ever created and appended; compensation is expressed by appending a new event
/// whose [`parent_guid`](PaymentEvent::parent_guid) points at the entry it nets out. All events
/// sharing a `reference_id` form the ledger stream for that business entity and carry one currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub guid: EventId,
    /// Causal link to the prior event this one compensates or completes.
    pub parent_guid: Option<EventId>,
    /// The business entity (e.g. order number) this event belongs to.
    pub reference_id: String,
    pub payment_type: TransactionType,
    pub payment_status: PaymentStatus,
    pub amount: MoneyValue,
    /// The stored instrument the event used. `None` only for manual credits.
    pub instrument: Option<OrderInstrument>,
    /// Whether the instrument originally captured for the order was used, as opposed to a
    /// substitute.
    pub original_instrument: bool,
    /// Opaque provider-specific context. Never interpreted by the core.
    pub payment_event_data: HashMap<String, String>,
    /// Diagnostic text for operators.
    pub internal_message: Option<String>,
    /// Customer-safe text.
    pub external_message: Option<String>,
    /// True if the failure is transient and the logical operation may be retried safely.
    pub temporary_failure: bool,
    pub created_at: DateTime<Utc>,
}

impl PaymentEvent {
    pub fn is_approved(&self) -> bool {
        self.payment_status == PaymentStatus::Approved
    }

    pub fn is_failed(&self) -> bool {
        self.payment_status == PaymentStatus::Failed
    }

    /// The event as a JSON document, for diagnostics and audit exports.
    pub fn as_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

//--------------------------------------  PaymentEventBuilder --------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum EventBuilderError {
    #[error("Payment event is missing the required field '{0}'")]
    MissingField(&'static str),
}

/// Validated factory for [`PaymentEvent`] instances.
///
/// `payment_type`, `payment_status`, `reference_id` and `amount` are required; everything else has
/// a sensible default (fresh random guid, current time, empty data map). A missing required field
/// is a programmer error and fails the build.
#[derive(Debug, Clone, Default)]
pub struct PaymentEventBuilder {
    guid: Option<EventId>,
    parent_guid: Option<EventId>,
    reference_id: Option<String>,
    payment_type: Option<TransactionType>,
    payment_status: Option<PaymentStatus>,
    amount: Option<MoneyValue>,
    instrument: Option<OrderInstrument>,
    original_instrument: bool,
    payment_event_data: HashMap<String, String>,
    internal_message: Option<String>,
    external_message: Option<String>,
    temporary_failure: bool,
}

impl PaymentEventBuilder {
    pub fn new() -> Self {
        Self { original_instrument: true, ..Self::default() }
    }

    pub fn with_guid(mut self, guid: EventId) -> Self {
        self.guid = Some(guid);
        self
    }

    pub fn with_parent_guid(mut self, parent: EventId) -> Self {
        self.parent_guid = Some(parent);
        self
    }

    pub fn with_reference_id<S: Into<String>>(mut self, reference_id: S) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn with_payment_type(mut self, payment_type: TransactionType) -> Self {
        self.payment_type = Some(payment_type);
        self
    }

    pub fn with_payment_status(mut self, payment_status: PaymentStatus) -> Self {
        self.payment_status = Some(payment_status);
        self
    }

    pub fn with_amount(mut self, amount: MoneyValue) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_instrument(mut self, instrument: OrderInstrument) -> Self {
        self.instrument = Some(instrument);
        self
    }

    pub fn with_original_instrument(mut self, original: bool) -> Self {
        self.original_instrument = original;
        self
    }

    pub fn with_payment_event_data(mut self, data: HashMap<String, String>) -> Self {
        self.payment_event_data = data;
        self
    }

    pub fn with_data_entry<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.payment_event_data.insert(key.into(), value.into());
        self
    }

    pub fn with_internal_message<S: Into<String>>(mut self, message: S) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    pub fn with_external_message<S: Into<String>>(mut self, message: S) -> Self {
        self.external_message = Some(message.into());
        self
    }

    pub fn with_temporary_failure(mut self, temporary: bool) -> Self {
        self.temporary_failure = temporary;
        self
    }

    pub fn build(self) -> Result<PaymentEvent, EventBuilderError> {
        let payment_type = self.payment_type.ok_or(EventBuilderError::MissingField("payment_type"))?;
        let payment_status = self.payment_status.ok_or(EventBuilderError::MissingField("payment_status"))?;
        let reference_id = self.reference_id.ok_or(EventBuilderError::MissingField("reference_id"))?;
        let amount = self.amount.ok_or(EventBuilderError::MissingField("amount"))?;
        Ok(PaymentEvent {
            guid: self.guid.unwrap_or_else(EventId::random),
            parent_guid: self.parent_guid,
            reference_id,
            payment_type,
            payment_status,
            amount,
            instrument: self.instrument,
            original_instrument: self.original_instrument,
            payment_event_data: self.payment_event_data,
            internal_message: self.internal_message,
            external_message: self.external_message,
            temporary_failure: self.temporary_failure,
            created_at: Utc::now(),
        })
    }
}
