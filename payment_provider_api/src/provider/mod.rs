//! The provider plugin contract.
//!
//! A payment provider is addressed through a persisted [`ProviderConfiguration`] and a
//! [`PaymentProviderPlugin`] implementation registered under the configuration's plugin key.
//! Plugins expose *capabilities* — reserve, modify, cancel, charge, credit, reverse-charge and the
//! instrument-creation interactions — and every capability is optional. A missing capability is
//! not an error: it is what triggers the simulated/compensating flows in the processors (e.g.
//! modify-by-reserve-and-cancel). The only exception is charging, which every usable provider must
//! support.

mod resolver;

use std::{collections::HashMap, fmt::Display, sync::Arc};

use ppa_common::MoneyValue;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use resolver::ProviderResolver;

use crate::transaction::OrderContext;

//-------------------------------   ProviderConfiguration   ----------------------------------------------------------

/// A persisted provider configuration, looked up by guid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfiguration {
    pub guid: String,
    /// Display name for diagnostics.
    pub name: String,
    /// Key of the registered plugin implementing this configuration.
    pub plugin_key: String,
    /// Provider-specific settings (merchant ids, endpoints, ...), opaque to the core.
    pub data: HashMap<String, String>,
}

impl ProviderConfiguration {
    pub fn new<S1, S2, S3>(guid: S1, name: S2, plugin_key: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self { guid: guid.into(), name: name.into(), plugin_key: plugin_key.into(), data: HashMap::new() }
    }
}

//-------------------------------   Capability request/response   -----------------------------------------------------

/// Successful provider outcome: an opaque payload the ledger stores with the resulting event and
/// hands back on follow-up calls (e.g. the reservation token a charge needs).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResponse {
    pub data: HashMap<String, String>,
}

impl CapabilityResponse {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_data(data: HashMap<String, String>) -> Self {
        Self { data }
    }
}

/// A failed provider call. Always captured as a FAILED ledger event by the processors, never
/// propagated as a panic or error across the processor boundary.
#[derive(Debug, Clone, Error)]
#[error("{internal_message}")]
pub struct CapabilityError {
    /// Diagnostic text for operators.
    pub internal_message: String,
    /// Customer-safe text.
    pub external_message: String,
    /// True when the failure is transient (timeout, provider hiccup) and the logical operation may
    /// be retried without violating ledger invariants.
    pub temporary_failure: bool,
}

impl CapabilityError {
    pub fn terminal<S1: Into<String>, S2: Into<String>>(internal: S1, external: S2) -> Self {
        Self { internal_message: internal.into(), external_message: external.into(), temporary_failure: false }
    }

    pub fn temporary<S1: Into<String>, S2: Into<String>>(internal: S1, external: S2) -> Self {
        Self { internal_message: internal.into(), external_message: external.into(), temporary_failure: true }
    }
}

#[derive(Debug, Clone)]
pub struct ReserveCapabilityRequest {
    pub amount: MoneyValue,
    pub instrument_data: HashMap<String, String>,
    pub custom_data: HashMap<String, String>,
    pub order_context: OrderContext,
}

#[derive(Debug, Clone)]
pub struct ModifyCapabilityRequest {
    /// The new total for the reservation being adjusted.
    pub new_amount: MoneyValue,
    pub instrument_data: HashMap<String, String>,
    /// The event data of the reservation being adjusted.
    pub reservation_data: HashMap<String, String>,
    pub custom_data: HashMap<String, String>,
    pub order_context: OrderContext,
}

#[derive(Debug, Clone)]
pub struct CancelCapabilityRequest {
    pub amount: MoneyValue,
    pub instrument_data: HashMap<String, String>,
    pub reservation_data: HashMap<String, String>,
    pub custom_data: HashMap<String, String>,
    pub order_context: OrderContext,
}

#[derive(Debug, Clone)]
pub struct ChargeCapabilityRequest {
    pub amount: MoneyValue,
    pub instrument_data: HashMap<String, String>,
    /// The event data of the reservation being drawn down.
    pub reservation_data: HashMap<String, String>,
    pub custom_data: HashMap<String, String>,
    pub order_context: OrderContext,
}

#[derive(Debug, Clone)]
pub struct CreditCapabilityRequest {
    pub amount: MoneyValue,
    pub instrument_data: HashMap<String, String>,
    /// The event data of the charge being refunded.
    pub charge_data: HashMap<String, String>,
    pub custom_data: HashMap<String, String>,
    pub order_context: OrderContext,
}

#[derive(Debug, Clone)]
pub struct ReverseChargeCapabilityRequest {
    pub instrument_data: HashMap<String, String>,
    pub charge_data: HashMap<String, String>,
    pub custom_data: HashMap<String, String>,
    pub order_context: OrderContext,
}

//-------------------------------   Transaction capabilities   --------------------------------------------------------

pub trait ReserveCapability: Send + Sync {
    fn reserve(&self, request: ReserveCapabilityRequest) -> Result<CapabilityResponse, CapabilityError>;
}

pub trait ModifyCapability: Send + Sync {
    fn modify(&self, request: ModifyCapabilityRequest) -> Result<CapabilityResponse, CapabilityError>;
}

pub trait CancelCapability: Send + Sync {
    fn cancel(&self, request: CancelCapabilityRequest) -> Result<CapabilityResponse, CapabilityError>;
}

pub trait ChargeCapability: Send + Sync {
    fn charge(&self, request: ChargeCapabilityRequest) -> Result<CapabilityResponse, CapabilityError>;
}

pub trait CreditCapability: Send + Sync {
    fn credit(&self, request: CreditCapabilityRequest) -> Result<CapabilityResponse, CapabilityError>;
}

pub trait ReverseChargeCapability: Send + Sync {
    fn reverse_charge(&self, request: ReverseChargeCapabilityRequest) -> Result<CapabilityResponse, CapabilityError>;
}

//-------------------------------   Instrument creation types   -------------------------------------------------------

/// The steps of the instrument-creation wizard. The processor itself is stateless; the caller
/// carries the current step between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PicStep {
    AwaitingInstructionFields,
    AwaitingInstructions,
    AwaitingCreationFields,
    Created,
}

impl PicStep {
    /// The step that follows this one in the wizard.
    pub fn next(self) -> Self {
        match self {
            PicStep::AwaitingInstructionFields => PicStep::AwaitingInstructions,
            PicStep::AwaitingInstructions => PicStep::AwaitingCreationFields,
            PicStep::AwaitingCreationFields => PicStep::Created,
            PicStep::Created => PicStep::Created,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// The provider needs additional fields before it can proceed; not a terminal failure.
    NeedInfo,
    Warning,
    Information,
    Error,
}

/// A structured message a provider attaches to an instrument-creation outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreationMessage {
    pub kind: MessageKind,
    pub message_id: String,
    pub debug_message: String,
}

impl CreationMessage {
    pub fn need_info<S1: Into<String>, S2: Into<String>>(message_id: S1, debug_message: S2) -> Self {
        Self { kind: MessageKind::NeedInfo, message_id: message_id.into(), debug_message: debug_message.into() }
    }

    pub fn error<S1: Into<String>, S2: Into<String>>(message_id: S1, debug_message: S2) -> Self {
        Self { kind: MessageKind::Error, message_id: message_id.into(), debug_message: debug_message.into() }
    }
}

#[derive(Debug, Clone)]
pub struct InstrumentCreationError {
    pub messages: Vec<CreationMessage>,
}

impl std::error::Error for InstrumentCreationError {}

impl InstrumentCreationError {
    pub fn new(messages: Vec<CreationMessage>) -> Self {
        Self { messages }
    }

    /// True when the provider is only asking for more input, which the wizard surfaces as blocking
    /// fields rather than a failure.
    pub fn needs_more_info(&self) -> bool {
        !self.messages.is_empty() && self.messages.iter().all(|m| m.kind == MessageKind::NeedInfo)
    }
}

impl Display for InstrumentCreationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.messages.is_empty() {
            return write!(f, "instrument creation failed");
        }
        let summary = self.messages.iter().map(|m| m.message_id.as_str()).collect::<Vec<_>>().join(", ");
        write!(f, "instrument creation failed: {summary}")
    }
}

/// Field schema for a client-interaction step (e.g. gathering what a 3DS-like redirect needs).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PicInstructionsFields {
    pub fields: Vec<String>,
    pub blocking_messages: Vec<CreationMessage>,
}

/// Instructions the customer must follow before the instrument can be created — typically a
/// redirect URL or display payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PicInstructions {
    pub communication_instructions: HashMap<String, String>,
    pub payload: HashMap<String, String>,
}

/// Field schema for the final instrument-creation form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PicCreationFields {
    pub fields: Vec<String>,
    pub blocking_fields: Vec<CreationMessage>,
    pub saveable: bool,
}

/// Successful instrument creation: the provider details to store with the instrument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentCreationResponse {
    pub details: HashMap<String, String>,
}

/// Context for the field-schema steps of the wizard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PicFieldsRequestContext {
    pub currency: String,
    pub locale: Option<String>,
    pub customer_id: Option<String>,
}

/// Context for the instruction and creation steps of the wizard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PicRequestContext {
    pub currency: String,
    pub locale: Option<String>,
    pub customer_id: Option<String>,
    pub billing_address_guid: Option<String>,
}

pub trait InstrumentCreationCapability: Send + Sync {
    fn creation_fields(&self, context: &PicFieldsRequestContext) -> Result<PicCreationFields, InstrumentCreationError>;

    fn create_instrument(
        &self,
        form: &HashMap<String, String>,
        context: &PicRequestContext,
    ) -> Result<InstrumentCreationResponse, InstrumentCreationError>;
}

pub trait ClientInteractionCapability: Send + Sync {
    fn instruction_fields(
        &self,
        context: &PicFieldsRequestContext,
    ) -> Result<PicInstructionsFields, InstrumentCreationError>;

    fn instructions(
        &self,
        form: &HashMap<String, String>,
        context: &PicRequestContext,
    ) -> Result<PicInstructions, InstrumentCreationError>;
}

//-------------------------------   PaymentProviderPlugin   -----------------------------------------------------------

/// A payment provider plugin. Every capability accessor defaults to `None`; a plugin advertises
/// what it supports by overriding the accessors.
pub trait PaymentProviderPlugin: Send + Sync {
    /// The registry key configurations refer to.
    fn name(&self) -> &str;

    /// True for providers that only allow one open reservation per instrument.
    fn single_reserve_per_instrument(&self) -> bool {
        false
    }

    fn reserve_capability(&self) -> Option<&dyn ReserveCapability> {
        None
    }

    fn modify_capability(&self) -> Option<&dyn ModifyCapability> {
        None
    }

    fn cancel_capability(&self) -> Option<&dyn CancelCapability> {
        None
    }

    fn charge_capability(&self) -> Option<&dyn ChargeCapability> {
        None
    }

    fn credit_capability(&self) -> Option<&dyn CreditCapability> {
        None
    }

    fn reverse_charge_capability(&self) -> Option<&dyn ReverseChargeCapability> {
        None
    }

    fn instrument_creation_capability(&self) -> Option<&dyn InstrumentCreationCapability> {
        None
    }

    fn client_interaction_capability(&self) -> Option<&dyn ClientInteractionCapability> {
        None
    }
}

//-------------------------------      PaymentProvider      -----------------------------------------------------------

/// A resolved provider: the persisted configuration paired with the plugin implementing it.
#[derive(Clone)]
pub struct PaymentProvider {
    configuration: ProviderConfiguration,
    plugin: Arc<dyn PaymentProviderPlugin>,
}

impl PaymentProvider {
    pub fn new(configuration: ProviderConfiguration, plugin: Arc<dyn PaymentProviderPlugin>) -> Self {
        Self { configuration, plugin }
    }

    pub fn configuration(&self) -> &ProviderConfiguration {
        &self.configuration
    }

    pub fn configuration_name(&self) -> &str {
        &self.configuration.name
    }

    pub fn plugin(&self) -> &dyn PaymentProviderPlugin {
        self.plugin.as_ref()
    }

    pub fn single_reserve_per_instrument(&self) -> bool {
        self.plugin.single_reserve_per_instrument()
    }
}

impl std::fmt::Debug for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentProvider({})", self.configuration.name)
    }
}
