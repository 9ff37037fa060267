//! Test support: a scriptable provider plugin and ready-made fixture wiring.
//!
//! [`TestPlugin`] starts with no capabilities at all; tests add exactly the capabilities the
//! scenario needs and script their outcomes (approve, decline, timeout). [`harness`] wires a
//! plugin into a full [`PaymentApiWorkflow`] backed by the in-memory stores.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, PoisonError},
};

use ppa_common::{Decimal, MoneyValue};

use crate::{
    event::EventId,
    instrument::{OrderInstrument, PaymentInstrument},
    provider::{
        CancelCapability,
        CancelCapabilityRequest,
        CapabilityError,
        CapabilityResponse,
        ChargeCapability,
        ChargeCapabilityRequest,
        ClientInteractionCapability,
        CreditCapability,
        CreditCapabilityRequest,
        InstrumentCreationCapability,
        InstrumentCreationError,
        InstrumentCreationResponse,
        ModifyCapability,
        ModifyCapabilityRequest,
        PaymentProviderPlugin,
        PicCreationFields,
        PicFieldsRequestContext,
        PicInstructions,
        PicInstructionsFields,
        PicRequestContext,
        ProviderConfiguration,
        ProviderResolver,
        ReserveCapability,
        ReserveCapabilityRequest,
        ReverseChargeCapability,
        ReverseChargeCapabilityRequest,
    },
    store::{InMemoryConfigStore, InMemoryInstrumentStore, InMemoryLedger},
    traits::{InstrumentStore, LedgerStore},
    transaction::OrderContext,
    PaymentApiWorkflow,
};

pub const TEST_CONFIGURATION_GUID: &str = "cfg-test-provider";
pub const TEST_PLUGIN_KEY: &str = "test-provider";

//--------------------------------------       Scripts        --------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Approve,
    Decline,
    Timeout,
}

/// A queue of provider outcomes; once drained, every further call yields the fallback.
#[derive(Debug)]
pub struct Script {
    queue: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
}

impl Script {
    pub fn approve() -> Self {
        Self::sequence([], Outcome::Approve)
    }

    pub fn decline() -> Self {
        Self::sequence([], Outcome::Decline)
    }

    pub fn timeout() -> Self {
        Self::sequence([], Outcome::Timeout)
    }

    pub fn sequence<I: IntoIterator<Item = Outcome>>(outcomes: I, fallback: Outcome) -> Self {
        Self { queue: Mutex::new(outcomes.into_iter().collect()), fallback }
    }

    fn next(&self) -> Outcome {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front().unwrap_or(self.fallback)
    }
}

/// One scripted capability; the same struct serves all six transaction capabilities.
#[derive(Debug)]
pub struct ScriptedCapability {
    operation: &'static str,
    script: Script,
}

impl ScriptedCapability {
    fn new(operation: &'static str, script: Script) -> Self {
        Self { operation, script }
    }

    fn run(&self) -> Result<CapabilityResponse, CapabilityError> {
        match self.script.next() {
            Outcome::Approve => {
                let mut data = HashMap::new();
                data.insert(format!("{}-token", self.operation), EventId::random().0);
                Ok(CapabilityResponse::with_data(data))
            },
            Outcome::Decline => Err(CapabilityError::terminal(
                format!("The provider declined the {} request", self.operation),
                "The payment could not be completed.",
            )),
            Outcome::Timeout => Err(CapabilityError::temporary(
                format!("The {} request timed out", self.operation),
                "The payment service is temporarily unavailable. Please try again.",
            )),
        }
    }
}

impl ReserveCapability for ScriptedCapability {
    fn reserve(&self, _request: ReserveCapabilityRequest) -> Result<CapabilityResponse, CapabilityError> {
        self.run()
    }
}

impl ModifyCapability for ScriptedCapability {
    fn modify(&self, _request: ModifyCapabilityRequest) -> Result<CapabilityResponse, CapabilityError> {
        self.run()
    }
}

impl CancelCapability for ScriptedCapability {
    fn cancel(&self, _request: CancelCapabilityRequest) -> Result<CapabilityResponse, CapabilityError> {
        self.run()
    }
}

impl ChargeCapability for ScriptedCapability {
    fn charge(&self, _request: ChargeCapabilityRequest) -> Result<CapabilityResponse, CapabilityError> {
        self.run()
    }
}

impl CreditCapability for ScriptedCapability {
    fn credit(&self, _request: CreditCapabilityRequest) -> Result<CapabilityResponse, CapabilityError> {
        self.run()
    }
}

impl ReverseChargeCapability for ScriptedCapability {
    fn reverse_charge(
        &self,
        _request: ReverseChargeCapabilityRequest,
    ) -> Result<CapabilityResponse, CapabilityError> {
        self.run()
    }
}

//----------------------------------  Instrument creation stubs  -----------------------------------------------------

#[derive(Debug, Default)]
pub struct ScriptedInstrumentCreation {
    pub fields: Vec<String>,
    pub details: HashMap<String, String>,
    pub failure: Option<InstrumentCreationError>,
}

impl InstrumentCreationCapability for ScriptedInstrumentCreation {
    fn creation_fields(&self, _context: &PicFieldsRequestContext) -> Result<PicCreationFields, InstrumentCreationError> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        Ok(PicCreationFields { fields: self.fields.clone(), blocking_fields: Vec::new(), saveable: true })
    }

    fn create_instrument(
        &self,
        _form: &HashMap<String, String>,
        _context: &PicRequestContext,
    ) -> Result<InstrumentCreationResponse, InstrumentCreationError> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        Ok(InstrumentCreationResponse { details: self.details.clone() })
    }
}

#[derive(Debug, Default)]
pub struct ScriptedClientInteraction {
    pub fields: Vec<String>,
    pub instructions: PicInstructions,
}

impl ClientInteractionCapability for ScriptedClientInteraction {
    fn instruction_fields(
        &self,
        _context: &PicFieldsRequestContext,
    ) -> Result<PicInstructionsFields, InstrumentCreationError> {
        Ok(PicInstructionsFields { fields: self.fields.clone(), blocking_messages: Vec::new() })
    }

    fn instructions(
        &self,
        _form: &HashMap<String, String>,
        _context: &PicRequestContext,
    ) -> Result<PicInstructions, InstrumentCreationError> {
        Ok(self.instructions.clone())
    }
}

//--------------------------------------      TestPlugin      --------------------------------------------------------

/// A provider plugin whose capability set and outcomes are chosen per test.
#[derive(Default)]
pub struct TestPlugin {
    single_reserve: bool,
    reserve: Option<ScriptedCapability>,
    modify: Option<ScriptedCapability>,
    cancel: Option<ScriptedCapability>,
    charge: Option<ScriptedCapability>,
    credit: Option<ScriptedCapability>,
    reverse_charge: Option<ScriptedCapability>,
    instrument_creation: Option<ScriptedInstrumentCreation>,
    client_interaction: Option<ScriptedClientInteraction>,
}

impl TestPlugin {
    /// A plugin with no capabilities at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// A plugin with every transaction capability approving.
    pub fn approving() -> Self {
        Self::new()
            .with_reserve(Script::approve())
            .with_modify(Script::approve())
            .with_cancel(Script::approve())
            .with_charge(Script::approve())
            .with_credit(Script::approve())
            .with_reverse_charge(Script::approve())
    }

    pub fn with_reserve(mut self, script: Script) -> Self {
        self.reserve = Some(ScriptedCapability::new("reserve", script));
        self
    }

    pub fn with_modify(mut self, script: Script) -> Self {
        self.modify = Some(ScriptedCapability::new("modify", script));
        self
    }

    pub fn without_modify(mut self) -> Self {
        self.modify = None;
        self
    }

    pub fn with_cancel(mut self, script: Script) -> Self {
        self.cancel = Some(ScriptedCapability::new("cancel", script));
        self
    }

    pub fn without_cancel(mut self) -> Self {
        self.cancel = None;
        self
    }

    pub fn with_charge(mut self, script: Script) -> Self {
        self.charge = Some(ScriptedCapability::new("charge", script));
        self
    }

    pub fn with_credit(mut self, script: Script) -> Self {
        self.credit = Some(ScriptedCapability::new("credit", script));
        self
    }

    pub fn with_reverse_charge(mut self, script: Script) -> Self {
        self.reverse_charge = Some(ScriptedCapability::new("reverse-charge", script));
        self
    }

    pub fn without_reverse_charge(mut self) -> Self {
        self.reverse_charge = None;
        self
    }

    pub fn with_single_reserve_per_instrument(mut self) -> Self {
        self.single_reserve = true;
        self
    }

    pub fn with_instrument_creation(mut self, creation: ScriptedInstrumentCreation) -> Self {
        self.instrument_creation = Some(creation);
        self
    }

    pub fn with_client_interaction(mut self, interaction: ScriptedClientInteraction) -> Self {
        self.client_interaction = Some(interaction);
        self
    }
}

impl PaymentProviderPlugin for TestPlugin {
    fn name(&self) -> &str {
        TEST_PLUGIN_KEY
    }

    fn single_reserve_per_instrument(&self) -> bool {
        self.single_reserve
    }

    fn reserve_capability(&self) -> Option<&dyn ReserveCapability> {
        self.reserve.as_ref().map(|c| c as &dyn ReserveCapability)
    }

    fn modify_capability(&self) -> Option<&dyn ModifyCapability> {
        self.modify.as_ref().map(|c| c as &dyn ModifyCapability)
    }

    fn cancel_capability(&self) -> Option<&dyn CancelCapability> {
        self.cancel.as_ref().map(|c| c as &dyn CancelCapability)
    }

    fn charge_capability(&self) -> Option<&dyn ChargeCapability> {
        self.charge.as_ref().map(|c| c as &dyn ChargeCapability)
    }

    fn credit_capability(&self) -> Option<&dyn CreditCapability> {
        self.credit.as_ref().map(|c| c as &dyn CreditCapability)
    }

    fn reverse_charge_capability(&self) -> Option<&dyn ReverseChargeCapability> {
        self.reverse_charge.as_ref().map(|c| c as &dyn ReverseChargeCapability)
    }

    fn instrument_creation_capability(&self) -> Option<&dyn InstrumentCreationCapability> {
        self.instrument_creation.as_ref().map(|c| c as &dyn InstrumentCreationCapability)
    }

    fn client_interaction_capability(&self) -> Option<&dyn ClientInteractionCapability> {
        self.client_interaction.as_ref().map(|c| c as &dyn ClientInteractionCapability)
    }
}

//--------------------------------------      TestHarness     --------------------------------------------------------

pub struct TestHarness {
    pub workflow: PaymentApiWorkflow,
    pub ledger: Arc<InMemoryLedger>,
    pub instruments: Arc<InMemoryInstrumentStore>,
}

/// Wires the plugin into a workflow backed by in-memory stores, registered under
/// [`TEST_CONFIGURATION_GUID`].
pub fn harness(plugin: TestPlugin) -> TestHarness {
    let configs = Arc::new(InMemoryConfigStore::new());
    configs.insert(ProviderConfiguration::new(TEST_CONFIGURATION_GUID, "Test provider", TEST_PLUGIN_KEY));
    let mut resolver = ProviderResolver::new(configs);
    resolver.register_plugin(Arc::new(plugin));
    let ledger = Arc::new(InMemoryLedger::new());
    let instruments = Arc::new(InMemoryInstrumentStore::new());
    let ledger_dyn: Arc<dyn LedgerStore> = ledger.clone();
    let instruments_dyn: Arc<dyn InstrumentStore> = instruments.clone();
    let workflow = PaymentApiWorkflow::new(resolver, ledger_dyn, instruments_dyn);
    TestHarness { workflow, ledger, instruments }
}

/// An unlimited instrument bound to the test provider configuration.
pub fn order_instrument() -> OrderInstrument {
    OrderInstrument::unlimited(PaymentInstrument::new("Visa ending 4242", TEST_CONFIGURATION_GUID))
}

pub fn usd(major_units: i64) -> MoneyValue {
    MoneyValue::new(Decimal::from(major_units), "USD")
}

pub fn order_context(order_number: &str, total: MoneyValue) -> OrderContext {
    OrderContext::new(order_number, total)
}

#[cfg(feature = "test_utils")]
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
