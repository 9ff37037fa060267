use std::{collections::HashMap, sync::Arc};

use crate::{
    errors::PaymentApiError,
    history::LedgerSummary,
    processors::{
        CancelReservationProcessor,
        ChargeProcessor,
        CreditProcessor,
        ModifyReservationProcessor,
        PaymentInstrumentCreationProcessor,
        ProcessorContext,
        ReservationProcessor,
    },
    provider::{
        PicCreationFields,
        PicFieldsRequestContext,
        PicInstructions,
        PicInstructionsFields,
        PicRequestContext,
        ProviderResolver,
    },
    traits::{InstrumentStore, LedgerStore},
    transaction::{
        CancelAllReservationsRequest,
        CancelReservationRequest,
        ChargeRequest,
        CreditRequest,
        ManualCreditRequest,
        ModifyReservationRequest,
        PaymentApiResponse,
        ReserveRequest,
        ReverseChargeRequest,
    },
};

/// The top-level entry point of the payment API: one facade composing all transaction processors
/// over a shared set of collaborators.
///
/// The workflow is stateless and safe to share across threads, but it enforces no ordering between
/// concurrent operations on the same reference. **Callers must hold an order-level lock for the
/// duration of any read-validate-act sequence** — two racing charges could otherwise both observe
/// the same stale reserved total and double-spend it.
pub struct PaymentApiWorkflow {
    ctx: ProcessorContext,
    reservation: Arc<ReservationProcessor>,
    modify: ModifyReservationProcessor,
    cancel: Arc<CancelReservationProcessor>,
    charge: ChargeProcessor,
    credit: CreditProcessor,
    instrument_creation: PaymentInstrumentCreationProcessor,
}

impl PaymentApiWorkflow {
    pub fn new(
        resolver: ProviderResolver,
        ledger: Arc<dyn LedgerStore>,
        instruments: Arc<dyn InstrumentStore>,
    ) -> Self {
        let resolver = Arc::new(resolver);
        let ctx = ProcessorContext::new(Arc::clone(&resolver), ledger);
        let reservation = Arc::new(ReservationProcessor::new(ctx.clone()));
        let cancel = Arc::new(CancelReservationProcessor::new(ctx.clone()));
        let modify =
            ModifyReservationProcessor::new(ctx.clone(), Arc::clone(&reservation), Arc::clone(&cancel));
        let charge = ChargeProcessor::new(ctx.clone(), Arc::clone(&reservation), Arc::clone(&cancel));
        let credit = CreditProcessor::new(ctx.clone());
        let instrument_creation = PaymentInstrumentCreationProcessor::new(resolver, instruments);
        Self { ctx, reservation, modify, cancel, charge, credit, instrument_creation }
    }

    /// Places a hold of funds on an instrument.
    pub fn reserve(&self, request: &ReserveRequest) -> Result<PaymentApiResponse, PaymentApiError> {
        self.reservation.reserve(request)
    }

    /// Moves the reference's reserved-plus-charged total to a new target amount.
    pub fn modify_reservation(
        &self,
        request: &ModifyReservationRequest,
    ) -> Result<PaymentApiResponse, PaymentApiError> {
        self.modify.modify_reservation(request)
    }

    /// Cancels one specific open reservation.
    pub fn cancel_reservation(
        &self,
        request: &CancelReservationRequest,
    ) -> Result<PaymentApiResponse, PaymentApiError> {
        self.cancel.cancel_reservation(request)
    }

    /// Cancels every open reservation for the reference, reporting per-reservation outcomes.
    pub fn cancel_all_reservations(
        &self,
        request: &CancelAllReservationsRequest,
    ) -> Result<PaymentApiResponse, PaymentApiError> {
        self.cancel.cancel_all_reservations(request)
    }

    /// Charges against the reference's open reservations.
    pub fn charge_payment(&self, request: &ChargeRequest) -> Result<PaymentApiResponse, PaymentApiError> {
        self.charge.charge_payment(request)
    }

    /// Refunds part or all of what has been charged.
    pub fn credit(&self, request: &CreditRequest) -> Result<PaymentApiResponse, PaymentApiError> {
        self.credit.credit(request)
    }

    /// Records a refund that happened out of band, without calling any provider.
    pub fn manual_credit(&self, request: &ManualCreditRequest) -> Result<PaymentApiResponse, PaymentApiError> {
        self.credit.manual_credit(request)
    }

    /// Reverses one specific approved charge.
    pub fn reverse_charge(&self, request: &ReverseChargeRequest) -> Result<PaymentApiResponse, PaymentApiError> {
        self.credit.reverse_charge(request)
    }

    /// The aggregate monetary state of a reference, derived from its full event stream.
    pub fn aggregate_for(&self, reference_id: &str) -> Result<LedgerSummary, PaymentApiError> {
        let stream = self.ctx.stream(reference_id)?;
        self.ctx.history.summarize(&stream)
    }

    // ----- Instrument creation wizard -----

    pub fn pic_instruction_fields(
        &self,
        configuration_guid: &str,
        context: &PicFieldsRequestContext,
    ) -> Result<PicInstructionsFields, PaymentApiError> {
        self.instrument_creation.pic_instruction_fields(configuration_guid, context)
    }

    pub fn pic_instructions(
        &self,
        configuration_guid: &str,
        instructions_form: &HashMap<String, String>,
        context: &PicRequestContext,
    ) -> Result<PicInstructions, PaymentApiError> {
        self.instrument_creation.pic_instructions(configuration_guid, instructions_form, context)
    }

    pub fn pic_fields(
        &self,
        configuration_guid: &str,
        context: &PicFieldsRequestContext,
    ) -> Result<PicCreationFields, PaymentApiError> {
        self.instrument_creation.pic_fields(configuration_guid, context)
    }

    /// Creates and stores a payment instrument; returns its guid.
    pub fn create_instrument(
        &self,
        configuration_guid: &str,
        instrument_form: &HashMap<String, String>,
        context: &PicRequestContext,
    ) -> Result<String, PaymentApiError> {
        self.instrument_creation.create_instrument(configuration_guid, instrument_form, context)
    }
}

impl std::fmt::Debug for PaymentApiWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentApiWorkflow")
    }
}
