use std::collections::HashMap;

use log::{debug, warn};
use ppa_common::MoneyValue;

use crate::{
    errors::PaymentApiError,
    event::{PaymentEvent, PaymentEventBuilder, PaymentStatus, TransactionType},
    instrument::OrderInstrument,
    processors::{ensure_stream_currency, merged_event_data, ProcessorContext},
    provider::{CapabilityError, ReserveCapabilityRequest},
    transaction::{OrderContext, PaymentApiResponse, ReserveRequest},
};

/// Event data key marking a reservation that stands in for a modification on providers without a
/// native modify capability.
pub const SIMULATED_MODIFY_KEY: &str = "simulated-modify";

/// Why a reservation is being placed. The two variants take the same provider path but are
/// recorded differently, so both code paths can be exercised uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationIntent {
    /// An ordinary hold of funds requested by the caller.
    NewReservation,
    /// A replacement hold standing in for a "modify reservation" the provider cannot do natively.
    /// Combined with cancelling the original hold, the open total converges to what a native
    /// modify would have produced.
    SimulateModify,
}

pub struct ReservationProcessor {
    ctx: ProcessorContext,
}

impl ReservationProcessor {
    pub fn new(ctx: ProcessorContext) -> Self {
        Self { ctx }
    }

    /// Places a hold of `request.amount` on the instrument and records the outcome as a RESERVE
    /// event.
    pub fn reserve(&self, request: &ReserveRequest) -> Result<PaymentApiResponse, PaymentApiError> {
        self.process(
            &request.amount,
            &request.instrument,
            &request.custom_data,
            &request.order_context,
            ReservationIntent::NewReservation,
        )
    }

    /// Places a replacement hold as part of a simulated modification (see
    /// [`ReservationIntent::SimulateModify`]).
    pub fn reserve_to_simulate_modify(
        &self,
        amount: &MoneyValue,
        instrument: &OrderInstrument,
        custom_data: &HashMap<String, String>,
        order_context: &OrderContext,
    ) -> Result<PaymentApiResponse, PaymentApiError> {
        self.process(amount, instrument, custom_data, order_context, ReservationIntent::SimulateModify)
    }

    fn process(
        &self,
        amount: &MoneyValue,
        instrument: &OrderInstrument,
        custom_data: &HashMap<String, String>,
        order_context: &OrderContext,
        intent: ReservationIntent,
    ) -> Result<PaymentApiResponse, PaymentApiError> {
        if !amount.has_balance() {
            return Err(PaymentApiError::InsufficientFunds(format!(
                "a reservation must hold a positive amount, not {amount}"
            )));
        }
        let reference = &order_context.order_number;
        let stream = self.ctx.stream(reference)?;
        ensure_stream_currency(&stream, amount)?;
        self.check_limit(&stream, instrument, amount)?;

        let provider = self.ctx.provider_for(instrument)?;
        let capability = provider.plugin().reserve_capability().ok_or_else(|| {
            PaymentApiError::CapabilityUnsupported("reserve", provider.configuration_name().to_string())
        })?;
        debug!("🔒️ Reserving {amount} for [{reference}] via '{}'", provider.configuration_name());
        let capability_request = ReserveCapabilityRequest {
            amount: amount.clone(),
            instrument_data: instrument.instrument.data.clone(),
            custom_data: custom_data.clone(),
            order_context: order_context.clone(),
        };
        let event = match capability.reserve(capability_request) {
            Ok(response) => self.build_approved(amount, instrument, custom_data, order_context, intent, response.data),
            Err(err) => {
                warn!("🔒️ Reservation for [{reference}] failed: {err}");
                self.build_failed(amount, instrument, custom_data, order_context, &err)
            },
        }?;
        self.ctx.append(&event)?;
        Ok(PaymentApiResponse::new(vec![event]))
    }

    /// A limited instrument can only hold reservations up to its remaining headroom.
    fn check_limit(
        &self,
        stream: &[PaymentEvent],
        instrument: &OrderInstrument,
        amount: &MoneyValue,
    ) -> Result<(), PaymentApiError> {
        if instrument.is_unlimited() {
            return Ok(());
        }
        let reservable = self.ctx.history.reservable_instruments(stream, std::slice::from_ref(instrument))?;
        let headroom = reservable.into_iter().next().and_then(|(_, headroom)| headroom);
        match headroom {
            Some(headroom) if amount.compare(&headroom)? != std::cmp::Ordering::Greater => Ok(()),
            _ => Err(PaymentApiError::InsufficientFunds(format!(
                "a reservation of {amount} exceeds the remaining limit on instrument '{}'",
                instrument.instrument.name
            ))),
        }
    }

    fn build_approved(
        &self,
        amount: &MoneyValue,
        instrument: &OrderInstrument,
        custom_data: &HashMap<String, String>,
        order_context: &OrderContext,
        intent: ReservationIntent,
        response_data: HashMap<String, String>,
    ) -> Result<PaymentEvent, PaymentApiError> {
        let mut data = merged_event_data(custom_data, response_data);
        if intent == ReservationIntent::SimulateModify {
            data.insert(SIMULATED_MODIFY_KEY.to_string(), "true".to_string());
        }
        Ok(PaymentEventBuilder::new()
            .with_payment_type(TransactionType::Reserve)
            .with_payment_status(PaymentStatus::Approved)
            .with_reference_id(order_context.order_number.as_str())
            .with_amount(amount.clone())
            .with_instrument(instrument.clone())
            .with_payment_event_data(data)
            .build()?)
    }

    fn build_failed(
        &self,
        amount: &MoneyValue,
        instrument: &OrderInstrument,
        custom_data: &HashMap<String, String>,
        order_context: &OrderContext,
        err: &CapabilityError,
    ) -> Result<PaymentEvent, PaymentApiError> {
        Ok(PaymentEventBuilder::new()
            .with_payment_type(TransactionType::Reserve)
            .with_payment_status(PaymentStatus::Failed)
            .with_reference_id(order_context.order_number.as_str())
            .with_amount(amount.clone())
            .with_instrument(instrument.clone())
            .with_payment_event_data(merged_event_data(custom_data, HashMap::new()))
            .with_temporary_failure(err.temporary_failure)
            .with_internal_message(err.internal_message.as_str())
            .with_external_message(err.external_message.as_str())
            .build()?)
    }
}
