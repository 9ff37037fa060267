use std::collections::HashMap;

use log::{debug, warn};
use ppa_common::MoneyValue;

use crate::{
    errors::PaymentApiError,
    event::{PaymentEvent, PaymentEventBuilder, PaymentStatus, TransactionType},
    processors::{instrument_of, merged_event_data, ProcessorContext},
    provider::CancelCapabilityRequest,
    transaction::{CancelAllReservationsRequest, CancelReservationRequest, OrderContext, PaymentApiResponse},
};

pub struct CancelReservationProcessor {
    ctx: ProcessorContext,
}

impl CancelReservationProcessor {
    pub fn new(ctx: ProcessorContext) -> Self {
        Self { ctx }
    }

    /// Cancels one specific open reservation, identified by its event guid.
    pub fn cancel_reservation(
        &self,
        request: &CancelReservationRequest,
    ) -> Result<PaymentApiResponse, PaymentApiError> {
        let stream = self.ctx.stream(&request.order_context.order_number)?;
        let open = self.ctx.history.chargeable_events(&stream)?;
        let (reservation, available) = open
            .into_iter()
            .find(|(event, _)| event.guid == request.reservation_guid)
            .ok_or_else(|| PaymentApiError::ReservationNotFound(request.reservation_guid.clone()))?;
        let event = self.cancel_event(&reservation, &available, &request.custom_data, &request.order_context)?;
        Ok(PaymentApiResponse::new(vec![event]))
    }

    /// Cancels every currently open reservation for the reference — one CANCEL_RESERVE event per
    /// reservation. A failing cancellation is reported through its own event; the remaining
    /// reservations are still attempted.
    pub fn cancel_all_reservations(
        &self,
        request: &CancelAllReservationsRequest,
    ) -> Result<PaymentApiResponse, PaymentApiError> {
        let reference = &request.order_context.order_number;
        let stream = self.ctx.stream(reference)?;
        let open = self.ctx.history.chargeable_events(&stream)?;
        debug!("❌️ Cancelling {} open reservation(s) for [{reference}]", open.len());
        let mut events = Vec::with_capacity(open.len());
        for (reservation, available) in open {
            events.push(self.cancel_event(&reservation, &available, &request.custom_data, &request.order_context)?);
        }
        Ok(PaymentApiResponse::new(events))
    }

    /// Cancels a single open reservation and records the outcome. Shared with the modify and
    /// charge processors' compensation flows.
    pub(crate) fn cancel_event(
        &self,
        reservation: &PaymentEvent,
        available: &MoneyValue,
        custom_data: &HashMap<String, String>,
        order_context: &OrderContext,
    ) -> Result<PaymentEvent, PaymentApiError> {
        let reference = &order_context.order_number;
        let instrument = instrument_of(reservation)?;
        let provider = self.ctx.provider_for(&instrument)?;
        let base = PaymentEventBuilder::new()
            .with_parent_guid(reservation.guid.clone())
            .with_payment_type(TransactionType::CancelReserve)
            .with_reference_id(reference.as_str())
            .with_amount(available.clone())
            .with_instrument(instrument.clone());
        let event = match provider.plugin().cancel_capability() {
            None => {
                debug!(
                    "❌️ Provider '{}' cannot cancel; reservation {} for [{reference}] will lapse on its own",
                    provider.configuration_name(),
                    reservation.guid
                );
                base.with_payment_status(PaymentStatus::Skipped)
                    .with_payment_event_data(merged_event_data(custom_data, HashMap::new()))
                    .with_internal_message(format!(
                        "Provider '{}' has no cancel capability; the hold lapses on its own",
                        provider.configuration_name()
                    ))
                    .build()?
            },
            Some(capability) => {
                debug!("❌️ Cancelling reservation {} ({available}) for [{reference}]", reservation.guid);
                let capability_request = CancelCapabilityRequest {
                    amount: available.clone(),
                    instrument_data: instrument.instrument.data.clone(),
                    reservation_data: reservation.payment_event_data.clone(),
                    custom_data: custom_data.clone(),
                    order_context: order_context.clone(),
                };
                match capability.cancel(capability_request) {
                    Ok(response) => base
                        .with_payment_status(PaymentStatus::Approved)
                        .with_payment_event_data(merged_event_data(custom_data, response.data))
                        .build()?,
                    Err(err) => {
                        warn!("❌️ Cancellation of {} for [{reference}] failed: {err}", reservation.guid);
                        base.with_payment_status(PaymentStatus::Failed)
                            .with_payment_event_data(merged_event_data(custom_data, HashMap::new()))
                            .with_temporary_failure(err.temporary_failure)
                            .with_internal_message(err.internal_message.as_str())
                            .with_external_message(err.external_message.as_str())
                            .build()?
                    },
                }
            },
        };
        self.ctx.append(&event)?;
        Ok(event)
    }
}
