use std::{cmp::Ordering, sync::Arc};

use log::{debug, warn};
use ppa_common::MoneyValue;

use crate::{
    errors::PaymentApiError,
    event::{PaymentEvent, PaymentEventBuilder, PaymentStatus, TransactionType},
    processors::{
        ensure_stream_currency,
        instrument_of,
        merged_event_data,
        min_of,
        CancelReservationProcessor,
        ProcessorContext,
        ReservationProcessor,
    },
    provider::ChargeCapabilityRequest,
    transaction::{ChargeRequest, PaymentApiResponse, ReserveRequest},
};

/// Draws a charge down across the open reservations of a reference.
///
/// Charging is the one capability every provider must support. Reservations are drawn down in
/// stream order, and a charge that fails at the provider is retried once against a fresh
/// reservation, on the assumption that the original hold has lapsed.
pub struct ChargeProcessor {
    ctx: ProcessorContext,
    reservation: Arc<ReservationProcessor>,
    cancel: Arc<CancelReservationProcessor>,
}

impl ChargeProcessor {
    pub fn new(
        ctx: ProcessorContext,
        reservation: Arc<ReservationProcessor>,
        cancel: Arc<CancelReservationProcessor>,
    ) -> Self {
        Self { ctx, reservation, cancel }
    }

    /// Charges `request.amount` against the reference's open reservations.
    ///
    /// A charge exceeding the currently reserved total is a business-rule violation and is
    /// rejected before any provider call; the caller must modify the reservation first.
    pub fn charge_payment(&self, request: &ChargeRequest) -> Result<PaymentApiResponse, PaymentApiError> {
        if !request.amount.has_balance() {
            return Ok(PaymentApiResponse::empty());
        }
        let reference = &request.order_context.order_number;
        let stream = self.ctx.stream(reference)?;
        ensure_stream_currency(&stream, &request.amount)?;
        let available = self.ctx.history.available_reserved_amount(&stream)?;
        if request.amount.compare(&available)? == Ordering::Greater {
            return Err(PaymentApiError::InsufficientFunds(format!(
                "a charge of {} exceeds the available reserved amount of {available}",
                request.amount
            )));
        }

        let chargeable = self.ctx.history.chargeable_events(&stream)?;
        let mut to_charge = request.amount.clone();
        let mut events = Vec::new();
        for (reservation, available_for_event) in chargeable {
            if !to_charge.has_balance() {
                break;
            }
            let instrument = instrument_of(&reservation)?;
            let provider = self.ctx.provider_for(&instrument)?;
            let single_reserve =
                instrument.instrument.single_reserve_per_instrument || provider.single_reserve_per_instrument();
            if single_reserve && !request.final_payment {
                debug!(
                    "💰️ Deferring charge on single-reserve instrument '{}' until the final payment",
                    instrument.instrument.name
                );
                continue;
            }
            let amount_now = min_of(&to_charge, &available_for_event)?;
            let event = self.charge_against(&reservation, &amount_now, request)?;
            let failed = event.is_failed();
            events.push(event);
            if failed {
                events.extend(self.retry_on_fresh_reservation(
                    &reservation,
                    &available_for_event,
                    &amount_now,
                    request,
                    &mut to_charge,
                )?);
                continue;
            }
            // A charge draws its reservation down in place; whatever is left of the hold stays
            // open for later charges.
            to_charge = to_charge.checked_sub(&amount_now)?;
        }
        Ok(PaymentApiResponse::new(events))
    }

    /// Charges the given amount against one reservation and records the outcome.
    fn charge_against(
        &self,
        reservation: &PaymentEvent,
        amount: &MoneyValue,
        request: &ChargeRequest,
    ) -> Result<PaymentEvent, PaymentApiError> {
        let reference = &request.order_context.order_number;
        let instrument = instrument_of(reservation)?;
        let provider = self.ctx.provider_for(&instrument)?;
        let capability = provider.plugin().charge_capability().ok_or_else(|| {
            PaymentApiError::CapabilityUnsupported("charge", provider.configuration_name().to_string())
        })?;
        debug!("💰️ Charging {amount} against reservation {} for [{reference}]", reservation.guid);
        let capability_request = ChargeCapabilityRequest {
            amount: amount.clone(),
            instrument_data: instrument.instrument.data.clone(),
            reservation_data: reservation.payment_event_data.clone(),
            custom_data: request.custom_data.clone(),
            order_context: request.order_context.clone(),
        };
        let base = PaymentEventBuilder::new()
            .with_parent_guid(reservation.guid.clone())
            .with_payment_type(TransactionType::Charge)
            .with_reference_id(reference.as_str())
            .with_amount(amount.clone())
            .with_instrument(instrument.clone());
        let event = match capability.charge(capability_request) {
            Ok(response) => base
                .with_payment_status(PaymentStatus::Approved)
                .with_payment_event_data(merged_event_data(&request.custom_data, response.data))
                .build()?,
            Err(err) => {
                warn!("💰️ Charge of {amount} for [{reference}] failed: {err}");
                base.with_payment_status(PaymentStatus::Failed)
                    .with_payment_event_data(merged_event_data(&request.custom_data, Default::default()))
                    .with_temporary_failure(err.temporary_failure)
                    .with_internal_message(err.internal_message.as_str())
                    .with_external_message(err.external_message.as_str())
                    .build()?
            },
        };
        self.ctx.append(&event)?;
        Ok(event)
    }

    /// Recovery for a charge the provider rejected: the hold has most likely expired, so cancel
    /// it, reserve the amount afresh and charge the new hold once.
    fn retry_on_fresh_reservation(
        &self,
        reservation: &PaymentEvent,
        available_for_event: &MoneyValue,
        amount: &MoneyValue,
        request: &ChargeRequest,
        to_charge: &mut MoneyValue,
    ) -> Result<Vec<PaymentEvent>, PaymentApiError> {
        let reference = &request.order_context.order_number;
        debug!("💰️ Retrying charge for [{reference}] on a fresh reservation");
        let instrument = instrument_of(reservation)?;
        let mut events = vec![self.cancel.cancel_event(
            reservation,
            available_for_event,
            &request.custom_data,
            &request.order_context,
        )?];
        let reserve_response = self.reservation.reserve(&ReserveRequest {
            instrument,
            amount: amount.clone(),
            order_context: request.order_context.clone(),
            custom_data: request.custom_data.clone(),
        })?;
        let reserve_events = reserve_response.events;
        events.extend(reserve_events.iter().cloned());
        for reserve_event in reserve_events.iter().filter(|event| event.is_approved()) {
            let charge_event = self.charge_against(reserve_event, amount, request)?;
            if charge_event.is_approved() {
                *to_charge = to_charge.checked_sub(amount)?;
            }
            events.push(charge_event);
        }
        Ok(events)
    }
}
