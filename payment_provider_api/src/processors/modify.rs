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
        CancelReservationProcessor,
        ProcessorContext,
        ReservationProcessor,
    },
    provider::ModifyCapabilityRequest,
    transaction::{ModifyReservationRequest, PaymentApiResponse, ReserveRequest},
};

/// Adjusts open reservations towards a new target total for the reference.
///
/// Providers with a native modify capability get a MODIFY_RESERVE event parented on the
/// reservation they adjust. Providers without one are simulated: a replacement reservation is
/// placed and the original is cancelled, which converges to the same open total.
pub struct ModifyReservationProcessor {
    ctx: ProcessorContext,
    reservation: Arc<ReservationProcessor>,
    cancel: Arc<CancelReservationProcessor>,
}

impl ModifyReservationProcessor {
    pub fn new(
        ctx: ProcessorContext,
        reservation: Arc<ReservationProcessor>,
        cancel: Arc<CancelReservationProcessor>,
    ) -> Self {
        Self { ctx, reservation, cancel }
    }

    /// Moves the reference's total (open reservations plus charges) to `request.amount`.
    pub fn modify_reservation(
        &self,
        request: &ModifyReservationRequest,
    ) -> Result<PaymentApiResponse, PaymentApiError> {
        let reference = &request.order_context.order_number;
        let stream = self.ctx.stream(reference)?;
        ensure_stream_currency(&stream, &request.amount)?;
        let open = self.ctx.history.chargeable_events(&stream)?;
        let available = self.ctx.history.available_reserved_amount(&stream)?;
        let charged = self.ctx.history.charged_amount(&stream)?;
        let order_amount = available.checked_add(&charged)?;
        let difference = request.amount.checked_sub(&order_amount)?;

        if open.is_empty() {
            if !difference.has_balance() {
                return Ok(PaymentApiResponse::empty());
            }
            // Nothing is open to adjust; reserve the shortfall on an instrument with headroom.
            let reservable = self.ctx.history.reservable_instruments(&stream, &request.instruments)?;
            let (instrument, _) = reservable.into_iter().next().ok_or_else(|| {
                PaymentApiError::ModificationFailed(
                    "no payment instrument can absorb the reservation increase".to_string(),
                )
            })?;
            debug!("✏️ No open reservations for [{reference}]; reserving the difference {difference}");
            return self.reservation.reserve(&ReserveRequest {
                instrument,
                amount: difference,
                order_context: request.order_context.clone(),
                custom_data: request.custom_data.clone(),
            });
        }

        let response = if difference.is_positive() {
            self.increase(request, &open, &difference)?
        } else if difference.is_negative() {
            self.decrease(request, &open, &difference.abs())?
        } else {
            return Ok(PaymentApiResponse::empty());
        };
        if response.events.is_empty() {
            return Err(PaymentApiError::ModificationFailed(
                "the provider can neither modify nor cancel the reservation".to_string(),
            ));
        }
        Ok(response)
    }

    /// An increase lands on a reservation held against an unlimited instrument; limited
    /// instruments cannot absorb an open-ended raise.
    fn increase(
        &self,
        request: &ModifyReservationRequest,
        open: &[(PaymentEvent, MoneyValue)],
        difference: &MoneyValue,
    ) -> Result<PaymentApiResponse, PaymentApiError> {
        for (reservation, available) in open {
            let instrument = instrument_of(reservation)?;
            if !instrument.is_unlimited() {
                continue;
            }
            let provider = self.ctx.provider_for(&instrument)?;
            if instrument.instrument.single_reserve_per_instrument || provider.single_reserve_per_instrument() {
                return Err(PaymentApiError::ModificationFailed(format!(
                    "provider '{}' only permits a single reservation per instrument; the amount cannot be increased",
                    provider.configuration_name()
                )));
            }
            let new_amount = available.checked_add(difference)?;
            let events = self.apply(request, reservation, available, &new_amount)?;
            return Ok(PaymentApiResponse::new(events));
        }
        Err(PaymentApiError::UnlimitedInstrumentNotFound)
    }

    /// A decrease is spread over the open reservations in stream order. A reservation shrunk to
    /// zero is cancelled instead of modified.
    fn decrease(
        &self,
        request: &ModifyReservationRequest,
        open: &[(PaymentEvent, MoneyValue)],
        amount_to_decrease: &MoneyValue,
    ) -> Result<PaymentApiResponse, PaymentApiError> {
        let mut remaining = amount_to_decrease.clone();
        let mut events = Vec::new();
        for (reservation, available) in open {
            if !remaining.has_balance() {
                break;
            }
            if available.compare(&remaining)? != Ordering::Greater {
                let cancel_event = self.cancel.cancel_event(
                    reservation,
                    available,
                    &request.custom_data,
                    &request.order_context,
                )?;
                events.push(cancel_event);
                remaining = remaining.checked_sub(available)?;
            } else {
                let new_amount = available.checked_sub(&remaining)?;
                events.extend(self.apply(request, reservation, available, &new_amount)?);
                remaining = MoneyValue::zero(remaining.currency());
            }
        }
        if remaining.has_balance() {
            return Err(PaymentApiError::ModificationFailed(format!(
                "not enough open reservations to decrease by {amount_to_decrease}"
            )));
        }
        Ok(PaymentApiResponse::new(events))
    }

    /// Moves one reservation to `new_amount`, natively when the provider can, simulated
    /// otherwise.
    fn apply(
        &self,
        request: &ModifyReservationRequest,
        reservation: &PaymentEvent,
        available: &MoneyValue,
        new_amount: &MoneyValue,
    ) -> Result<Vec<PaymentEvent>, PaymentApiError> {
        let reference = &request.order_context.order_number;
        let instrument = instrument_of(reservation)?;
        let provider = self.ctx.provider_for(&instrument)?;
        let capability = match provider.plugin().modify_capability() {
            Some(capability) => capability,
            None => return self.simulate(request, reservation, available, new_amount),
        };
        debug!("✏️ Modifying reservation {} to {new_amount} for [{reference}]", reservation.guid);
        let capability_request = ModifyCapabilityRequest {
            new_amount: new_amount.clone(),
            instrument_data: instrument.instrument.data.clone(),
            reservation_data: reservation.payment_event_data.clone(),
            custom_data: request.custom_data.clone(),
            order_context: request.order_context.clone(),
        };
        let base = PaymentEventBuilder::new()
            .with_parent_guid(reservation.guid.clone())
            .with_payment_type(TransactionType::ModifyReserve)
            .with_reference_id(reference.as_str())
            .with_amount(new_amount.clone())
            .with_instrument(instrument.clone());
        let event = match capability.modify(capability_request) {
            Ok(response) => base
                .with_payment_status(PaymentStatus::Approved)
                .with_payment_event_data(merged_event_data(&request.custom_data, response.data))
                .build()?,
            Err(err) => {
                warn!("✏️ Modification of {} for [{reference}] failed: {err}", reservation.guid);
                // A failed decrease merely leaves too much money on hold, so the attempt is
                // recorded as skipped. A failed increase leaves the order under-reserved.
                let status = if new_amount.compare(available)? == Ordering::Less {
                    PaymentStatus::Skipped
                } else {
                    PaymentStatus::Failed
                };
                base.with_payment_status(status)
                    .with_payment_event_data(merged_event_data(&request.custom_data, Default::default()))
                    .with_temporary_failure(err.temporary_failure)
                    .with_internal_message(err.internal_message.as_str())
                    .with_external_message(err.external_message.as_str())
                    .build()?
            },
        };
        self.ctx.append(&event)?;
        Ok(vec![event])
    }

    /// Simulates a modification for providers without the native capability: growing is a plain
    /// delta reservation; shrinking places a replacement hold and cancels the original.
    fn simulate(
        &self,
        request: &ModifyReservationRequest,
        reservation: &PaymentEvent,
        available: &MoneyValue,
        new_amount: &MoneyValue,
    ) -> Result<Vec<PaymentEvent>, PaymentApiError> {
        let instrument = instrument_of(reservation)?;
        let provider = self.ctx.provider_for(&instrument)?;
        let delta = new_amount.checked_sub(available)?;
        if delta.is_positive() {
            let response = self.reservation.reserve(&ReserveRequest {
                instrument,
                amount: delta,
                order_context: request.order_context.clone(),
                custom_data: request.custom_data.clone(),
            })?;
            return Ok(response.events);
        }
        if provider.plugin().cancel_capability().is_none() {
            // Neither modify nor cancel: nothing can be attempted against this provider.
            return Ok(Vec::new());
        }
        let mut events = Vec::new();
        let replacement = self.reservation.reserve_to_simulate_modify(
            new_amount,
            &instrument,
            &request.custom_data,
            &request.order_context,
        )?;
        let replaced = replacement.is_success();
        events.extend(replacement.events);
        if replaced {
            let cancel_event = self.cancel.cancel_event(
                reservation,
                available,
                &request.custom_data,
                &request.order_context,
            )?;
            events.push(cancel_event);
        }
        Ok(events)
    }
}
