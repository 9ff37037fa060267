use std::cmp::Ordering;

use log::{debug, warn};
use ppa_common::MoneyValue;

use crate::{
    errors::PaymentApiError,
    event::{PaymentEvent, PaymentEventBuilder, PaymentStatus, TransactionType},
    processors::{ensure_stream_currency, instrument_of, merged_event_data, min_of, ProcessorContext},
    provider::{CreditCapabilityRequest, PaymentProvider, ReverseChargeCapabilityRequest},
    transaction::{CreditRequest, ManualCreditRequest, PaymentApiResponse, ReverseChargeRequest},
};

/// Event data key marking credits that were recorded without a provider call.
pub(crate) const MANUAL_KEY: &str = "manual";

/// Gives money back: provider-backed refunds, out-of-band manual credits, and reversals of
/// individual charges.
pub struct CreditProcessor {
    ctx: ProcessorContext,
}

impl CreditProcessor {
    pub fn new(ctx: ProcessorContext) -> Self {
        Self { ctx }
    }

    /// Refunds `request.amount`, spread across the refundable charge events oldest-first.
    pub fn credit(&self, request: &CreditRequest) -> Result<PaymentApiResponse, PaymentApiError> {
        let reference = &request.order_context.order_number;
        let stream = self.ctx.stream(reference)?;
        ensure_stream_currency(&stream, &request.amount)?;
        self.check_refundable_total(&stream, &request.amount)?;

        let refundable = self.ctx.history.refundable_events(&stream)?;
        let mut to_refund = request.amount.clone();
        let mut events = Vec::new();
        for (charge_event, remaining) in refundable {
            if !to_refund.has_balance() {
                break;
            }
            let amount_now = min_of(&to_refund, &remaining)?;
            let instrument = instrument_of(&charge_event)?;
            let provider = self.ctx.provider_for(&instrument)?;
            let capability = provider.plugin().credit_capability().ok_or_else(|| {
                PaymentApiError::CapabilityUnsupported("credit", provider.configuration_name().to_string())
            })?;
            debug!("↩️ Crediting {amount_now} against charge {} for [{reference}]", charge_event.guid);
            let capability_request = CreditCapabilityRequest {
                amount: amount_now.clone(),
                instrument_data: instrument.instrument.data.clone(),
                charge_data: charge_event.payment_event_data.clone(),
                custom_data: request.custom_data.clone(),
                order_context: request.order_context.clone(),
            };
            let base = PaymentEventBuilder::new()
                .with_parent_guid(charge_event.guid.clone())
                .with_payment_type(TransactionType::Credit)
                .with_reference_id(reference.as_str())
                .with_amount(amount_now.clone())
                .with_instrument(instrument.clone());
            let event = match capability.credit(capability_request) {
                Ok(response) => base
                    .with_payment_status(PaymentStatus::Approved)
                    .with_payment_event_data(merged_event_data(&request.custom_data, response.data))
                    .build()?,
                Err(err) => {
                    warn!("↩️ Credit of {amount_now} for [{reference}] failed: {err}");
                    base.with_payment_status(PaymentStatus::Failed)
                        .with_payment_event_data(merged_event_data(&request.custom_data, Default::default()))
                        .with_temporary_failure(err.temporary_failure)
                        .with_internal_message(err.internal_message.as_str())
                        .with_external_message(err.external_message.as_str())
                        .build()?
                },
            };
            self.ctx.append(&event)?;
            events.push(event);
            // The attempt consumes its allocation either way; a failed slice is not retried
            // against another charge.
            to_refund = to_refund.checked_sub(&amount_now)?;
        }
        Ok(PaymentApiResponse::new(events))
    }

    /// Records credits without calling any provider — for out-of-band reconciliation, e.g. money
    /// returned by cheque. The events carry a `manual` marker in their data.
    pub fn manual_credit(&self, request: &ManualCreditRequest) -> Result<PaymentApiResponse, PaymentApiError> {
        let reference = &request.order_context.order_number;
        let stream = self.ctx.stream(reference)?;
        ensure_stream_currency(&stream, &request.amount)?;
        self.check_refundable_total(&stream, &request.amount)?;

        let refundable = self.ctx.history.refundable_events(&stream)?;
        let mut to_refund = request.amount.clone();
        let mut events = Vec::new();
        for (charge_event, remaining) in refundable {
            if !to_refund.has_balance() {
                break;
            }
            let amount_now = min_of(&to_refund, &remaining)?;
            debug!("↩️ Recording manual credit of {amount_now} against charge {} for [{reference}]", charge_event.guid);
            let mut builder = PaymentEventBuilder::new()
                .with_parent_guid(charge_event.guid.clone())
                .with_payment_type(TransactionType::ManualCredit)
                .with_payment_status(PaymentStatus::Approved)
                .with_reference_id(reference.as_str())
                .with_amount(amount_now.clone())
                .with_payment_event_data(merged_event_data(&request.custom_data, Default::default()))
                .with_data_entry(MANUAL_KEY, "true");
            if let Some(instrument) = charge_event.instrument.clone() {
                builder = builder.with_instrument(instrument);
            }
            let event = builder.build()?;
            self.ctx.append(&event)?;
            events.push(event);
            to_refund = to_refund.checked_sub(&amount_now)?;
        }
        Ok(PaymentApiResponse::new(events))
    }

    /// Reverses one specific approved charge, using the provider's reverse-charge capability when
    /// it has one and simulating the reversal with a credit otherwise.
    pub fn reverse_charge(&self, request: &ReverseChargeRequest) -> Result<PaymentApiResponse, PaymentApiError> {
        let reference = &request.order_context.order_number;
        let stream = self.ctx.stream(reference)?;
        let target = stream
            .iter()
            .find(|event| event.guid == request.charge_guid)
            .ok_or(PaymentApiError::NonReversibleEvent)?;
        if target.payment_type != TransactionType::Charge || !target.is_approved() {
            return Err(PaymentApiError::NonReversibleEvent);
        }
        if request.amount.compare(&target.amount)? == Ordering::Greater {
            return Err(PaymentApiError::InsufficientFunds(format!(
                "a reverse charge of {} exceeds the original charge of {}",
                request.amount, target.amount
            )));
        }

        let instrument = instrument_of(target)?;
        let provider = self.ctx.provider_for(&instrument)?;
        let event = match provider.plugin().reverse_charge_capability() {
            Some(capability) => {
                debug!("↩️ Reversing charge {} for [{reference}]", target.guid);
                let capability_request = ReverseChargeCapabilityRequest {
                    instrument_data: instrument.instrument.data.clone(),
                    charge_data: target.payment_event_data.clone(),
                    custom_data: request.custom_data.clone(),
                    order_context: request.order_context.clone(),
                };
                match capability.reverse_charge(capability_request) {
                    Ok(response) => self.build_reversal(request, target, PaymentStatus::Approved, response.data, None)?,
                    Err(err) => {
                        warn!("↩️ Native reverse charge for [{reference}] failed ({err}); falling back to credit");
                        self.reverse_with_credit(request, target, &provider)?
                    },
                }
            },
            None => self.reverse_with_credit(request, target, &provider)?,
        };
        self.ctx.append(&event)?;
        Ok(PaymentApiResponse::new(vec![event]))
    }

    /// Simulates a reverse charge by refunding the charge through the credit capability. The
    /// resulting event is still a REVERSE_CHARGE — the ledger records intent, not mechanics.
    fn reverse_with_credit(
        &self,
        request: &ReverseChargeRequest,
        target: &PaymentEvent,
        provider: &PaymentProvider,
    ) -> Result<PaymentEvent, PaymentApiError> {
        let instrument = instrument_of(target)?;
        let capability = provider.plugin().credit_capability().ok_or_else(|| {
            PaymentApiError::CapabilityUnsupported("reverse charge", provider.configuration_name().to_string())
        })?;
        let capability_request = CreditCapabilityRequest {
            amount: request.amount.clone(),
            instrument_data: instrument.instrument.data.clone(),
            charge_data: target.payment_event_data.clone(),
            custom_data: request.custom_data.clone(),
            order_context: request.order_context.clone(),
        };
        match capability.credit(capability_request) {
            Ok(response) => self.build_reversal(request, target, PaymentStatus::Approved, response.data, None),
            Err(err) => {
                warn!("↩️ Simulated reverse charge for [{}] failed: {err}", request.order_context.order_number);
                self.build_reversal(request, target, PaymentStatus::Failed, Default::default(), Some(&err))
            },
        }
    }

    fn build_reversal(
        &self,
        request: &ReverseChargeRequest,
        target: &PaymentEvent,
        status: PaymentStatus,
        response_data: std::collections::HashMap<String, String>,
        err: Option<&crate::provider::CapabilityError>,
    ) -> Result<PaymentEvent, PaymentApiError> {
        let mut builder = PaymentEventBuilder::new()
            .with_parent_guid(target.guid.clone())
            .with_payment_type(TransactionType::ReverseCharge)
            .with_payment_status(status)
            .with_reference_id(request.order_context.order_number.as_str())
            .with_amount(request.amount.clone())
            .with_payment_event_data(merged_event_data(&request.custom_data, response_data));
        if let Some(instrument) = target.instrument.clone() {
            builder = builder.with_instrument(instrument);
        }
        if let Some(err) = err {
            builder = builder
                .with_temporary_failure(err.temporary_failure)
                .with_internal_message(err.internal_message.as_str())
                .with_external_message(err.external_message.as_str());
        }
        Ok(builder.build()?)
    }

    /// Rejects refunds exceeding what has been charged and not yet refunded.
    fn check_refundable_total(
        &self,
        stream: &[PaymentEvent],
        amount: &MoneyValue,
    ) -> Result<(), PaymentApiError> {
        let charged = self.ctx.history.charged_amount(stream)?;
        let refunded = self.ctx.history.refunded_amount(stream)?;
        let refundable = charged.checked_sub(&refunded)?;
        if amount.compare(&refundable)? == Ordering::Greater {
            return Err(PaymentApiError::InsufficientFunds(format!(
                "a refund of {amount} exceeds the refundable amount of {refundable}"
            )));
        }
        Ok(())
    }
}
