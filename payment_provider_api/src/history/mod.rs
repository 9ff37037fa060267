//! The read-side projector deriving aggregate monetary state from a ledger stream.
//!
//! The ledger is the sole source of truth. Everything here is a pure fold over the event
//! sequence: events are grouped by the reservation that originates their `parent_guid` chain, and
//! each group tracks how much of the reservation is still open, how much was charged against it
//! and how much of those charges was given back. FAILED and SKIPPED events stay in the audit
//! trail but contribute nothing to any aggregate.

use std::collections::HashMap;

use ppa_common::{MoneyError, MoneyValue};
use serde::{Deserialize, Serialize};

use crate::{
    errors::PaymentApiError,
    event::{EventId, PaymentEvent, TransactionType},
    instrument::OrderInstrument,
};

//--------------------------------------    LedgerSummary     --------------------------------------------------------

/// A reservation that still has an open balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenReservation {
    pub guid: EventId,
    pub available: MoneyValue,
}

/// The aggregate state of a reference, derived from its full event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    /// Total still reserved and not yet charged or cancelled.
    pub reserved: MoneyValue,
    /// Total charged, net of reverse charges.
    pub charged: MoneyValue,
    /// Total credited back, including manual credits.
    pub credited: MoneyValue,
    pub open_reservations: Vec<OpenReservation>,
}

//--------------------------------------  PaymentGroupState   --------------------------------------------------------

#[derive(Debug, Clone)]
struct ChargeSlot {
    event: PaymentEvent,
    remaining: MoneyValue,
}

/// Monetary state of one reservation and everything that happened downstream of it.
#[derive(Debug, Clone)]
struct PaymentGroupState {
    root: PaymentEvent,
    available: MoneyValue,
    charged: MoneyValue,
    refunded: MoneyValue,
    reverse_charged: MoneyValue,
    charges: Vec<ChargeSlot>,
}

impl PaymentGroupState {
    fn for_reservation(event: PaymentEvent) -> Self {
        let available = event.amount.clone();
        Self {
            root: event,
            available,
            charged: MoneyValue::default(),
            refunded: MoneyValue::default(),
            reverse_charged: MoneyValue::default(),
            charges: Vec::new(),
        }
    }

    /// A charge recorded without reservation linkage roots its own group.
    fn for_unscoped_charge(event: PaymentEvent) -> Self {
        let amount = event.amount.clone();
        let slot = ChargeSlot { event: event.clone(), remaining: amount.clone() };
        Self {
            root: event,
            available: MoneyValue::default(),
            charged: amount,
            refunded: MoneyValue::default(),
            reverse_charged: MoneyValue::default(),
            charges: vec![slot],
        }
    }
}

//--------------------------------------    PaymentHistory    --------------------------------------------------------

/// Stateless, side-effect-free projector over a ledger slice.
#[derive(Debug, Clone, Copy, Default)]
pub struct PaymentHistory;

impl PaymentHistory {
    pub fn new() -> Self {
        Self
    }

    /// Total amount still reserved and available to charge.
    pub fn available_reserved_amount(&self, ledger: &[PaymentEvent]) -> Result<MoneyValue, PaymentApiError> {
        let groups = self.group_states(ledger)?;
        total(groups.iter().map(|group| &group.available))
    }

    /// Total charged amount, net of reverse charges.
    pub fn charged_amount(&self, ledger: &[PaymentEvent]) -> Result<MoneyValue, PaymentApiError> {
        let groups = self.group_states(ledger)?;
        let charged = total(groups.iter().map(|group| &group.charged))?;
        let reversed = total(groups.iter().map(|group| &group.reverse_charged))?;
        Ok(charged.checked_sub(&reversed)?)
    }

    /// Total refunded/credited amount.
    pub fn refunded_amount(&self, ledger: &[PaymentEvent]) -> Result<MoneyValue, PaymentApiError> {
        let groups = self.group_states(ledger)?;
        total(groups.iter().map(|group| &group.refunded))
    }

    /// The reservation events that still have an open balance, with that balance.
    pub fn chargeable_events(&self, ledger: &[PaymentEvent]) -> Result<Vec<(PaymentEvent, MoneyValue)>, PaymentApiError> {
        let groups = self.group_states(ledger)?;
        Ok(groups
            .into_iter()
            .filter(|group| group.available.has_balance())
            .map(|group| (group.root, group.available))
            .collect())
    }

    /// The charge events that can still be refunded, with the refundable remainder.
    ///
    /// As soon as any reverse charge exists for the reference, nothing is refundable any more.
    pub fn refundable_events(&self, ledger: &[PaymentEvent]) -> Result<Vec<(PaymentEvent, MoneyValue)>, PaymentApiError> {
        let groups = self.group_states(ledger)?;
        let reversed = total(groups.iter().map(|group| &group.reverse_charged))?;
        if reversed.has_balance() {
            return Ok(Vec::new());
        }
        Ok(groups
            .into_iter()
            .flat_map(|group| group.charges)
            .filter(|slot| slot.remaining.has_balance())
            .map(|slot| (slot.event, slot.remaining))
            .collect())
    }

    /// The instruments that can accept further reservations, with their remaining headroom.
    /// `None` headroom means the instrument is unlimited.
    pub fn reservable_instruments(
        &self,
        ledger: &[PaymentEvent],
        instruments: &[OrderInstrument],
    ) -> Result<Vec<(OrderInstrument, Option<MoneyValue>)>, PaymentApiError> {
        let mut reservable = Vec::new();
        for instrument in instruments {
            if instrument.is_unlimited() {
                reservable.push((instrument.clone(), None));
                continue;
            }
            let limit = instrument.limit.clone().unwrap_or_default();
            let scoped: Vec<PaymentEvent> = ledger
                .iter()
                .filter(|event| {
                    event.instrument.as_ref().map(|used| used.guid() == instrument.guid()).unwrap_or(false)
                })
                .cloned()
                .collect();
            let available = self.available_reserved_amount(&scoped)?;
            let charged = self.charged_amount(&scoped)?;
            let refunded = self.refunded_amount(&scoped)?;
            let used = available.checked_add(&charged)?.checked_sub(&refunded)?;
            let headroom = limit.checked_sub(&used)?;
            if headroom.has_balance() {
                reservable.push((instrument.clone(), Some(headroom)));
            }
        }
        Ok(reservable)
    }

    /// The aggregate for a reference: open reserved total, charged and credited totals, and the
    /// reservations that are still open.
    pub fn summarize(&self, ledger: &[PaymentEvent]) -> Result<LedgerSummary, PaymentApiError> {
        let groups = self.group_states(ledger)?;
        let reserved = total(groups.iter().map(|group| &group.available))?;
        let gross_charged = total(groups.iter().map(|group| &group.charged))?;
        let reversed = total(groups.iter().map(|group| &group.reverse_charged))?;
        let credited = total(groups.iter().map(|group| &group.refunded))?;
        let open_reservations = groups
            .iter()
            .filter(|group| group.available.has_balance())
            .map(|group| OpenReservation { guid: group.root.guid.clone(), available: group.available.clone() })
            .collect();
        Ok(LedgerSummary { reserved, charged: gross_charged.checked_sub(&reversed)?, credited, open_reservations })
    }

    /// Folds the stream into per-reservation group states, following `parent_guid` chains.
    fn group_states(&self, ledger: &[PaymentEvent]) -> Result<Vec<PaymentGroupState>, PaymentApiError> {
        validate_single_currency(ledger)?;
        let mut groups: Vec<PaymentGroupState> = Vec::new();
        // The group each seen event resolved to; `None` for events rooted in a non-approved chain.
        let mut owner: HashMap<&str, Option<usize>> = HashMap::new();
        for event in ledger {
            let parent_group = match &event.parent_guid {
                None => None,
                Some(parent) => match owner.get(parent.as_str()) {
                    Some(group) => *group,
                    None => return Err(inconsistent(event, "parent event not found in the stream")),
                },
            };
            if !event.is_approved() {
                owner.insert(event.guid.as_str(), parent_group);
                continue;
            }
            match event.payment_type {
                TransactionType::Reserve => {
                    groups.push(PaymentGroupState::for_reservation(event.clone()));
                    owner.insert(event.guid.as_str(), Some(groups.len() - 1));
                },
                TransactionType::ModifyReserve => {
                    let index = parent_group
                        .ok_or_else(|| inconsistent(event, "modification is not linked to an open reservation"))?;
                    groups[index].available = event.amount.clone();
                    owner.insert(event.guid.as_str(), Some(index));
                },
                TransactionType::CancelReserve => {
                    let index = parent_group
                        .ok_or_else(|| inconsistent(event, "cancellation is not linked to an open reservation"))?;
                    groups[index].available = MoneyValue::zero(event.amount.currency());
                    owner.insert(event.guid.as_str(), Some(index));
                },
                TransactionType::Charge => {
                    let index = match parent_group {
                        Some(index) => {
                            let group = &mut groups[index];
                            group.charged = group.charged.checked_add(&event.amount)?;
                            group.available = sub_clamped(&group.available, &event.amount)?;
                            group.charges.push(ChargeSlot { event: event.clone(), remaining: event.amount.clone() });
                            index
                        },
                        None => {
                            groups.push(PaymentGroupState::for_unscoped_charge(event.clone()));
                            groups.len() - 1
                        },
                    };
                    owner.insert(event.guid.as_str(), Some(index));
                },
                TransactionType::Credit | TransactionType::ManualCredit => {
                    let index =
                        parent_group.ok_or_else(|| inconsistent(event, "credit is not linked to a charge"))?;
                    let group = &mut groups[index];
                    group.refunded = group.refunded.checked_add(&event.amount)?;
                    if let Some(slot) = find_slot(group, event.parent_guid.as_ref()) {
                        slot.remaining = sub_clamped(&slot.remaining, &event.amount)?;
                    }
                    owner.insert(event.guid.as_str(), Some(index));
                },
                TransactionType::ReverseCharge => {
                    let index = parent_group
                        .ok_or_else(|| inconsistent(event, "reverse charge is not linked to a charge"))?;
                    let group = &mut groups[index];
                    group.reverse_charged = group.reverse_charged.checked_add(&event.amount)?;
                    if let Some(slot) = find_slot(group, event.parent_guid.as_ref()) {
                        slot.remaining = MoneyValue::zero(event.amount.currency());
                    }
                    owner.insert(event.guid.as_str(), Some(index));
                },
            }
        }
        Ok(groups)
    }
}

fn find_slot<'a>(group: &'a mut PaymentGroupState, guid: Option<&EventId>) -> Option<&'a mut ChargeSlot> {
    let guid = guid?;
    group.charges.iter_mut().find(|slot| &slot.event.guid == guid)
}

fn total<'a, I: Iterator<Item = &'a MoneyValue>>(values: I) -> Result<MoneyValue, PaymentApiError> {
    let mut sum = MoneyValue::default();
    for value in values {
        sum = sum.checked_add(value)?;
    }
    Ok(sum)
}

/// Subtraction clamped at zero: the aggregate invariant says no balance ever goes negative.
fn sub_clamped(left: &MoneyValue, right: &MoneyValue) -> Result<MoneyValue, MoneyError> {
    let result = left.checked_sub(right)?;
    if result.is_negative() {
        Ok(MoneyValue::zero(result.currency()))
    } else {
        Ok(result)
    }
}

fn validate_single_currency(ledger: &[PaymentEvent]) -> Result<(), PaymentApiError> {
    let mut iter = ledger.iter();
    let first = match iter.next() {
        Some(event) => &event.amount,
        None => return Ok(()),
    };
    for event in iter {
        if !first.same_currency(&event.amount) {
            return Err(MoneyError::CurrencyMismatch {
                left: first.currency().to_string(),
                right: event.amount.currency().to_string(),
            }
            .into());
        }
    }
    Ok(())
}

fn inconsistent(event: &PaymentEvent, reason: &str) -> PaymentApiError {
    PaymentApiError::LedgerInconsistent {
        reference: event.reference_id.clone(),
        reason: format!("{reason} (event {})", event.guid),
    }
}

#[cfg(test)]
mod test {
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::event::{PaymentEventBuilder, PaymentStatus};

    const REF: &str = "order-77";

    fn usd(amount: Decimal) -> MoneyValue {
        MoneyValue::new(amount, "USD")
    }

    fn event(
        guid: &str,
        parent: Option<&str>,
        payment_type: TransactionType,
        status: PaymentStatus,
        amount: MoneyValue,
    ) -> PaymentEvent {
        let mut builder = PaymentEventBuilder::new()
            .with_guid(EventId::from(guid))
            .with_payment_type(payment_type)
            .with_payment_status(status)
            .with_reference_id(REF)
            .with_amount(amount);
        if let Some(parent) = parent {
            builder = builder.with_parent_guid(EventId::from(parent));
        }
        builder.build().unwrap()
    }

    #[test]
    fn reserve_then_charge_splits_open_and_charged() {
        let ledger = vec![
            event("r1", None, TransactionType::Reserve, PaymentStatus::Approved, usd(dec!(100))),
            event("c1", Some("r1"), TransactionType::Charge, PaymentStatus::Approved, usd(dec!(40))),
        ];
        let history = PaymentHistory::new();
        let summary = history.summarize(&ledger).unwrap();
        assert_eq!(summary.reserved, usd(dec!(60)));
        assert_eq!(summary.charged, usd(dec!(40)));
        assert!(summary.credited.is_zero());
        assert_eq!(summary.open_reservations.len(), 1);
        assert_eq!(summary.open_reservations[0].guid.as_str(), "r1");
    }

    #[test]
    fn failed_reservation_contributes_nothing() {
        let ledger =
            vec![event("r1", None, TransactionType::Reserve, PaymentStatus::Failed, usd(dec!(100)))];
        let history = PaymentHistory::new();
        assert!(history.available_reserved_amount(&ledger).unwrap().is_zero());
        assert!(history.chargeable_events(&ledger).unwrap().is_empty());
    }

    #[test]
    fn cancel_nets_out_its_reservation() {
        let ledger = vec![
            event("r1", None, TransactionType::Reserve, PaymentStatus::Approved, usd(dec!(100))),
            event("r2", None, TransactionType::Reserve, PaymentStatus::Approved, usd(dec!(30))),
            event("x1", Some("r1"), TransactionType::CancelReserve, PaymentStatus::Approved, usd(dec!(100))),
        ];
        let history = PaymentHistory::new();
        assert_eq!(history.available_reserved_amount(&ledger).unwrap(), usd(dec!(30)));
        let open = history.chargeable_events(&ledger).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].0.guid.as_str(), "r2");
    }

    #[test]
    fn modification_replaces_the_open_balance() {
        let ledger = vec![
            event("r1", None, TransactionType::Reserve, PaymentStatus::Approved, usd(dec!(100))),
            event("m1", Some("r1"), TransactionType::ModifyReserve, PaymentStatus::Approved, usd(dec!(75))),
        ];
        let history = PaymentHistory::new();
        assert_eq!(history.available_reserved_amount(&ledger).unwrap(), usd(dec!(75)));

        // A skipped modification leaves the balance alone.
        let ledger = vec![
            event("r1", None, TransactionType::Reserve, PaymentStatus::Approved, usd(dec!(100))),
            event("m1", Some("r1"), TransactionType::ModifyReserve, PaymentStatus::Skipped, usd(dec!(75))),
        ];
        assert_eq!(history.available_reserved_amount(&ledger).unwrap(), usd(dec!(100)));
    }

    #[test]
    fn credits_accumulate_against_their_charges() {
        let ledger = vec![
            event("r1", None, TransactionType::Reserve, PaymentStatus::Approved, usd(dec!(100))),
            event("c1", Some("r1"), TransactionType::Charge, PaymentStatus::Approved, usd(dec!(100))),
            event("k1", Some("c1"), TransactionType::Credit, PaymentStatus::Approved, usd(dec!(30))),
            event("k2", Some("c1"), TransactionType::ManualCredit, PaymentStatus::Approved, usd(dec!(20))),
        ];
        let history = PaymentHistory::new();
        assert_eq!(history.refunded_amount(&ledger).unwrap(), usd(dec!(50)));
        let refundable = history.refundable_events(&ledger).unwrap();
        assert_eq!(refundable.len(), 1);
        assert_eq!(refundable[0].0.guid.as_str(), "c1");
        assert_eq!(refundable[0].1, usd(dec!(50)));
    }

    #[test]
    fn reverse_charge_nets_the_charge_and_blocks_refunds() {
        let ledger = vec![
            event("r1", None, TransactionType::Reserve, PaymentStatus::Approved, usd(dec!(50))),
            event("c1", Some("r1"), TransactionType::Charge, PaymentStatus::Approved, usd(dec!(50))),
            event("v1", Some("c1"), TransactionType::ReverseCharge, PaymentStatus::Approved, usd(dec!(50))),
        ];
        let history = PaymentHistory::new();
        assert!(history.charged_amount(&ledger).unwrap().is_zero());
        assert!(history.refundable_events(&ledger).unwrap().is_empty());
    }

    #[test]
    fn unscoped_charges_root_their_own_group() {
        let ledger = vec![event("c1", None, TransactionType::Charge, PaymentStatus::Approved, usd(dec!(25)))];
        let history = PaymentHistory::new();
        assert_eq!(history.charged_amount(&ledger).unwrap(), usd(dec!(25)));
        assert!(history.available_reserved_amount(&ledger).unwrap().is_zero());
        let refundable = history.refundable_events(&ledger).unwrap();
        assert_eq!(refundable[0].1, usd(dec!(25)));
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let ledger = vec![event(
            "c1",
            Some("ghost"),
            TransactionType::Charge,
            PaymentStatus::Approved,
            usd(dec!(25)),
        )];
        let history = PaymentHistory::new();
        let err = history.charged_amount(&ledger).unwrap_err();
        assert!(matches!(err, PaymentApiError::LedgerInconsistent { .. }));
    }

    #[test]
    fn mixed_currencies_are_rejected() {
        let ledger = vec![
            event("r1", None, TransactionType::Reserve, PaymentStatus::Approved, usd(dec!(100))),
            event("r2", None, TransactionType::Reserve, PaymentStatus::Approved, MoneyValue::new(dec!(10), "EUR")),
        ];
        let history = PaymentHistory::new();
        assert!(matches!(history.summarize(&ledger), Err(PaymentApiError::Money(_))));
    }

    #[test]
    fn reservable_headroom_respects_limits() {
        let instrument = crate::instrument::PaymentInstrument::new("Visa ending 4242", "cfg-1");
        let limited = OrderInstrument::with_limit(instrument.clone(), usd(dec!(100)));
        let mut reserve = event("r1", None, TransactionType::Reserve, PaymentStatus::Approved, usd(dec!(60)));
        reserve.instrument = Some(limited.clone());
        let unlimited =
            OrderInstrument::unlimited(crate::instrument::PaymentInstrument::new("Amex ending 0005", "cfg-1"));

        let history = PaymentHistory::new();
        let reservable =
            history.reservable_instruments(&[reserve], &[limited.clone(), unlimited.clone()]).unwrap();
        assert_eq!(reservable.len(), 2);
        assert_eq!(reservable[0].0.guid(), limited.guid());
        assert_eq!(reservable[0].1, Some(usd(dec!(40))));
        assert_eq!(reservable[1].1, None);
    }
}
