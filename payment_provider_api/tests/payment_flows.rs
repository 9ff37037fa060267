//! End-to-end transaction flows driven through the workflow facade against the in-memory stores.

use std::collections::HashMap;

use payment_provider_api::{
    errors::PaymentApiError,
    event::{PaymentStatus, TransactionType},
    instrument::OrderInstrument,
    traits::InstrumentStore,
    test_utils::{
        harness,
        init_logging,
        order_context,
        order_instrument,
        usd,
        Outcome,
        Script,
        ScriptedClientInteraction,
        ScriptedInstrumentCreation,
        TestHarness,
        TestPlugin,
    },
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
        IDEMPOTENCY_KEY,
    },
    MoneyValue,
    PaymentEvent,
};

const ORDER: &str = "order-1001";

fn reserve(harness: &TestHarness, instrument: &OrderInstrument, amount: MoneyValue) -> PaymentApiResponse {
    harness
        .workflow
        .reserve(&ReserveRequest {
            instrument: instrument.clone(),
            amount: amount.clone(),
            order_context: order_context(ORDER, amount),
            custom_data: HashMap::new(),
        })
        .unwrap()
}

fn charge(harness: &TestHarness, amount: MoneyValue) -> Result<PaymentApiResponse, PaymentApiError> {
    harness.workflow.charge_payment(&ChargeRequest {
        amount: amount.clone(),
        order_context: order_context(ORDER, amount),
        custom_data: HashMap::new(),
        final_payment: false,
    })
}

fn modify_to(harness: &TestHarness, instrument: &OrderInstrument, amount: MoneyValue) -> Result<PaymentApiResponse, PaymentApiError> {
    harness.workflow.modify_reservation(&ModifyReservationRequest {
        instruments: vec![instrument.clone()],
        amount: amount.clone(),
        order_context: order_context(ORDER, amount),
        custom_data: HashMap::new(),
    })
}

fn credit(harness: &TestHarness, amount: MoneyValue) -> Result<PaymentApiResponse, PaymentApiError> {
    harness.workflow.credit(&CreditRequest {
        amount: amount.clone(),
        order_context: order_context(ORDER, amount),
        custom_data: HashMap::new(),
    })
}

fn approved_events(response: &PaymentApiResponse, payment_type: TransactionType) -> Vec<&PaymentEvent> {
    response
        .events
        .iter()
        .filter(|event| event.payment_type == payment_type && event.is_approved())
        .collect()
}

#[test]
fn reserve_then_partial_charge_reports_open_and_charged() {
    init_logging();
    let harness = harness(TestPlugin::approving());
    let instrument = order_instrument();

    let reserve_response = reserve(&harness, &instrument, usd(100));
    assert!(reserve_response.is_success());
    let reservation_guid = reserve_response.events[0].guid.clone();

    let charge_response = charge(&harness, usd(40)).unwrap();
    assert!(charge_response.is_success());
    let charges = approved_events(&charge_response, TransactionType::Charge);
    assert_eq!(charges.len(), 1);
    assert_eq!(charges[0].parent_guid.as_ref(), Some(&reservation_guid));

    let summary = harness.workflow.aggregate_for(ORDER).unwrap();
    assert_eq!(summary.reserved, usd(60));
    assert_eq!(summary.charged, usd(40));
    assert!(summary.credited.is_zero());
    assert_eq!(summary.open_reservations.len(), 1);
    assert_eq!(summary.open_reservations[0].guid, reservation_guid);
}

#[test]
fn reservation_timeout_is_recorded_as_temporary_failure() {
    init_logging();
    let harness = harness(TestPlugin::approving().with_reserve(Script::timeout()));
    let instrument = order_instrument();

    let response = reserve(&harness, &instrument, usd(100));
    assert!(!response.is_success());
    let event = response.last_failure().unwrap();
    assert_eq!(event.payment_type, TransactionType::Reserve);
    assert_eq!(event.payment_status, PaymentStatus::Failed);
    assert!(event.temporary_failure);
    assert!(event.internal_message.is_some());

    // The failed attempt is on the ledger but contributes nothing to the open total.
    assert_eq!(harness.ledger.all_events().len(), 1);
    let summary = harness.workflow.aggregate_for(ORDER).unwrap();
    assert!(summary.reserved.is_zero());
    assert!(summary.open_reservations.is_empty());
}

#[test]
fn charge_exceeding_reserved_is_rejected_without_events() {
    init_logging();
    let harness = harness(TestPlugin::approving());
    let instrument = order_instrument();
    reserve(&harness, &instrument, usd(50));

    let err = charge(&harness, usd(80)).unwrap_err();
    assert!(matches!(err, PaymentApiError::InsufficientFunds(_)));
    // Only the reservation is on the ledger; the rejected charge left no trace.
    assert_eq!(harness.ledger.all_events().len(), 1);
}

#[test]
fn charge_draws_down_multiple_reservations_in_stream_order() {
    init_logging();
    let harness = harness(TestPlugin::approving());
    let instrument = order_instrument();
    let first = reserve(&harness, &instrument, usd(60)).events[0].guid.clone();
    let second = reserve(&harness, &instrument, usd(40)).events[0].guid.clone();

    let response = charge(&harness, usd(100)).unwrap();
    let charges = approved_events(&response, TransactionType::Charge);
    assert_eq!(charges.len(), 2);
    assert_eq!(charges[0].parent_guid.as_ref(), Some(&first));
    assert_eq!(charges[0].amount, usd(60));
    assert_eq!(charges[1].parent_guid.as_ref(), Some(&second));
    assert_eq!(charges[1].amount, usd(40));

    let summary = harness.workflow.aggregate_for(ORDER).unwrap();
    assert!(summary.reserved.is_zero());
    assert_eq!(summary.charged, usd(100));
}

#[test]
fn failed_charge_is_retried_on_a_fresh_reservation() {
    init_logging();
    let plugin = TestPlugin::approving().with_charge(Script::sequence([Outcome::Timeout], Outcome::Approve));
    let harness = harness(plugin);
    let instrument = order_instrument();
    reserve(&harness, &instrument, usd(100));

    let response = charge(&harness, usd(100)).unwrap();
    let types: Vec<(TransactionType, PaymentStatus)> =
        response.events.iter().map(|event| (event.payment_type, event.payment_status)).collect();
    assert_eq!(types, vec![
        (TransactionType::Charge, PaymentStatus::Failed),
        (TransactionType::CancelReserve, PaymentStatus::Approved),
        (TransactionType::Reserve, PaymentStatus::Approved),
        (TransactionType::Charge, PaymentStatus::Approved),
    ]);
    assert!(response.events[0].temporary_failure);

    let summary = harness.workflow.aggregate_for(ORDER).unwrap();
    assert_eq!(summary.charged, usd(100));
    assert!(summary.reserved.is_zero());
}

#[test]
fn native_and_simulated_modification_converge_to_the_same_open_total() {
    init_logging();
    // Native path: the provider modifies the reservation in place.
    let native = harness(TestPlugin::approving());
    let instrument = order_instrument();
    reserve(&native, &instrument, usd(100));
    let response = modify_to(&native, &instrument, usd(70)).unwrap();
    let modifications = approved_events(&response, TransactionType::ModifyReserve);
    assert_eq!(modifications.len(), 1);
    assert_eq!(modifications[0].amount, usd(70));

    // Simulated path: no modify capability, so a replacement hold is placed and the original
    // cancelled.
    let simulated = harness(TestPlugin::approving().without_modify());
    let instrument = order_instrument();
    let original = reserve(&simulated, &instrument, usd(100)).events[0].guid.clone();
    let response = modify_to(&simulated, &instrument, usd(70)).unwrap();
    let replacements = approved_events(&response, TransactionType::Reserve);
    assert_eq!(replacements.len(), 1);
    assert_eq!(replacements[0].amount, usd(70));
    assert_eq!(replacements[0].payment_event_data.get("simulated-modify").map(String::as_str), Some("true"));
    let cancellations = approved_events(&response, TransactionType::CancelReserve);
    assert_eq!(cancellations.len(), 1);
    assert_eq!(cancellations[0].parent_guid.as_ref().unwrap(), &original);

    let native_summary = native.workflow.aggregate_for(ORDER).unwrap();
    let simulated_summary = simulated.workflow.aggregate_for(ORDER).unwrap();
    assert_eq!(native_summary.reserved, usd(70));
    assert_eq!(simulated_summary.reserved, usd(70));
}

#[test]
fn modification_increase_requires_an_unlimited_instrument() {
    init_logging();
    let harness = harness(TestPlugin::approving());
    let limited = OrderInstrument::with_limit(order_instrument().instrument, usd(100));
    reserve(&harness, &limited, usd(100));

    let err = modify_to(&harness, &limited, usd(150)).unwrap_err();
    assert!(matches!(err, PaymentApiError::UnlimitedInstrumentNotFound));
}

#[test]
fn modification_decrease_spreads_over_reservations() {
    init_logging();
    let harness = harness(TestPlugin::approving());
    let instrument = order_instrument();
    let first = reserve(&harness, &instrument, usd(50)).events[0].guid.clone();
    reserve(&harness, &instrument, usd(30));

    // 80 -> 30 swallows the first reservation entirely.
    let response = modify_to(&harness, &instrument, usd(30)).unwrap();
    let cancellations = approved_events(&response, TransactionType::CancelReserve);
    assert_eq!(cancellations.len(), 1);
    assert_eq!(cancellations[0].parent_guid.as_ref().unwrap(), &first);
    assert_eq!(harness.workflow.aggregate_for(ORDER).unwrap().reserved, usd(30));

    // 30 -> 10 shrinks the second one natively.
    let response = modify_to(&harness, &instrument, usd(10)).unwrap();
    let modifications = approved_events(&response, TransactionType::ModifyReserve);
    assert_eq!(modifications.len(), 1);
    assert_eq!(modifications[0].amount, usd(10));
    assert_eq!(harness.workflow.aggregate_for(ORDER).unwrap().reserved, usd(10));
}

#[test]
fn cancel_all_reservations_cancels_each_open_hold() {
    init_logging();
    let harness = harness(TestPlugin::approving());
    let instrument = order_instrument();
    let mut open_guids: Vec<_> =
        [30, 20, 50].iter().map(|amount| reserve(&harness, &instrument, usd(*amount)).events[0].guid.clone()).collect();

    let response = harness
        .workflow
        .cancel_all_reservations(&CancelAllReservationsRequest {
            order_context: order_context(ORDER, usd(100)),
            custom_data: HashMap::new(),
        })
        .unwrap();
    let cancellations = approved_events(&response, TransactionType::CancelReserve);
    assert_eq!(cancellations.len(), 3);
    let mut parents: Vec<_> = cancellations.iter().map(|event| event.parent_guid.clone().unwrap()).collect();
    parents.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    open_guids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    assert_eq!(parents, open_guids);
    assert!(harness.workflow.aggregate_for(ORDER).unwrap().reserved.is_zero());

    // With nothing open, a modification back up simply places a new reservation.
    let response = modify_to(&harness, &instrument, usd(40)).unwrap();
    assert_eq!(approved_events(&response, TransactionType::Reserve).len(), 1);
    assert_eq!(harness.workflow.aggregate_for(ORDER).unwrap().reserved, usd(40));
}

#[test]
fn cancellation_without_the_capability_is_skipped_not_failed() {
    init_logging();
    let harness = harness(TestPlugin::approving().without_cancel());
    let instrument = order_instrument();
    let reservation_guid = reserve(&harness, &instrument, usd(100)).events[0].guid.clone();

    let response = harness
        .workflow
        .cancel_reservation(&CancelReservationRequest {
            reservation_guid,
            order_context: order_context(ORDER, usd(100)),
            custom_data: HashMap::new(),
        })
        .unwrap();
    assert!(response.is_success());
    assert_eq!(response.events[0].payment_status, PaymentStatus::Skipped);
    // The hold was not released; it stays on the books until it lapses at the provider.
    assert_eq!(harness.workflow.aggregate_for(ORDER).unwrap().reserved, usd(100));
}

#[test]
fn credit_spreads_across_charges_and_respects_the_ceiling() {
    init_logging();
    let harness = harness(TestPlugin::approving());
    let instrument = order_instrument();
    reserve(&harness, &instrument, usd(100));
    let first_charge = charge(&harness, usd(60)).unwrap().events[0].guid.clone();
    let second_charge = charge(&harness, usd(40)).unwrap().events[0].guid.clone();

    let response = credit(&harness, usd(80)).unwrap();
    let credits = approved_events(&response, TransactionType::Credit);
    assert_eq!(credits.len(), 2);
    assert_eq!(credits[0].parent_guid.as_ref(), Some(&first_charge));
    assert_eq!(credits[0].amount, usd(60));
    assert_eq!(credits[1].parent_guid.as_ref(), Some(&second_charge));
    assert_eq!(credits[1].amount, usd(20));
    assert_eq!(harness.workflow.aggregate_for(ORDER).unwrap().credited, usd(80));

    let err = credit(&harness, usd(30)).unwrap_err();
    assert!(matches!(err, PaymentApiError::InsufficientFunds(_)));
}

#[test]
fn manual_credit_calls_no_provider_and_is_marked() {
    init_logging();
    // The plugin cannot credit at all; a manual credit must still go through.
    let plugin = TestPlugin::new().with_reserve(Script::approve()).with_charge(Script::approve());
    let harness = harness(plugin);
    let instrument = order_instrument();
    reserve(&harness, &instrument, usd(50));
    charge(&harness, usd(50)).unwrap();

    let response = harness
        .workflow
        .manual_credit(&ManualCreditRequest {
            amount: usd(30),
            order_context: order_context(ORDER, usd(30)),
            custom_data: HashMap::new(),
        })
        .unwrap();
    let credits = approved_events(&response, TransactionType::ManualCredit);
    assert_eq!(credits.len(), 1);
    assert_eq!(credits[0].payment_event_data.get("manual").map(String::as_str), Some("true"));
    assert_eq!(harness.workflow.aggregate_for(ORDER).unwrap().credited, usd(30));
}

#[test]
fn reverse_charge_nets_out_exactly_one_charge() {
    init_logging();
    let harness = harness(TestPlugin::approving());
    let instrument = order_instrument();
    reserve(&harness, &instrument, usd(50));
    let charge_guid = charge(&harness, usd(50)).unwrap().events[0].guid.clone();

    let err = harness
        .workflow
        .reverse_charge(&ReverseChargeRequest {
            charge_guid: charge_guid.clone(),
            amount: usd(70),
            order_context: order_context(ORDER, usd(70)),
            custom_data: HashMap::new(),
        })
        .unwrap_err();
    assert!(matches!(err, PaymentApiError::InsufficientFunds(_)));

    let response = harness
        .workflow
        .reverse_charge(&ReverseChargeRequest {
            charge_guid: charge_guid.clone(),
            amount: usd(50),
            order_context: order_context(ORDER, usd(50)),
            custom_data: HashMap::new(),
        })
        .unwrap();
    let reversal = &response.events[0];
    assert_eq!(reversal.payment_type, TransactionType::ReverseCharge);
    assert_eq!(reversal.parent_guid.as_ref(), Some(&charge_guid));
    assert_eq!(reversal.amount, usd(50));
    assert_eq!(reversal.amount.currency(), "USD");
    assert!(harness.workflow.aggregate_for(ORDER).unwrap().charged.is_zero());

    // After a reverse charge the reference is no longer refundable.
    let err = credit(&harness, usd(10)).unwrap_err();
    assert!(matches!(err, PaymentApiError::InsufficientFunds(_)));
}

#[test]
fn reverse_charge_falls_back_to_the_credit_capability() {
    init_logging();
    let harness = harness(TestPlugin::approving().without_reverse_charge());
    let instrument = order_instrument();
    reserve(&harness, &instrument, usd(50));
    let charge_guid = charge(&harness, usd(50)).unwrap().events[0].guid.clone();

    let response = harness
        .workflow
        .reverse_charge(&ReverseChargeRequest {
            charge_guid: charge_guid.clone(),
            amount: usd(50),
            order_context: order_context(ORDER, usd(50)),
            custom_data: HashMap::new(),
        })
        .unwrap();
    assert!(response.is_success());
    assert_eq!(response.events[0].payment_type, TransactionType::ReverseCharge);
    assert!(harness.workflow.aggregate_for(ORDER).unwrap().charged.is_zero());
}

#[test]
fn reversing_a_non_charge_event_is_rejected() {
    init_logging();
    let harness = harness(TestPlugin::approving());
    let instrument = order_instrument();
    let reservation_guid = reserve(&harness, &instrument, usd(50)).events[0].guid.clone();

    let err = harness
        .workflow
        .reverse_charge(&ReverseChargeRequest {
            charge_guid: reservation_guid,
            amount: usd(50),
            order_context: order_context(ORDER, usd(50)),
            custom_data: HashMap::new(),
        })
        .unwrap_err();
    assert!(matches!(err, PaymentApiError::NonReversibleEvent));
}

#[test]
fn idempotency_key_is_carried_into_event_data() {
    init_logging();
    let harness = harness(TestPlugin::approving());
    let instrument = order_instrument();
    let mut custom_data = HashMap::new();
    custom_data.insert(IDEMPOTENCY_KEY.to_string(), "retry-7c1d".to_string());

    let response = harness
        .workflow
        .reserve(&ReserveRequest {
            instrument,
            amount: usd(25),
            order_context: order_context(ORDER, usd(25)),
            custom_data,
        })
        .unwrap();
    let event = &response.events[0];
    assert_eq!(event.payment_event_data.get(IDEMPOTENCY_KEY).map(String::as_str), Some("retry-7c1d"));
}

#[test]
fn single_reserve_instruments_defer_to_the_final_charge() {
    init_logging();
    let harness = harness(TestPlugin::approving().with_single_reserve_per_instrument());
    let instrument = order_instrument();
    reserve(&harness, &instrument, usd(100));

    let interim = charge(&harness, usd(40)).unwrap();
    assert!(interim.events.is_empty());
    assert!(harness.workflow.aggregate_for(ORDER).unwrap().charged.is_zero());

    let final_response = harness
        .workflow
        .charge_payment(&ChargeRequest {
            amount: usd(100),
            order_context: order_context(ORDER, usd(100)),
            custom_data: HashMap::new(),
            final_payment: true,
        })
        .unwrap();
    assert!(final_response.is_success());
    assert_eq!(harness.workflow.aggregate_for(ORDER).unwrap().charged, usd(100));
}

#[test]
fn mixed_currency_operations_are_rejected() {
    init_logging();
    let harness = harness(TestPlugin::approving());
    let instrument = order_instrument();
    reserve(&harness, &instrument, usd(100));

    let err = harness
        .workflow
        .reserve(&ReserveRequest {
            instrument: instrument.clone(),
            amount: MoneyValue::new(10.into(), "EUR"),
            order_context: order_context(ORDER, MoneyValue::new(10.into(), "EUR")),
            custom_data: HashMap::new(),
        })
        .unwrap_err();
    assert!(matches!(err, PaymentApiError::Money(_)));
    assert_eq!(harness.ledger.all_events().len(), 1);
}

#[test]
fn instrument_wizard_walks_to_a_stored_instrument() {
    init_logging();
    let creation = ScriptedInstrumentCreation {
        fields: vec!["card-number".to_string()],
        details: HashMap::from([("token".to_string(), "tok_9f3a".to_string())]),
        failure: None,
    };
    let mut instructions = payment_provider_api::provider::PicInstructions::default();
    instructions.payload.insert("redirect-url".to_string(), "https://pay.example/challenge".to_string());
    let interaction = ScriptedClientInteraction { fields: vec!["challenge".to_string()], instructions };
    let plugin = TestPlugin::approving().with_instrument_creation(creation).with_client_interaction(interaction);
    let harness = harness(plugin);

    let fields_context = payment_provider_api::provider::PicFieldsRequestContext {
        currency: "USD".to_string(),
        ..Default::default()
    };
    let context = payment_provider_api::provider::PicRequestContext {
        currency: "USD".to_string(),
        ..Default::default()
    };
    let config = payment_provider_api::test_utils::TEST_CONFIGURATION_GUID;

    let instruction_fields = harness.workflow.pic_instruction_fields(config, &fields_context).unwrap();
    assert_eq!(instruction_fields.fields, vec!["challenge".to_string()]);

    let instructions = harness.workflow.pic_instructions(config, &HashMap::new(), &context).unwrap();
    assert_eq!(
        instructions.payload.get("redirect-url").map(String::as_str),
        Some("https://pay.example/challenge")
    );

    let creation_fields = harness.workflow.pic_fields(config, &fields_context).unwrap();
    assert!(creation_fields.fields.contains(&"card-number".to_string()));
    assert!(creation_fields.fields.contains(&"display-name".to_string()));
    assert!(creation_fields.saveable);

    let form = HashMap::from([
        ("display-name".to_string(), "My Visa".to_string()),
        ("card-number".to_string(), "4242424242424242".to_string()),
    ]);
    let guid = harness.workflow.create_instrument(config, &form, &context).unwrap();
    let stored = harness.instruments.find_by_guid(&guid).unwrap();
    assert_eq!(stored.name, "My Visa");
    assert_eq!(stored.data.get("token").map(String::as_str), Some("tok_9f3a"));
    assert_eq!(stored.provider_configuration_guid, config);

    let err = harness.workflow.create_instrument(config, &HashMap::new(), &context).unwrap_err();
    assert!(matches!(err, PaymentApiError::EmptyInstrumentName));
}

#[test]
fn instrument_wizard_defaults_without_capabilities() {
    init_logging();
    let harness = harness(TestPlugin::new());
    let config = payment_provider_api::test_utils::TEST_CONFIGURATION_GUID;
    let fields_context = payment_provider_api::provider::PicFieldsRequestContext::default();
    let context = payment_provider_api::provider::PicRequestContext::default();

    let instruction_fields = harness.workflow.pic_instruction_fields(config, &fields_context).unwrap();
    assert!(instruction_fields.fields.is_empty());

    let creation_fields = harness.workflow.pic_fields(config, &fields_context).unwrap();
    assert_eq!(creation_fields.fields, vec!["display-name".to_string()]);
    assert!(creation_fields.saveable);

    let form = HashMap::from([("display-name".to_string(), "Backup card".to_string())]);
    let guid = harness.workflow.create_instrument(config, &form, &context).unwrap();
    let stored = harness.instruments.find_by_guid(&guid).unwrap();
    assert_eq!(stored.name, "Backup card");
    assert!(stored.data.is_empty());
}

#[test]
fn aggregate_for_an_unknown_reference_is_empty() {
    init_logging();
    let harness = harness(TestPlugin::approving());
    let summary = harness.workflow.aggregate_for("order-never-seen").unwrap();
    assert!(summary.reserved.is_zero());
    assert!(summary.charged.is_zero());
    assert!(summary.credited.is_zero());
    assert!(summary.open_reservations.is_empty());
}
