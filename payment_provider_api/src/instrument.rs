use std::collections::HashMap;

use ppa_common::MoneyValue;
use serde::{Deserialize, Serialize};

use crate::event::EventId;

//--------------------------------------  PaymentInstrument   --------------------------------------------------------

/// A stored, tokenized payment method reference created through a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentInstrument {
    pub guid: String,
    /// Customer-facing display name, e.g. "Visa ending 4242".
    pub name: String,
    /// The provider configuration this instrument was created under.
    pub provider_configuration_guid: String,
    /// Opaque provider payload captured at creation time (tokens, references).
    pub data: HashMap<String, String>,
    /// Providers that only permit one open reservation per instrument set this at creation time;
    /// the charge and modify processors skip intermediate operations for such instruments.
    pub single_reserve_per_instrument: bool,
}

impl PaymentInstrument {
    pub fn new<S1, S2>(name: S1, provider_configuration_guid: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            guid: EventId::random().0,
            name: name.into(),
            provider_configuration_guid: provider_configuration_guid.into(),
            data: HashMap::new(),
            single_reserve_per_instrument: false,
        }
    }
}

//--------------------------------------   OrderInstrument    --------------------------------------------------------

/// A payment instrument as selected for a specific order, together with the cap on how much may be
/// reserved against it for that order. An absent or zero limit means the instrument is unlimited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderInstrument {
    pub instrument: PaymentInstrument,
    pub limit: Option<MoneyValue>,
}

impl OrderInstrument {
    pub fn unlimited(instrument: PaymentInstrument) -> Self {
        Self { instrument, limit: None }
    }

    pub fn with_limit(instrument: PaymentInstrument, limit: MoneyValue) -> Self {
        Self { instrument, limit: Some(limit) }
    }

    pub fn is_unlimited(&self) -> bool {
        match &self.limit {
            None => true,
            Some(limit) => limit.is_zero(),
        }
    }

    pub fn guid(&self) -> &str {
        &self.instrument.guid
    }
}
