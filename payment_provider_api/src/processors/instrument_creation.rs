use std::{collections::HashMap, sync::Arc};

use log::{debug, warn};

use crate::{
    errors::PaymentApiError,
    instrument::PaymentInstrument,
    provider::{
        PicCreationFields,
        PicFieldsRequestContext,
        PicInstructions,
        PicInstructionsFields,
        PicRequestContext,
        ProviderResolver,
    },
    traits::InstrumentStore,
};

/// The field every creation form carries, whatever the provider asks for.
pub const DISPLAY_NAME_FIELD: &str = "display-name";

/// Drives the multi-step instrument-creation wizard against provider-declared field schemas.
///
/// The wizard walks `AwaitingInstructionFields → AwaitingInstructions → AwaitingCreationFields →
/// Created` (see [`PicStep`](crate::provider::PicStep)); each method here serves one step and is
/// stateless — the caller carries the partially completed flow between calls. Providers without
/// the client-interaction capability simply have empty instruction steps.
pub struct PaymentInstrumentCreationProcessor {
    resolver: Arc<ProviderResolver>,
    instruments: Arc<dyn InstrumentStore>,
}

impl PaymentInstrumentCreationProcessor {
    pub fn new(resolver: Arc<ProviderResolver>, instruments: Arc<dyn InstrumentStore>) -> Self {
        Self { resolver, instruments }
    }

    /// Step 1: the fields the provider needs before it can produce client instructions.
    pub fn pic_instruction_fields(
        &self,
        configuration_guid: &str,
        context: &PicFieldsRequestContext,
    ) -> Result<PicInstructionsFields, PaymentApiError> {
        let provider = self.resolver.resolve(configuration_guid)?;
        let capability = match provider.plugin().client_interaction_capability() {
            None => return Ok(PicInstructionsFields::default()),
            Some(capability) => capability,
        };
        match capability.instruction_fields(context) {
            Ok(fields) => Ok(fields),
            Err(err) if err.needs_more_info() => Ok(PicInstructionsFields {
                fields: vec![DISPLAY_NAME_FIELD.to_string()],
                blocking_messages: err.messages,
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Step 2: the instructions the customer must follow — e.g. a redirect URL for a 3DS-like
    /// flow.
    pub fn pic_instructions(
        &self,
        configuration_guid: &str,
        instructions_form: &HashMap<String, String>,
        context: &PicRequestContext,
    ) -> Result<PicInstructions, PaymentApiError> {
        let provider = self.resolver.resolve(configuration_guid)?;
        match provider.plugin().client_interaction_capability() {
            None => Ok(PicInstructions::default()),
            Some(capability) => Ok(capability.instructions(instructions_form, context)?),
        }
    }

    /// Step 3: the field schema for the final creation form. Always contains the display-name
    /// field, whether or not the provider asks for it.
    pub fn pic_fields(
        &self,
        configuration_guid: &str,
        context: &PicFieldsRequestContext,
    ) -> Result<PicCreationFields, PaymentApiError> {
        let provider = self.resolver.resolve(configuration_guid)?;
        let capability = match provider.plugin().instrument_creation_capability() {
            None => return Ok(default_creation_fields(Vec::new())),
            Some(capability) => capability,
        };
        match capability.creation_fields(context) {
            Ok(mut fields) => {
                if !fields.fields.iter().any(|field| field == DISPLAY_NAME_FIELD) {
                    fields.fields.push(DISPLAY_NAME_FIELD.to_string());
                }
                Ok(fields)
            },
            Err(err) if err.needs_more_info() => Ok(default_creation_fields(err.messages)),
            Err(err) => Err(err.into()),
        }
    }

    /// Step 4: creates the instrument and stores it. Returns the new instrument's guid.
    pub fn create_instrument(
        &self,
        configuration_guid: &str,
        instrument_form: &HashMap<String, String>,
        context: &PicRequestContext,
    ) -> Result<String, PaymentApiError> {
        let provider = self.resolver.resolve(configuration_guid)?;
        let name = instrument_form
            .get(DISPLAY_NAME_FIELD)
            .map(String::as_str)
            .unwrap_or_default()
            .trim();
        if name.is_empty() {
            return Err(PaymentApiError::EmptyInstrumentName);
        }
        let details = match provider.plugin().instrument_creation_capability() {
            None => HashMap::new(),
            Some(capability) => match capability.create_instrument(instrument_form, context) {
                Ok(response) => response.details,
                Err(err) => {
                    warn!("🧾 Instrument creation via '{}' failed: {err}", provider.configuration_name());
                    return Err(err.into());
                },
            },
        };

        let mut instrument = PaymentInstrument::new(name, configuration_guid);
        instrument.data = details;
        instrument.single_reserve_per_instrument = provider.single_reserve_per_instrument();
        if let Some(billing_address) = &context.billing_address_guid {
            instrument.data.insert("billing-address-guid".to_string(), billing_address.clone());
        }
        let guid = instrument.guid.clone();
        debug!("🧾 Created payment instrument '{name}' ({guid}) via '{}'", provider.configuration_name());
        self.instruments.save(instrument)?;
        Ok(guid)
    }
}

fn default_creation_fields(blocking_fields: Vec<crate::provider::CreationMessage>) -> PicCreationFields {
    PicCreationFields { fields: vec![DISPLAY_NAME_FIELD.to_string()], blocking_fields, saveable: true }
}
