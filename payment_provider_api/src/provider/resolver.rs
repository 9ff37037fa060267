use std::{collections::HashMap, sync::Arc};

use log::debug;

use crate::{
    errors::PaymentApiError,
    provider::{PaymentProvider, PaymentProviderPlugin},
    traits::ProviderConfigStore,
};

/// Resolves a provider configuration guid to a callable [`PaymentProvider`].
///
/// Resolution happens per call and is cheap: a configuration lookup plus a registry lookup. A guid
/// that does not resolve to a configuration, or a configuration naming an unregistered plugin, is
/// a fatal error — there is nothing a retry could fix.
pub struct ProviderResolver {
    configurations: Arc<dyn ProviderConfigStore>,
    plugins: HashMap<String, Arc<dyn PaymentProviderPlugin>>,
}

impl ProviderResolver {
    pub fn new(configurations: Arc<dyn ProviderConfigStore>) -> Self {
        Self { configurations, plugins: HashMap::new() }
    }

    /// Registers a plugin under its own name. A plugin registered twice under one name replaces
    /// the earlier registration.
    pub fn register_plugin(&mut self, plugin: Arc<dyn PaymentProviderPlugin>) {
        debug!("💳️ Registered payment provider plugin '{}'", plugin.name());
        self.plugins.insert(plugin.name().to_string(), plugin);
    }

    pub fn resolve(&self, configuration_guid: &str) -> Result<PaymentProvider, PaymentApiError> {
        let configuration = self
            .configurations
            .find_by_guid(configuration_guid)
            .ok_or_else(|| PaymentApiError::ConfigurationMissing(configuration_guid.to_string()))?;
        let plugin = self
            .plugins
            .get(&configuration.plugin_key)
            .cloned()
            .ok_or_else(|| PaymentApiError::PluginNotRegistered(configuration.plugin_key.clone()))?;
        Ok(PaymentProvider::new(configuration, plugin))
    }
}

impl std::fmt::Debug for ProviderResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.plugins.keys().map(String::as_str).collect();
        keys.sort_unstable();
        write!(f, "ProviderResolver[{}]", keys.join(", "))
    }
}
