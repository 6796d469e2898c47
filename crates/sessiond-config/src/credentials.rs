// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Provider credential resolution (§A.6): an unavailable credential marks a
//! provider "not connected" rather than failing startup, so this never
//! returns an error — only `Option<String>`.
use sessiond_model::registry::get_driver;

use crate::ProviderConfig;

/// Resolve the API key for `provider_id`, preferring (in order): an explicit
/// key in `provider`, the environment variable it names, then the driver's
/// own default environment variable.
pub fn resolve_api_key(provider_id: &str, provider: Option<&ProviderConfig>) -> Option<String> {
    if let Some(key) = provider.and_then(|p| p.api_key.clone()) {
        return Some(key);
    }
    if let Some(env_name) = provider.and_then(|p| p.api_key_env.as_deref()) {
        if let Ok(key) = std::env::var(env_name) {
            return Some(key);
        }
    }
    let driver = get_driver(provider_id)?;
    let env_name = driver.default_api_key_env?;
    std::env::var(env_name).ok()
}

/// Resolve the base URL for `provider_id`: an explicit override from config,
/// else the driver's own default.
pub fn resolve_base_url(provider_id: &str, provider: Option<&ProviderConfig>) -> Option<String> {
    if let Some(url) = provider.and_then(|p| p.base_url.clone()) {
        return Some(url);
    }
    get_driver(provider_id).and_then(|d| d.default_base_url).map(str::to_string)
}
