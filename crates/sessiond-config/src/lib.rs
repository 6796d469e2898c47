// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Layered YAML configuration: `/etc/sessiond`, XDG config dir, and
//! workspace-local files are deep-merged, later files winning on conflict.
mod credentials;
mod loader;
mod schema;

pub use credentials::{resolve_api_key, resolve_base_url};
pub use loader::load;
pub use schema::*;
