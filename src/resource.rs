// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Resource attributes attached to every exported batch.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::ServiceIdentity;

pub const SERVICE_NAME: &str = "service.name";
pub const SERVICE_VERSION: &str = "service.version";

/// Identity of the emitting process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resource {
    attributes: BTreeMap<String, String>,
}

impl Resource {
    /// Build from the service identity plus extra attributes.
    ///
    /// The identity always wins over an extra attribute with the same key.
    pub fn new(service: &ServiceIdentity, extra: &BTreeMap<String, String>) -> Self {
        let mut attributes = extra.clone();
        attributes.insert(SERVICE_NAME.to_string(), service.name.clone());
        attributes.insert(SERVICE_VERSION.to_string(), service.version.clone());
        Self { attributes }
    }

    pub fn service_name(&self) -> &str {
        self.get(SERVICE_NAME).unwrap_or_default()
    }

    pub fn service_version(&self) -> &str {
        self.get(SERVICE_VERSION).unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Attributes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Default for Resource {
    fn default() -> Self {
        Self::new(&ServiceIdentity::default(), &BTreeMap::new())
    }
}
