//  Copyright 2023 Girder Contributors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

//! Endpoints.
use serde::{Deserialize, Serialize};

/// The network context of a node in the service graph, as recorded on
/// span annotations.
///
/// The address is kept as a string so that a service whose hostname fails
/// to resolve can still record the literal `"undefined"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    service_name: String,
    ipv4: String,
}

impl Endpoint {
    /// Creates a new `Endpoint`.
    pub fn new(service_name: &str, ipv4: &str) -> Endpoint {
        Endpoint {
            service_name: service_name.to_string(),
            ipv4: ipv4.to_string(),
        }
    }

    /// Returns the name of the service at this endpoint.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Returns the IPv4 address of the service at this endpoint.
    pub fn ipv4(&self) -> &str {
        &self.ipv4
    }
}
