//! Translation of Envoy descriptors into admission requests.
//!
//! Envoy describes a request as an ordered list of key/value entries. The
//! proxy configuration decides which keys it sends; Vigil recognises:
//!
//! | key                          | meaning                              |
//! |------------------------------|--------------------------------------|
//! | `identifier`                 | explicit rate limit key              |
//! | `remote_address`             | client address                       |
//! | `x_forwarded_for`            | forwarding chain, first hop is used  |
//! | `x_real_ip`                  | client address set by a proxy        |
//! | `user_agent`                 | request user agent                   |
//! | `path`                       | request path                         |
//! | `time_since_last_request_ms` | caller-measured request interval     |
//!
//! Every other entry is kept as extra metadata. Descriptors in one call
//! that resolve to the same identifier are checked as a single request.

use crate::grpc::proto::envoy::extensions::common::ratelimit::v3::RateLimitDescriptor;

use super::record::RequestMetadata;

/// Identifier used when a descriptor names no client.
pub const UNKNOWN_IDENTIFIER: &str = "unknown";

/// Entry keys tried for the identifier, in priority order.
const IDENTIFIER_KEYS: [&str; 4] = ["identifier", "remote_address", "x_forwarded_for", "x_real_ip"];

/// The identifier and metadata extracted from one descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRequest {
    pub identifier: String,
    pub metadata: RequestMetadata,
}

impl AdmissionRequest {
    /// Build an admission request from a descriptor's entries.
    pub fn from_descriptor(descriptor: &RateLimitDescriptor) -> Self {
        let mut identifier_candidates: [Option<String>; 4] = Default::default();
        let mut metadata = RequestMetadata::new();

        for entry in &descriptor.entries {
            if let Some(slot) = IDENTIFIER_KEYS.iter().position(|k| *k == entry.key) {
                let value = if entry.key == "x_forwarded_for" {
                    first_forwarded_hop(&entry.value)
                } else {
                    entry.value.trim()
                };
                if !value.is_empty() && identifier_candidates[slot].is_none() {
                    identifier_candidates[slot] = Some(value.to_string());
                }
                continue;
            }

            match entry.key.as_str() {
                "user_agent" => metadata.user_agent = Some(entry.value.clone()),
                "path" => metadata.path = Some(entry.value.clone()),
                "time_since_last_request_ms" => {
                    metadata.time_since_last_request_ms = entry.value.trim().parse().ok();
                }
                _ => {
                    metadata.extra.insert(entry.key.clone(), entry.value.clone());
                }
            }
        }

        let identifier = identifier_candidates
            .into_iter()
            .flatten()
            .next()
            .unwrap_or_else(|| UNKNOWN_IDENTIFIER.to_string());

        Self {
            identifier,
            metadata,
        }
    }

    /// String representation for logging.
    pub fn to_string_key(&self) -> String {
        let mut parts = Vec::new();
        if let Some(ref path) = self.metadata.path {
            parts.push(format!("path={}", path));
        }
        if let Some(ref ua) = self.metadata.user_agent {
            parts.push(format!("user_agent={}", ua));
        }
        for (k, v) in &self.metadata.extra {
            parts.push(format!("{}={}", k, v));
        }

        format!("{} [{}]", self.identifier, parts.join(","))
    }
}

impl std::fmt::Display for AdmissionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

fn first_forwarded_hop(value: &str) -> &str {
    value.split(',').next().unwrap_or("").trim()
}
