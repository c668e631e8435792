//! Identity resolution from request attributes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TollgateError};

/// Where the rate limit identity of a request comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    /// Client IP address
    #[default]
    Ip,
    /// Authenticated user id, falling back to the IP address
    AuthId,
    /// A named request attribute (header or parameter), falling back to the
    /// IP address
    Custom,
}

/// The request attributes an HTTP adapter extracts for identity resolution.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Remote address
    pub ip: Option<String>,
    /// Authenticated user id
    pub user_id: Option<String>,
    /// Request headers or parameters
    pub attributes: HashMap<String, String>,
}

impl RequestContext {
    /// Context for a request from `ip`.
    pub fn from_ip(ip: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
            ..Self::default()
        }
    }

    /// Attach an authenticated user id.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach a request attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

/// Resolves the identity string of a request.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    source: IdentitySource,
    custom_parameter: String,
}

impl IdentityResolver {
    /// Create a resolver. `custom_parameter` is only read for
    /// [`IdentitySource::Custom`].
    pub fn new(source: IdentitySource, custom_parameter: impl Into<String>) -> Self {
        Self {
            source,
            custom_parameter: custom_parameter.into(),
        }
    }

    /// The configured source.
    pub fn source(&self) -> IdentitySource {
        self.source
    }

    /// Resolve the identity of a request.
    pub fn resolve(&self, ctx: &RequestContext) -> Result<String> {
        let preferred = match self.source {
            IdentitySource::Ip => None,
            IdentitySource::AuthId => ctx.user_id.as_deref(),
            IdentitySource::Custom => ctx
                .attributes
                .get(&self.custom_parameter)
                .map(String::as_str),
        };

        preferred
            .filter(|v| !v.is_empty())
            .or_else(|| ctx.ip.as_deref().filter(|v| !v.is_empty()))
            .map(str::to_string)
            .ok_or_else(|| {
                TollgateError::Identity(format!(
                    "request carries no usable identity for source {:?}",
                    self.source
                ))
            })
    }
}
