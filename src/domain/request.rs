//! Normalized request descriptors.
//!
//! A [`RequestDescriptor`] names a provider, one of its endpoints and a set of
//! string parameters. Parameters live in a sorted map, so two descriptors built
//! from the same pairs in any order are equal and derive the same cache key.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::error::ValidationError;

const MAX_IDENTIFIER_LEN: usize = 64;
const MAX_PARAM_NAME_LEN: usize = 128;
const MAX_PARAM_VALUE_LEN: usize = 4096;
pub const MAX_PARAMS: usize = 64;
const MAX_LANGUAGE_LEN: usize = 35;

/// Sorted request parameters.
pub type Params = BTreeMap<String, String>;

fn validate_identifier(field: &'static str, value: &str) -> Result<(), ValidationError> {
    let reason = if value.is_empty() {
        Some("must not be empty")
    } else if value.len() > MAX_IDENTIFIER_LEN {
        Some("must be at most 64 characters")
    } else if !value
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'_' | b'.'))
    {
        Some("may only contain lowercase letters, digits, `-`, `_` and `.`")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ValidationError::Identifier {
            field,
            value: value.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// First language tag of an `Accept-Language` header, lowercased.
///
/// Quality weights and later entries are ignored; `*` and malformed tags
/// yield `None`.
pub fn preferred_language(header: &str) -> Option<String> {
    let first = header.split(',').next()?;
    let tag = first.split(';').next()?.trim().to_ascii_lowercase();
    let valid = !tag.is_empty()
        && tag.len() <= MAX_LANGUAGE_LEN
        && tag.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-');
    valid.then_some(tag)
}

/// Identifier of an upstream provider, e.g. `pixiv`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn parse(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        validate_identifier("provider", &value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an endpoint within a provider, e.g. `illust`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn parse(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        validate_identifier("endpoint", &value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable, normalized request for one provider endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestDescriptor {
    provider: ProviderId,
    endpoint: EndpointId,
    params: Params,
    language: Option<String>,
}

impl RequestDescriptor {
    /// Build a descriptor from raw parts.
    ///
    /// Rejects malformed identifiers, oversized or duplicated parameters.
    pub fn new<I, K, V>(
        provider: impl Into<String>,
        endpoint: impl Into<String>,
        params: I,
    ) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let provider = ProviderId::parse(provider)?;
        let endpoint = EndpointId::parse(endpoint)?;

        let mut normalized = Params::new();
        for (name, value) in params {
            let name = name.into();
            let value = value.into();

            if name.is_empty() {
                return Err(ValidationError::param(name, "name must not be empty"));
            }
            if name.len() > MAX_PARAM_NAME_LEN {
                return Err(ValidationError::param(name, "name exceeds 128 bytes"));
            }
            if value.len() > MAX_PARAM_VALUE_LEN {
                return Err(ValidationError::param(name, "value exceeds 4096 bytes"));
            }
            if normalized.contains_key(&name) {
                return Err(ValidationError::DuplicateParam { name });
            }
            normalized.insert(name, value);

            if normalized.len() > MAX_PARAMS {
                return Err(ValidationError::TooManyParams {
                    count: normalized.len(),
                    limit: MAX_PARAMS,
                });
            }
        }

        Ok(Self {
            provider,
            endpoint,
            params: normalized,
            language: None,
        })
    }

    /// Attach the caller's preferred language, as produced by
    /// [`preferred_language`]. It takes part in equality and the cache key.
    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    /// The same request with the language removed, for providers whose
    /// answers do not depend on it.
    pub fn without_language(&self) -> Cow<'_, Self> {
        match self.language {
            None => Cow::Borrowed(self),
            Some(_) => Cow::Owned(Self {
                language: None,
                ..self.clone()
            }),
        }
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    pub fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    pub fn params(&self) -> &Params {
        &self.params
    }
}

impl fmt::Display for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.endpoint)?;
        let mut sep = '?';
        for (name, value) in &self.params {
            write!(f, "{sep}{name}={value}")?;
            sep = '&';
        }
        if let Some(language) = &self.language {
            write!(f, " ({language})")?;
        }
        Ok(())
    }
}
