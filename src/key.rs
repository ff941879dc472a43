//! Cache key management.
//!
//! Every own-fields entry is keyed by `(entity_type, entity_id, tier, top_level)`.
//! The rendered form is
//!
//! ```text
//! as_json/{entity_type}/{entity_id}/{tier}/{top_level}
//! ```
//!
//! with `%` and `/` percent-escaped inside each component, so two distinct
//! tuples can never render to the same string.

use crate::error::{Error, Result};
use std::fmt;

const KEY_PREFIX: &str = "as_json";

/// Cache key of one entity's own-fields view.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub entity_type: String,
    pub entity_id: String,
    pub tier: String,
    pub top_level: bool,
}

impl CacheKey {
    pub fn new(entity_type: &str, entity_id: &str, tier: &str, top_level: bool) -> Self {
        CacheKey {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            tier: tier.to_string(),
            top_level,
        }
    }

    /// Parse a rendered key back into its components.
    ///
    /// # Errors
    ///
    /// Returns `Error::ValidationError` for strings this module did not produce.
    pub fn parse(key: &str) -> Result<Self> {
        let invalid = || Error::ValidationError(format!("Invalid cache key format: {}", key));

        let parts: Vec<&str> = key.split('/').collect();
        if parts.len() != 5 || parts[0] != KEY_PREFIX {
            return Err(invalid());
        }
        let top_level = match parts[4] {
            "true" => true,
            "false" => false,
            _ => return Err(invalid()),
        };

        Ok(CacheKey {
            entity_type: unescape(parts[1]).ok_or_else(invalid)?,
            entity_id: unescape(parts[2]).ok_or_else(invalid)?,
            tier: unescape(parts[3]).ok_or_else(invalid)?,
            top_level,
        })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            KEY_PREFIX,
            escape(&self.entity_type),
            escape(&self.entity_id),
            escape(&self.tier),
            self.top_level
        )
    }
}

fn escape(component: &str) -> String {
    component.replace('%', "%25").replace('/', "%2F")
}

fn unescape(component: &str) -> Option<String> {
    let mut out = String::with_capacity(component.len());
    let mut rest = component;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        match rest.get(pos + 1..pos + 3) {
            Some("25") => out.push('%'),
            Some("2F") => out.push('/'),
            _ => return None,
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Some(out)
}
