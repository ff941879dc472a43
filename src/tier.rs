//! Ordered visibility tiers.
//!
//! A tier names how much of an entity a view exposes. Tiers are cumulative:
//! a field declared at tier `T` appears in the view for `T` and every tier
//! after it. The default set is `short < public < all`.

use crate::error::{Error, Result};
use std::fmt;

/// Position of a tier inside its [`TierSet`].
///
/// Comparing two `Tier`s compares their order, so `short < public < all`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tier(usize);

impl Tier {
    /// Zero-based rank of the tier.
    pub fn rank(self) -> usize {
        self.0
    }
}

/// Ordered, fixed list of tier names shared by every entity type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TierSet {
    names: Vec<String>,
}

impl TierSet {
    /// Build a tier set from names, lowest first.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if the list is empty or names repeat.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(Error::ConfigError(
                "tier set must contain at least one tier".to_string(),
            ));
        }
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(Error::ConfigError(format!("duplicate tier name: {}", name)));
            }
        }
        Ok(TierSet { names })
    }

    /// Look up a tier by name.
    pub fn parse(&self, name: &str) -> Option<Tier> {
        self.names.iter().position(|n| n == name).map(Tier)
    }

    /// Name of a tier, or `None` for a tier this set does not contain.
    pub fn name(&self, tier: Tier) -> Option<&str> {
        self.names.get(tier.0).map(String::as_str)
    }

    /// The narrowest tier.
    pub fn lowest(&self) -> Tier {
        Tier(0)
    }

    /// The unrestricted tier. Hiding never applies at this tier.
    pub fn highest(&self) -> Tier {
        Tier(self.names.len() - 1)
    }

    /// Tier used for nested references of a view at `tier`.
    ///
    /// References narrow to the lowest tier unless the caller asked for the
    /// unrestricted one.
    pub fn nested(&self, tier: Tier) -> Tier {
        if tier == self.highest() {
            tier
        } else {
            self.lowest()
        }
    }

    /// All tiers, lowest first.
    pub fn iter(&self) -> impl Iterator<Item = Tier> + '_ {
        (0..self.names.len()).map(Tier)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for TierSet {
    fn default() -> Self {
        TierSet {
            names: vec!["short".to_string(), "public".to_string(), "all".to_string()],
        }
    }
}

impl fmt::Display for TierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names.join(" < "))
    }
}
