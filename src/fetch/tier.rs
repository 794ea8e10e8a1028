//! Escalation tiers and their request parameters

use serde::{Deserialize, Serialize};
use std::fmt;

/// One escalation level of the fetch provider, cheapest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// No rendering, standard egress
    Basic,
    /// JavaScript rendering, standard egress
    Rendered,
    /// JavaScript rendering, premium egress
    Premium,
    /// JavaScript rendering, stealth egress
    Stealth,
}

impl Tier {
    /// All tiers in escalation order
    pub const ALL: [Tier; 4] = [Tier::Basic, Tier::Rendered, Tier::Premium, Tier::Stealth];

    /// Position of the tier in the ladder (0-based)
    pub fn index(&self) -> usize {
        match self {
            Self::Basic => 0,
            Self::Rendered => 1,
            Self::Premium => 2,
            Self::Stealth => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Rendered => "rendered",
            Self::Premium => "premium",
            Self::Stealth => "stealth",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IP egress quality requested from the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Egress {
    Standard,
    Premium,
    Stealth,
}

/// Request parameters sent to the provider at one tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierParams {
    /// Execute JavaScript before returning the page
    pub render_js: bool,

    /// Egress pool to use
    pub egress: Egress,

    /// Ask the provider not to load images/CSS/fonts
    pub block_resources: bool,

    /// Ask the provider to block ad networks
    pub block_ads: bool,

    /// Extra wait after load before capturing, in milliseconds
    pub wait_ms: u64,

    /// Estimated credits charged per request
    pub cost: u32,
}

impl TierParams {
    /// Default parameters of a tier
    ///
    /// | Tier     | render | egress   | wait   | cost |
    /// |----------|--------|----------|--------|------|
    /// | basic    | no     | standard | 0      | 1    |
    /// | rendered | yes    | standard | 2000ms | 5    |
    /// | premium  | yes    | premium  | 3000ms | 25   |
    /// | stealth  | yes    | stealth  | 5000ms | 75   |
    pub fn defaults_for(tier: Tier) -> Self {
        match tier {
            Tier::Basic => Self {
                render_js: false,
                egress: Egress::Standard,
                block_resources: true,
                block_ads: true,
                wait_ms: 0,
                cost: 1,
            },
            Tier::Rendered => Self {
                render_js: true,
                egress: Egress::Standard,
                block_resources: true,
                block_ads: true,
                wait_ms: 2000,
                cost: 5,
            },
            Tier::Premium => Self {
                render_js: true,
                egress: Egress::Premium,
                block_resources: false,
                block_ads: true,
                wait_ms: 3000,
                cost: 25,
            },
            Tier::Stealth => Self {
                render_js: true,
                egress: Egress::Stealth,
                block_resources: false,
                block_ads: true,
                wait_ms: 5000,
                cost: 75,
            },
        }
    }

    /// Same egress, rendering switched off (used for binary payloads)
    pub fn without_rendering(&self) -> Self {
        Self {
            render_js: false,
            wait_ms: 0,
            block_resources: true,
            ..self.clone()
        }
    }
}

/// Parameters of every tier of the ladder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierTable {
    tiers: [TierParams; 4],
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            tiers: Tier::ALL.map(TierParams::defaults_for),
        }
    }
}

impl TierTable {
    pub fn get(&self, tier: Tier) -> &TierParams {
        &self.tiers[tier.index()]
    }

    pub fn set(&mut self, tier: Tier, params: TierParams) {
        self.tiers[tier.index()] = params;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalation_order() {
        for (i, tier) in Tier::ALL.iter().enumerate() {
            assert_eq!(tier.index(), i);
        }
        assert!(Tier::Basic < Tier::Stealth);
    }

    #[test]
    fn test_defaults_have_increasing_cost() {
        let table = TierTable::default();
        let costs: Vec<u32> = Tier::ALL.iter().map(|t| table.get(*t).cost).collect();
        assert!(costs.windows(2).all(|w| w[0] < w[1]), "{:?}", costs);
    }

    #[test]
    fn test_only_basic_skips_rendering() {
        let table = TierTable::default();
        assert!(!table.get(Tier::Basic).render_js);
        assert!(table.get(Tier::Rendered).render_js);
        assert_eq!(table.get(Tier::Premium).egress, Egress::Premium);
        assert_eq!(table.get(Tier::Stealth).egress, Egress::Stealth);
    }

    #[test]
    fn test_without_rendering_keeps_egress() {
        let params = TierParams::defaults_for(Tier::Stealth).without_rendering();
        assert!(!params.render_js);
        assert_eq!(params.wait_ms, 0);
        assert_eq!(params.egress, Egress::Stealth);
    }
}
