// Copyright 2025 Modalith (https://github.com/modalith)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Query tier routing.
//!
//! A pure decision over the request shape: an explicit override wins, `auto`
//! mode routes multimodal requests to the gpu tier, everything else lands on
//! the default tier. The decision is recorded in the request trace.

use std::collections::BTreeSet;

use modalith_core::Modality;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingContext {
    pub has_text: bool,
    pub has_image: bool,
    pub modalities: BTreeSet<Modality>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub tier: String,
    pub reason: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// `cpu` (pinned) or `auto`.
    pub mode: String,
    pub default_tier: String,
    pub tier_override: Option<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            mode: "cpu".to_string(),
            default_tier: "cpu".to_string(),
            tier_override: None,
        }
    }
}

impl RoutingConfig {
    pub fn from_env() -> Self {
        let clean = |raw: String| raw.trim().to_ascii_lowercase();
        Self {
            mode: std::env::var("QUERY_ROUTING_MODE")
                .map(clean)
                .unwrap_or_else(|_| "cpu".into()),
            default_tier: std::env::var("QUERY_TIER_DEFAULT")
                .map(clean)
                .unwrap_or_else(|_| "cpu".into()),
            tier_override: std::env::var("QUERY_TIER_OVERRIDE")
                .ok()
                .map(|raw| raw.trim().to_ascii_lowercase())
                .filter(|raw| !raw.is_empty()),
        }
    }
}

pub fn select_query_tier(config: &RoutingConfig, context: &RoutingContext) -> RoutingDecision {
    if let Some(tier) = &config.tier_override {
        return RoutingDecision {
            tier: tier.clone(),
            reason: "override",
        };
    }
    if config.mode != "auto" {
        return RoutingDecision {
            tier: config.default_tier.clone(),
            reason: "default",
        };
    }
    let multimodal = context.has_image
        || context.modalities.contains(&Modality::Image)
        || context.modalities.contains(&Modality::Audio);
    if multimodal {
        return RoutingDecision {
            tier: "gpu".to_string(),
            reason: "multimodal",
        };
    }
    RoutingDecision {
        tier: config.default_tier.clone(),
        reason: "text-only",
    }
}
