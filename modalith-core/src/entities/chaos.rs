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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModalithError;

/// Policy caps for chaos steps.
pub const CHAOS_MAX_FAILURE_PERCENT: f64 = 100.0;
pub const CHAOS_MAX_DURATION_S: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaosStep {
    pub name: String,
    pub failure_percent: f64,
    pub duration_s: u64,
}

/// Fault-injection policy for resilience drills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaosPolicy {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<ChaosStep>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChaosPolicy {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            steps: Vec::new(),
            enabled: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), ModalithError> {
        for step in &self.steps {
            if !(0.0..=CHAOS_MAX_FAILURE_PERCENT).contains(&step.failure_percent) {
                return Err(ModalithError::validation(format!(
                    "chaos step '{}' failure_percent out of range: {}",
                    step.name, step.failure_percent
                )));
            }
            if step.duration_s > CHAOS_MAX_DURATION_S {
                return Err(ModalithError::validation(format!(
                    "chaos step '{}' duration exceeds cap: {}s",
                    step.name, step.duration_s
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaosRun {
    pub id: String,
    pub policy_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChaosRun {
    pub fn new(policy_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            policy_id: policy_id.into(),
            status: "queued".to_string(),
            started_at: None,
            finished_at: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }
}
