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

//! Control-plane entity records.
//!
//! All entity ids are opaque uuids; `updated_at` strictly increases per
//! mutation. The records themselves are storage-agnostic; persistence lives
//! in the store backends.

pub mod abac;
pub mod api_key;
pub mod chaos;
pub mod data_factory;
pub mod fleet;
pub mod ocr;
pub mod privacy;
pub mod rbac;
pub mod workflow;

use chrono::{DateTime, Duration, Utc};

pub use abac::{evaluate_policies, AbacPolicy, PolicyEffect};
pub use api_key::ApiKeyRecord;
pub use chaos::{ChaosPolicy, ChaosRun, ChaosStep};
pub use data_factory::{ModelRecord, TrainingJob};
pub use fleet::DeviceRecord;
pub use ocr::OcrConnector;
pub use privacy::PrivacyPolicy;
pub use rbac::{permissions_for_roles, RoleBindings, ACTION_ADMIN, ACTION_INGEST, ACTION_QUERY};
pub use workflow::{WorkflowRun, WorkflowSpec, WorkflowStep};

/// Next `updated_at` value for a mutation: strictly after the previous one
/// even when the wall clock has not advanced.
pub fn bump_updated_at(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + Duration::milliseconds(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_is_strictly_monotonic() {
        let start = Utc::now();
        let mut prev = start;
        for _ in 0..10 {
            let next = bump_updated_at(prev);
            assert!(next > prev);
            prev = next;
        }
    }
}
