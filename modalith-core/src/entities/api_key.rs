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

use crate::scope::TenantScope;

pub const API_KEY_STATUS_ACTIVE: &str = "active";
pub const API_KEY_STATUS_REVOKED: &str = "revoked";

/// Stored API-key credential. Only the salted hash is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: String,
    pub name: String,
    pub key_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApiKeyRecord {
    pub fn new(name: impl Into<String>, key_hash: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            key_hash: key_hash.into(),
            org_id: None,
            site_id: None,
            stream_id: None,
            status: API_KEY_STATUS_ACTIVE.to_string(),
            scopes: None,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == API_KEY_STATUS_ACTIVE
    }

    pub fn scope(&self) -> TenantScope {
        TenantScope::new(
            self.org_id.clone(),
            self.site_id.clone(),
            self.stream_id.clone(),
        )
    }

    pub fn touch_last_used(&mut self) {
        let now = Utc::now();
        self.last_used_at = Some(now);
        self.updated_at = super::bump_updated_at(self.updated_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_keys_are_active() {
        let record = ApiKeyRecord::new("ci", "abc123");
        assert!(record.is_active());
        assert!(record.last_used_at.is_none());
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn touch_advances_updated_at() {
        let mut record = ApiKeyRecord::new("ci", "abc123");
        let before = record.updated_at;
        record.touch_last_used();
        assert!(record.updated_at > before);
        assert!(record.last_used_at.is_some());
    }
}
