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

use serde::{Deserialize, Serialize};

use crate::scope::TenantScope;

/// Credential kind the context was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    ApiKey,
    Jwt,
}

/// Resolved identity for one request. Immutable after resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    /// Stable credential identifier (API-key record id or `jwt:<sub>`).
    pub credential_id: String,
    pub actor_type: ActorType,
    /// Subject identity where it differs from the credential id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<TenantScope>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
}

impl AuthContext {
    pub fn api_key(credential_id: impl Into<String>) -> Self {
        Self {
            credential_id: credential_id.into(),
            actor_type: ActorType::ApiKey,
            actor_id: None,
            email: None,
            scope: None,
            is_admin: false,
            roles: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn jwt(subject: impl Into<String>) -> Self {
        let subject = subject.into();
        Self {
            credential_id: format!("jwt:{subject}"),
            actor_type: ActorType::Jwt,
            actor_id: Some(subject),
            email: None,
            scope: None,
            is_admin: false,
            roles: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn with_scope(mut self, scope: Option<TenantScope>) -> Self {
        self.scope = scope.filter(|s| !s.is_empty());
        self
    }

    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_context_derives_credential_id() {
        let ctx = AuthContext::jwt("alice");
        assert_eq!(ctx.credential_id, "jwt:alice");
        assert_eq!(ctx.actor_id.as_deref(), Some("alice"));
        assert_eq!(ctx.actor_type, ActorType::Jwt);
    }

    #[test]
    fn empty_scope_is_dropped() {
        let ctx = AuthContext::api_key("key-1").with_scope(Some(TenantScope::default()));
        assert!(ctx.scope.is_none());
    }
}
