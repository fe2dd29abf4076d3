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

//! Credential resolution and access enforcement.
//!
//! Two credential kinds, one uniform output: an `x-api-key` header resolved
//! against the key store, or a bearer JWT. A presented-but-invalid
//! credential is always rejected; an absent credential is rejected only when
//! the environment requires auth.

pub mod api_key;
pub mod jwt;

use axum::http::HeaderMap;
use modalith_core::entities::{self, rbac};
use modalith_core::AuthContext;
use modalith_store::{AbacStore as _, RbacStore as _, StoreBundle};
use tracing::debug;

use crate::config::ServerConfig;
use crate::error::ApiError;

pub use api_key::{authorize_api_key, hash_api_key};
pub use jwt::{extract_bearer_tokens, JwtSettings, JwtVerifier};

pub struct Authenticator {
    query_api_key: Option<String>,
    api_key_salt: String,
    auth_required: bool,
    jwt: Option<JwtVerifier>,
}

impl Authenticator {
    pub fn from_config(config: &ServerConfig) -> Self {
        let settings = JwtSettings::from_env();
        let jwt = settings.configured().then(|| JwtVerifier::new(settings));
        Self {
            query_api_key: config.query_api_key.clone(),
            api_key_salt: config.api_key_salt.clone(),
            auth_required: config.auth_required(),
            jwt,
        }
    }

    #[cfg(test)]
    pub fn for_tests(query_api_key: Option<String>, salt: &str, auth_required: bool) -> Self {
        Self {
            query_api_key,
            api_key_salt: salt.to_string(),
            auth_required,
            jwt: None,
        }
    }

    /// Resolve the request credential into an auth context.
    pub async fn resolve(
        &self,
        headers: &HeaderMap,
        stores: &StoreBundle,
    ) -> Result<Option<AuthContext>, ApiError> {
        if let Some(raw_key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
            let resolved = authorize_api_key(
                stores.api_keys.as_ref(),
                &self.api_key_salt,
                self.query_api_key.as_deref(),
                raw_key,
            )?;
            return match resolved {
                Some(context) => Ok(Some(context)),
                None => Err(ApiError::unauthorized()),
            };
        }

        let tokens = extract_bearer_tokens(headers);
        if !tokens.is_empty() {
            let Some(verifier) = &self.jwt else {
                return Err(ApiError::unauthorized());
            };
            for token in &tokens {
                match verifier.authenticate(token).await {
                    Ok(context) => return Ok(Some(context)),
                    Err(err) => debug!(error = %err, "bearer token rejected"),
                }
            }
            return Err(ApiError::unauthorized());
        }

        if self.auth_required {
            return Err(ApiError::unauthorized());
        }
        Ok(None)
    }
}

#[derive(Debug, Clone)]
pub struct AccessPolicy {
    pub rbac_enforce: bool,
    pub rbac_default_role: String,
    pub abac_enforce: bool,
    pub abac_default_allow: bool,
}

impl From<&ServerConfig> for AccessPolicy {
    fn from(config: &ServerConfig) -> Self {
        Self {
            rbac_enforce: config.rbac_enforce,
            rbac_default_role: config.rbac_default_role.clone(),
            abac_enforce: config.abac_enforce,
            abac_default_allow: config.abac_default_allow,
        }
    }
}

/// RBAC then ABAC, each only when enabled. Admins bypass RBAC.
pub fn enforce_access(
    action: &str,
    context: Option<&AuthContext>,
    stores: &StoreBundle,
    policy: &AccessPolicy,
) -> Result<(), ApiError> {
    if policy.rbac_enforce && !rbac_allows(action, context, stores, policy)? {
        return Err(ApiError::forbidden());
    }
    if policy.abac_enforce {
        let policies = stores.abac.load_policies()?;
        let attrs = entities::abac::build_attributes(context, action);
        if !entities::evaluate_policies(&policies, &attrs, policy.abac_default_allow) {
            return Err(ApiError::forbidden());
        }
    }
    Ok(())
}

fn rbac_allows(
    action: &str,
    context: Option<&AuthContext>,
    stores: &StoreBundle,
    policy: &AccessPolicy,
) -> Result<bool, ApiError> {
    let Some(context) = context else {
        return Ok(false);
    };
    if context.is_admin {
        return Ok(true);
    }
    let mut roles = context.roles.clone();
    if roles.is_empty() {
        let bindings = stores.rbac.load_role_bindings()?;
        roles = bindings
            .get(&context.credential_id)
            .cloned()
            .unwrap_or_default();
    }
    if roles.is_empty() && !policy.rbac_default_role.is_empty() {
        roles.push(policy.rbac_default_role.clone());
    }
    let permissions = rbac::permissions_for_roles(roles.iter().map(String::as_str));
    Ok(rbac::allows(&permissions, action))
}

#[cfg(test)]
mod tests {
    use super::*;
    use modalith_core::entities::{AbacPolicy, ApiKeyRecord, PolicyEffect};
    use modalith_store::{
        build_store_bundle, ApiKeyStore as _, ControlPlaneConfig, JsonControlStore,
    };
    use tempfile::TempDir;

    fn bundle(dir: &TempDir) -> StoreBundle {
        build_store_bundle(dir.path(), &ControlPlaneConfig::default(), None).unwrap()
    }

    fn policy(rbac: bool, abac: bool) -> AccessPolicy {
        AccessPolicy {
            rbac_enforce: rbac,
            rbac_default_role: "reader".into(),
            abac_enforce: abac,
            abac_default_allow: true,
        }
    }

    #[tokio::test]
    async fn missing_credential_passes_in_dev() {
        let dir = TempDir::new().unwrap();
        let auth = Authenticator::for_tests(None, "", false);
        let resolved = auth.resolve(&HeaderMap::new(), &bundle(&dir)).await.unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn missing_credential_rejected_when_required() {
        let dir = TempDir::new().unwrap();
        let auth = Authenticator::for_tests(None, "", true);
        assert!(auth.resolve(&HeaderMap::new(), &bundle(&dir)).await.is_err());
    }

    #[tokio::test]
    async fn presented_invalid_key_rejected_even_in_dev() {
        let dir = TempDir::new().unwrap();
        let auth = Authenticator::for_tests(None, "", false);
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "nope".parse().unwrap());
        assert!(auth.resolve(&headers, &bundle(&dir)).await.is_err());
    }

    #[test]
    fn reader_role_queries_but_cannot_ingest() {
        let dir = TempDir::new().unwrap();
        let stores = bundle(&dir);
        let mut context = AuthContext::api_key("key-1");
        context.roles = vec!["reader".into()];
        let policy = policy(true, false);
        assert!(enforce_access(rbac::ACTION_QUERY, Some(&context), &stores, &policy).is_ok());
        assert!(enforce_access(rbac::ACTION_INGEST, Some(&context), &stores, &policy).is_err());
    }

    #[test]
    fn bindings_supply_roles_when_context_has_none() {
        let dir = TempDir::new().unwrap();
        let stores = bundle(&dir);
        let record = stores
            .api_keys
            .register_api_key(ApiKeyRecord::new("edge", "hash"))
            .unwrap();
        let mut bindings = modalith_core::entities::RoleBindings::new();
        bindings.insert(record.id.clone(), vec!["writer".into()]);
        stores.rbac.save_role_bindings(&bindings).unwrap();

        let context = AuthContext::api_key(&record.id);
        let policy = AccessPolicy {
            rbac_default_role: String::new(),
            ..policy(true, false)
        };
        assert!(enforce_access(rbac::ACTION_INGEST, Some(&context), &stores, &policy).is_ok());
    }

    #[test]
    fn admin_bypasses_rbac() {
        let dir = TempDir::new().unwrap();
        let stores = bundle(&dir);
        let context = AuthContext::api_key("root").with_admin(true);
        assert!(
            enforce_access(rbac::ACTION_INGEST, Some(&context), &stores, &policy(true, false))
                .is_ok()
        );
    }

    #[test]
    fn abac_deny_wins() {
        let dir = TempDir::new().unwrap();
        let stores = bundle(&dir);
        let store = JsonControlStore::open(dir.path()).unwrap();
        use modalith_store::AbacStore as _;
        store
            .save_policies(&[AbacPolicy {
                id: "deny-ingest".into(),
                effect: PolicyEffect::Deny,
                conditions: [(
                    "action".to_string(),
                    serde_json::Value::String("ingest".into()),
                )]
                .into_iter()
                .collect(),
            }])
            .unwrap();

        let context = AuthContext::api_key("key-1");
        let policy = policy(false, true);
        assert!(enforce_access(rbac::ACTION_INGEST, Some(&context), &stores, &policy).is_err());
        assert!(enforce_access(rbac::ACTION_QUERY, Some(&context), &stores, &policy).is_ok());
    }
}
