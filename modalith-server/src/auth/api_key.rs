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

//! API-key resolution.
//!
//! Presented keys are salted-hashed and compared constant-time against the
//! key store. A configured operator key (`QUERY_API_KEY`) short-circuits to
//! an admin context for bootstrap and ops use.

use modalith_core::AuthContext;
use modalith_store::{ApiKeyStore, StoreError};
use sha2::{Digest, Sha256};
use tracing::warn;

/// Salted sha256, hex encoded. The same function registers and verifies.
pub fn hash_api_key(salt: &str, raw_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(raw_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time equality over the full length of both inputs.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let mut diff = a.len() ^ b.len();
    let longest = a.len().max(b.len());
    for idx in 0..longest {
        let x = a.get(idx).copied().unwrap_or(0);
        let y = b.get(idx).copied().unwrap_or(0);
        diff |= (x ^ y) as usize;
    }
    diff == 0
}

/// Resolve an `x-api-key` header value against the operator key and the key
/// store. `Ok(None)` means the key matched nothing.
pub fn authorize_api_key(
    store: &dyn ApiKeyStore,
    salt: &str,
    operator_key: Option<&str>,
    raw_key: &str,
) -> Result<Option<AuthContext>, StoreError> {
    if let Some(operator) = operator_key {
        if constant_time_eq(operator, raw_key) {
            return Ok(Some(AuthContext::api_key("operator").with_admin(true)));
        }
    }

    let presented_hash = hash_api_key(salt, raw_key);
    let records = store.load_api_keys()?;
    for record in records {
        if !record.is_active() {
            continue;
        }
        if constant_time_eq(&record.key_hash, &presented_hash) {
            let is_admin = record
                .scopes
                .as_ref()
                .map(|scopes| scopes.iter().any(|scope| scope == "admin"))
                .unwrap_or(false);
            let context = AuthContext::api_key(&record.id)
                .with_scope(Some(record.scope()))
                .with_admin(is_admin);
            // Refresh last_used_at; failures must not fail authentication.
            let mut touched = record.clone();
            touched.touch_last_used();
            if let Err(err) = store.update_api_key(touched) {
                warn!(error = %err, "failed to refresh api key last_used_at");
            }
            return Ok(Some(context));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use modalith_core::entities::ApiKeyRecord;
    use modalith_store::JsonControlStore;
    use tempfile::TempDir;

    #[test]
    fn constant_time_eq_basic() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
        assert!(!constant_time_eq("", "a"));
        assert!(constant_time_eq("", ""));
    }

    #[test]
    fn operator_key_grants_admin() {
        let dir = TempDir::new().unwrap();
        let store = JsonControlStore::open(dir.path()).unwrap();
        let context = authorize_api_key(&store, "", Some("sekrit"), "sekrit")
            .unwrap()
            .unwrap();
        assert!(context.is_admin);
    }

    #[test]
    fn stored_key_resolves_scope_and_touches_last_used() {
        let dir = TempDir::new().unwrap();
        let store = JsonControlStore::open(dir.path()).unwrap();
        let mut record = ApiKeyRecord::new("edge-site-1", hash_api_key("salt", "raw-key"));
        record.org_id = Some("org-1".into());
        let record = store.register_api_key(record).unwrap();

        let context = authorize_api_key(&store, "salt", None, "raw-key")
            .unwrap()
            .unwrap();
        assert_eq!(context.credential_id, record.id);
        assert!(!context.is_admin);
        assert_eq!(
            context.scope.as_ref().and_then(|s| s.org_id.as_deref()),
            Some("org-1")
        );
        let reloaded = store.load_api_keys().unwrap();
        assert!(reloaded[0].last_used_at.is_some());
    }

    #[test]
    fn revoked_key_never_authenticates() {
        let dir = TempDir::new().unwrap();
        let store = JsonControlStore::open(dir.path()).unwrap();
        let mut record = ApiKeyRecord::new("old", hash_api_key("", "dead-key"));
        record.status = "revoked".into();
        store.register_api_key(record).unwrap();
        assert!(authorize_api_key(&store, "", None, "dead-key")
            .unwrap()
            .is_none());
    }

    #[test]
    fn wrong_key_resolves_to_none() {
        let dir = TempDir::new().unwrap();
        let store = JsonControlStore::open(dir.path()).unwrap();
        store
            .register_api_key(ApiKeyRecord::new("k", hash_api_key("", "right")))
            .unwrap();
        assert!(authorize_api_key(&store, "", None, "wrong")
            .unwrap()
            .is_none());
    }
}
