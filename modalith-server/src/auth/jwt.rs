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

//! JWT verification and claim mapping.
//!
//! Keys resolve in order: configured HS256 secret, configured PEM public
//! key, then a JWKS endpoint (either an RFC 7517 key set or the
//! certificate-map variant `{kid: <pem>}`), fetched once and cached by kid.
//! Algorithms are allow-listed; required claims are enforced; the configured
//! claim names populate identity, roles, groups, and tenant scope. Admin is
//! membership in the configured admin roles/groups, case-insensitive.

use std::str::FromStr;

use dashmap::DashMap;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use modalith_core::{AuthContext, TenantScope};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("JWT verification not configured")]
    NotConfigured,
    #[error("Invalid JWT: {0}")]
    Invalid(String),
    #[error("JWT missing subject")]
    MissingSubject,
    #[error("JWT missing required claim: {0}")]
    MissingClaim(String),
    #[error("Failed to fetch JWKS: {0}")]
    Jwks(String),
}

#[derive(Debug, Clone)]
pub struct JwtSettings {
    pub issuers: Vec<String>,
    pub audiences: Vec<String>,
    pub jwks_uri: Option<String>,
    pub algorithms: Vec<Algorithm>,
    pub hs256_secret: Option<String>,
    pub public_key_pem: Option<String>,
    pub required_claims: Vec<String>,
    pub claim_sub: String,
    pub claim_email: String,
    pub claim_roles: String,
    pub claim_groups: String,
    pub claim_org_id: String,
    pub claim_site_id: String,
    pub claim_stream_id: String,
    pub admin_roles: Vec<String>,
    pub admin_groups: Vec<String>,
    pub leeway_seconds: u64,
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

impl JwtSettings {
    pub fn from_env() -> Self {
        let env_csv = |name: &str, default: &str| {
            split_csv(&std::env::var(name).unwrap_or_else(|_| default.to_string()))
        };
        let env_opt = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };
        let env_name = |name: &str, default: &str| {
            std::env::var(name)
                .ok()
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let algorithms = env_csv("AUTH_JWT_ALGORITHMS", "RS256")
            .iter()
            .filter_map(|raw| Algorithm::from_str(raw).ok())
            .collect::<Vec<_>>();
        Self {
            issuers: env_csv("AUTH_ISSUER", ""),
            audiences: env_csv("AUTH_AUDIENCE", ""),
            jwks_uri: env_opt("AUTH_JWKS_URI"),
            algorithms: if algorithms.is_empty() {
                vec![Algorithm::RS256]
            } else {
                algorithms
            },
            hs256_secret: env_opt("AUTH_JWT_HS256_SECRET"),
            public_key_pem: env_opt("AUTH_JWT_PUBLIC_KEY"),
            required_claims: env_csv("AUTH_REQUIRED_CLAIMS", "sub"),
            claim_sub: env_name("AUTH_CLAIM_SUB", "sub"),
            claim_email: env_name("AUTH_CLAIM_EMAIL", "email"),
            claim_roles: env_name("AUTH_CLAIM_ROLES", "roles"),
            claim_groups: env_name("AUTH_CLAIM_GROUPS", "groups"),
            claim_org_id: env_name("AUTH_CLAIM_ORG_ID", "org_id"),
            claim_site_id: env_name("AUTH_CLAIM_SITE_ID", "site_id"),
            claim_stream_id: env_name("AUTH_CLAIM_STREAM_ID", "stream_id"),
            admin_roles: env_csv("AUTH_ADMIN_ROLES", "admin"),
            admin_groups: env_csv("AUTH_ADMIN_GROUPS", "admins"),
            leeway_seconds: std::env::var("AUTH_JWT_LEEWAY_SECONDS")
                .ok()
                .and_then(|raw| raw.trim().parse().ok())
                .unwrap_or(0),
        }
    }

    pub fn configured(&self) -> bool {
        self.hs256_secret.is_some() || self.public_key_pem.is_some() || self.jwks_uri.is_some()
    }
}

pub struct JwtVerifier {
    settings: JwtSettings,
    http: reqwest::Client,
    /// `(jwks_uri, kid)` keyed decoding keys.
    key_cache: DashMap<String, DecodingKey>,
}

impl JwtVerifier {
    pub fn new(settings: JwtSettings) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
            key_cache: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &JwtSettings {
        &self.settings
    }

    /// Verify a token and map its claims to an auth context.
    pub async fn authenticate(&self, token: &str) -> Result<AuthContext, JwtError> {
        let claims = self.decode(token).await?;
        self.context_from_claims(&claims)
    }

    async fn decode(&self, token: &str) -> Result<Value, JwtError> {
        let (key, algorithms) = self.resolve_key(token).await?;
        let mut validation = Validation::new(algorithms[0]);
        validation.algorithms = algorithms;
        validation.leeway = self.settings.leeway_seconds;
        validation.validate_exp = true;
        if !self.settings.audiences.is_empty() {
            validation.set_audience(&self.settings.audiences);
        } else {
            validation.validate_aud = false;
        }
        if !self.settings.issuers.is_empty() {
            validation.set_issuer(&self.settings.issuers);
        }
        validation.required_spec_claims.clear();

        let data = decode::<Value>(token, &key, &validation)
            .map_err(|err| JwtError::Invalid(err.to_string()))?;
        for claim in &self.settings.required_claims {
            if data.claims.get(claim).is_none() {
                return Err(JwtError::MissingClaim(claim.clone()));
            }
        }
        Ok(data.claims)
    }

    async fn resolve_key(&self, token: &str) -> Result<(DecodingKey, Vec<Algorithm>), JwtError> {
        if let Some(secret) = &self.settings.hs256_secret {
            return Ok((
                DecodingKey::from_secret(secret.as_bytes()),
                vec![Algorithm::HS256],
            ));
        }
        if let Some(pem) = &self.settings.public_key_pem {
            return Ok((pem_to_key(pem)?, self.settings.algorithms.clone()));
        }
        if let Some(jwks_uri) = &self.settings.jwks_uri {
            let header =
                decode_header(token).map_err(|err| JwtError::Invalid(err.to_string()))?;
            let kid = header
                .kid
                .ok_or_else(|| JwtError::Invalid("JWT header missing kid".into()))?;
            let cache_key = format!("{jwks_uri}\x00{kid}");
            if let Some(hit) = self.key_cache.get(&cache_key) {
                return Ok((hit.value().clone(), vec![header.alg]));
            }
            let key = self.fetch_jwks_key(jwks_uri, &kid).await?;
            self.key_cache.insert(cache_key, key.clone());
            return Ok((key, vec![header.alg]));
        }
        Err(JwtError::NotConfigured)
    }

    async fn fetch_jwks_key(&self, jwks_uri: &str, kid: &str) -> Result<DecodingKey, JwtError> {
        let payload: Value = self
            .http
            .get(jwks_uri)
            .send()
            .await
            .map_err(|err| JwtError::Jwks(err.to_string()))?
            .json()
            .await
            .map_err(|err| JwtError::Jwks(err.to_string()))?;

        if payload.get("keys").is_some() {
            let jwks: jsonwebtoken::jwk::JwkSet = serde_json::from_value(payload)
                .map_err(|err| JwtError::Jwks(err.to_string()))?;
            let jwk = jwks
                .find(kid)
                .ok_or_else(|| JwtError::Jwks(format!("kid {kid} not found in JWKS")))?;
            return DecodingKey::from_jwk(jwk).map_err(|err| JwtError::Jwks(err.to_string()));
        }

        // Certificate-map variant: `{kid: <pem>}`.
        let pem = payload
            .get(kid)
            .and_then(Value::as_str)
            .ok_or_else(|| JwtError::Jwks(format!("kid {kid} not found in key map")))?;
        pem_to_key(pem)
    }

    fn context_from_claims(&self, claims: &Value) -> Result<AuthContext, JwtError> {
        let settings = &self.settings;
        let sub = coerce_str(claims.get(&settings.claim_sub)).ok_or(JwtError::MissingSubject)?;
        let roles = coerce_list(claims.get(&settings.claim_roles));
        let groups = coerce_list(claims.get(&settings.claim_groups));
        let scope = TenantScope::new(
            coerce_str(claims.get(&settings.claim_org_id)),
            coerce_str(claims.get(&settings.claim_site_id)),
            coerce_str(claims.get(&settings.claim_stream_id)),
        );
        let is_admin = is_admin(&roles, &groups, settings);

        let mut context = AuthContext::jwt(sub)
            .with_scope(Some(scope))
            .with_admin(is_admin);
        context.email = coerce_str(claims.get(&settings.claim_email));
        context.roles = roles;
        context.groups = groups;
        Ok(context)
    }
}

fn pem_to_key(pem: &str) -> Result<DecodingKey, JwtError> {
    let bytes = pem.as_bytes();
    DecodingKey::from_rsa_pem(bytes)
        .or_else(|_| DecodingKey::from_ec_pem(bytes))
        .or_else(|_| DecodingKey::from_ed_pem(bytes))
        .map_err(|err| JwtError::Invalid(format!("unusable public key: {err}")))
}

fn coerce_str(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn coerce_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(raw)) => split_csv(raw),
        Some(Value::Array(items)) => {
            let mut seen = Vec::new();
            for item in items {
                if let Some(text) = coerce_str(Some(item)) {
                    if !seen.contains(&text) {
                        seen.push(text);
                    }
                }
            }
            seen
        }
        _ => Vec::new(),
    }
}

fn is_admin(roles: &[String], groups: &[String], settings: &JwtSettings) -> bool {
    let role_hit = roles.iter().any(|role| {
        settings
            .admin_roles
            .iter()
            .any(|admin| admin.eq_ignore_ascii_case(role))
    });
    let group_hit = groups.iter().any(|group| {
        settings
            .admin_groups
            .iter()
            .any(|admin| admin.eq_ignore_ascii_case(group))
    });
    role_hit || group_hit
}

/// Bearer token candidates from the auth headers, first match wins.
pub fn extract_bearer_tokens(headers: &axum::http::HeaderMap) -> Vec<String> {
    let mut tokens = Vec::new();
    for header_name in [
        "authorization",
        "x-forwarded-authorization",
        "x-original-authorization",
    ] {
        let Some(value) = headers.get(header_name).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        let mut parts = value.split_whitespace();
        if let (Some(scheme), Some(token)) = (parts.next(), parts.next()) {
            if scheme.eq_ignore_ascii_case("bearer")
                && !token.is_empty()
                && !tokens.contains(&token.to_string())
            {
                tokens.push(token.to_string());
            }
        }
    }
    tokens
}
