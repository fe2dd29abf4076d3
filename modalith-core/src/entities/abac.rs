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

//! Attribute-based access control.
//!
//! A policy matches when every condition key equals the request attribute
//! (or, for list-valued conditions, contains it). Any matching deny wins;
//! otherwise any matching allow permits; otherwise the configured default.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::AuthContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyEffect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbacPolicy {
    pub id: String,
    pub effect: PolicyEffect,
    #[serde(default)]
    pub conditions: BTreeMap<String, Value>,
}

/// Request attributes the conditions are matched against.
pub fn build_attributes(
    auth_context: Option<&AuthContext>,
    action: &str,
) -> BTreeMap<String, Value> {
    let mut attrs = BTreeMap::new();
    attrs.insert("action".to_string(), Value::String(action.to_string()));
    let Some(ctx) = auth_context else {
        return attrs;
    };
    attrs.insert(
        "credential_id".to_string(),
        Value::String(ctx.credential_id.clone()),
    );
    attrs.insert(
        "actor_type".to_string(),
        Value::String(
            match ctx.actor_type {
                crate::auth::ActorType::ApiKey => "api_key",
                crate::auth::ActorType::Jwt => "jwt",
            }
            .to_string(),
        ),
    );
    let actor_id = ctx.actor_id.clone().unwrap_or_else(|| ctx.credential_id.clone());
    attrs.insert("actor_id".to_string(), Value::String(actor_id));
    if let Some(email) = &ctx.email {
        attrs.insert("email".to_string(), Value::String(email.clone()));
    }
    if !ctx.roles.is_empty() {
        attrs.insert(
            "roles".to_string(),
            Value::Array(ctx.roles.iter().cloned().map(Value::String).collect()),
        );
    }
    if !ctx.groups.is_empty() {
        attrs.insert(
            "groups".to_string(),
            Value::Array(ctx.groups.iter().cloned().map(Value::String).collect()),
        );
    }
    if let Some(scope) = &ctx.scope {
        if let Some(org_id) = &scope.org_id {
            attrs.insert("org_id".to_string(), Value::String(org_id.clone()));
        }
        if let Some(site_id) = &scope.site_id {
            attrs.insert("site_id".to_string(), Value::String(site_id.clone()));
        }
        if let Some(stream_id) = &scope.stream_id {
            attrs.insert("stream_id".to_string(), Value::String(stream_id.clone()));
        }
    }
    attrs
}

/// Evaluate policies over attributes. Deny dominates allow.
pub fn evaluate_policies(
    policies: &[AbacPolicy],
    attrs: &BTreeMap<String, Value>,
    default_allow: bool,
) -> bool {
    let mut matched_allow = false;
    for policy in policies {
        if !matches(&policy.conditions, attrs) {
            continue;
        }
        match policy.effect {
            PolicyEffect::Deny => return false,
            PolicyEffect::Allow => matched_allow = true,
        }
    }
    if matched_allow {
        return true;
    }
    default_allow
}

fn matches(conditions: &BTreeMap<String, Value>, attrs: &BTreeMap<String, Value>) -> bool {
    conditions.iter().all(|(key, expected)| {
        let actual = attrs.get(key);
        match_value(actual, expected)
    })
}

fn match_value(actual: Option<&Value>, expected: &Value) -> bool {
    match expected {
        Value::Array(options) => match actual {
            Some(value) => options.iter().any(|option| option == value),
            None => false,
        },
        other => actual == Some(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(effect: PolicyEffect, conditions: &[(&str, Value)]) -> AbacPolicy {
        AbacPolicy {
            id: "p-1".into(),
            effect,
            conditions: conditions
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn deny_wins_over_allow() {
        let attrs = build_attributes(None, "query");
        let policies = vec![
            policy(PolicyEffect::Allow, &[("action", Value::String("query".into()))]),
            policy(PolicyEffect::Deny, &[("action", Value::String("query".into()))]),
        ];
        assert!(!evaluate_policies(&policies, &attrs, true));
    }

    #[test]
    fn list_conditions_match_membership() {
        let attrs = build_attributes(None, "ingest");
        let policies = vec![policy(
            PolicyEffect::Allow,
            &[(
                "action",
                Value::Array(vec!["query".into(), "ingest".into()]),
            )],
        )];
        assert!(evaluate_policies(&policies, &attrs, false));
    }

    #[test]
    fn unmatched_policies_fall_back_to_default() {
        let attrs = build_attributes(None, "query");
        let policies = vec![policy(
            PolicyEffect::Deny,
            &[("action", Value::String("ingest".into()))],
        )];
        assert!(evaluate_policies(&policies, &attrs, true));
        assert!(!evaluate_policies(&policies, &attrs, false));
    }

    #[test]
    fn empty_conditions_match_everything() {
        let attrs = build_attributes(None, "query");
        let policies = vec![policy(PolicyEffect::Deny, &[])];
        assert!(!evaluate_policies(&policies, &attrs, true));
    }
}
