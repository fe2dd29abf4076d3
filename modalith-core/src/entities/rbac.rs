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

//! Role-based access control primitives.
//!
//! Roles map to permission sets; the wildcard `*` permission allows every
//! action. Bindings map a credential id to its role names.

use std::collections::{BTreeMap, BTreeSet};

pub const ACTION_QUERY: &str = "query";
pub const ACTION_INGEST: &str = "ingest";
pub const ACTION_ADMIN: &str = "admin";

pub const WILDCARD_PERMISSION: &str = "*";

/// `credential_id -> [role_name]`.
pub type RoleBindings = BTreeMap<String, Vec<String>>;

/// Built-in role table.
fn role_permissions(role: &str) -> Option<&'static [&'static str]> {
    match role {
        "admin" => Some(&[WILDCARD_PERMISSION]),
        "writer" => Some(&[ACTION_QUERY, ACTION_INGEST]),
        "reader" => Some(&[ACTION_QUERY]),
        _ => None,
    }
}

/// Union of permissions granted by the given roles.
pub fn permissions_for_roles<'a, I>(roles: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut permissions = BTreeSet::new();
    for role in roles {
        if let Some(granted) = role_permissions(role.trim()) {
            permissions.extend(granted.iter().map(|p| p.to_string()));
        }
    }
    permissions
}

/// Whether the permission set allows the action.
pub fn allows(permissions: &BTreeSet<String>, action: &str) -> bool {
    permissions.contains(WILDCARD_PERMISSION) || permissions.contains(action)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_can_query_but_not_ingest() {
        let perms = permissions_for_roles(["reader"]);
        assert!(allows(&perms, ACTION_QUERY));
        assert!(!allows(&perms, ACTION_INGEST));
    }

    #[test]
    fn admin_wildcard_allows_everything() {
        let perms = permissions_for_roles(["admin"]);
        assert!(allows(&perms, ACTION_QUERY));
        assert!(allows(&perms, ACTION_INGEST));
        assert!(allows(&perms, "anything-else"));
    }

    #[test]
    fn unknown_roles_grant_nothing() {
        let perms = permissions_for_roles(["superuser"]);
        assert!(perms.is_empty());
        assert!(!allows(&perms, ACTION_QUERY));
    }
}
