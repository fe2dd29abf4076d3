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

/// Tenant scope attached to credentials and control-plane entities.
///
/// Any omitted level means unscoped: a scope with only `org_id` set permits
/// every site and stream under that org.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
}

impl TenantScope {
    pub fn new(
        org_id: Option<String>,
        site_id: Option<String>,
        stream_id: Option<String>,
    ) -> Self {
        Self {
            org_id,
            site_id,
            stream_id,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.org_id.is_none() && self.site_id.is_none() && self.stream_id.is_none()
    }

    /// Whether a row tagged with the given levels is visible under this scope.
    pub fn permits(
        &self,
        org_id: Option<&str>,
        site_id: Option<&str>,
        stream_id: Option<&str>,
    ) -> bool {
        level_permits(self.org_id.as_deref(), org_id)
            && level_permits(self.site_id.as_deref(), site_id)
            && level_permits(self.stream_id.as_deref(), stream_id)
    }
}

fn level_permits(scoped: Option<&str>, actual: Option<&str>) -> bool {
    match scoped {
        None => true,
        Some(want) => actual == Some(want),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_scope_permits_everything() {
        let scope = TenantScope::default();
        assert!(scope.is_empty());
        assert!(scope.permits(Some("org-1"), Some("site-1"), None));
        assert!(scope.permits(None, None, None));
    }

    #[test]
    fn scoped_levels_filter() {
        let scope = TenantScope::new(Some("org-1".into()), None, None);
        assert!(scope.permits(Some("org-1"), Some("any-site"), None));
        assert!(!scope.permits(Some("org-2"), None, None));
        // Rows without an org tag are invisible to an org-scoped credential.
        assert!(!scope.permits(None, None, None));
    }
}
