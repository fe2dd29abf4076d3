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

/// External OCR service registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrConnector {
    pub id: String,
    pub name: String,
    pub url: String,
    pub auth_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
    pub enabled: bool,
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_s: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OcrConnector {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            url: url.into(),
            auth_type: "none".to_string(),
            auth_header: None,
            token_env: None,
            enabled: true,
            is_default: false,
            max_pages: None,
            timeout_s: None,
            notes: None,
            org_id: None,
            site_id: None,
            stream_id: None,
            status: "active".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Invariants checked before the connector is persisted.
    pub fn validate(&self) -> Result<(), ModalithError> {
        let scheme_ok = self.url.starts_with("http://") || self.url.starts_with("https://");
        if !scheme_ok {
            return Err(ModalithError::validation(format!(
                "OCR connector url must use http or https: {}",
                self.url
            )));
        }
        match self.auth_type.as_str() {
            "none" => Ok(()),
            "header" => {
                if self.auth_header.as_deref().unwrap_or("").is_empty() {
                    Err(ModalithError::validation(
                        "auth_type=header requires auth_header",
                    ))
                } else {
                    Ok(())
                }
            }
            "bearer" => {
                if self.token_env.as_deref().unwrap_or("").is_empty() {
                    Err(ModalithError::validation(
                        "auth_type=bearer requires token_env",
                    ))
                } else {
                    Ok(())
                }
            }
            other => Err(ModalithError::validation(format!(
                "Unsupported OCR auth_type: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_scheme_is_enforced() {
        let connector = OcrConnector::new("docs", "ftp://ocr.internal");
        assert!(connector.validate().is_err());
        let connector = OcrConnector::new("docs", "https://ocr.internal");
        assert!(connector.validate().is_ok());
    }

    #[test]
    fn auth_type_dependent_fields() {
        let mut connector = OcrConnector::new("docs", "https://ocr.internal");
        connector.auth_type = "header".into();
        assert!(connector.validate().is_err());
        connector.auth_header = Some("x-ocr-key".into());
        assert!(connector.validate().is_ok());

        connector.auth_type = "bearer".into();
        assert!(connector.validate().is_err());
        connector.token_env = Some("OCR_TOKEN".into());
        assert!(connector.validate().is_ok());

        connector.auth_type = "oauth".into();
        assert!(connector.validate().is_err());
    }
}
