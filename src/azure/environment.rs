//! Azure cloud environments
//!
//! Each sovereign cloud has its own Resource Manager endpoint and Active
//! Directory authority.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Public,
    UsGovernment,
    China,
    German,
}

impl Environment {
    pub fn resource_manager_endpoint(&self) -> &'static str {
        match self {
            Self::Public => "https://management.azure.com",
            Self::UsGovernment => "https://management.usgovcloudapi.net",
            Self::China => "https://management.chinacloudapi.cn",
            Self::German => "https://management.microsoftazure.de",
        }
    }

    pub fn active_directory_endpoint(&self) -> &'static str {
        match self {
            Self::Public => "https://login.microsoftonline.com",
            Self::UsGovernment => "https://login.microsoftonline.us",
            Self::China => "https://login.chinacloudapi.cn",
            Self::German => "https://login.microsoftonline.de",
        }
    }

    /// OAuth2 scope requested for Resource Manager tokens
    pub fn token_scope(&self) -> String {
        format!("{}/.default", self.resource_manager_endpoint())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::UsGovernment => "usgovernment",
            Self::China => "china",
            Self::German => "german",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" | "azurecloud" => Ok(Self::Public),
            "usgovernment" | "azureusgovernmentcloud" => Ok(Self::UsGovernment),
            "china" | "azurechinacloud" => Ok(Self::China),
            "german" | "azuregermancloud" => Ok(Self::German),
            other => Err(format!(
                "unknown environment {other:?} (expected public, usgovernment, china or german)"
            )),
        }
    }
}
