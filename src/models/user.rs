use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::error::{AppError, Result};

/// How a local account came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UserSource {
    Unknown,
    /// Created lazily when a processor-confirmed buyer had no local account
    Webpay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub source: UserSource,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateUser {
    pub email: String,
    pub display_name: Option<String>,
    #[serde(default = "default_source")]
    pub source: UserSource,
}

fn default_source() -> UserSource {
    UserSource::Unknown
}

impl CreateUser {
    pub fn validate(&self) -> Result<()> {
        let email = self.email.trim();
        let valid = match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty() && !domain.is_empty() && !domain.contains('@')
            }
            None => false,
        };
        if !valid {
            return Err(AppError::BadRequest(format!("Invalid email: {}", email)));
        }
        Ok(())
    }
}
