use std::fmt;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};

/// Layout of absolute timestamps in the credential cache, local time.
pub const CACHE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Access token for the OCR service together with its absolute expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub expires_at: DateTime<Local>,
}

impl Credential {
    pub fn is_valid_at(&self, now: DateTime<Local>) -> bool {
        !self.access_token.is_empty() && now < self.expires_at
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// On-disk form of a [`Credential`].
///
/// `expires_in` keeps the historical field name but holds an absolute local
/// timestamp, not a duration.
#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialCache {
    pub access_token: String,
    pub expires_in: String,
}

impl From<&Credential> for CredentialCache {
    fn from(credential: &Credential) -> Self {
        Self {
            access_token: credential.access_token.clone(),
            expires_in: credential.expires_at.format(CACHE_TIME_FORMAT).to_string(),
        }
    }
}

impl CredentialCache {
    /// Convert back into a [`Credential`]; `None` when the entry is blank or its
    /// timestamp does not parse.
    pub fn into_credential(self) -> Option<Credential> {
        if self.access_token.is_empty() || self.expires_in.is_empty() {
            return None;
        }
        let naive = NaiveDateTime::parse_from_str(&self.expires_in, CACHE_TIME_FORMAT).ok()?;
        let expires_at = Local.from_local_datetime(&naive).earliest()?;
        Some(Credential {
            access_token: self.access_token,
            expires_at,
        })
    }
}
