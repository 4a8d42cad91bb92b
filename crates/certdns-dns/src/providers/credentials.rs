//! DNS provider credentials

use serde::{Deserialize, Serialize};

/// DNSimple credentials
///
/// DNSimple uses an account or user API token for authentication.
/// Create at: https://dnsimple.com/a/<account>/account/access_tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsimpleCredentials {
    /// API access token
    pub api_token: String,

    /// Optional: numeric account ID. When absent the account is looked up by
    /// the contact e-mail address at login.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,

    /// Use the sandbox environment for testing
    #[serde(default)]
    pub sandbox: bool,
}

impl DnsimpleCredentials {
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
            account_id: None,
            sandbox: false,
        }
    }
}
