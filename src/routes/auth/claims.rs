use serde::{Deserialize, Serialize};

/// Identity token claims issued by the upstream identity provider.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: usize, // expiration (as UNIX timestamp)
    pub iss: String,
    pub aud: String,
    // Optional fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}
