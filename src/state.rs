use std::sync::Arc;

use crate::config::Config;
use crate::models::oauth_token::BrokerProvider;
use crate::services::oauth::gate::ConnectionGate;
use crate::utils::jwt::{IdentityVerifier, IdentityVerifierProvider};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub schwab: Arc<ConnectionGate>,
    pub tastytrade: Arc<ConnectionGate>,
    pub identity: Arc<IdentityVerifier>,
}

impl AppState {
    pub fn gate(&self, provider: BrokerProvider) -> &ConnectionGate {
        match provider {
            BrokerProvider::Schwab => &self.schwab,
            BrokerProvider::TastyTrade => &self.tastytrade,
        }
    }
}

impl IdentityVerifierProvider for AppState {
    fn identity_verifier(&self) -> &IdentityVerifier {
        &self.identity
    }
}
