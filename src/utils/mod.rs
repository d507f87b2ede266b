pub mod encryption;
pub mod jwt;
pub mod state_signer;
