pub mod client;
pub mod credentials;
pub mod errors;
pub mod gate;
#[cfg(test)]
pub mod mock_oauth_client;
pub mod token_cache;
