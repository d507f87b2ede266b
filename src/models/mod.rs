pub mod oauth_token;
