//! Resolves `secret_keys` from the process environment, upper-cased and
//! prefixed, standing in for a real vault integration.

use async_trait::async_trait;
use schemist_core::{SecretResolutionError, SecretResolver};

pub struct EnvSecretResolver {
    pub prefix: String,
}

#[async_trait]
impl SecretResolver for EnvSecretResolver {
    async fn resolve(&self, key: &str) -> Result<String, SecretResolutionError> {
        let var_name = format!("{}{}", self.prefix, key.to_ascii_uppercase());
        std::env::var(&var_name).map_err(|_| SecretResolutionError::Failed {
            key: key.to_string(),
            message: format!("environment variable `{var_name}` is not set"),
        })
    }
}
