use std::{sync::Arc, time::Duration};

use super::{Gateway, GatewayError, RestGateway};
use crate::{
    config::GitHubConfig,
    error::{Error, Result},
};

/// Builds the gateway a request should use, given the token the caller
/// supplied (if any).
pub trait GatewayProvider: Send + Sync {
    fn gateway(&self, token_override: Option<&str>) -> Result<Arc<dyn Gateway>>;
}

/// Provider backed by [`RestGateway`]. Holds a default gateway when a token
/// was configured; per-request tokens reuse its connection pool.
pub struct RestGatewayProvider {
    template: RestGateway,
    has_default_token: bool,
}

impl RestGatewayProvider {
    pub fn from_config(config: &GitHubConfig) -> Result<Self, GatewayError> {
        let token = config
            .token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty());

        let template = RestGateway::new(
            &config.api_base_url,
            token.unwrap_or_default(),
            &config.user_agent,
            Duration::from_secs(config.request_timeout_secs),
        )?;

        Ok(Self {
            template,
            has_default_token: token.is_some(),
        })
    }

    pub fn has_default_token(&self) -> bool {
        self.has_default_token
    }
}

impl GatewayProvider for RestGatewayProvider {
    fn gateway(&self, token_override: Option<&str>) -> Result<Arc<dyn Gateway>> {
        match token_override.map(str::trim).filter(|token| !token.is_empty()) {
            Some(token) => Ok(Arc::new(self.template.with_token(token))),
            None if self.has_default_token => Ok(Arc::new(self.template.clone())),
            None => Err(Error::MissingCredential),
        }
    }
}
