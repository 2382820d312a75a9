use thiserror::Error;

use crate::{github::GatewayError, usage::ValidationError};

/// Failures surfaced by the aggregation and usage-metrics core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("owner and repository name are required")]
    InvalidRepository,

    #[error("username is required")]
    InvalidUser,

    /// No default token was configured and the request carried none.
    #[error("github token not configured: pass Authorization or X-GitHub-Token, or set GITHUB_TOKEN")]
    MissingCredential,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Upstream failures are passed through untouched.
    #[error(transparent)]
    Upstream(#[from] GatewayError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
