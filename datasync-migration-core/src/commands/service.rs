//! Migration service layer
//!
//! The service holds the validated configuration, the provider clients and the
//! run context, and exposes the high-level `run` operation used by the CLI.

use crate::aws::Providers;
use crate::config::MigrationConfig;
use crate::context::RunContext;
use crate::retry::RetryPolicy;

/// Main service struct that holds provider clients and runs migrations
pub struct MigrationService {
    pub(crate) config: MigrationConfig,
    pub(crate) providers: Providers,
    pub(crate) context: RunContext,
    pub(crate) retry: RetryPolicy,
}

impl MigrationService {
    /// Create a service talking to AWS with the profiles named in `config`.
    pub async fn new(config: MigrationConfig, context: RunContext) -> Self {
        let providers = Providers::from_config(&config).await;
        Self::with_providers(config, context, providers)
    }

    pub fn with_providers(
        config: MigrationConfig,
        context: RunContext,
        providers: Providers,
    ) -> Self {
        Self {
            config,
            providers,
            context,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    // run() method implementation is in run.rs
}
