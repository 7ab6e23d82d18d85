// src/broker.rs

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::BrokerConfig;
use crate::error::{BrokerError, CacheError};
use crate::sys::cache::FileCredentialCache;
use crate::sys::mfa::build_source;
use crate::sys::secrets::Credentials;
use crate::sys::sts::StsAssumeRoleRetriever;
use crate::sys::traits::CredentialRetriever;

/// Decides between the cache and the upstream exchange for one invocation.
///
/// Caching and refreshing are independent: without caching the disk is never
/// touched; a forced refresh with caching always calls upstream and rewrites
/// the cache file.
pub struct CredentialBroker {
    retriever: Arc<dyn CredentialRetriever>,
    cache: Option<FileCredentialCache>,
    force_refresh: bool,
}

impl CredentialBroker {
    pub fn new(config: &BrokerConfig) -> Self {
        let serial = config.params.serial_number.as_deref().unwrap_or_default();
        let retriever = StsAssumeRoleRetriever::new(
            config.params.clone(),
            config.session_name.clone(),
            config.profile.clone(),
            config.region.clone(),
            build_source(config.mfa_source, serial),
        );
        Self::with_retriever(config, Arc::new(retriever))
    }

    pub fn with_retriever(config: &BrokerConfig, retriever: Arc<dyn CredentialRetriever>) -> Self {
        let cache = config.use_cache.then(|| {
            FileCredentialCache::new(
                config.cache_dir.clone(),
                config.params.cache_key(),
                Arc::clone(&retriever),
            )
        });
        Self {
            retriever,
            cache,
            force_refresh: config.force_refresh,
        }
    }

    pub async fn acquire(&self) -> Result<Credentials, BrokerError> {
        let Some(cache) = &self.cache else {
            debug!("caching disabled, calling upstream directly");
            return Ok(self.retriever.retrieve().await?);
        };

        match cache.load(self.force_refresh).await {
            Ok(creds) => Ok(creds),
            Err(err @ CacheError::Persist { .. }) => {
                // The credentials are good; only the write-back failed.
                warn!(path = %cache.path().display(), error = %err, "continuing without caching");
                Ok(err.into_credentials()?)
            }
            Err(CacheError::Retrieve(e)) => Err(e.into()),
        }
    }
}
