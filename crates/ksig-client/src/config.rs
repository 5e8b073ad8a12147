//! Embedder-provided configuration.
//!
//! Everything the context needs from its environment: service endpoints
//! with their login material, the publications-file location, transport
//! timeouts, and the publications-file cache policy. The structs derive
//! serde so embedders can load them straight from their own configuration
//! files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Endpoint plus login material for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCredentials {
    pub uri: String,
    pub login_id: String,
    /// Shared HMAC secret for the service.
    pub key: String,
}

impl ServiceCredentials {
    pub fn new(uri: impl Into<String>, login_id: impl Into<String>, key: impl Into<String>) -> Self {
        ServiceCredentials {
            uri: uri.into(),
            login_id: login_id.into(),
            key: key.into(),
        }
    }
}

/// When a cached publications file stops being good enough.
///
/// The default never expires: the file only grows, and a context that
/// wants fresher publications can opt into a time-to-live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum PubFileCachePolicy {
    NeverExpire,
    Ttl { seconds: u64 },
}

impl Default for PubFileCachePolicy {
    fn default() -> Self {
        PubFileCachePolicy::NeverExpire
    }
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_transfer_timeout() -> u64 {
    10
}

/// Full context configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub aggregator: Option<ServiceCredentials>,
    #[serde(default)]
    pub extender: Option<ServiceCredentials>,
    #[serde(default)]
    pub publications_file_uri: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_secs: u64,
    /// E-mail address expected on the publications-file signing
    /// certificate; unchecked when absent.
    #[serde(default)]
    pub publication_cert_email: Option<String>,
    #[serde(default)]
    pub pubfile_cache_policy: PubFileCachePolicy,
}

impl ClientConfig {
    pub fn new() -> Self {
        ClientConfig {
            connect_timeout_secs: default_connect_timeout(),
            transfer_timeout_secs: default_transfer_timeout(),
            ..ClientConfig::default()
        }
    }

    pub fn with_aggregator(
        mut self,
        uri: impl Into<String>,
        login_id: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        self.aggregator = Some(ServiceCredentials::new(uri, login_id, key));
        self
    }

    pub fn with_extender(
        mut self,
        uri: impl Into<String>,
        login_id: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        self.extender = Some(ServiceCredentials::new(uri, login_id, key));
        self
    }

    pub fn with_publications_file_uri(mut self, uri: impl Into<String>) -> Self {
        self.publications_file_uri = Some(uri.into());
        self
    }

    pub fn with_timeouts(mut self, connect_secs: u64, transfer_secs: u64) -> Self {
        self.connect_timeout_secs = connect_secs;
        self.transfer_timeout_secs = transfer_secs;
        self
    }

    pub fn with_publication_cert_email(mut self, email: impl Into<String>) -> Self {
        self.publication_cert_email = Some(email.into());
        self
    }

    pub fn with_pubfile_cache_policy(mut self, policy: PubFileCachePolicy) -> Self {
        self.pubfile_cache_policy = policy;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }
}
