// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use crate::config::CredentialConfig;
use crate::provide_credential::DefaultCredentialProvider;
use log::debug;
use s3vfs_core::time::{now, DateTime};
use s3vfs_core::utils::Redact;
use s3vfs_core::{Context, Result, SigningCredential};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, RwLock};

/// Credential that holds the access_key and secret_key.
///
/// Temporary credentials from STS or instance metadata carry an expiration;
/// they are considered invalid two minutes before it so that a request
/// signed with them doesn't reach the service expired.
#[derive(Default, Clone)]
pub struct Credential {
    /// Access key id for aws services.
    pub access_key_id: String,
    /// Secret access key for aws services.
    pub secret_access_key: String,
    /// Session token for aws services.
    pub session_token: Option<String>,
    /// Expiration time for this credential.
    pub expires_in: Option<DateTime>,
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_key_id", &Redact::from(&self.access_key_id))
            .field("secret_access_key", &Redact::from(&self.secret_access_key))
            .field("session_token", &Redact::from(&self.session_token))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

impl SigningCredential for Credential {
    fn is_valid(&self) -> bool {
        if (self.access_key_id.is_empty() || self.secret_access_key.is_empty())
            && self.session_token.is_none()
        {
            return false;
        }
        // Take 120s as buffer to avoid edge cases.
        match self.expires_in {
            Some(v) => v > now() + chrono::TimeDelta::minutes(2),
            None => true,
        }
    }
}

/// CredentialStore caches the resolved credential of every bucket.
///
/// An entry is keyed by the bucket and remembers the [`CredentialConfig`] it
/// was resolved from. It's resolved again when that configuration changes or
/// once the credential is no longer valid. The provider chain of an entry is
/// kept across resolutions, so state like the instance metadata token is
/// reused. Anonymous access (no-sign mode) resolves to `None`, which the
/// signer treats as "leave unsigned".
#[derive(Debug, Default)]
pub struct CredentialStore {
    entries: RwLock<HashMap<String, Entry>>,
}

#[derive(Debug)]
struct Entry {
    config: CredentialConfig,
    provider: Arc<DefaultCredentialProvider>,
    credential: Option<Credential>,
}

impl CredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the credential used to access `bucket`.
    pub async fn get(
        &self,
        ctx: &Context,
        bucket: &str,
        config: &CredentialConfig,
    ) -> Result<Option<Credential>> {
        if config.no_sign_request {
            return Ok(None);
        }

        let provider = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            match entries.get(bucket) {
                Some(entry) if &entry.config == config => {
                    if let Some(cred) = entry.credential.as_ref().filter(|c| c.is_valid()) {
                        return Ok(Some(cred.clone()));
                    }
                    entry.provider.clone()
                }
                _ => Arc::new(DefaultCredentialProvider::new(config)),
            }
        };

        debug!("resolving credential for bucket {bucket}");
        let cred = provider.resolve(ctx).await?;

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            bucket.to_string(),
            Entry {
                config: config.clone(),
                provider,
                credential: Some(cred.clone()),
            },
        );
        Ok(Some(cred))
    }

    /// Forget every cached credential.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Replace the cached credential of `bucket`.
    #[cfg(test)]
    pub(crate) fn insert(&self, bucket: &str, config: &CredentialConfig, cred: Credential) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let provider = entries
            .remove(bucket)
            .filter(|entry| &entry.config == config)
            .map(|entry| entry.provider)
            .unwrap_or_else(|| Arc::new(DefaultCredentialProvider::new(config)));
        entries.insert(
            bucket.to_string(),
            Entry {
                config: config.clone(),
                provider,
                credential: Some(cred),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::X_AWS_EC2_METADATA_TOKEN;
    use http::Method;
    use pretty_assertions::assert_eq;
    use s3vfs_core::StaticEnv;
    use s3vfs_file_read_tokio::TokioFileRead;
    use s3vfs_http_send_mock::{MockHttpSend, MockResponse};

    fn credential(expires_in: Option<DateTime>) -> Credential {
        Credential {
            access_key_id: "AWS_ACCESS_KEY_ID".to_string(),
            secret_access_key: "AWS_SECRET_ACCESS_KEY".to_string(),
            session_token: None,
            expires_in,
        }
    }

    #[test]
    fn test_is_valid() {
        assert!(credential(None).is_valid());
        assert!(credential(Some(now() + chrono::TimeDelta::hours(1))).is_valid());
        // Inside the two minutes margin.
        assert!(!credential(Some(now() + chrono::TimeDelta::seconds(60))).is_valid());
        assert!(!credential(Some(now() - chrono::TimeDelta::hours(1))).is_valid());
        assert!(!Credential::default().is_valid());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let output = format!("{:?}", credential(None));
        assert!(!output.contains("AWS_SECRET_ACCESS_KEY"), "{output}");
        assert!(output.contains("AWS***KEY"), "{output}");
    }

    fn explicit_config(key: &str) -> CredentialConfig {
        CredentialConfig {
            access_key_id: Some(key.to_string()),
            secret_access_key: Some("AWS_SECRET_ACCESS_KEY".to_string()),
            ec2_metadata_disabled: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_store_no_sign_request() -> Result<()> {
        let store = CredentialStore::new();
        let config = CredentialConfig {
            no_sign_request: true,
            ..explicit_config("KEY")
        };

        assert!(store.get(&Context::new(), "bucket", &config).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_store_resolves_again_on_config_change() -> Result<()> {
        let store = CredentialStore::new();
        let ctx = Context::new();

        let cred = store.get(&ctx, "bucket", &explicit_config("KEY1")).await?;
        assert_eq!(cred.map(|c| c.access_key_id).as_deref(), Some("KEY1"));

        let cred = store.get(&ctx, "bucket", &explicit_config("KEY2")).await?;
        assert_eq!(cred.map(|c| c.access_key_id).as_deref(), Some("KEY2"));
        Ok(())
    }

    #[tokio::test]
    async fn test_store_resolves_again_on_expiry() -> Result<()> {
        let store = CredentialStore::new();
        let config = explicit_config("FRESH");
        store.insert(
            "bucket",
            &config,
            Credential {
                access_key_id: "EXPIRED".to_string(),
                ..credential(Some(now() - chrono::TimeDelta::minutes(1)))
            },
        );

        let cred = store.get(&Context::new(), "bucket", &config).await?;
        assert_eq!(cred.map(|c| c.access_key_id).as_deref(), Some("FRESH"));
        Ok(())
    }

    #[tokio::test]
    async fn test_store_keeps_valid_entry() -> Result<()> {
        let store = CredentialStore::new();
        let config = explicit_config("FRESH");
        store.insert(
            "bucket",
            &config,
            Credential {
                access_key_id: "CACHED".to_string(),
                ..credential(None)
            },
        );

        let cred = store.get(&Context::new(), "bucket", &config).await?;
        assert_eq!(cred.map(|c| c.access_key_id).as_deref(), Some("CACHED"));

        store.clear();
        let cred = store.get(&Context::new(), "bucket", &config).await?;
        assert_eq!(cred.map(|c| c.access_key_id).as_deref(), Some("FRESH"));
        Ok(())
    }
    #[tokio::test]
    async fn test_store_reuses_instance_metadata_token() -> Result<()> {
        let mock = MockHttpSend::new();
        mock.expect(
            Method::PUT,
            "/latest/api/token",
            MockResponse::new(200).with_body("TOKEN"),
        );
        // Expires inside the two minutes margin, so every get resolves again.
        let expiration = (now() + chrono::TimeDelta::minutes(1))
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let body = format!(
            r#"{{"Code": "Success", "AccessKeyId": "IMDS_KEY", "SecretAccessKey": "IMDS_SECRET", "Token": "IMDS_TOKEN", "Expiration": "{expiration}"}}"#
        );
        for _ in 0..2 {
            mock.expect(
                Method::GET,
                "/latest/meta-data/iam/security-credentials/",
                MockResponse::new(200).with_body("myprofile"),
            );
            mock.expect(
                Method::GET,
                "/latest/meta-data/iam/security-credentials/myprofile",
                MockResponse::new(200).with_body(body.clone()),
            );
        }
        let ctx = Context::new()
            .with_file_read(TokioFileRead)
            .with_http_send(mock.clone())
            .with_env(StaticEnv {
                home_dir: None,
                envs: HashMap::new(),
            });
        let config = CredentialConfig {
            config_file: "/non/existent/config".to_string(),
            shared_credentials_file: "/non/existent/credentials".to_string(),
            ..Default::default()
        };

        let store = CredentialStore::new();
        for _ in 0..2 {
            let cred = store.get(&ctx, "bucket", &config).await?;
            assert_eq!(cred.map(|c| c.access_key_id).as_deref(), Some("IMDS_KEY"));
        }

        let requests = mock.requests();
        assert_eq!(requests.len(), 5);
        assert_eq!(
            requests.iter().filter(|r| r.method == Method::PUT).count(),
            1
        );
        assert!(requests[1..]
            .iter()
            .all(|r| r.header(X_AWS_EC2_METADATA_TOKEN) == "TOKEN"));
        Ok(())
    }
}
