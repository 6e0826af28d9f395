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
use crate::constants::{AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY};
use crate::Credential;
use async_trait::async_trait;
use s3vfs_core::{Context, Error, ProvideCredential, Result};

/// ConfigCredentialProvider returns the credential set explicitly through
/// options, globally or for the path being accessed.
#[derive(Debug)]
pub struct ConfigCredentialProvider {
    config: CredentialConfig,
}

impl ConfigCredentialProvider {
    /// Create a new ConfigCredentialProvider.
    pub fn new(config: CredentialConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ProvideCredential for ConfigCredentialProvider {
    type Credential = Credential;

    async fn provide_credential(&self, _: &Context) -> Result<Option<Self::Credential>> {
        explicit_credential(
            self.config.access_key_id.as_deref(),
            self.config.secret_access_key.as_deref(),
            self.config.session_token.as_deref(),
        )
    }
}

/// Build a credential out of an explicit key pair.
///
/// Nothing set yields `None`, a half configured pair is an error naming
/// the missing key.
pub(super) fn explicit_credential(
    access_key_id: Option<&str>,
    secret_access_key: Option<&str>,
    session_token: Option<&str>,
) -> Result<Option<Credential>> {
    match (access_key_id, secret_access_key) {
        (Some(ak), Some(sk)) => Ok(Some(Credential {
            access_key_id: ak.to_string(),
            secret_access_key: sk.to_string(),
            session_token: session_token.map(|v| v.to_string()),
            expires_in: None,
        })),
        (Some(_), None) => Err(Error::config_invalid(format!(
            "{AWS_ACCESS_KEY_ID} is set but {AWS_SECRET_ACCESS_KEY} is missing"
        ))),
        (None, Some(_)) => Err(Error::config_invalid(format!(
            "{AWS_SECRET_ACCESS_KEY} is set but {AWS_ACCESS_KEY_ID} is missing"
        ))),
        (None, None) => Ok(None),
    }
}
