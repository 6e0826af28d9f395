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

use super::{
    AssumeRoleWithWebIdentityCredentialProvider, ConfigCredentialProvider, EnvCredentialProvider,
    IMDSv2CredentialProvider, ProfileCredentialProvider, ProvideCredentialChain,
};
use crate::config::CredentialConfig;
use crate::Credential;
use async_trait::async_trait;
use s3vfs_core::{Context, ProvideCredential, Result};

/// DefaultCredentialProvider is a loader that will try to load credential via default chains.
///
/// Resolution order:
///
/// 1. Explicit credentials set through options
/// 2. Shared config (`~/.aws/config`, `~/.aws/credentials`)
/// 3. Environment variables
/// 4. Web Identity Tokens
/// 5. EC2 IMDSv2
#[derive(Debug)]
pub struct DefaultCredentialProvider {
    chain: ProvideCredentialChain,
}

impl DefaultCredentialProvider {
    /// Create the default chain for `config`.
    pub fn new(config: &CredentialConfig) -> Self {
        let chain = ProvideCredentialChain::new()
            .push(ConfigCredentialProvider::new(config.clone()))
            .push(ProfileCredentialProvider::new(config))
            .push(EnvCredentialProvider::new())
            .push(AssumeRoleWithWebIdentityCredentialProvider::new(config))
            .push(IMDSv2CredentialProvider::new(config));

        Self { chain }
    }

    /// Create with a custom credential chain.
    pub fn with_chain(chain: ProvideCredentialChain) -> Self {
        Self { chain }
    }

    /// Resolve a credential, failing with `AuthUnavailable` if none is found.
    pub async fn resolve(&self, ctx: &Context) -> Result<Credential> {
        self.chain.resolve(ctx).await
    }
}

#[async_trait]
impl ProvideCredential for DefaultCredentialProvider {
    type Credential = Credential;

    async fn provide_credential(&self, ctx: &Context) -> Result<Option<Self::Credential>> {
        self.chain.provide_credential(ctx).await
    }
}
