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

use super::sts::assume_role_with_web_identity;
use crate::config::CredentialConfig;
use crate::Credential;
use async_trait::async_trait;
use log::debug;
use s3vfs_core::{Context, Error, ProvideCredential, Result};

/// AssumeRoleWithWebIdentityCredentialProvider exchanges a web identity
/// token read from a file for temporary credentials.
///
/// Both `AWS_ROLE_ARN` and `AWS_WEB_IDENTITY_TOKEN_FILE` must be set for
/// this provider to apply.
///
/// - [AssumeRoleWithWebIdentity](https://docs.aws.amazon.com/STS/latest/APIReference/API_AssumeRoleWithWebIdentity.html)
#[derive(Debug, Default, Clone)]
pub struct AssumeRoleWithWebIdentityCredentialProvider {
    role_arn: Option<String>,
    web_identity_token_file: Option<String>,
    role_session_name: String,
    sts_endpoint: String,
}

impl AssumeRoleWithWebIdentityCredentialProvider {
    /// Create a new provider from the resolved credential configuration.
    pub fn new(config: &CredentialConfig) -> Self {
        Self {
            role_arn: config.role_arn.clone(),
            web_identity_token_file: config.web_identity_token_file.clone(),
            role_session_name: config.role_session_name.clone(),
            sts_endpoint: config.sts_endpoint.clone(),
        }
    }

    /// Set the role ARN.
    pub fn with_role_arn(mut self, role_arn: impl Into<String>) -> Self {
        self.role_arn = Some(role_arn.into());
        self
    }

    /// Set the web identity token file path.
    pub fn with_web_identity_token_file(mut self, path: impl Into<String>) -> Self {
        self.web_identity_token_file = Some(path.into());
        self
    }
}

#[async_trait]
impl ProvideCredential for AssumeRoleWithWebIdentityCredentialProvider {
    type Credential = Credential;

    async fn provide_credential(&self, ctx: &Context) -> Result<Option<Self::Credential>> {
        let (Some(role_arn), Some(token_file)) = (&self.role_arn, &self.web_identity_token_file)
        else {
            debug!("web identity federation is not configured");
            return Ok(None);
        };

        web_identity_credential(
            ctx,
            &self.sts_endpoint,
            role_arn,
            &self.role_session_name,
            token_file,
        )
        .await
        .map(Some)
    }
}

/// Read the token in `token_file` and exchange it for a credential.
pub(super) async fn web_identity_credential(
    ctx: &Context,
    sts_endpoint: &str,
    role_arn: &str,
    role_session_name: &str,
    token_file: &str,
) -> Result<Credential> {
    let path = ctx
        .expand_home_dir(token_file)
        .ok_or_else(|| Error::config_invalid("failed to expand home dir of token file"))?;
    let token = ctx.file_read_as_string(&path).await.map_err(|e| {
        Error::config_invalid("failed to read web identity token file")
            .with_context(format!("file: {token_file}"))
            .with_source(e)
    })?;

    assume_role_with_web_identity(ctx, sts_endpoint, role_arn, role_session_name, token.trim())
        .await
}
