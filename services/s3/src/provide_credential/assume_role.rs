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

use super::sts::{assume_role, RoleStep};
use crate::Credential;
use async_trait::async_trait;
use s3vfs_core::{Context, Error, ProvideCredential, Result};
use std::fmt::{self, Debug};

/// AssumeRoleCredentialProvider exchanges the credential of a source
/// provider for the temporary credential of a role.
///
/// - [AssumeRole](https://docs.aws.amazon.com/STS/latest/APIReference/API_AssumeRole.html)
pub struct AssumeRoleCredentialProvider {
    step: RoleStep,
    sts_endpoint: String,
    source: Box<dyn ProvideCredential<Credential = Credential>>,
}

impl Debug for AssumeRoleCredentialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssumeRoleCredentialProvider")
            .field("role_arn", &self.step.role_arn)
            .field("sts_endpoint", &self.sts_endpoint)
            .field("source", &self.source)
            .finish()
    }
}

impl AssumeRoleCredentialProvider {
    /// Create a new provider assuming `role_arn` with the credential of `source`.
    pub fn new(
        role_arn: impl Into<String>,
        sts_endpoint: impl Into<String>,
        source: impl ProvideCredential<Credential = Credential>,
    ) -> Self {
        Self {
            step: RoleStep {
                role_arn: role_arn.into(),
                role_session_name: "s3vfs".to_string(),
                external_id: None,
            },
            sts_endpoint: sts_endpoint.into(),
            source: Box::new(source),
        }
    }

    /// Set the role session name.
    pub fn with_role_session_name(mut self, name: impl Into<String>) -> Self {
        self.step.role_session_name = name.into();
        self
    }

    /// Set the external ID.
    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.step.external_id = Some(id.into());
        self
    }
}

#[async_trait]
impl ProvideCredential for AssumeRoleCredentialProvider {
    type Credential = Credential;

    async fn provide_credential(&self, ctx: &Context) -> Result<Option<Self::Credential>> {
        let base = self.source.provide_credential(ctx).await?.ok_or_else(|| {
            Error::auth_unavailable("source credential for assume role is missing")
                .with_context(format!("role_arn: {}", self.step.role_arn))
        })?;

        assume_role(ctx, &self.sts_endpoint, &self.step, &base)
            .await
            .map(Some)
    }
}
