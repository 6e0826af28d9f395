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

use super::assume_role_with_web_identity::web_identity_credential;
use super::config::explicit_credential;
use super::sts::{assume_role, RoleStep};
use crate::config::CredentialConfig;
use crate::Credential;
use async_trait::async_trait;
use ini::Ini;
use log::{debug, warn};
use s3vfs_core::{Context, Error, ProvideCredential, Result};
use std::collections::HashSet;

/// ProfileCredentialProvider loads credentials from the AWS shared files:
///
/// - `~/.aws/credentials` (or the path specified by `AWS_SHARED_CREDENTIALS_FILE`)
/// - `~/.aws/config` (or the path specified by `AWS_CONFIG_FILE`)
///
/// A profile may declare `role_arn` together with either `source_profile`
/// or `web_identity_token_file`. Source profiles are walked first and the
/// roles are then assumed from the innermost one outwards, so a chain of any
/// length costs no recursion. A profile that shows up twice in a chain is a
/// configuration error.
#[derive(Debug, Clone)]
pub struct ProfileCredentialProvider {
    config: CredentialConfig,
}

impl ProfileCredentialProvider {
    /// Create a new provider from the resolved credential configuration.
    pub fn new(config: &CredentialConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Set the profile name to use.
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.config.profile = profile.into();
        self
    }

    /// Set the path to the config file.
    pub fn with_config_file(mut self, path: impl Into<String>) -> Self {
        self.config.config_file = path.into();
        self
    }

    /// Set the path to the credentials file.
    pub fn with_credentials_file(mut self, path: impl Into<String>) -> Self {
        self.config.shared_credentials_file = path.into();
        self
    }
}

/// Where the chain of profiles bottoms out.
enum Base {
    Static(Credential),
    WebIdentity { role_arn: String, token_file: String },
}

#[async_trait]
impl ProvideCredential for ProfileCredentialProvider {
    type Credential = Credential;

    async fn provide_credential(&self, ctx: &Context) -> Result<Option<Self::Credential>> {
        let files = ProfileFiles::load(ctx, &self.config).await?;
        if !files.has_profile(&self.config.profile) {
            debug!("profile {} not found in shared files", self.config.profile);
            return Ok(None);
        }

        let mut steps = Vec::new();
        let mut visited = HashSet::new();
        let mut name = self.config.profile.clone();

        let base = loop {
            if !visited.insert(name.clone()) {
                return Err(Error::config_invalid("profile chain contains a cycle")
                    .with_context(format!("profile: {name}")));
            }
            if !files.has_profile(&name) {
                return Err(Error::config_invalid("source profile not found")
                    .with_context(format!("profile: {name}")));
            }

            if let Some(role_arn) = files.get(&name, "role_arn") {
                if let Some(source) = files.get(&name, "source_profile") {
                    steps.push(RoleStep {
                        role_arn,
                        role_session_name: files
                            .get(&name, "role_session_name")
                            .unwrap_or_else(|| self.config.role_session_name.clone()),
                        external_id: files.get(&name, "external_id"),
                    });
                    name = source;
                    continue;
                }
                if let Some(token_file) = files.get(&name, "web_identity_token_file") {
                    break Base::WebIdentity {
                        role_arn,
                        token_file,
                    };
                }
                return Err(Error::config_invalid(
                    "role_arn requires source_profile or web_identity_token_file",
                )
                .with_context(format!("profile: {name}")));
            }

            let cred = explicit_credential(
                files.get(&name, "aws_access_key_id").as_deref(),
                files.get(&name, "aws_secret_access_key").as_deref(),
                files.get(&name, "aws_session_token").as_deref(),
            )
            .map_err(|e| e.with_context(format!("profile: {name}")))?;
            match cred {
                Some(cred) => break Base::Static(cred),
                None if steps.is_empty() => {
                    debug!("profile {name} carries no credential");
                    return Ok(None);
                }
                None => {
                    return Err(Error::config_invalid("source profile carries no credential")
                        .with_context(format!("profile: {name}")))
                }
            }
        };

        let mut cred = match base {
            Base::Static(cred) => cred,
            Base::WebIdentity {
                role_arn,
                token_file,
            } => {
                web_identity_credential(
                    ctx,
                    &self.config.sts_endpoint,
                    &role_arn,
                    &self.config.role_session_name,
                    &token_file,
                )
                .await?
            }
        };
        for step in steps.iter().rev() {
            debug!("assuming role {} from profile chain", step.role_arn);
            cred = assume_role(ctx, &self.config.sts_endpoint, step, &cred).await?;
        }

        Ok(Some(cred))
    }
}

/// Load the region of the selected profile from the config file.
pub async fn load_profile_region(ctx: &Context, config: &CredentialConfig) -> Result<Option<String>> {
    let files = ProfileFiles::load(ctx, config).await?;
    Ok(files.get(&config.profile, "region"))
}

struct ProfileFiles {
    credentials: Option<Ini>,
    config: Option<Ini>,
}

impl ProfileFiles {
    async fn load(ctx: &Context, config: &CredentialConfig) -> Result<Self> {
        Ok(Self {
            credentials: load_ini(ctx, &config.shared_credentials_file).await?,
            config: load_ini(ctx, &config.config_file).await?,
        })
    }

    fn has_profile(&self, profile: &str) -> bool {
        self.credentials
            .as_ref()
            .is_some_and(|ini| ini.section(Some(profile)).is_some())
            || self
                .config
                .as_ref()
                .is_some_and(|ini| ini.section(Some(config_section(profile))).is_some())
    }

    /// Values in the credentials file win over the config file.
    fn get(&self, profile: &str, key: &str) -> Option<String> {
        let from_credentials = self
            .credentials
            .as_ref()
            .and_then(|ini| ini.get_from(Some(profile), key));
        let from_config = self
            .config
            .as_ref()
            .and_then(|ini| ini.get_from(Some(config_section(profile)), key));

        if let (Some(a), Some(b)) = (from_credentials, from_config) {
            if a != b {
                warn!("{key} of profile {profile} differs between credentials and config file, using credentials file");
            }
        }
        from_credentials
            .or(from_config)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

fn config_section(profile: &str) -> String {
    match profile {
        "default" => "default".to_string(),
        x => format!("profile {x}"),
    }
}

async fn load_ini(ctx: &Context, path: &str) -> Result<Option<Ini>> {
    let Some(path) = ctx.expand_home_dir(path) else {
        debug!("failed to expand homedir for path: {path}");
        return Ok(None);
    };

    let content = match ctx.file_read(&path).await {
        Ok(content) => content,
        Err(err) => {
            debug!("failed to read profile file {path}: {err}");
            return Ok(None);
        }
    };

    Ini::load_from_str(&String::from_utf8_lossy(&content))
        .map(Some)
        .map_err(|e| {
            Error::config_invalid("failed to parse profile file")
                .with_context(format!("file: {path}"))
                .with_source(e)
        })
}
