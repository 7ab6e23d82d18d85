// src/sys/profile.rs
//
// Role settings from the shared AWS config files, read the way the AWS CLI
// reads an assume-role profile (`role_arn`, `mfa_serial`, `source_profile`, ...).

use aws_runtime::env_config::file::EnvConfigFiles;
use aws_sdk_sts::error::DisplayErrorContext;
use aws_types::os_shim_internal::{Env, Fs};
use tracing::debug;

use crate::error::ConfigError;

pub const DEFAULT_PROFILE: &str = "default";

/// The assume-role keys of one profile. Blank values are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleProfile {
    pub role_arn: Option<String>,
    pub mfa_serial: Option<String>,
    pub external_id: Option<String>,
    pub duration_seconds: Option<u32>,
    pub source_profile: Option<String>,
    pub region: Option<String>,
}

impl RoleProfile {
    pub async fn load(name: &str) -> Result<Option<Self>, ConfigError> {
        Self::load_from(&Fs::real(), &Env::real(), name).await
    }

    /// `None` when no config file defines `name`.
    pub(crate) async fn load_from(
        fs: &Fs,
        env: &Env,
        name: &str,
    ) -> Result<Option<Self>, ConfigError> {
        let profiles = aws_config::profile::load(fs, env, &EnvConfigFiles::default(), None)
            .await
            .map_err(|e| ConfigError::Profile(DisplayErrorContext(&e).to_string()))?;

        let Some(profile) = profiles.get_profile(name) else {
            debug!(profile = name, "profile not defined in shared config");
            return Ok(None);
        };
        let get = |key: &str| {
            profile
                .get(key)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let duration_seconds = match get("duration_seconds") {
            Some(raw) => Some(raw.parse::<u32>().map_err(|_| ConfigError::ProfileDuration {
                profile: name.to_string(),
                value: raw,
            })?),
            None => None,
        };

        Ok(Some(Self {
            role_arn: get("role_arn"),
            mfa_serial: get("mfa_serial"),
            external_id: get("external_id"),
            duration_seconds,
            source_profile: get("source_profile"),
            region: get("region"),
        }))
    }

    pub fn assumes_role(&self) -> bool {
        self.role_arn.is_some()
    }
}
