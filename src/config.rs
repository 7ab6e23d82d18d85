// src/config.rs

use std::env;
use std::path::PathBuf;

use chrono::Utc;
use clap::Parser;
use nix::unistd::{getuid, User};

use crate::error::ConfigError;
use crate::output::OutputFormat;
use crate::sys::cache_key::AssumeRoleParameters;
use crate::sys::mfa::MfaSourceKind;
use crate::sys::profile::{DEFAULT_PROFILE, RoleProfile};

const MIN_DURATION_SECS: u32 = 15 * 60;
const MAX_DURATION_SECS: u32 = 12 * 60 * 60;
const DEFAULT_DURATION_SECS: u32 = 60 * 60;

/// AWS CLI credential_process broker with MFA and AWS CLI compatible caching.
#[derive(Parser, Debug, Clone)]
#[command(name = "credproc", version, about)]
pub struct Cli {
    /// Shared config profile. A profile with role_arn supplies the role settings
    /// and its source_profile the base credentials.
    #[arg(short, long, env = "AWS_PROFILE")]
    pub profile: Option<String>,

    /// ARN of the role to assume. Overrides role_arn from the profile.
    #[arg(short = 'r', long, env = "AWS_ROLE_ARN")]
    pub role_arn: Option<String>,

    /// MFA device serial (ARN). With --mfa-yk it is also the OATH credential name.
    #[arg(short = 's', long, env = "AWS_MFA_SERIAL")]
    pub mfa_serial: Option<String>,

    /// External ID required by the role's trust policy.
    #[arg(short = 'e', long, env = "AWS_EXTERNAL_ID")]
    pub external_id: Option<String>,

    /// Role session name. Defaults to credproc-<unix seconds>.
    #[arg(long, env = "AWS_ROLE_SESSION_NAME")]
    pub session_name: Option<String>,

    /// Region of the STS endpoint. Falls back to the profile, then us-east-1.
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Seconds the credentials remain valid (900 to 43200). Defaults to the
    /// profile's duration_seconds, then 3600.
    #[arg(short, long)]
    pub duration: Option<u32>,

    /// Disable caching credentials in the ~/.aws/cli/cache directory.
    #[arg(short, long)]
    pub no_cache: bool,

    /// Ignore cached credentials and refresh. The new credentials are still cached.
    #[arg(short, long)]
    pub force_refresh: bool,

    /// Read the MFA code from a YubiKey instead of prompting on the terminal.
    #[arg(short, long)]
    pub mfa_yk: bool,

    /// Print shell export statements instead of credential_process JSON.
    #[arg(short, long)]
    pub variables: bool,

    /// Override the cache directory.
    #[arg(long, env = "CREDPROC_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,
}

/// Everything one invocation needs, validated once and never mutated.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    pub params: AssumeRoleParameters,
    /// Profile for the base credentials handed to the SDK.
    pub profile: Option<String>,
    pub region: Option<String>,
    pub session_name: String,
    pub use_cache: bool,
    pub force_refresh: bool,
    pub mfa_source: MfaSourceKind,
    pub output: OutputFormat,
    pub cache_dir: PathBuf,
}

impl BrokerConfig {
    /// Loads the selected shared config profile and merges the flags over it.
    pub async fn resolve(cli: Cli) -> Result<Self, ConfigError> {
        let name = non_empty(cli.profile.clone()).unwrap_or_else(|| DEFAULT_PROFILE.to_string());
        let role_profile = RoleProfile::load(&name).await?;
        Self::from_cli(cli, role_profile)
    }

    /// Flags win over the profile's role settings.
    pub fn from_cli(cli: Cli, role_profile: Option<RoleProfile>) -> Result<Self, ConfigError> {
        let role_profile = role_profile.unwrap_or_default();

        let duration = cli
            .duration
            .or(role_profile.duration_seconds)
            .unwrap_or(DEFAULT_DURATION_SECS);
        // The STS maximum is 12 hours; roles may lower it and the call fails above theirs.
        if !(MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&duration) {
            return Err(ConfigError::Duration(duration));
        }

        let role_arn = non_empty(cli.role_arn)
            .or_else(|| role_profile.role_arn.clone())
            .map(|arn| arn.trim().to_string())
            .ok_or(ConfigError::MissingRoleArn)?;

        let serial_number = non_empty(cli.mfa_serial).or_else(|| role_profile.mfa_serial.clone());
        let mfa_source = if cli.mfa_yk {
            if serial_number.is_none() {
                return Err(ConfigError::MissingSerial);
            }
            MfaSourceKind::YubiKey
        } else {
            MfaSourceKind::Prompt
        };

        // 🛡️ A role profile is never handed to the SDK as is: it would try to
        // assume the role itself and cannot answer the MFA challenge.
        let profile = if role_profile.assumes_role() {
            Some(
                role_profile
                    .source_profile
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PROFILE.to_string()),
            )
        } else {
            non_empty(cli.profile)
        };

        let cache_dir = match cli.cache_dir {
            Some(dir) => dir,
            None => default_cache_dir()?,
        };

        Ok(Self {
            params: AssumeRoleParameters {
                duration_seconds: duration,
                external_id: non_empty(cli.external_id)
                    .or_else(|| role_profile.external_id.clone()),
                role_arn,
                serial_number,
            },
            profile,
            region: non_empty(cli.region).or(role_profile.region),
            session_name: non_empty(cli.session_name)
                .unwrap_or_else(|| format!("credproc-{}", Utc::now().timestamp())),
            use_cache: !cli.no_cache,
            force_refresh: cli.force_refresh,
            mfa_source,
            output: if cli.variables {
                OutputFormat::ShellExports
            } else {
                OutputFormat::CredentialProcess
            },
            cache_dir,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// `<home>/.aws/cli/cache`, home taken from the passwd entry of the current uid.
fn default_cache_dir() -> Result<PathBuf, ConfigError> {
    let home = match User::from_uid(getuid()) {
        Ok(Some(user)) => user.dir,
        _ => env::var_os("HOME").map(PathBuf::from).ok_or(ConfigError::NoHome)?,
    };
    Ok(home.join(".aws").join("cli").join("cache"))
}
