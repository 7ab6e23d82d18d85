// src/error.rs

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::sys::secrets::Credentials;

/// Failures of an MFA token source. All of them are fatal to the invocation.
#[derive(Error, Debug)]
pub enum MfaError {
    #[error("no controlling terminal available for the MFA prompt: {0}")]
    NoTerminal(#[source] io::Error),
    #[error("terminal I/O failed: {0}")]
    Terminal(#[source] io::Error),
    #[error("no MFA code entered")]
    EmptyCode,
    #[error("no hardware security key found")]
    NoDevice,
    #[error("OATH credential {0:?} is not provisioned on the security key")]
    NotProvisioned(String),
    #[error("security key confirmation failed for {name:?}: {reason}")]
    Confirmation { name: String, reason: String },
    #[error("security key error: {0}")]
    Device(String),
}

/// Failures of the upstream credential exchange (assume-role, MFA, SDK).
#[derive(Error, Debug)]
pub enum RetrieveError {
    #[error(transparent)]
    Mfa(#[from] MfaError),
    #[error("assume role failed: {0}")]
    AssumeRole(String),
    #[error("assume role response carried no credentials")]
    MissingCredentials,
    #[error("invalid expiration in assume role response")]
    InvalidExpiration,
}

/// A cache write that did not complete.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("cache directory {0} does not exist")]
    MissingRoot(PathBuf),
    #[error("failed to encode cache json: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write cache file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error(transparent)]
    Retrieve(#[from] RetrieveError),
    /// Fresh credentials were obtained but could not be written back.
    /// The credentials travel with the error so the caller can still use them.
    #[error("credentials obtained but not cached: {source}")]
    Persist {
        credentials: Box<Credentials>,
        #[source]
        source: PersistError,
    },
}

impl CacheError {
    /// Recovers the in-memory credentials of a persistence failure.
    pub fn into_credentials(self) -> Result<Credentials, RetrieveError> {
        match self {
            CacheError::Persist { credentials, .. } => Ok(*credentials),
            CacheError::Retrieve(e) => Err(e),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("duration must be between 15 minutes and 12 hours, got {0}s")]
    Duration(u32),
    #[error("--mfa-yk requires an MFA serial (--mfa-serial, AWS_MFA_SERIAL or mfa_serial in the profile)")]
    MissingSerial,
    #[error("no role to assume: pass --role-arn or set role_arn in the profile")]
    MissingRoleArn,
    #[error("failed to load shared AWS config: {0}")]
    Profile(String),
    #[error("profile {profile:?} has an invalid duration_seconds: {value:?}")]
    ProfileDuration { profile: String, value: String },
    #[error("unable to determine the home directory for the cache")]
    NoHome,
}

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Retrieve(#[from] RetrieveError),
    #[error("failed to write credentials to stdout: {0}")]
    Output(#[from] io::Error),
}
