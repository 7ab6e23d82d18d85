// src/sys/sts.rs
//
// Upstream retrieval: an STS AssumeRole call made through the AWS SDK. Base
// credentials come from the SDK's default chain (optionally a named profile).

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sts::config::Region;
use aws_sdk_sts::error::DisplayErrorContext;
use aws_sdk_sts::types::Credentials as StsCredentials;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{MfaError, RetrieveError};
use crate::sys::cache_key::AssumeRoleParameters;
use crate::sys::secrets::Credentials;
use crate::sys::traits::{CredentialRetriever, MfaTokenSource};

const DEFAULT_REGION: &str = "us-east-1";

/// Credentials are reported as expiring this much earlier than STS says, so a
/// cached entry is never handed out in its last minutes.
const EXPIRY_WINDOW_SECS: i64 = 5 * 60;

pub struct StsAssumeRoleRetriever {
    params: AssumeRoleParameters,
    session_name: String,
    profile: Option<String>,
    region: Option<String>,
    mfa: Box<dyn MfaTokenSource>,
}

impl StsAssumeRoleRetriever {
    pub fn new(
        params: AssumeRoleParameters,
        session_name: String,
        profile: Option<String>,
        region: Option<String>,
        mfa: Box<dyn MfaTokenSource>,
    ) -> Self {
        Self {
            params,
            session_name,
            profile,
            region,
            mfa,
        }
    }

    /// `(serial, code)` when the role needs MFA; the token source is not touched otherwise.
    async fn mfa_token(&self) -> Result<Option<(String, String)>, MfaError> {
        match self.params.serial_number.as_deref() {
            Some(serial) if !serial.is_empty() => {
                let code = self.mfa.obtain().await?;
                Ok(Some((serial.to_string(), code)))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl CredentialRetriever for StsAssumeRoleRetriever {
    async fn retrieve(&self) -> Result<Credentials, RetrieveError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(profile) = &self.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(region) = &self.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        // us-east-1 only when neither flags, environment nor profile name a region.
        let mut sts_config = aws_sdk_sts::config::Builder::from(&sdk_config);
        if sdk_config.region().is_none() {
            sts_config = sts_config.region(Region::new(DEFAULT_REGION));
        }
        let client = aws_sdk_sts::Client::from_conf(sts_config.build());

        let mut request = client
            .assume_role()
            .role_arn(&self.params.role_arn)
            .role_session_name(&self.session_name)
            .set_external_id(self.params.external_id.clone().filter(|id| !id.is_empty()));
        if self.params.duration_seconds > 0 {
            request = request.duration_seconds(self.params.duration_seconds as i32);
        }
        if let Some((serial, code)) = self.mfa_token().await? {
            request = request.serial_number(serial).token_code(code);
        }

        debug!(role = %self.params.role_arn, session = %self.session_name, "assuming role");
        let output = request
            .send()
            .await
            .map_err(|e| RetrieveError::AssumeRole(DisplayErrorContext(&e).to_string()))?;

        let creds = output
            .credentials()
            .ok_or(RetrieveError::MissingCredentials)?;
        let creds = convert(creds)?;
        info!(role = %self.params.role_arn, expiration = %creds.expiration, "assumed role");
        Ok(creds)
    }
}

fn convert(creds: &StsCredentials) -> Result<Credentials, RetrieveError> {
    let expires = creds.expiration().secs() - EXPIRY_WINDOW_SECS;
    let expiration = DateTime::<Utc>::from_timestamp(expires, 0)
        .ok_or(RetrieveError::InvalidExpiration)?;
    Ok(Credentials::new(
        creds.access_key_id(),
        creds.secret_access_key(),
        creds.session_token(),
        expiration,
    ))
}
