// src/sys/mfa.rs

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::MfaError;
use crate::sys::oath::{OathSession, OathTransport, PcscTransport};
use crate::sys::traits::MfaTokenSource;
use crate::sys::tty::ControllingTerminal;

const PROMPT: &str = "MFA Code: ";

/// Which MFA source to wire into the upstream exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MfaSourceKind {
    Prompt,
    YubiKey,
}

pub fn build_source(kind: MfaSourceKind, serial: &str) -> Box<dyn MfaTokenSource> {
    match kind {
        MfaSourceKind::Prompt => Box::new(TtyPromptSource::new()),
        MfaSourceKind::YubiKey => Box::new(YubiKeySource::new(serial)),
    }
}

// ==============================================================================
// 1. Keyboard Prompt
// ==============================================================================

type Prompter = Arc<dyn Fn(&str) -> Result<String, MfaError> + Send + Sync>;

pub struct TtyPromptSource {
    prompter: Prompter,
}

impl TtyPromptSource {
    pub fn new() -> Self {
        Self {
            prompter: Arc::new(prompt_on_tty),
        }
    }

    /// Replaces the terminal round trip: `prompter` gets the prompt text and
    /// returns the trimmed line.
    pub fn with_prompter(
        mut self,
        prompter: impl Fn(&str) -> Result<String, MfaError> + Send + Sync + 'static,
    ) -> Self {
        self.prompter = Arc::new(prompter);
        self
    }
}

impl Default for TtyPromptSource {
    fn default() -> Self {
        Self::new()
    }
}

fn prompt_on_tty(prompt: &str) -> Result<String, MfaError> {
    let mut tty = ControllingTerminal::open().map_err(MfaError::NoTerminal)?;
    tty.prompt(prompt).map_err(MfaError::Terminal)
}

#[async_trait]
impl MfaTokenSource for TtyPromptSource {
    async fn obtain(&self) -> Result<String, MfaError> {
        let prompter = Arc::clone(&self.prompter);
        let code = tokio::task::spawn_blocking(move || prompter(PROMPT))
            .await
            .map_err(|e| MfaError::Terminal(io::Error::other(e)))??;

        if code.is_empty() {
            return Err(MfaError::EmptyCode);
        }
        Ok(code)
    }
}

// ==============================================================================
// 2. Hardware Security Key (YKOATH)
// ==============================================================================

type Connect = Arc<dyn Fn() -> Result<Box<dyn OathTransport>, MfaError> + Send + Sync>;
type Notify = Arc<dyn Fn(&str) -> io::Result<()> + Send + Sync>;

pub struct YubiKeySource {
    name: String,
    connect: Connect,
    notify: Notify,
    clock: fn() -> DateTime<Utc>,
}

impl YubiKeySource {
    /// `name` is the OATH credential name, conventionally the MFA device ARN.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connect: Arc::new(connect_pcsc),
            notify: Arc::new(touch_notice),
            clock: Utc::now,
        }
    }

    pub fn with_transport(
        mut self,
        connect: impl Fn() -> Result<Box<dyn OathTransport>, MfaError> + Send + Sync + 'static,
    ) -> Self {
        self.connect = Arc::new(connect);
        self
    }

    pub fn with_notifier(
        mut self,
        notify: impl Fn(&str) -> io::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.notify = Arc::new(notify);
        self
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }
}

fn connect_pcsc() -> Result<Box<dyn OathTransport>, MfaError> {
    Ok(Box::new(PcscTransport::connect()?))
}

/// Default notification: straight to the controlling terminal so the AWS CLI
/// does not swallow it.
fn touch_notice(name: &str) -> io::Result<()> {
    let mut tty = ControllingTerminal::open()?;
    tty.notify(&format!(
        "Please touch YubiKey now to generate MFA code for {name:?}...\n"
    ))
}

#[async_trait]
impl MfaTokenSource for YubiKeySource {
    async fn obtain(&self) -> Result<String, MfaError> {
        let name = self.name.clone();
        let connect = Arc::clone(&self.connect);
        let notify = Arc::clone(&self.notify);
        let clock = self.clock;

        tokio::task::spawn_blocking(move || {
            let mut session = OathSession::new(connect()?);
            session.select()?;

            notify(&name).map_err(|e| MfaError::Confirmation {
                name: name.clone(),
                reason: e.to_string(),
            })?;

            debug!(credential = %name, "requesting OATH code from security key");
            session.calculate_totp(&name, clock().timestamp())
        })
        .await
        .map_err(|e| MfaError::Device(e.to_string()))?
    }
}
