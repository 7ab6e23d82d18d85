// src/sys/oath.rs
//
// YKOATH over PC/SC: just enough of the applet protocol to SELECT it and
// CALCULATE a truncated TOTP response for one named credential.

use std::ffi::CString;

use tracing::debug;

use crate::error::MfaError;

const OATH_AID: [u8; 7] = [0xA0, 0x00, 0x00, 0x05, 0x27, 0x21, 0x01];

const INS_SELECT: u8 = 0xA4;
const INS_CALCULATE: u8 = 0xA2;
const INS_SEND_REMAINING: u8 = 0xA5;

const TAG_NAME: u8 = 0x71;
const TAG_CHALLENGE: u8 = 0x74;
const TAG_TRUNCATED: u8 = 0x76;

const SW_OK: u16 = 0x9000;
const SW_MORE_DATA: u8 = 0x61;
const SW_AUTH_REQUIRED: u16 = 0x6982;
const SW_NO_SUCH_OBJECT: u16 = 0x6984;
const SW_TOUCH_DENIED: u16 = 0x6985;

/// Applet-side limit on credential names.
const MAX_NAME_LEN: usize = 64;
const TOTP_PERIOD_SECS: i64 = 30;

/// Raw APDU exchange with a card. The response includes the trailing status word.
pub trait OathTransport: Send {
    fn transmit(&mut self, apdu: &[u8]) -> Result<Vec<u8>, MfaError>;
}

// ==============================================================================
// 1. Concrete Transport (PC/SC)
// ==============================================================================

pub struct PcscTransport {
    card: pcsc::Card,
}

impl PcscTransport {
    /// Connects to the first reader that has a card present.
    pub fn connect() -> Result<Self, MfaError> {
        let ctx = pcsc::Context::establish(pcsc::Scope::User).map_err(pcsc_error)?;
        let readers: Vec<CString> = ctx.list_readers_owned().map_err(pcsc_error)?;

        for reader in &readers {
            match ctx.connect(reader, pcsc::ShareMode::Shared, pcsc::Protocols::ANY) {
                Ok(card) => {
                    debug!(reader = ?reader, "connected to security key");
                    return Ok(Self { card });
                }
                Err(pcsc::Error::NoSmartcard) | Err(pcsc::Error::RemovedCard) => continue,
                Err(e) => return Err(pcsc_error(e)),
            }
        }
        Err(MfaError::NoDevice)
    }
}

impl OathTransport for PcscTransport {
    fn transmit(&mut self, apdu: &[u8]) -> Result<Vec<u8>, MfaError> {
        let mut buf = [0u8; pcsc::MAX_BUFFER_SIZE];
        let response = self.card.transmit(apdu, &mut buf).map_err(pcsc_error)?;
        Ok(response.to_vec())
    }
}

fn pcsc_error(e: pcsc::Error) -> MfaError {
    match e {
        pcsc::Error::NoReadersAvailable
        | pcsc::Error::NoService
        | pcsc::Error::NoSmartcard
        | pcsc::Error::RemovedCard => MfaError::NoDevice,
        other => MfaError::Device(other.to_string()),
    }
}

// ==============================================================================
// 2. Applet Session
// ==============================================================================

pub struct OathSession {
    transport: Box<dyn OathTransport>,
}

impl OathSession {
    pub fn new(transport: Box<dyn OathTransport>) -> Self {
        Self { transport }
    }

    pub fn select(&mut self) -> Result<(), MfaError> {
        let apdu = command(INS_SELECT, 0x04, 0x00, &OATH_AID);
        let (sw, body) = self.exchange(&apdu)?;
        if sw != SW_OK {
            return Err(MfaError::Device(format!(
                "OATH applet select failed with status {sw:04X}"
            )));
        }

        // A challenge in the SELECT response means the applet is locked with a password.
        let tlvs = parse_tlvs(&body)?;
        if tlvs.iter().any(|(tag, _)| *tag == TAG_CHALLENGE) {
            return Err(MfaError::Device(
                "OATH applet is password protected".into(),
            ));
        }
        Ok(())
    }

    /// Computes the TOTP code of `name` for the period containing `unix_secs`.
    /// Credentials that require touch block inside the card until touched.
    pub fn calculate_totp(&mut self, name: &str, unix_secs: i64) -> Result<String, MfaError> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(MfaError::Device(format!(
                "invalid OATH credential name length {}",
                name.len()
            )));
        }

        let apdu = calculate_apdu(name, totp_challenge(unix_secs));
        let (sw, body) = self.exchange(&apdu)?;
        match sw {
            SW_OK => {}
            SW_NO_SUCH_OBJECT => return Err(MfaError::NotProvisioned(name.to_string())),
            SW_TOUCH_DENIED => {
                return Err(MfaError::Confirmation {
                    name: name.to_string(),
                    reason: "touch was not confirmed in time".into(),
                });
            }
            SW_AUTH_REQUIRED => {
                return Err(MfaError::Device("OATH applet requires authentication".into()));
            }
            other => {
                return Err(MfaError::Device(format!(
                    "calculate failed with status {other:04X}"
                )));
            }
        }

        let tlvs = parse_tlvs(&body)?;
        let value = tlvs
            .iter()
            .find(|(tag, _)| *tag == TAG_TRUNCATED)
            .map(|(_, value)| *value)
            .ok_or_else(|| MfaError::Device("calculate response missing code".into()))?;
        format_code(value)
    }

    /// Transmits one command, following `61xx` chaining, and splits off the status word.
    fn exchange(&mut self, apdu: &[u8]) -> Result<(u16, Vec<u8>), MfaError> {
        let mut body = Vec::new();
        let mut response = self.transport.transmit(apdu)?;
        loop {
            let (sw1, sw2, data) = split_status(&response)?;
            body.extend_from_slice(data);
            if sw1 != SW_MORE_DATA {
                return Ok((u16::from_be_bytes([sw1, sw2]), body));
            }
            response = self
                .transport
                .transmit(&[0x00, INS_SEND_REMAINING, 0x00, 0x00])?;
        }
    }
}

// ==============================================================================
// 3. Encoding Helpers
// ==============================================================================

fn command(ins: u8, p1: u8, p2: u8, data: &[u8]) -> Vec<u8> {
    let mut apdu = Vec::with_capacity(5 + data.len());
    apdu.extend_from_slice(&[0x00, ins, p1, p2, data.len() as u8]);
    apdu.extend_from_slice(data);
    apdu
}

pub(crate) fn totp_challenge(unix_secs: i64) -> [u8; 8] {
    ((unix_secs.max(0) / TOTP_PERIOD_SECS) as u64).to_be_bytes()
}

pub(crate) fn calculate_apdu(name: &str, challenge: [u8; 8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + name.len() + challenge.len());
    data.push(TAG_NAME);
    data.push(name.len() as u8);
    data.extend_from_slice(name.as_bytes());
    data.push(TAG_CHALLENGE);
    data.push(challenge.len() as u8);
    data.extend_from_slice(&challenge);
    // P2 = 0x01 asks for the truncated response.
    command(INS_CALCULATE, 0x00, 0x01, &data)
}

fn split_status(response: &[u8]) -> Result<(u8, u8, &[u8]), MfaError> {
    match response {
        [data @ .., sw1, sw2] => Ok((*sw1, *sw2, data)),
        _ => Err(MfaError::Device("short response from security key".into())),
    }
}

pub(crate) fn parse_tlvs(mut buf: &[u8]) -> Result<Vec<(u8, &[u8])>, MfaError> {
    let truncated = || MfaError::Device("truncated TLV from security key".into());
    let mut out = Vec::new();
    while let [tag, rest @ ..] = buf {
        let (len, rest) = match rest {
            [0x81, len, rest @ ..] => (*len as usize, rest),
            [0x82, hi, lo, rest @ ..] => (u16::from_be_bytes([*hi, *lo]) as usize, rest),
            [len, rest @ ..] if *len < 0x80 => (*len as usize, rest),
            _ => return Err(truncated()),
        };
        if rest.len() < len {
            return Err(truncated());
        }
        out.push((*tag, &rest[..len]));
        buf = &rest[len..];
    }
    Ok(out)
}

/// `[digits, b0, b1, b2, b3]` -> zero-padded decimal code.
pub(crate) fn format_code(value: &[u8]) -> Result<String, MfaError> {
    let [digits, b0, b1, b2, b3] = value else {
        return Err(MfaError::Device(format!(
            "unexpected truncated response length {}",
            value.len()
        )));
    };
    let digits = *digits as usize;
    if !(6..=10).contains(&digits) {
        return Err(MfaError::Device(format!("unsupported digit count {digits}")));
    }
    let raw = u32::from_be_bytes([*b0, *b1, *b2, *b3]) & 0x7fff_ffff;
    let code = u64::from(raw) % 10u64.pow(digits as u32);
    Ok(format!("{code:0digits$}"))
}
