// src/output.rs
//
// Rendering of the final credentials on stdout. Nothing else may write there.

use std::io::{self, Write};

use chrono::SecondsFormat;
use serde::Serialize;

use crate::sys::secrets::Credentials;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// https://docs.aws.amazon.com/sdkref/latest/guide/feature-process-credentials.html
    CredentialProcess,
    ShellExports,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ProcessCredentials<'a> {
    version: u8,
    access_key_id: &'a str,
    secret_access_key: &'a str,
    session_token: &'a str,
    expiration: String,
}

type Accessor = fn(&Credentials) -> &str;

fn access_key_id(c: &Credentials) -> &str {
    &c.access_key_id
}

fn secret_access_key(c: &Credentials) -> &str {
    c.secret_access_key()
}

fn session_token(c: &Credentials) -> &str {
    c.session_token()
}

const SHELL_VARIABLES: [(&str, Accessor); 3] = [
    ("AWS_ACCESS_KEY_ID", access_key_id),
    ("AWS_SECRET_ACCESS_KEY", secret_access_key),
    ("AWS_SESSION_TOKEN", session_token),
];

pub fn write<W: Write>(creds: &Credentials, format: OutputFormat, out: &mut W) -> io::Result<()> {
    match format {
        OutputFormat::CredentialProcess => {
            let body = ProcessCredentials {
                version: 1,
                access_key_id: &creds.access_key_id,
                secret_access_key: creds.secret_access_key(),
                session_token: creds.session_token(),
                expiration: creds
                    .expiration
                    .to_rfc3339_opts(SecondsFormat::AutoSi, true),
            };
            serde_json::to_writer_pretty(&mut *out, &body)?;
            writeln!(out)?;
        }
        OutputFormat::ShellExports => {
            for (name, value) in SHELL_VARIABLES {
                writeln!(out, "export {}={}", name, value(creds))?;
            }
        }
    }
    out.flush()
}
