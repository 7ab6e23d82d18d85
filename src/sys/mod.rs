// 🛡️ Modules are private to the crate; the broker composes them.

pub mod traits;     // Global contracts
pub mod secrets;    // Memory hygiene (Credentials)
pub mod cache_key;  // AWS CLI cache file naming
pub mod cache;      // On-disk credential cache
pub mod tty;        // Controlling terminal I/O
pub mod oath;       // YKOATH applet over PC/SC
pub mod mfa;        // MFA token sources
pub mod profile;    // Shared config role profiles
pub mod sts;        // Upstream assume-role exchange
