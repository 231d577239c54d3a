//! # Protocol Configuration & Constants
//!
//! Every magic number in Aurum lives here. The scheme parameters themselves
//! (the safe-prime group) ship as an embedded JSON artifact next to this
//! file — they were generated once, they are public, and they are never
//! regenerated at runtime in normal operation.

use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Well-Known Ports
// ---------------------------------------------------------------------------

/// Setup — plain-TCP delivery of the Bank's name and TLS certificate.
pub const SETUP_PORT: u16 = 9090;

/// Account generation — credential/contract issuance over TLS.
pub const ACCGEN_PORT: u16 = 9091;

/// Withdrawal — blind-signature coin issuance over TLS.
pub const WITHDRAWAL_PORT: u16 = 9092;

/// Payment — spender-to-merchant coin transfer over TLS.
pub const PAYMENT_PORT: u16 = 9093;

/// Deposit — coin redemption at the Bank over TLS.
pub const DEPOSIT_PORT: u16 = 9094;

/// Exchange — old-for-new coin swap at the Bank over TLS.
pub const EXCHANGE_PORT: u16 = 9095;

/// Get — plain-TCP fetch of a merchant's TLS certificate before Payment.
pub const GET_PORT: u16 = 9096;

// ---------------------------------------------------------------------------
// Cryptographic Sizes
// ---------------------------------------------------------------------------

/// Bit length of the Sophie-Germain prime `q`. The safe prime `p = 2q + 1`
/// is one bit longer.
pub const SCHEME_PRIME_BITS: u64 = 1024;

/// RSA modulus size for Bank and Client signing keys.
pub const RSA_KEY_BITS: u64 = 2048;

/// Miller-Rabin rounds for primality testing. 20 rounds bounds the error
/// probability at 4^-20, far below the hardware fault rate.
pub const MILLER_RABIN_ROUNDS: u32 = 20;

/// Upper bound on rejection-sampling attempts when drawing a value that must
/// have a modular inverse. The per-draw success probability is constant and
/// near 1, so hitting this bound means the RNG or the modulus is broken —
/// we fail loudly instead of spinning.
pub const MAX_SAMPLING_ATTEMPTS: u32 = 4096;

/// Width of the truncated profile digests used as ledger keys, in bytes.
/// 128 bits keeps birthday collisions out of reach for any plausible
/// ledger size; anything much narrower would not.
pub const PROFILE_DIGEST_BYTES: usize = 16;

// ---------------------------------------------------------------------------
// Ledger Parameters
// ---------------------------------------------------------------------------

/// Account balance granted at registration.
pub const INITIAL_ACCOUNT_BALANCE: i64 = 100;

/// Coin lifetime: one month plus one day from issuance.
pub const COIN_VALIDITY_MONTHS: u32 = 1;
pub const COIN_VALIDITY_EXTRA_DAYS: u64 = 1;

/// Default Bank identity name.
pub const DEFAULT_BANK_IDENTITY: &str = "main";

// ---------------------------------------------------------------------------
// Wire Limits
// ---------------------------------------------------------------------------

/// Hard cap on a single wire frame. The largest legitimate message is a
/// coin profile (a handful of 2048-bit integers), so 1 MiB is generous
/// headroom and a cheap defence against handler exhaustion.
pub const MAX_FRAME_BYTES: u32 = 1024 * 1024;

/// Per-read/-write deadline inside a session. A peer that stalls longer
/// than this aborts the session without committing anything.
pub const IO_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Filesystem Layout
// ---------------------------------------------------------------------------

/// Directory under the user's home that holds databases and PEM files.
pub const BASE_DIR_NAME: &str = ".aurum";

/// Resolves the Aurum base directory (`~/.aurum`), creating it on demand.
pub fn base_dir() -> std::io::Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let dir = home.join(BASE_DIR_NAME);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Path of the database directory for a named identity.
pub fn db_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.db"))
}

/// Path of the PEM certificate for a named identity or server address.
pub fn cert_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}_cert.pem"))
}

/// Path of the PEM private key for a named identity.
pub fn key_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}_key.pem"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_are_distinct_and_consecutive() {
        let ports = [
            SETUP_PORT,
            ACCGEN_PORT,
            WITHDRAWAL_PORT,
            PAYMENT_PORT,
            DEPOSIT_PORT,
            EXCHANGE_PORT,
            GET_PORT,
        ];
        for pair in ports.windows(2) {
            assert_eq!(pair[1], pair[0] + 1);
        }
    }

    #[test]
    fn file_layout_uses_identity_name() {
        let dir = Path::new("/tmp/aurum");
        assert_eq!(db_path(dir, "main"), Path::new("/tmp/aurum/main.db"));
        assert_eq!(
            cert_path(dir, "main"),
            Path::new("/tmp/aurum/main_cert.pem")
        );
        assert_eq!(key_path(dir, "main"), Path::new("/tmp/aurum/main_key.pem"));
    }

    #[test]
    fn frame_cap_fits_coin_messages() {
        // A coin profile is well under a dozen 2048-bit integers.
        assert!(MAX_FRAME_BYTES as usize > 12 * (RSA_KEY_BITS as usize / 8));
    }
}
