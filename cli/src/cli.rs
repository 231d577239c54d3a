//! # CLI Interface
//!
//! Defines the command-line argument structure for `aurum` using `clap`
//! derive. Two command families mirror the two roles: `user` for wallet
//! operations and `bank` for ledger operations.
//!
//! Every flag has an environment-variable fallback so scripted
//! deployments don't have to repeat themselves.

use clap::{Args, Parser, Subcommand};

/// Aurum — a cryptographic CLI payment application.
///
/// An offline-capable electronic cash scheme: the bank blind-signs coins
/// it cannot link to withdrawals, users pay each other peer-to-peer, and
/// double spending is caught at deposit time.
#[derive(Parser, Debug)]
#[command(name = "aurum", about = "A cryptographic CLI payment application", version)]
pub struct AurumCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level command families.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Perform user (wallet) operations.
    #[command(subcommand)]
    User(UserCommands),
    /// Perform bank (ledger) operations.
    #[command(subcommand)]
    Bank(BankCommands),
}

/// User-side operations.
#[derive(Subcommand, Debug)]
pub enum UserCommands {
    /// Create a new user: wallet database plus TLS certificate.
    Init(UserArgs),
    /// Request a client account at a bank.
    Accgen(UserServerArgs),
    /// Withdraw one coin from the user's account.
    Withdraw(UserServerArgs),
    /// Run a payment server (merchant mode) and wait for coins.
    Charge(ChargeArgs),
    /// Send one coin to another user's payment server.
    Pay(PayArgs),
    /// Deposit one coin back into the user's account.
    Deposit(UserServerArgs),
    /// Exchange an old coin for a fresh one.
    Exchange(UserServerArgs),
    /// View wallet contents.
    Inspect(UserInspectArgs),
}

/// Bank-side operations.
#[derive(Subcommand, Debug)]
pub enum BankCommands {
    /// Initialize a bank: identity, ledger database, TLS certificate.
    Init(BankArgs),
    /// Start the bank's five protocol servers.
    Serve(BankArgs),
    /// View ledger contents.
    Inspect(BankInspectArgs),
}

/// Arguments naming just a user.
#[derive(Args, Debug, Clone)]
pub struct UserArgs {
    /// User name; selects `<user>.db` and the user's certificate pair.
    #[arg(long, short = 'u', env = "AURUM_USER")]
    pub user: String,
}

/// Arguments naming a user and a remote server.
#[derive(Args, Debug, Clone)]
pub struct UserServerArgs {
    /// User name.
    #[arg(long, short = 'u', env = "AURUM_USER")]
    pub user: String,
    /// Remote server address.
    #[arg(long, short = 's', env = "AURUM_SERVER")]
    pub server: String,
}

/// Arguments for merchant mode.
#[derive(Args, Debug, Clone)]
pub struct ChargeArgs {
    /// User name.
    #[arg(long, short = 'u', env = "AURUM_USER")]
    pub user: String,
    /// Name of the bank whose coins are accepted.
    #[arg(long, short = 'b', env = "AURUM_BANK")]
    pub bank: String,
}

/// Arguments for paying a merchant.
#[derive(Args, Debug, Clone)]
pub struct PayArgs {
    /// User name.
    #[arg(long, short = 'u', env = "AURUM_USER")]
    pub user: String,
    /// Merchant server address.
    #[arg(long, short = 's', env = "AURUM_SERVER")]
    pub server: String,
    /// Name of the bank the coin belongs to.
    #[arg(long, short = 'b', env = "AURUM_BANK")]
    pub bank: String,
}

/// Arguments for wallet inspection.
#[derive(Args, Debug, Clone)]
pub struct UserInspectArgs {
    /// User name.
    #[arg(long, short = 'u', env = "AURUM_USER")]
    pub user: String,
    /// Show every stored field, secrets included.
    #[arg(long, short = 'f')]
    pub full: bool,
}

/// Arguments naming a bank deployment.
#[derive(Args, Debug, Clone)]
pub struct BankArgs {
    /// Bank name; selects `<bank>.db` and the bank's certificate pair.
    #[arg(long, short = 'b', env = "AURUM_BANK")]
    pub bank: String,
    /// Bank identity within the ledger database.
    #[arg(long, short = 'i', default_value = "main")]
    pub identity: String,
}

/// Arguments for ledger inspection.
#[derive(Args, Debug, Clone)]
pub struct BankInspectArgs {
    /// Bank name.
    #[arg(long, short = 'b', env = "AURUM_BANK")]
    pub bank: String,
    /// Bank identity within the ledger database.
    #[arg(long, short = 'i', default_value = "main")]
    pub identity: String,
    /// Show every stored field, secrets included.
    #[arg(long, short = 'f')]
    pub full: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_user_withdraw() {
        let cli = AurumCli::try_parse_from([
            "aurum", "user", "withdraw", "--user", "alice", "--server", "bank.local",
        ])
        .unwrap();
        match cli.command {
            Commands::User(UserCommands::Withdraw(args)) => {
                assert_eq!(args.user, "alice");
                assert_eq!(args.server, "bank.local");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn bank_identity_defaults_to_main() {
        let cli =
            AurumCli::try_parse_from(["aurum", "bank", "init", "--bank", "first"])
                .unwrap();
        match cli.command {
            Commands::Bank(BankCommands::Init(args)) => {
                assert_eq!(args.identity, "main");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn missing_required_flag_fails() {
        assert!(AurumCli::try_parse_from(["aurum", "user", "init"]).is_err());
    }
}
