//! Runtime configuration for the miner.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::engine::{SearchOptions, Target};
use crate::error::Result;
use crate::key::{KeyOptions, Suite};
use crate::pattern::Pattern;

/// Vanity OpenPGP key miner: searches creation timestamps for a fingerprint pattern
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// 40-symbol fingerprint pattern: hex digits, `*` for any nibble, other
    /// symbols (e.g. X) for linked nibbles. Spaces are ignored.
    #[arg(short, long)]
    pub pattern: String,

    /// Key algorithm: cv25519, p256, p384, p521, rsa2k, rsa3k or rsa4k
    #[arg(short, long, default_value = "cv25519")]
    pub cipher_suite: Suite,

    /// User ID, e.g. "Name <mail@example.com>" (repeatable)
    #[arg(short, long = "user-id")]
    pub user_ids: Vec<String>,

    /// Lanes per round (candidate timestamps evaluated in parallel)
    #[arg(short = 't', long, default_value = "65536")]
    pub lanes: usize,

    /// Rounds per candidate key
    #[arg(short = 'i', long, default_value = "512")]
    pub rounds: usize,

    /// Worker threads (default: number of CPU cores)
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,

    /// Match the encryption subkey's fingerprint instead of the primary key's
    #[arg(long)]
    pub subkey: bool,

    /// Keep mining after a match until stopped
    #[arg(long)]
    pub nonstop: bool,

    /// Give up after this many candidate keys
    #[arg(long)]
    pub max_attempts: Option<usize>,

    /// Stop after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Directory receiving found keys
    #[arg(short, long, default_value = "./gpg_export")]
    pub output: PathBuf,

    /// Do not save found keys
    #[arg(long)]
    pub dry_run: bool,

    /// Print the compiled filter and exit
    #[arg(long)]
    pub print_filter: bool,

    /// Verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Config {
    /// Returns the number of workers, defaulting to CPU count
    pub fn thread_count(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get)
    }

    pub fn parsed_pattern(&self) -> Result<Pattern> {
        Pattern::parse(&self.pattern)
    }

    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            lanes: self.lanes,
            rounds: self.rounds,
            max_attempts: self.max_attempts,
        }
    }

    pub fn key_options(&self) -> KeyOptions {
        KeyOptions::new(self.cipher_suite, self.user_ids.clone())
    }

    pub fn target(&self) -> Target {
        if self.subkey {
            Target::Subkey
        } else {
            Target::Primary
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        self.parsed_pattern()?;
        self.search_options().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("vanity-timestamp-gpg").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["-p", &"*".repeat(40)]);
        assert_eq!(config.cipher_suite, Suite::Cv25519);
        assert_eq!(config.lanes, 65536);
        assert_eq!(config.rounds, 512);
        assert_eq!(config.target(), Target::Primary);
        assert_eq!(config.key_options().user_ids.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_command_line() {
        let config = parse(&[
            "-p",
            "DEAD BEEF **** **** **** **** **** **** **** XXXX",
            "-c",
            "rsa3072",
            "-u",
            "Alice <alice@example.com>",
            "-u",
            "Alice <alice@example.org>",
            "-t",
            "1024",
            "-i",
            "8",
            "--subkey",
            "--max-attempts",
            "3",
            "--timeout",
            "60",
            "-vv",
        ]);
        assert_eq!(config.cipher_suite, Suite::Rsa3k);
        assert_eq!(config.key_options().user_ids.len(), 2);
        assert_eq!(config.target(), Target::Subkey);
        assert_eq!(config.search_options().max_attempts, Some(3));
        assert_eq!(config.timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.verbose, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_pattern() {
        let config = parse(&["-p", "DEADBEEF"]);
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_invalid_grid() {
        let config = parse(&["-p", &"*".repeat(40), "-t", "0"]);
        assert!(matches!(config.validate(), Err(Error::InvalidGrid(_))));
    }
}
