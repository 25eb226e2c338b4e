//! # vanity_timestamp_gpg
//!
//! Mines OpenPGP keys with vanity fingerprints. A v4 fingerprint hashes the
//! key's creation time, so instead of generating millions of keys this
//! generates one and searches recent timestamps for one that makes the
//! fingerprint match.
//!
//! ## Architecture
//!
//! - `pattern`: fingerprint patterns compiled to digest-word filters
//! - `preimage`: fingerprint preimage and manual SHA-1 padding
//! - `kernel`: pure per-lane SHA-1 + filter evaluation
//! - `engine`: lane/round grid search over a parallel backend
//! - `key`: candidate key generation and finalization via sequoia-openpgp
//! - `miner`: search and finalization combined
//! - `export`, `config`: CLI plumbing

pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod kernel;
pub mod key;
pub mod miner;
pub mod pattern;
pub mod preimage;

pub use config::Config;
pub use engine::{
    ComputeBackend, CpuBackend, SearchEngine, SearchObserver, SearchOptions, SearchOutcome, Target,
};
pub use error::{Error, Result};
pub use key::{finalize, CandidateKey, FinalizedKey, KeyOptions, Suite};
pub use miner::mine;
pub use pattern::{Filter, Pattern};
pub use preimage::PaddedMessage;
