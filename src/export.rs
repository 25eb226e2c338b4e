//! Writing found keys to disk.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use dashmap::DashSet;
use lazy_static::lazy_static;
use log::info;
use parking_lot::Mutex;

use crate::error::Result;
use crate::key::FinalizedKey;

const BUFFER_SIZE: usize = 32768;

/// Log of every exported key, inside the export directory.
pub const FOUND_KEYS_LOG: &str = "found_keys.txt";

lazy_static! {
    static ref EXPORT_MUTEX: Mutex<()> = Mutex::new(());
    static ref EXPORTED: DashSet<String> = DashSet::new();
}

/// Writes `<FPR>-sec.asc`, `<FPR>-pub.asc` and a line in the found-keys log.
///
/// Returns `None` if this fingerprint was already exported by this process.
/// A key counts as exported only once all three writes succeeded.
pub fn save_key(
    key: &FinalizedKey,
    pattern: &str,
    index: usize,
    dir: &Path,
) -> Result<Option<PathBuf>> {
    let fingerprint = key.fingerprint();
    let _lock = EXPORT_MUTEX.lock();
    if EXPORTED.contains(&fingerprint) {
        return Ok(None);
    }
    fs::create_dir_all(dir)?;

    let secret_path = dir.join(format!("{}-sec.asc", fingerprint));
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, File::create(&secret_path)?);
    key.write_secret(&mut writer)?;
    writer.flush()?;

    let public_path = dir.join(format!("{}-pub.asc", fingerprint));
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, File::create(public_path)?);
    key.write_public(&mut writer)?;
    writer.flush()?;

    let mut writer = BufWriter::with_capacity(
        BUFFER_SIZE,
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(FOUND_KEYS_LOG))?,
    );
    writeln!(
        writer,
        "[{}] {} - created {} - pattern {}",
        index,
        fingerprint,
        key.timestamp(),
        pattern
    )?;
    writer.flush()?;
    EXPORTED.insert(fingerprint);

    info!("Saved {}", secret_path.display());
    Ok(Some(secret_path))
}
