//! Search plus finalization: from key options and a filter to a vanity key.

use log::info;

use crate::engine::{Clock, ComputeBackend, SearchEngine, SearchObserver, SearchOutcome, Target};
use crate::error::{Error, Result};
use crate::key::{self, FinalizedKey, KeyOptions};
use crate::pattern::{digest_from_hex, Filter};

/// Mines one key whose targeted fingerprint passes `filter`.
///
/// Returns `None` when the observer cancels or the attempt budget runs out.
pub fn mine<B, C, O>(
    engine: &mut SearchEngine<B, C>,
    options: &KeyOptions,
    filter: &Filter,
    target: Target,
    observer: &mut O,
) -> Result<Option<FinalizedKey>>
where
    B: ComputeBackend,
    C: Clock,
    O: SearchObserver + ?Sized,
{
    let (candidate, timestamp) =
        match engine.search(|| options.generate(), filter, target, observer)? {
            SearchOutcome::Found { key, timestamp, .. } => (key, timestamp),
            SearchOutcome::NotFound | SearchOutcome::Cancelled => return Ok(None),
        };

    let finalized = key::finalize(&candidate, timestamp)?;
    let fingerprint = finalized.target_fingerprint(target).unwrap_or_default();
    match digest_from_hex(&fingerprint) {
        Some(h) if filter.accepts(&h) => {}
        _ => {
            return Err(Error::KeyFinalizationFailed(anyhow::anyhow!(
                "finalized fingerprint {} does not pass the filter",
                fingerprint
            )))
        }
    }

    info!("Found {} created at {}", finalized.fingerprint(), timestamp);
    Ok(Some(finalized))
}
