//! The search loop.

use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, info};

use crate::error::{Error, Result};
use crate::kernel::NO_MATCH;
use crate::pattern::Filter;
use crate::preimage::PaddedMessage;

use super::backend::{ComputeBackend, RoundInput};

/// Which key packet the filter is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    #[default]
    Primary,
    /// Vanity subkey mode: the first subkey's fingerprint.
    Subkey,
}

/// A freshly generated key whose fingerprint body can be searched.
pub trait Candidate {
    /// The public-key packet body (no framing) of the targeted key.
    fn packet_body(&self, target: Target) -> Result<Vec<u8>>;
}

/// Wall-clock source anchoring each attempt's timestamp window.
pub trait Clock {
    fn now_seconds(&self) -> u32;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_seconds(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
            .unwrap_or(0)
    }
}

/// A clock stuck at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u32);

impl Clock for FixedClock {
    fn now_seconds(&self) -> u32 {
        self.0
    }
}

/// Progress sink and cancellation source, consulted between rounds.
pub trait SearchObserver {
    fn on_progress(&mut self, _hashes: u64, _elapsed: Duration) {}

    fn should_cancel(&mut self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SearchObserver for NoopObserver {}

/// Grid dimensions and the attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    /// Lanes per round (`T`)
    pub lanes: usize,
    /// Rounds per candidate key (`I`)
    pub rounds: usize,
    /// Candidate keys to try before giving up (None = until cancelled)
    pub max_attempts: Option<usize>,
}

impl SearchOptions {
    pub fn new(lanes: usize, rounds: usize) -> Self {
        Self {
            lanes,
            rounds,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.lanes == 0 || self.rounds == 0 {
            return Err(Error::InvalidGrid("lanes and rounds must be positive".into()));
        }
        if (self.lanes as u64) * (self.rounds as u64) > u64::from(u32::MAX) {
            return Err(Error::InvalidGrid(format!(
                "{} lanes x {} rounds exceeds the 32-bit timestamp range",
                self.lanes, self.rounds
            )));
        }
        if self.max_attempts == Some(0) {
            return Err(Error::InvalidGrid("max attempts must be positive".into()));
        }
        Ok(())
    }
}

/// `T * I` candidate timestamps counting back from `anchor`.
///
/// Candidate `(round, lane)` is `anchor - (round * T + lane)`. Candidates
/// that would reach zero or below are clipped: zero is the lane sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchGrid {
    lanes: u32,
    rounds: u32,
    anchor: u32,
}

impl SearchGrid {
    pub fn new(lanes: u32, rounds: u32, anchor: u32) -> Self {
        Self {
            lanes,
            rounds,
            anchor,
        }
    }

    pub fn anchor(&self) -> u32 {
        self.anchor
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    fn base_offset(&self, round: u32) -> u64 {
        u64::from(round) * u64::from(self.lanes)
    }

    pub fn round(&self, round: u32) -> RoundInput {
        RoundInput {
            anchor: self.anchor,
            base_offset: self.base_offset(round).min(u64::from(u32::MAX)) as u32,
        }
    }

    /// Lanes of `round` whose candidate stays strictly positive.
    pub fn live_lanes(&self, round: u32) -> usize {
        let base = self.base_offset(round);
        let anchor = u64::from(self.anchor);
        if round >= self.rounds || base >= anchor {
            return 0;
        }
        (anchor - base).min(u64::from(self.lanes)) as usize
    }

    pub fn timestamp(&self, round: u32, lane: u32) -> Option<u32> {
        if (lane as usize) < self.live_lanes(round) {
            Some(self.round(round).timestamp(lane as usize))
        } else {
            None
        }
    }
}

/// Outcome of scanning one round's lane results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    Found(u32),
    NotFound,
}

impl MatchResult {
    /// First non-sentinel lane in ascending lane order.
    pub fn scan(results: &[u32]) -> Self {
        match results.iter().find(|&&r| r != NO_MATCH) {
            Some(&timestamp) => MatchResult::Found(timestamp),
            None => MatchResult::NotFound,
        }
    }
}

/// Terminal outcome of [`SearchEngine::search`].
#[derive(Debug)]
pub enum SearchOutcome<K> {
    Found {
        key: K,
        timestamp: u32,
        attempts: usize,
    },
    /// The attempt budget ran out without a match.
    NotFound,
    /// The observer asked to stop.
    Cancelled,
}

/// Drives a compute backend over the search grid.
pub struct SearchEngine<B, C = SystemClock> {
    backend: B,
    clock: C,
    options: SearchOptions,
}

impl<B: ComputeBackend> SearchEngine<B, SystemClock> {
    pub fn new(backend: B, options: SearchOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            backend,
            clock: SystemClock,
            options,
        })
    }
}

impl<B: ComputeBackend, C: Clock> SearchEngine<B, C> {
    pub fn with_clock<C2: Clock>(self, clock: C2) -> SearchEngine<B, C2> {
        SearchEngine {
            backend: self.backend,
            clock,
            options: self.options,
        }
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Searches for a creation timestamp whose fingerprint passes `filter`.
    ///
    /// Each attempt generates a candidate key, anchors a fresh grid at the
    /// current time and walks it round by round. An exhausted grid moves on
    /// to a new candidate. Progress and cancellation are only handled at
    /// round boundaries, so a cancelled search may still finish one round.
    /// A clock reading the epoch leaves nothing to search and fails with
    /// [`Error::InvalidGrid`].
    pub fn search<K, F, O>(
        &mut self,
        mut generate: F,
        filter: &Filter,
        target: Target,
        observer: &mut O,
    ) -> Result<SearchOutcome<K>>
    where
        K: Candidate,
        F: FnMut() -> Result<K>,
        O: SearchObserver + ?Sized,
    {
        let started = Instant::now();
        let mut hashes = 0u64;
        let mut results = vec![NO_MATCH; self.options.lanes];
        let mut attempts = 0usize;

        loop {
            if self.options.max_attempts.is_some_and(|max| attempts >= max) {
                debug!("Giving up after {} candidate keys", attempts);
                return Ok(SearchOutcome::NotFound);
            }
            attempts += 1;

            let key = generate()?;
            let message = PaddedMessage::build(&key.packet_body(target)?)?;
            let grid = SearchGrid::new(
                self.options.lanes as u32,
                self.options.rounds as u32,
                self.clock.now_seconds(),
            );
            if grid.live_lanes(0) == 0 {
                return Err(Error::InvalidGrid(format!(
                    "anchor {} leaves no positive timestamps to search",
                    grid.anchor()
                )));
            }
            debug!(
                "Attempt {}: {}-byte preimage, anchor {}, {} x {} grid on {}",
                attempts,
                message.preimage_len(),
                grid.anchor(),
                self.options.lanes,
                self.options.rounds,
                self.backend.name()
            );

            for round in 0..grid.rounds() {
                let live = grid.live_lanes(round);
                if live == 0 {
                    break;
                }
                let out = &mut results[..live];
                self.backend
                    .evaluate(&message, filter, grid.round(round), out)?;
                hashes += live as u64;

                if let MatchResult::Found(timestamp) = MatchResult::scan(out) {
                    info!(
                        "Match at timestamp {} (attempt {}, round {})",
                        timestamp, attempts, round
                    );
                    observer.on_progress(hashes, started.elapsed());
                    return Ok(SearchOutcome::Found {
                        key,
                        timestamp,
                        attempts,
                    });
                }

                observer.on_progress(hashes, started.elapsed());
                if observer.should_cancel() {
                    debug!("Cancelled after {} hashes", hashes);
                    return Ok(SearchOutcome::Cancelled);
                }
                thread::yield_now();
            }

            debug!("Grid exhausted for attempt {}, regenerating key", attempts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CpuBackend;
    use crate::kernel::{digest_at, digest_bytes};
    use crate::pattern::Pattern;
    use std::cell::Cell;

    #[derive(Debug)]
    struct StaticKey(Vec<u8>);

    impl Candidate for StaticKey {
        fn packet_body(&self, _target: Target) -> Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    fn body() -> Vec<u8> {
        vec![4, 0x65, 0, 0, 0, 22, 9, 0x2B, 6, 1, 4, 1, 0xDA, 0x47, 0x0F, 1]
    }

    /// Reports a match only at one (round, lane), recording every call.
    struct InjectedBackend {
        hit: (u32, usize),
        lanes: u32,
        rounds_run: u32,
        lanes_run: u64,
    }

    impl InjectedBackend {
        fn new(hit: (u32, usize), lanes: u32) -> Self {
            Self {
                hit,
                lanes,
                rounds_run: 0,
                lanes_run: 0,
            }
        }
    }

    impl ComputeBackend for InjectedBackend {
        fn name(&self) -> &str {
            "injected"
        }

        fn evaluate(
            &mut self,
            _message: &PaddedMessage,
            _filter: &Filter,
            round: RoundInput,
            out: &mut [u32],
        ) -> Result<()> {
            let index = round.base_offset / self.lanes;
            for (lane, slot) in out.iter_mut().enumerate() {
                *slot = if (index, lane) == self.hit {
                    round.timestamp(lane)
                } else {
                    NO_MATCH
                };
            }
            self.rounds_run += 1;
            self.lanes_run += out.len() as u64;
            Ok(())
        }
    }

    struct LostBackend;

    impl ComputeBackend for LostBackend {
        fn name(&self) -> &str {
            "lost"
        }

        fn evaluate(
            &mut self,
            _message: &PaddedMessage,
            _filter: &Filter,
            _round: RoundInput,
            _out: &mut [u32],
        ) -> Result<()> {
            Err(Error::ComputeSubstrateLost("device reset".into()))
        }
    }

    #[derive(Default)]
    struct Recorder {
        progress: Vec<u64>,
        cancel_after: Option<usize>,
    }

    impl SearchObserver for Recorder {
        fn on_progress(&mut self, hashes: u64, _elapsed: Duration) {
            self.progress.push(hashes);
        }

        fn should_cancel(&mut self) -> bool {
            self.cancel_after
                .is_some_and(|limit| self.progress.len() >= limit)
        }
    }

    const NOW: u32 = 1_700_000_000;

    fn engine<B: ComputeBackend>(
        backend: B,
        options: SearchOptions,
    ) -> SearchEngine<B, FixedClock> {
        SearchEngine::new(backend, options)
            .unwrap()
            .with_clock(FixedClock(NOW))
    }

    #[test]
    fn test_options_validation() {
        assert!(SearchOptions::new(16, 16).validate().is_ok());
        assert!(SearchOptions::new(0, 16).validate().is_err());
        assert!(SearchOptions::new(16, 0).validate().is_err());
        assert!(SearchOptions::new(1 << 20, 1 << 12).validate().is_err());
        assert!(SearchOptions::new(16, 16)
            .with_max_attempts(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_grid_timestamps() {
        let grid = SearchGrid::new(16, 16, NOW);
        assert_eq!(grid.timestamp(0, 0), Some(NOW));
        assert_eq!(grid.timestamp(0, 15), Some(NOW - 15));
        assert_eq!(grid.timestamp(1, 0), Some(NOW - 16));
        assert_eq!(grid.timestamp(15, 15), Some(NOW - 255));
        assert_eq!(grid.timestamp(16, 0), None);
        assert_eq!(grid.timestamp(0, 16), None);
    }

    #[test]
    fn test_grid_clipped_near_epoch() {
        let grid = SearchGrid::new(4, 8, 10);
        let live: Vec<usize> = (0..8).map(|r| grid.live_lanes(r)).collect();
        assert_eq!(live, vec![4, 4, 2, 0, 0, 0, 0, 0]);
        assert_eq!(grid.timestamp(2, 1), Some(1));
        assert_eq!(grid.timestamp(2, 2), None);
    }

    #[test]
    fn test_scan_prefers_lowest_lane() {
        assert_eq!(MatchResult::scan(&[0, 0, 0]), MatchResult::NotFound);
        assert_eq!(MatchResult::scan(&[0, 90, 80]), MatchResult::Found(90));
    }

    #[test]
    fn test_finds_injected_match() {
        let mut engine = engine(InjectedBackend::new((5, 11), 16), SearchOptions::new(16, 16));
        let filter = Pattern::parse(&format!("FFFFFFFF{}", "*".repeat(32)))
            .unwrap()
            .compile();
        let mut recorder = Recorder::default();

        let outcome = engine
            .search(|| Ok(StaticKey(body())), &filter, Target::Primary, &mut recorder)
            .unwrap();
        match outcome {
            SearchOutcome::Found {
                timestamp,
                attempts,
                ..
            } => {
                assert_eq!(timestamp, NOW - (5 * 16 + 11));
                assert_eq!(attempts, 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(engine.backend().rounds_run, 6);
        assert_eq!(recorder.progress, vec![16, 32, 48, 64, 80, 96]);
    }

    #[test]
    fn test_always_filter_returns_now() {
        let mut engine = engine(CpuBackend::new(2).unwrap(), SearchOptions::new(16, 16));
        let filter = Pattern::parse(&"*".repeat(40)).unwrap().compile();
        let outcome = engine
            .search(|| Ok(StaticKey(body())), &filter, Target::Primary, &mut NoopObserver)
            .unwrap();
        assert!(matches!(outcome, SearchOutcome::Found { timestamp: NOW, .. }));
    }

    #[test]
    fn test_exhaustive_within_window() {
        let lanes = 64;
        let rounds = 32;
        let message = PaddedMessage::build(&body()).unwrap();
        let target_ts = NOW - 1234;
        let h = digest_at(message.words(), target_ts);
        let prefix = &hex::encode(digest_bytes(&h))[..12];
        let filter = Pattern::parse(&format!("{}{}", prefix, "*".repeat(28)))
            .unwrap()
            .compile();

        let mut engine = engine(CpuBackend::new(4).unwrap(), SearchOptions::new(lanes, rounds));
        let outcome = engine
            .search(|| Ok(StaticKey(body())), &filter, Target::Primary, &mut NoopObserver)
            .unwrap();
        match outcome {
            SearchOutcome::Found { timestamp, .. } => {
                let oldest = NOW - (lanes * rounds) as u32 + 1;
                assert!((oldest..=NOW).contains(&timestamp));
                assert!(filter.accepts(&digest_at(message.words(), timestamp)));
                assert!(timestamp >= target_ts);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_cancel_after_first_round() {
        let mut engine = engine(InjectedBackend::new((99, 0), 16), SearchOptions::new(16, 16));
        let mut recorder = Recorder {
            cancel_after: Some(1),
            ..Default::default()
        };
        let outcome = engine
            .search(
                || Ok(StaticKey(body())),
                &Filter::always(),
                Target::Primary,
                &mut recorder,
            )
            .unwrap();
        assert!(matches!(outcome, SearchOutcome::Cancelled));
        assert!(engine.backend().lanes_run <= 16);
        assert_eq!(recorder.progress, vec![16]);
    }

    #[test]
    fn test_regenerates_key_after_exhaustion() {
        let mut engine = engine(
            InjectedBackend::new((99, 0), 8),
            SearchOptions::new(8, 4).with_max_attempts(3),
        );
        let generated = Cell::new(0);
        let mut recorder = Recorder::default();
        let outcome = engine
            .search(
                || {
                    generated.set(generated.get() + 1);
                    Ok(StaticKey(body()))
                },
                &Filter::always(),
                Target::Primary,
                &mut recorder,
            )
            .unwrap();
        assert!(matches!(outcome, SearchOutcome::NotFound));
        assert_eq!(generated.get(), 3);
        assert_eq!(engine.backend().rounds_run, 12);
        assert!(recorder.progress.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(recorder.progress.last(), Some(&96));
    }

    #[test]
    fn test_never_evaluates_non_positive_timestamps() {
        let mut engine = SearchEngine::new(
            InjectedBackend::new((99, 0), 4),
            SearchOptions::new(4, 8).with_max_attempts(1),
        )
        .unwrap()
        .with_clock(FixedClock(10));
        let outcome = engine
            .search(
                || Ok(StaticKey(body())),
                &Filter::always(),
                Target::Primary,
                &mut NoopObserver,
            )
            .unwrap();
        assert!(matches!(outcome, SearchOutcome::NotFound));
        assert_eq!(engine.backend().lanes_run, 10);
    }

    #[test]
    fn test_epoch_anchor_is_rejected() {
        let mut engine = SearchEngine::new(
            InjectedBackend::new((0, 0), 4),
            SearchOptions::new(4, 4),
        )
        .unwrap()
        .with_clock(FixedClock(0));
        let generated = Cell::new(0);
        let mut recorder = Recorder {
            cancel_after: Some(0),
            ..Default::default()
        };
        let result = engine.search(
            || {
                generated.set(generated.get() + 1);
                Ok(StaticKey(body()))
            },
            &Filter::always(),
            Target::Primary,
            &mut recorder,
        );
        assert!(matches!(result, Err(Error::InvalidGrid(_))));
        assert_eq!(generated.get(), 1);
        assert_eq!(engine.backend().rounds_run, 0);
    }

    #[test]
    fn test_substrate_loss_propagates() {
        let mut engine = engine(LostBackend, SearchOptions::new(4, 4));
        let result = engine.search(
            || Ok(StaticKey(body())),
            &Filter::always(),
            Target::Primary,
            &mut NoopObserver,
        );
        assert!(matches!(result, Err(Error::ComputeSubstrateLost(_))));
    }

    #[test]
    fn test_generation_error_propagates() {
        let mut engine = engine(LostBackend, SearchOptions::new(4, 4));
        let result = engine.search(
            || -> Result<StaticKey> { Err(Error::KeyGeneration(anyhow::anyhow!("no entropy"))) },
            &Filter::always(),
            Target::Primary,
            &mut NoopObserver,
        );
        assert!(matches!(result, Err(Error::KeyGeneration(_))));
    }
}
