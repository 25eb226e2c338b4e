//! Parallel compute substrates for the search kernel.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{Error, Result};
use crate::kernel;
use crate::pattern::Filter;
use crate::preimage::PaddedMessage;

const THREAD_STACK_SIZE: usize = 4 * 1024 * 1024;

/// Lanes handed to one rayon task at a time.
const MIN_LANES_PER_TASK: usize = 1024;

/// Per-round parameters: lane `i` evaluates `anchor - base_offset - i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundInput {
    pub anchor: u32,
    pub base_offset: u32,
}

impl RoundInput {
    #[inline(always)]
    pub fn timestamp(&self, lane: usize) -> u32 {
        self.anchor
            .wrapping_sub(self.base_offset)
            .wrapping_sub(lane as u32)
    }
}

/// Runs the kernel for every lane of a round.
///
/// `out[lane]` receives the lane's matching timestamp or
/// [`kernel::NO_MATCH`]. A backend that can no longer compute fails with
/// [`Error::ComputeSubstrateLost`].
pub trait ComputeBackend {
    fn name(&self) -> &str;

    fn evaluate(
        &mut self,
        message: &PaddedMessage,
        filter: &Filter,
        round: RoundInput,
        out: &mut [u32],
    ) -> Result<()>;
}

/// CPU backend on a dedicated rayon pool.
pub struct CpuBackend {
    pool: ThreadPool,
    name: String,
}

impl CpuBackend {
    pub fn new(threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .stack_size(THREAD_STACK_SIZE)
            .thread_name(|i| format!("vanity-lane-{}", i))
            .build()
            .map_err(|e| Error::ComputeSubstrateLost(e.to_string()))?;
        let name = format!("cpu ({} threads)", pool.current_num_threads());
        Ok(Self { pool, name })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(
        &mut self,
        message: &PaddedMessage,
        filter: &Filter,
        round: RoundInput,
        out: &mut [u32],
    ) -> Result<()> {
        let words = message.words();
        self.pool.install(|| {
            out.par_iter_mut()
                .with_min_len(MIN_LANES_PER_TASK)
                .enumerate()
                .for_each(|(lane, slot)| {
                    *slot = kernel::evaluate(words, filter, round.timestamp(lane));
                });
        });
        Ok(())
    }
}
