//! Static block decomposition over a local worker pool.

use std::ops::Range;

use crate::error::RfError;

/// Cut `0..n_items` into contiguous blocks of `ceil(n_items / n_blocks)`.
///
/// Empty trailing blocks are dropped, so fewer than `n_blocks` ranges may be
/// returned.
pub(crate) fn block_ranges(n_items: usize, n_blocks: usize) -> Vec<Range<usize>> {
    let block = n_items.div_ceil(n_blocks.max(1)).max(1);
    (0..n_items)
        .step_by(block)
        .map(|start| start..(start + block).min(n_items))
        .collect()
}

/// Build a fresh pool of `n_threads` workers for one forest operation.
pub(crate) fn thread_pool(n_threads: usize) -> Result<rayon::ThreadPool, RfError> {
    if n_threads == 0 {
        return Err(RfError::InvalidThreadCount { n_threads });
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .build()
        .map_err(|source| RfError::ThreadPool { n_threads, source })
}
