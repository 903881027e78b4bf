//! Stateless pagination over a deterministically shuffled list.
//!
//! A page is identified by `(seed, offset)`: the seed fixes the shuffle and
//! the offset says how many shuffled items earlier pages consumed. A
//! negative offset means the list is exhausted.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::models::schemas::RecommendationRequest;

/// Offset handed out once every item has been consumed
pub const EXHAUSTED: i64 = -1;

/// Fresh seeds stay in `u32` range so they survive a round trip through
/// JSON clients that store numbers as doubles
fn fresh_seed() -> u64 {
    u64::from(rand::random::<u32>())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStart {
    /// The client already received the last page
    Exhausted,
    At {
        seed: u64,
        offset: usize,
        /// Whether the client asked for continuation tokens
        paginated: bool,
    },
}

impl PageStart {
    pub fn from_request(request: &RecommendationRequest) -> Self {
        match request.continue_offset {
            Some(offset) if offset < 0 => PageStart::Exhausted,
            offset => PageStart::At {
                seed: request.continue_seed.unwrap_or_else(fresh_seed),
                offset: offset.unwrap_or(0) as usize,
                paginated: offset.is_some(),
            },
        }
    }
}

/// Same seed, same order
pub fn seeded_shuffle<T>(mut items: Vec<T>, seed: u64) -> Vec<T> {
    items.shuffle(&mut StdRng::seed_from_u64(seed));
    items
}

/// Offset for the next page after `consumed` items past `offset`
pub fn next_offset(offset: usize, consumed: usize, total: usize) -> i64 {
    let next = offset + consumed;
    if next >= total {
        EXHAUSTED
    } else {
        next as i64
    }
}

/// Tokens echoed in the response; none unless the client paginates
pub fn response_tokens(start: PageStart, next: i64) -> (Option<i64>, Option<u64>) {
    match start {
        PageStart::At {
            seed,
            paginated: true,
            ..
        } => (Some(next), Some(seed)),
        _ => (None, None),
    }
}
