use std::time::Duration;

use rand::Rng;
use rand::seq::IndexedRandom as _;

use crate::entry::NewsEntry;
use crate::timestamp::Timestamp;

/// Entries at most this old are picked at random.
pub const RECENT_WINDOW: Duration = Duration::from_secs(12 * 60 * 60);

/// Pick one entry to post.
///
/// Uniformly random among entries published within [`RECENT_WINDOW`];
/// otherwise the single newest entry; `None` for an empty pool.
pub fn select_entry<R>(mut pool: Vec<NewsEntry>, now: Timestamp, rng: &mut R) -> Option<NewsEntry>
where
    R: Rng + ?Sized,
{
    pool.sort_by(|a, b| b.published_at.cmp(&a.published_at));

    let recent_len = pool
        .iter()
        .take_while(|entry| entry.age(now) <= RECENT_WINDOW)
        .count();

    if 0 < recent_len {
        let picked = pool[..recent_len].choose(rng)?.clone();
        return Some(picked);
    }

    pool.into_iter().next()
}
