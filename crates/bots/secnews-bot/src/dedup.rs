use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::entry::NewsEntry;
use crate::error::FmtCompact as _;
use crate::publish::{PostHistory, RemotePost};
use crate::store::{PostedStore, StoreResult};

const LOG_TARGET: &str = "secnews_bot::dedup";

/// How many of the account's latest posts are scanned.
pub const REMOTE_HISTORY_LIMIT: usize = 20;

/// Length of the title prefix searched for in earlier posts.
pub const TITLE_PREFIX_CHARS: usize = 30;

/// Titles this short or shorter are too generic to match on.
pub const MIN_MATCHABLE_TITLE_CHARS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateReason {
    /// Hash is already in the posted store.
    PostedBefore,
    /// A recent post contains the entry's link.
    LinkInRecentPost,
    /// A recent post contains the start of the entry's title.
    TitleInRecentPost,
}

impl fmt::Display for DuplicateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DuplicateReason::PostedBefore => "already recorded as posted",
            DuplicateReason::LinkInRecentPost => "link found in a recent post",
            DuplicateReason::TitleInRecentPost => "title found in a recent post",
        })
    }
}

/// Heuristic scan of recent post texts for the entry.
///
/// Case-insensitive substring search for the link, then for the first
/// [`TITLE_PREFIX_CHARS`] characters of the title. Rewordings slip through.
pub fn find_in_recent_posts(entry: &NewsEntry, posts: &[RemotePost]) -> Option<DuplicateReason> {
    let link = entry.link.to_lowercase();
    let title_prefix = (MIN_MATCHABLE_TITLE_CHARS < entry.title.chars().count()).then(|| {
        entry
            .title
            .chars()
            .take(TITLE_PREFIX_CHARS)
            .collect::<String>()
            .to_lowercase()
    });

    for post in posts {
        let text = post.text.to_lowercase();
        if text.contains(&link) {
            return Some(DuplicateReason::LinkInRecentPost);
        }
        if title_prefix
            .as_deref()
            .is_some_and(|prefix| text.contains(prefix))
        {
            return Some(DuplicateReason::TitleInRecentPost);
        }
    }
    None
}

/// Two tier duplicate check: the local posted store, then remote history.
pub struct DuplicateDetector {
    store: Arc<dyn PostedStore>,
    history: Option<Arc<dyn PostHistory>>,
    history_limit: usize,
}

impl DuplicateDetector {
    pub fn new(store: Arc<dyn PostedStore>) -> Self {
        Self {
            store,
            history: None,
            history_limit: REMOTE_HISTORY_LIMIT,
        }
    }

    pub fn with_history(mut self, history: Arc<dyn PostHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// `Some(reason)` if the entry must not be posted.
    ///
    /// Only a failing local store is an error. A failing remote read is
    /// logged and the entry counts as new as far as remote history goes.
    pub async fn check(&self, entry: &NewsEntry) -> StoreResult<Option<DuplicateReason>> {
        let hash = entry.hash();
        if self.store.contains(&hash).await? {
            debug!(target: LOG_TARGET, %hash, title = %entry.title, "Found in posted store");
            return Ok(Some(DuplicateReason::PostedBefore));
        }

        let Some(history) = &self.history else {
            return Ok(None);
        };

        match history.recent_posts(self.history_limit).await {
            Ok(posts) => {
                let found = find_in_recent_posts(entry, &posts);
                debug!(
                    target: LOG_TARGET,
                    scanned = posts.len(),
                    duplicate = found.is_some(),
                    "Checked remote history"
                );
                Ok(found)
            }
            Err(err) => {
                warn!(
                    target: LOG_TARGET,
                    err = %err.fmt_compact(),
                    title = %entry.title,
                    "Could not read remote history, relying on local store only"
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::{PublishError, PublishResult};
    use crate::store::MemoryStore;
    use crate::timestamp::Timestamp;

    fn entry(title: &str, link: &str) -> NewsEntry {
        NewsEntry {
            title: title.into(),
            description: String::new(),
            link: link.into(),
            source: "test".into(),
            published_at: Timestamp::from(1_700_000_000),
        }
    }

    fn post(text: &str) -> RemotePost {
        RemotePost {
            id: "1".into(),
            text: text.into(),
            created_at: None,
        }
    }

    struct StaticHistory(PublishResult<Vec<RemotePost>>);

    #[async_trait::async_trait]
    impl PostHistory for StaticHistory {
        async fn recent_posts(&self, limit: usize) -> PublishResult<Vec<RemotePost>> {
            assert_eq!(limit, REMOTE_HISTORY_LIMIT);
            match &self.0 {
                Ok(posts) => Ok(posts.clone()),
                Err(_) => Err(PublishError::Server { status: 503 }),
            }
        }
    }

    // ── find_in_recent_posts ───────────────────────────────────────

    #[test]
    fn link_match_is_case_insensitive() {
        let e = entry("Whatever", "https://Example.com/Story");
        assert_eq!(
            find_in_recent_posts(&e, &[post("read: https://example.com/story #infosec")]),
            Some(DuplicateReason::LinkInRecentPost)
        );
    }

    #[test]
    fn title_prefix_matches_reworded_tail() {
        let e = entry(
            "Critical Fortinet flaw exploited in the wild, CISA warns",
            "https://example.com/a",
        );
        let posts = [post(
            "CRITICAL FORTINET FLAW EXPLOITED in attacks. Patch now https://t.co/x",
        )];
        assert_eq!(
            find_in_recent_posts(&e, &posts),
            Some(DuplicateReason::TitleInRecentPost)
        );
    }

    #[test]
    fn short_titles_are_not_matched() {
        let e = entry("Patch now", "https://example.com/a");
        assert_eq!(
            find_in_recent_posts(&e, &[post("Patch now or regret it later")]),
            None
        );
    }

    #[test]
    fn unrelated_posts_do_not_match() {
        let e = entry("Ransomware gang leaks hospital data", "https://example.com/a");
        assert_eq!(
            find_in_recent_posts(&e, &[post("New Chrome zero-day"), post("Weekly recap")]),
            None
        );
    }

    // ── DuplicateDetector ──────────────────────────────────────────

    #[test_log::test(tokio::test)]
    async fn local_hit_skips_remote_check() {
        let e = entry("Already posted story", "https://example.com/a");
        let detector = DuplicateDetector::new(Arc::new(MemoryStore::with_hashes([e.hash()])))
            .with_history(Arc::new(StaticHistory(Err(PublishError::Server {
                status: 500,
            }))));

        assert_eq!(
            detector.check(&e).await.unwrap(),
            Some(DuplicateReason::PostedBefore)
        );
    }

    #[test_log::test(tokio::test)]
    async fn remote_failure_degrades_to_not_duplicate() {
        let e = entry("Fresh story about a breach", "https://example.com/a");
        let detector = DuplicateDetector::new(Arc::new(MemoryStore::new())).with_history(Arc::new(
            StaticHistory(Err(PublishError::RateLimited { reset_at: None })),
        ));

        assert_eq!(detector.check(&e).await.unwrap(), None);
    }

    #[test_log::test(tokio::test)]
    async fn remote_link_hit_is_duplicate() {
        let e = entry("Fresh story about a breach", "https://example.com/a");
        let detector = DuplicateDetector::new(Arc::new(MemoryStore::new())).with_history(Arc::new(
            StaticHistory(Ok(vec![post("old news https://example.com/a")])),
        ));

        assert_eq!(
            detector.check(&e).await.unwrap(),
            Some(DuplicateReason::LinkInRecentPost)
        );
    }
}
