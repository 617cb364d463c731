use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use reqwest::{Client, StatusCode, redirect};
use scraper::Html;
use snafu::{ResultExt as _, Snafu};
use tracing::{debug, info, warn};
use url::Url;

use crate::USER_AGENT;
use crate::compose::truncate_chars;
use crate::entry::NewsEntry;
use crate::error::FmtCompact as _;
use crate::sources::FeedSource;
use crate::timestamp::Timestamp;

const LOG_TARGET: &str = "secnews_bot::feed";

pub const FEED_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Only the head of each feed is looked at.
pub const MAX_ENTRIES_PER_FEED: usize = 5;
pub const MAX_DESCRIPTION_CHARS: usize = 250;
/// Entries older than this never make it into the pool.
pub const MAX_ENTRY_AGE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FeedError {
    #[snafu(display("Feed request failed"))]
    Http { source: reqwest::Error },
    #[snafu(display("Feed responded with {status}"))]
    Status { status: StatusCode },
    #[snafu(display("Failed to parse feed"))]
    Parse {
        source: feed_rs::parser::ParseFeedError,
    },
}

pub type FeedResult<T> = std::result::Result<T, FeedError>;

/// Retrieves the raw bytes of a feed.
#[async_trait::async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, source: &FeedSource) -> FeedResult<Vec<u8>>;
}

pub struct HttpFeedFetcher {
    client: Client,
}

impl HttpFeedFetcher {
    pub fn new() -> FeedResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(FEED_FETCH_TIMEOUT)
            .redirect(redirect::Policy::limited(10))
            .build()
            .context(HttpSnafu)?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, source: &FeedSource) -> FeedResult<Vec<u8>> {
        debug!(target: LOG_TARGET, source = %source.name, url = %source.url, "Fetching feed");
        let response = self
            .client
            .get(source.url.clone())
            .send()
            .await
            .context(HttpSnafu)?;

        let status = response.status();
        if !status.is_success() {
            return StatusSnafu { status }.fail();
        }

        Ok(response.bytes().await.context(HttpSnafu)?.to_vec())
    }
}

/// Parse a raw RSS/Atom document into normalized entries.
///
/// Only the first [`MAX_ENTRIES_PER_FEED`] entries are considered. Entries
/// without a title, a usable link or any timestamp are dropped.
pub fn parse_entries(source: &FeedSource, raw: &[u8]) -> FeedResult<Vec<NewsEntry>> {
    let feed = feed_rs::parser::parse(raw).context(ParseSnafu)?;

    Ok(feed
        .entries
        .into_iter()
        .take(MAX_ENTRIES_PER_FEED)
        .filter_map(|entry| normalize_entry(source, entry))
        .collect())
}

fn normalize_entry(source: &FeedSource, entry: feed_rs::model::Entry) -> Option<NewsEntry> {
    // Titles arrive entity-decoded; markup stripping would eat literal `<tag>` text.
    let title = entry
        .title
        .map(|t| collapse_whitespace(&t.content))
        .unwrap_or_default();
    if title.is_empty() {
        debug!(target: LOG_TARGET, source = %source.name, id = %entry.id, "Dropping entry without title");
        return None;
    }

    let Some(link) = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().is_none_or(|rel| rel == "alternate"))
        .or(entry.links.first())
        .and_then(|l| resolve_link(&source.url, &l.href))
    else {
        debug!(target: LOG_TARGET, source = %source.name, %title, "Dropping entry without usable link");
        return None;
    };

    let Some(published_at) = entry
        .published
        .or(entry.updated)
        .map(|dt| Timestamp::from_unix_secs(dt.timestamp()))
    else {
        debug!(target: LOG_TARGET, source = %source.name, %title, "Dropping entry without timestamp");
        return None;
    };

    let description = entry
        .summary
        .map(|s| clean_text(&s.content))
        .filter(|s| !s.is_empty())
        .or_else(|| {
            entry
                .content
                .and_then(|c| c.body)
                .map(|body| clean_text(&body))
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| title.clone());

    Some(NewsEntry {
        description: truncate_chars(&description, MAX_DESCRIPTION_CHARS),
        title,
        link,
        source: source.name.clone(),
        published_at,
    })
}

/// Links are resolved against the feed url; only http(s) results are kept.
fn resolve_link(base: &Url, href: &str) -> Option<String> {
    let url = base.join(href.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

/// Strip markup and collapse whitespace runs into single spaces.
pub fn clean_text(raw: &str) -> String {
    let fragment = Html::parse_fragment(raw);
    let text: Vec<&str> = fragment.root_element().text().collect();
    collapse_whitespace(&text.join(" "))
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pulls entries from every configured source and keeps the fresh ones.
pub struct Aggregator {
    fetcher: Arc<dyn FeedFetcher>,
    sources: Vec<FeedSource>,
    max_age: Duration,
}

impl Aggregator {
    pub fn new(fetcher: Arc<dyn FeedFetcher>, sources: Vec<FeedSource>) -> Self {
        Self {
            fetcher,
            sources,
            max_age: MAX_ENTRY_AGE,
        }
    }

    pub fn sources(&self) -> &[FeedSource] {
        &self.sources
    }

    /// Fetch all sources concurrently.
    ///
    /// A source that fails to download or parse is logged and skipped, so
    /// this never fails; if every source fails the pool is simply empty.
    pub async fn aggregate(&self, now: Timestamp) -> Vec<NewsEntry> {
        let results = join_all(
            self.sources
                .iter()
                .map(|source| async move { (source, self.fetch_source(source).await) }),
        )
        .await;

        let mut pool = Vec::new();
        for (source, res) in results {
            match res {
                Ok(entries) => {
                    let parsed = entries.len();
                    let before = pool.len();
                    pool.extend(
                        entries
                            .into_iter()
                            .filter(|entry| entry.age(now) <= self.max_age),
                    );
                    debug!(
                        target: LOG_TARGET,
                        source = %source.name,
                        parsed,
                        fresh = pool.len() - before,
                        "Feed processed"
                    );
                }
                Err(err) => {
                    warn!(
                        target: LOG_TARGET,
                        source = %source.name,
                        err = %err.fmt_compact(),
                        "Skipping feed source"
                    );
                }
            }
        }

        info!(
            target: LOG_TARGET,
            entries = pool.len(),
            sources = self.sources.len(),
            "Aggregated news pool"
        );
        pool
    }

    async fn fetch_source(&self, source: &FeedSource) -> FeedResult<Vec<NewsEntry>> {
        let raw = self.fetcher.fetch(source).await?;
        parse_entries(source, &raw)
    }
}
