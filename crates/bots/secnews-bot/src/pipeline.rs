use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use snafu::{ResultExt as _, Snafu};
use tracing::{error, info};

use crate::compose::{compose_post, summary_budget};
use crate::dedup::{DuplicateDetector, DuplicateReason};
use crate::entry::{ArticleHash, NewsEntry};
use crate::feed::Aggregator;
use crate::publish::{PostId, PublishError, Publisher};
use crate::retry::{self, RetryPolicy};
use crate::select::select_entry;
use crate::store::{PostedStore, StoreError};
use crate::summarize::{SummarizeError, Summarizer};
use crate::timestamp::Timestamp;

const LOG_TARGET: &str = "secnews_bot::pipeline";

pub const DEFAULT_PRE_PUBLISH_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Snafu)]
pub enum PipelineError {
    #[snafu(display("Failed to consult the posted store"))]
    DuplicateCheck { source: StoreError },
    #[snafu(display("Failed to summarize \"{title}\""))]
    Summarize {
        title: String,
        source: SummarizeError,
    },
    #[snafu(display("Still rate limited after {attempts} publish attempts"))]
    RateLimitExhausted {
        attempts: usize,
        source: PublishError,
    },
    #[snafu(display("Failed to publish \"{title}\""))]
    Publish { title: String, source: PublishError },
    #[snafu(display("Post {post_id} is live but could not be recorded as posted"))]
    Record { post_id: PostId, source: StoreError },
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// How a single run ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Published {
        post_id: PostId,
        hash: ArticleHash,
        text: String,
    },
    /// Everything but publishing and recording was done.
    DryRun { text: String },
    /// No fresh entry was available.
    NoContent,
    SkippedDuplicate {
        hash: ArticleHash,
        reason: DuplicateReason,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub summarize_retry: RetryPolicy,
    pub publish_retry: RetryPolicy,
    pub pre_publish_delay: Duration,
    pub dry_run: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            summarize_retry: RetryPolicy::SUMMARIZE,
            publish_retry: RetryPolicy::PUBLISH,
            pre_publish_delay: DEFAULT_PRE_PUBLISH_DELAY,
            dry_run: false,
        }
    }
}

/// aggregate → select → dedup → summarize → compose → publish → record
pub struct Pipeline {
    aggregator: Aggregator,
    detector: DuplicateDetector,
    summarizer: Arc<dyn Summarizer>,
    publisher: Arc<dyn Publisher>,
    store: Arc<dyn PostedStore>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        aggregator: Aggregator,
        detector: DuplicateDetector,
        summarizer: Arc<dyn Summarizer>,
        publisher: Arc<dyn Publisher>,
        store: Arc<dyn PostedStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            aggregator,
            detector,
            summarizer,
            publisher,
            store,
            config,
        }
    }

    /// One full posting attempt.
    ///
    /// The hash is recorded only after the platform accepted the post, so a
    /// failure anywhere before that leaves the store untouched.
    pub async fn run<R>(&self, now: Timestamp, rng: &mut R) -> PipelineResult<RunOutcome>
    where
        R: Rng + ?Sized,
    {
        let pool = self.aggregator.aggregate(now).await;
        let Some(entry) = select_entry(pool, now, rng) else {
            info!(target: LOG_TARGET, "No fresh news available");
            return Ok(RunOutcome::NoContent);
        };
        info!(
            target: LOG_TARGET,
            title = %entry.title,
            source = %entry.source,
            published_at = %entry.published_at,
            "Selected entry"
        );

        let hash = entry.hash();
        if let Some(reason) = self
            .detector
            .check(&entry)
            .await
            .context(DuplicateCheckSnafu)?
        {
            info!(target: LOG_TARGET, title = %entry.title, %reason, "Skipping duplicate");
            return Ok(RunOutcome::SkippedDuplicate { hash, reason });
        }

        let text = self.summarize_and_compose(&entry).await?;
        info!(target: LOG_TARGET, chars = text.chars().count(), %text, "Composed post");

        if self.config.dry_run {
            info!(target: LOG_TARGET, "Dry run, not publishing");
            return Ok(RunOutcome::DryRun { text });
        }

        if !self.config.pre_publish_delay.is_zero() {
            tokio::time::sleep(self.config.pre_publish_delay).await;
        }

        let post_id = self.publish(&entry, &text).await?;

        self.store
            .add(hash)
            .await
            .context(RecordSnafu {
                post_id: post_id.clone(),
            })
            .inspect_err(|_| {
                error!(target: LOG_TARGET, %post_id, %hash, "Published but failed to record hash");
            })?;

        info!(target: LOG_TARGET, %post_id, %hash, title = %entry.title, "Published");
        Ok(RunOutcome::Published {
            post_id,
            hash,
            text,
        })
    }

    async fn summarize_and_compose(&self, entry: &NewsEntry) -> PipelineResult<String> {
        let budget = summary_budget(&entry.link);
        let summary = self
            .config
            .summarize_retry
            .run(
                "summarize",
                || self.summarizer.summarize(entry, budget),
                retry::always,
            )
            .await
            .inspect_err(|_| {
                error!(target: LOG_TARGET, title = %entry.title, "Summarization attempts exhausted");
            })
            .context(SummarizeSnafu {
                title: &entry.title,
            })?;

        Ok(compose_post(&summary, &entry.link))
    }

    async fn publish(&self, entry: &NewsEntry, text: &str) -> PipelineResult<PostId> {
        let policy = self.config.publish_retry;
        match policy
            .run(
                "publish",
                || self.publisher.publish(text),
                PublishError::is_rate_limited,
            )
            .await
        {
            Ok(post_id) => Ok(post_id),
            Err(source) if source.is_rate_limited() => {
                error!(target: LOG_TARGET, title = %entry.title, attempts = policy.max_attempts, "Rate limit retries exhausted");
                Err(PipelineError::RateLimitExhausted {
                    attempts: policy.max_attempts,
                    source,
                })
            }
            Err(source) => {
                error!(target: LOG_TARGET, title = %entry.title, "Publishing failed");
                Err(PipelineError::Publish {
                    title: entry.title.clone(),
                    source,
                })
            }
        }
    }
}
