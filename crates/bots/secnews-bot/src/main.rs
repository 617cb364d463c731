use std::io;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};
use secnews_bot::compose::compose_post;
use secnews_bot::config::{
    Command, ConfigError, Credentials, DevCommand, Opts, require_x_access_token,
};
use secnews_bot::dedup::DuplicateDetector;
use secnews_bot::error::FmtCompact as _;
use secnews_bot::feed::{Aggregator, FeedError, HttpFeedFetcher};
use secnews_bot::pipeline::{Pipeline, PipelineConfig, PipelineError, RunOutcome};
use secnews_bot::publish::{PostHistory as _, PublishError, XClient};
use secnews_bot::retry::RetryPolicy;
use secnews_bot::store::{JsonFileStore, StoreError, StoreLock};
use secnews_bot::summarize::{OpenAiSummarizer, SummarizeError};
use secnews_bot::timestamp::Timestamp;
use secnews_bot::LOG_TARGET;
use snafu::{ResultExt as _, Snafu};
use tokio::time::{MissedTickBehavior, interval};
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Snafu)]
pub enum BotError {
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },
    #[snafu(display("Feed client error"))]
    Feed { source: FeedError },
    #[snafu(display("Summarizer error"))]
    Summarizer { source: SummarizeError },
    #[snafu(display("Publisher error"))]
    Publisher { source: PublishError },
    #[snafu(display("Posted store error"))]
    Store { source: StoreError },
    #[snafu(display("Run failed"))]
    Pipeline { source: PipelineError },
    #[snafu(display("Logging initialization failed"))]
    Logging,
}

pub type BotResult<T> = std::result::Result<T, BotError>;

#[snafu::report]
#[tokio::main]
async fn main() -> BotResult<()> {
    init_logging()?;

    let opts = Opts::parse();

    match opts.command {
        Some(Command::Dev { ref dev_command }) => handle_dev_command(&opts, dev_command).await,
        None => run_bot(&opts).await,
    }
}

async fn run_bot(opts: &Opts) -> BotResult<()> {
    // Before anything touches the network
    let credentials = Credentials::from_opts(opts).context(ConfigSnafu)?;

    info!(
        target: LOG_TARGET,
        state_file = %opts.state_file.display(),
        sources = opts.sources().len(),
        remote_check = !opts.no_remote_check,
        dry_run = opts.dry_run,
        model = %opts.model,
        "Bot configuration"
    );

    if 0 < opts.startup_jitter_secs {
        let secs = rand::rng().random_range(0..=opts.startup_jitter_secs);
        info!(target: LOG_TARGET, secs, "Startup jitter");
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    let pipeline = build_pipeline(opts, &credentials)?;

    let Some(period) = opts.run_every() else {
        return run_once(opts, &pipeline).await.map(|_| ());
    };

    let mut interval = interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(err) = run_once(opts, &pipeline).await {
            error!(target: LOG_TARGET, err = %err.fmt_compact(), "Run failed");
        }
        info!(target: LOG_TARGET, next_run_in_secs = period.as_secs(), "Waiting for next run");
    }
}

fn build_pipeline(opts: &Opts, credentials: &Credentials) -> BotResult<Pipeline> {
    let store = Arc::new(
        JsonFileStore::new(&opts.state_file).with_max_entries(opts.max_posted_records),
    );
    let x_client = Arc::new(
        XClient::new(&opts.x_base_url, credentials.x_access_token.clone())
            .context(PublisherSnafu)?
            .with_user_id(opts.x_user_id.clone()),
    );
    let summarizer = Arc::new(
        OpenAiSummarizer::new(
            &opts.openai_base_url,
            credentials.openai_api_key.clone(),
            opts.model.clone(),
        )
        .context(SummarizerSnafu)?,
    );
    let aggregator = Aggregator::new(
        Arc::new(HttpFeedFetcher::new().context(FeedSnafu)?),
        opts.sources(),
    );

    let mut detector = DuplicateDetector::new(store.clone());
    if !opts.no_remote_check {
        detector = detector.with_history(x_client.clone());
    }

    Ok(Pipeline::new(
        aggregator,
        detector,
        summarizer,
        x_client,
        store,
        PipelineConfig {
            summarize_retry: RetryPolicy::SUMMARIZE,
            publish_retry: RetryPolicy::PUBLISH,
            pre_publish_delay: opts.pre_publish_delay(),
            dry_run: opts.dry_run,
        },
    ))
}

async fn run_once(opts: &Opts, pipeline: &Pipeline) -> BotResult<RunOutcome> {
    let _lock = StoreLock::acquire_async(
        opts.state_file.clone(),
        Timestamp::now(),
        opts.stale_lock_age(),
    )
    .await
    .context(StoreSnafu)?;

    let mut rng = StdRng::from_os_rng();
    let outcome = pipeline
        .run(Timestamp::now(), &mut rng)
        .await
        .context(PipelineSnafu)?;

    match &outcome {
        RunOutcome::Published { post_id, .. } => {
            info!(target: LOG_TARGET, %post_id, "Run complete, posted");
        }
        RunOutcome::DryRun { text } => {
            println!("{text}");
        }
        RunOutcome::NoContent => {
            info!(target: LOG_TARGET, "Run complete, nothing to post");
        }
        RunOutcome::SkippedDuplicate { reason, .. } => {
            info!(target: LOG_TARGET, %reason, "Run complete, candidate was a duplicate");
        }
    }
    Ok(outcome)
}

async fn handle_dev_command(opts: &Opts, dev_command: &DevCommand) -> BotResult<()> {
    match dev_command {
        DevCommand::Fetch => {
            let aggregator = Aggregator::new(
                Arc::new(HttpFeedFetcher::new().context(FeedSnafu)?),
                opts.sources(),
            );
            let now = Timestamp::now();
            let mut pool = aggregator.aggregate(now).await;
            pool.sort_by(|a, b| b.published_at.cmp(&a.published_at));

            println!(
                "{} fresh entries from {} sources:",
                pool.len(),
                aggregator.sources().len()
            );
            println!();
            for (i, entry) in pool.iter().enumerate() {
                println!("Entry {}:", i + 1);
                println!("  Title: {}", entry.title);
                println!("  Source: {}", entry.source);
                println!("  Link: {}", entry.link);
                println!("  Published: {}", entry.published_at);
                println!("  Age: {} min", entry.age(now).as_secs() / 60);
                println!("  Hash: {}", entry.hash());
                println!("  Description: {}", entry.description);
                println!();
            }
        }
        DevCommand::History { limit } => {
            let token = require_x_access_token(opts).context(ConfigSnafu)?;
            let client = XClient::new(&opts.x_base_url, token)
                .context(PublisherSnafu)?
                .with_user_id(opts.x_user_id.clone());
            let posts = client.recent_posts(*limit).await.context(PublisherSnafu)?;

            for post in posts {
                println!(
                    "{} [{}]\n  {}",
                    post.id,
                    post.created_at.as_deref().unwrap_or("-"),
                    post.text.replace('\n', "\n  ")
                );
            }
        }
        DevCommand::Compose { summary, link } => {
            let text = compose_post(summary, link);
            println!("{text}");
            println!("({} chars)", text.chars().count());
        }
    }
    Ok(())
}

pub fn init_logging() -> BotResult<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|_| BotError::Logging)?;

    Ok(())
}
