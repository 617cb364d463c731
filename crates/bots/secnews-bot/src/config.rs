use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use snafu::{Snafu, ensure};

use crate::publish::DEFAULT_X_API_BASE;
use crate::sources::{FeedSource, default_sources};
use crate::store::DEFAULT_STATE_FILE;
use crate::summarize::{DEFAULT_MODEL, DEFAULT_OPENAI_BASE};

pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const X_ACCESS_TOKEN_ENV: &str = "X_ACCESS_TOKEN";

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("Missing required configuration: {}", names.join(", ")))]
    Missing { names: Vec<&'static str> },
    #[snafu(display("Malformed value for {name}"))]
    Malformed { name: &'static str },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// SecNews Bot - posts one fresh cybersecurity story per run
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Opts {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// API key for the summarization service
    #[arg(long, env = OPENAI_API_KEY_ENV, hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Base url of an OpenAI compatible API
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE)]
    pub openai_base_url: String,

    /// Chat model used for summaries
    #[arg(long, env = "SECNEWS_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// OAuth 2.0 user access token for the X API
    #[arg(long, env = X_ACCESS_TOKEN_ENV, hide_env_values = true)]
    pub x_access_token: Option<String>,

    /// Account id, saves a lookup per run
    #[arg(long, env = "X_USER_ID")]
    pub x_user_id: Option<String>,

    #[arg(long, env = "X_API_BASE_URL", default_value = DEFAULT_X_API_BASE)]
    pub x_base_url: String,

    /// File keeping hashes of already posted articles
    #[arg(long, env = "SECNEWS_STATE_FILE", default_value = DEFAULT_STATE_FILE)]
    pub state_file: PathBuf,

    /// Keep at most this many posted records (oldest dropped first)
    #[arg(long, env = "SECNEWS_MAX_POSTED_RECORDS")]
    pub max_posted_records: Option<usize>,

    /// Consider a leftover lock file abandoned after this many minutes
    #[arg(long, default_value = "120")]
    pub stale_lock_minutes: u64,

    /// Feed to read, as NAME=URL; replaces the built-in list when given
    #[arg(long = "feed", value_name = "NAME=URL")]
    pub feeds: Vec<FeedSource>,

    /// Do not scan the account's recent posts for duplicates
    #[arg(long)]
    pub no_remote_check: bool,

    /// Compose the post but do not publish or record it
    #[arg(long)]
    pub dry_run: bool,

    /// Sleep a random number of seconds up to this value before running
    #[arg(long, env = "SECNEWS_STARTUP_JITTER_SECS", default_value = "0")]
    pub startup_jitter_secs: u64,

    /// Pause between composing and publishing
    #[arg(long, default_value = "2")]
    pub pre_publish_delay_secs: u64,

    /// Keep running, one post attempt every N minutes
    #[arg(long)]
    pub every_minutes: Option<u64>,
}

impl Opts {
    pub fn sources(&self) -> Vec<FeedSource> {
        if self.feeds.is_empty() {
            default_sources()
        } else {
            self.feeds.clone()
        }
    }

    pub fn stale_lock_age(&self) -> Duration {
        Duration::from_secs(self.stale_lock_minutes.saturating_mul(60))
    }

    /// Period of the `--every-minutes` loop, at least one minute.
    pub fn run_every(&self) -> Option<Duration> {
        self.every_minutes
            .map(|minutes| Duration::from_secs(minutes.max(1).saturating_mul(60)))
    }

    pub fn pre_publish_delay(&self) -> Duration {
        Duration::from_secs(self.pre_publish_delay_secs)
    }
}

#[derive(Debug, Parser)]
pub enum Command {
    /// Development commands
    Dev {
        #[command(subcommand)]
        dev_command: DevCommand,
    },
}

#[derive(Debug, Parser)]
pub enum DevCommand {
    /// Aggregate all feeds and print the candidate pool
    Fetch,
    /// Print the account's most recent posts
    History {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show how a summary and link would be combined into a post
    Compose {
        #[arg(long)]
        summary: String,
        #[arg(long)]
        link: String,
    },
}

/// Secrets needed for a posting run.
pub struct Credentials {
    pub openai_api_key: String,
    pub x_access_token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("openai_api_key", &"<redacted>")
            .field("x_access_token", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Validate everything up front, before any network I/O.
    ///
    /// All missing values are reported together.
    pub fn from_opts(opts: &Opts) -> ConfigResult<Self> {
        let [openai_api_key, x_access_token] = require([
            (OPENAI_API_KEY_ENV, opts.openai_api_key.as_deref()),
            (X_ACCESS_TOKEN_ENV, opts.x_access_token.as_deref()),
        ])?;
        Ok(Self {
            openai_api_key,
            x_access_token,
        })
    }
}

/// Only the X token, for commands that just read the timeline.
pub fn require_x_access_token(opts: &Opts) -> ConfigResult<String> {
    let [token] = require([(X_ACCESS_TOKEN_ENV, opts.x_access_token.as_deref())])?;
    Ok(token)
}

fn require<const N: usize>(
    values: [(&'static str, Option<&str>); N],
) -> ConfigResult<[String; N]> {
    let missing: Vec<_> = values
        .iter()
        .filter(|(_, v)| v.is_none())
        .map(|(name, _)| *name)
        .collect();
    ensure!(missing.is_empty(), MissingSnafu { names: missing });

    for (name, value) in &values {
        let value = value.unwrap_or_default().trim();
        ensure!(
            !value.is_empty() && !value.contains(char::is_whitespace),
            MalformedSnafu { name: *name }
        );
    }

    Ok(values.map(|(_, value)| value.unwrap_or_default().trim().to_string()))
}
