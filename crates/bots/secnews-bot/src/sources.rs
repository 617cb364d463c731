use std::fmt;
use std::str::FromStr;

use snafu::{OptionExt as _, ResultExt as _, Snafu, ensure};
use url::Url;

#[derive(Debug, Snafu)]
pub enum FeedSourceParseError {
    #[snafu(display("Feed source must look like NAME=URL, got: {input}"))]
    MissingSeparator { input: String },
    #[snafu(display("Feed source name is empty: {input}"))]
    EmptyName { input: String },
    #[snafu(display("Invalid feed url {url}"))]
    InvalidUrl { url: String, source: url::ParseError },
    #[snafu(display("Feed url must be http(s): {url}"))]
    UnsupportedScheme { url: String },
}

/// A syndication feed the aggregator pulls entries from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub name: String,
    pub url: Url,
}

impl FeedSource {
    pub fn new(name: impl Into<String>, url: Url) -> Self {
        Self {
            name: name.into(),
            url,
        }
    }
}

impl fmt::Display for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.url)
    }
}

/// Parses the `NAME=URL` form used on the command line.
impl FromStr for FeedSource {
    type Err = FeedSourceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, url) = s
            .split_once('=')
            .context(MissingSeparatorSnafu { input: s })?;
        let name = name.trim();
        ensure!(!name.is_empty(), EmptyNameSnafu { input: s });

        let url_str = url.trim();
        let url = Url::parse(url_str).context(InvalidUrlSnafu { url: url_str })?;
        ensure!(
            matches!(url.scheme(), "http" | "https"),
            UnsupportedSchemeSnafu { url: url_str }
        );

        Ok(Self::new(name, url))
    }
}

const DEFAULT_SOURCES: &[(&str, &str)] = &[
    ("The Hacker News", "https://feeds.feedburner.com/TheHackersNews"),
    ("BleepingComputer", "https://www.bleepingcomputer.com/feed/"),
    ("Krebs on Security", "https://krebsonsecurity.com/feed/"),
    ("Dark Reading", "https://www.darkreading.com/rss.xml"),
    ("SecurityWeek", "https://www.securityweek.com/feed/"),
    (
        "CISA Advisories",
        "https://www.cisa.gov/cybersecurity-advisories/all.xml",
    ),
];

/// The built-in registry of cybersecurity news feeds.
pub fn default_sources() -> Vec<FeedSource> {
    DEFAULT_SOURCES
        .iter()
        .filter_map(|(name, url)| Some(FeedSource::new(*name, Url::parse(url).ok()?)))
        .collect()
}
