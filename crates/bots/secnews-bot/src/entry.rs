use std::fmt;
use std::time::Duration;

use data_encoding::HEXLOWER;

use crate::timestamp::Timestamp;

/// A normalized news item, produced fresh on every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsEntry {
    pub title: String,
    /// Plain text, at most [`crate::feed::MAX_DESCRIPTION_CHARS`] chars.
    pub description: String,
    /// Absolute url of the article.
    pub link: String,
    /// Display name of the feed this came from.
    pub source: String,
    pub published_at: Timestamp,
}

impl NewsEntry {
    pub fn age(&self, now: Timestamp) -> Duration {
        now.duration_since(self.published_at)
    }

    pub fn hash(&self) -> ArticleHash {
        ArticleHash::of(&self.title, &self.link)
    }
}

/// Fingerprint of an article that was already posted.
///
/// `blake3(title + "|" + link)`, persisted as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArticleHash([u8; 32]);

impl ArticleHash {
    pub fn of(title: &str, link: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(title.as_bytes());
        hasher.update(b"|");
        hasher.update(link.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    pub fn to_hex(&self) -> String {
        HEXLOWER.encode(&self.0)
    }
}

impl fmt::Display for ArticleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
