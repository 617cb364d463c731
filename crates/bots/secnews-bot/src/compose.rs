/// Hard length limit of a single post, in characters.
pub const MAX_POST_CHARS: usize = 280;

const ELLIPSIS: &str = "...";

/// First `max` characters of `s` (char boundary safe).
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

fn truncate_with_ellipsis(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(ELLIPSIS.len());
    let mut out = truncate_chars(s, keep).trim_end().to_string();
    out.push_str(ELLIPSIS);
    out
}

/// How many characters the summary may take so that `summary\nlink` fits.
pub fn summary_budget(link: &str) -> usize {
    MAX_POST_CHARS.saturating_sub(link.chars().count() + 1)
}

/// Trim model output and drop wrapping quotes it likes to add.
pub fn clean_summary(raw: &str) -> &str {
    let trimmed = raw.trim();
    for (open, close) in [('"', '"'), ('“', '”'), ('\'', '\'')] {
        if let Some(inner) = trimmed
            .strip_prefix(open)
            .and_then(|s| s.strip_suffix(close))
        {
            return inner.trim();
        }
    }
    trimmed
}

/// Build the final post: summary, a newline, then the link.
///
/// The summary is shortened (with an ellipsis) so the link always survives
/// intact. Only a link that is itself longer than the limit gets cut.
pub fn compose_post(summary: &str, link: &str) -> String {
    let summary = clean_summary(summary);
    let budget = summary_budget(link);
    // No room for even an ellipsis: the link goes alone.
    let text = if summary.is_empty() || budget <= ELLIPSIS.len() {
        link.to_string()
    } else {
        let summary = truncate_with_ellipsis(summary, budget);
        format!("{summary}\n{link}")
    };

    truncate_with_ellipsis(&text, MAX_POST_CHARS)
}
