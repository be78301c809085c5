//! Work-item extraction
//!
//! Turns pasted free-form text (typically copied out of a feed or another
//! tool) into ordered (reference, context) pairs: every X/Twitter link
//! becomes one work item, and the text around a link is kept as inline
//! context so the orchestrator can skip the fetch when enough was supplied.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::session::WorkItem;

static LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"https?://(?:twitter|x)\.com/[^ \n\r\t]+(?:/status/\d+)?(?:(?:\?|\#)\S+)?|https?://t\.co/\S+",
    )
    .expect("link regex")
});

static POST_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:twitter|x)\.com/[^/]+/status/(\d+)").expect("post id regex"));

static FILLER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:ne )?post (?:kiya|ha?i):?\s*").expect("filler regex"));

/// Pull the numeric status id out of a post URL.
pub fn extract_post_id(reference: &str) -> Option<String> {
    POST_ID_RE
        .captures(reference)
        .map(|caps| caps[1].to_string())
}

/// Parse pasted text into ordered work items. Text between two links is
/// attributed to the later link's item together with whatever follows it,
/// mirroring how feed exports interleave link and body.
pub fn parse_work_items(text: &str) -> Vec<WorkItem> {
    let links: Vec<&str> = LINK_RE.find_iter(text).map(|m| m.as_str()).collect();
    if links.is_empty() {
        return Vec::new();
    }

    let surrounding: Vec<&str> = LINK_RE.split(text).collect();

    links
        .iter()
        .enumerate()
        .map(|(idx, link)| {
            let before = surrounding.get(idx).map(|s| s.trim()).unwrap_or("");
            let after = surrounding.get(idx + 1).map(|s| s.trim()).unwrap_or("");
            let context = clean_context(&format!("{}\n{}", before, after));

            WorkItem {
                reference: link.trim().to_string(),
                context: if context.is_empty() {
                    None
                } else {
                    Some(context)
                },
            }
        })
        .collect()
}

fn clean_context(raw: &str) -> String {
    let stripped = FILLER_RE.replace_all(raw, "");
    stripped
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .trim()
        .to_string()
}
