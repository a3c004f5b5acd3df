/**
 * Crawler Pipeline Types (C8)
 *
 * Per spec §4.8/§9, C8 is an interface summary only: HTML fetch, markdown
 * conversion, and chunk segmentation are external collaborators this crate
 * does not implement. What the crate DOES own is the `source` lifecycle
 * state machine and the shape of what gets persisted.
 */
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Pending,
    InProgress,
    Completed,
    Partial,
    Failed,
}

impl CrawlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlStatus::Pending => "pending",
            CrawlStatus::InProgress => "in_progress",
            CrawlStatus::Completed => "completed",
            CrawlStatus::Partial => "partial",
            CrawlStatus::Failed => "failed",
        }
    }

    /// `pending -> in_progress -> {completed, partial, failed}` (spec
    /// §4.8). Nothing transitions back to `pending` or `in_progress` once
    /// a terminal status is reached.
    pub fn can_transition_to(&self, next: CrawlStatus) -> bool {
        matches!(
            (self, next),
            (CrawlStatus::Pending, CrawlStatus::InProgress)
                | (CrawlStatus::InProgress, CrawlStatus::Completed | CrawlStatus::Partial | CrawlStatus::Failed)
        )
    }
}

/// 64-hex content hash used for page-level dedupe.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// A single fetched-and-converted page, already reduced to markdown by the
/// (external) extraction collaborator. The pipeline only ever sees this
/// shape, never raw HTML.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub markdown: String,
    pub headings: Vec<String>,
    pub links: Vec<String>,
    pub code_languages: Vec<String>,
}

/// One overlapping segment of a page's content, ready for embedding.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    pub content: String,
}

/// Splits `content` into overlapping chunks of roughly `chunk_chars`
/// characters with `overlap_chars` of repeated trailing context between
/// consecutive chunks. A deliberately simple, allocation-light default;
/// real segmentation (sentence/paragraph boundaries) is the kind of
/// extraction-quality work the spec keeps external (§1, §4.8).
pub fn segment(content: &str, chunk_chars: usize, overlap_chars: usize) -> Vec<Chunk> {
    if content.is_empty() || chunk_chars == 0 {
        return Vec::new();
    }
    let chars: Vec<char> = content.chars().collect();
    let step = chunk_chars.saturating_sub(overlap_chars).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut index = 0;
    while start < chars.len() {
        let end = (start + chunk_chars).min(chars.len());
        chunks.push(Chunk { index, content: chars[start..end].iter().collect() });
        index += 1;
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_64_hex_chars() {
        let hash = content_hash("hello world");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash("same text"), content_hash("same text"));
        assert_ne!(content_hash("a"), content_hash("b"));
    }

    #[test]
    fn test_crawl_status_transitions() {
        assert!(CrawlStatus::Pending.can_transition_to(CrawlStatus::InProgress));
        assert!(CrawlStatus::InProgress.can_transition_to(CrawlStatus::Completed));
        assert!(!CrawlStatus::Completed.can_transition_to(CrawlStatus::InProgress));
        assert!(!CrawlStatus::Pending.can_transition_to(CrawlStatus::Completed));
    }

    #[test]
    fn test_segment_overlaps_consecutive_chunks() {
        let content = "a".repeat(250);
        let chunks = segment(&content, 100, 20);
        assert!(chunks.len() >= 3);
        assert_eq!(chunks[0].content.len(), 100);
    }

    #[test]
    fn test_segment_empty_content() {
        assert!(segment("", 100, 20).is_empty());
    }
}
