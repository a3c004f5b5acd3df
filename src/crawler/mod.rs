/**
 * C8 — Crawler Pipeline
 *
 * Owns the `source` lifecycle state machine and the document/chunk
 * persistence shape. Fetching, HTML-to-markdown conversion, and chunk
 * segmentation heuristics are external collaborator concerns (spec §1);
 * `DirectCrawlerPipeline` is the no-op/test-double implementation this
 * crate ships, sufficient to exercise C4 progress events and C2
 * persistence from tests.
 */
mod pipeline;
mod types;

pub use pipeline::{CrawlOutcome, CrawlerPipeline, DirectCrawlerPipeline};
pub use types::{content_hash, segment, Chunk, CrawlStatus, FetchedPage};
