/**
 * Crawler Pipeline (C8)
 *
 * Owns the `source` lifecycle and the document/chunk persistence shape.
 * Fetching a URL, converting HTML to markdown, and deciding where to split
 * a page into chunks are all external collaborator concerns (spec §1,
 * §4.8); this module takes already-fetched, already-converted pages
 * (`FetchedPage`) as input and is responsible only for what happens next:
 * dedupe by content hash, persist `document`/`chunk` entities linked back
 * to the source, advance `crawl_status`, and publish C4 progress events.
 */
use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::bus::{Event, MessageBus};
use crate::entity::{Entity, EntityKind, EntityManager, EntityUpdate};
use crate::error::Result;
use crate::relationship::{Relationship, RelationshipKind, RelationshipManager};
use crate::tenant::TenantId;

use super::types::{content_hash, segment, CrawlStatus, FetchedPage};

#[derive(Debug, Clone, Default)]
pub struct CrawlOutcome {
    pub status: CrawlStatus,
    pub documents_created: u64,
    pub documents_deduped: u64,
    pub chunks_created: u64,
    pub failed_pages: u64,
}

/// The seam a crawl orchestrator implements. `crawl` receives pages a
/// fetch/convert collaborator has already produced; a production
/// implementation would pull those from a queue or a live fetcher, this
/// crate ships only the trait and a direct-input test double
/// (`DirectCrawlerPipeline`).
#[async_trait]
pub trait CrawlerPipeline: Send + Sync {
    async fn crawl(&self, source_id: &str, pages: Vec<FetchedPage>) -> Result<CrawlOutcome>;
}

pub struct DirectCrawlerPipeline {
    tenant: TenantId,
    entities: Arc<EntityManager>,
    relationships: Arc<RelationshipManager>,
    bus: Arc<MessageBus>,
    chunk_chars: usize,
    chunk_overlap_chars: usize,
}

impl DirectCrawlerPipeline {
    pub fn new(tenant: TenantId, entities: Arc<EntityManager>, relationships: Arc<RelationshipManager>, bus: Arc<MessageBus>) -> Self {
        Self { tenant, entities, relationships, bus, chunk_chars: 2000, chunk_overlap_chars: 200 }
    }

    pub fn with_chunking(mut self, chunk_chars: usize, chunk_overlap_chars: usize) -> Self {
        self.chunk_chars = chunk_chars;
        self.chunk_overlap_chars = chunk_overlap_chars;
        self
    }

    async fn set_source_status(&self, source_id: &str, status: CrawlStatus) {
        let mut structured = crate::entity::Metadata::new();
        structured.insert("crawl_status".to_string(), json!(status.as_str()));
        if let Err(e) =
            self.entities.update(source_id, EntityUpdate { structured: Some(structured), ..Default::default() }).await
        {
            warn!(error = %e, source_id, "failed to update source crawl_status");
        }
    }

    /// Sets the terminal fields the spec requires alongside `crawl_status`
    /// once every page in a crawl has been attempted.
    async fn set_terminal_fields(&self, source_id: &str, outcome: &CrawlOutcome) {
        let mut structured = crate::entity::Metadata::new();
        structured.insert("crawl_status".to_string(), json!(outcome.status.as_str()));
        structured.insert("last_crawled_at".to_string(), json!(Utc::now().to_rfc3339()));
        structured.insert("document_count".to_string(), json!(outcome.documents_created + outcome.documents_deduped));
        structured.insert("chunk_count".to_string(), json!(outcome.chunks_created));
        if outcome.failed_pages > 0 {
            structured.insert("last_error".to_string(), json!(format!("{} page(s) failed to ingest", outcome.failed_pages)));
        }
        if let Err(e) =
            self.entities.update(source_id, EntityUpdate { structured: Some(structured), ..Default::default() }).await
        {
            warn!(error = %e, source_id, "failed to update source terminal crawl fields");
        }
    }

    async fn existing_content_hashes(&self, source_id: &str) -> BTreeSet<String> {
        let related = self
            .relationships
            .get_for_entity(source_id, crate::relationship::Direction::Incoming, Some(vec![RelationshipKind::DerivedFrom]))
            .await;
        let mut hashes = BTreeSet::new();
        for rel in related {
            if let Ok(doc) = self.entities.get(&rel.source_id).await {
                if let Some(h) = doc.metadata.get("content_hash").and_then(|v| v.as_str()) {
                    hashes.insert(h.to_string());
                }
            }
        }
        hashes
    }
}

#[async_trait]
impl CrawlerPipeline for DirectCrawlerPipeline {
    /// `pending -> in_progress` before the first page, then
    /// `{completed, partial, failed}` once every page has been processed:
    /// `completed` if every page succeeded, `partial` if some but not all
    /// did, `failed` if none did and at least one page was attempted.
    async fn crawl(&self, source_id: &str, pages: Vec<FetchedPage>) -> Result<CrawlOutcome> {
        self.set_source_status(source_id, CrawlStatus::InProgress).await;
        self.bus.publish(&self.tenant, Event::CrawlStarted { source_id: source_id.to_string() });

        let mut seen = self.existing_content_hashes(source_id).await;
        let mut outcome = CrawlOutcome { status: CrawlStatus::InProgress, ..Default::default() };
        let total_pages = pages.len() as u64;

        for page in pages {
            match self.ingest_page(source_id, &page, &mut seen).await {
                Ok(IngestResult::Created(chunks)) => {
                    outcome.documents_created += 1;
                    outcome.chunks_created += chunks;
                }
                Ok(IngestResult::Deduped) => outcome.documents_deduped += 1,
                Err(e) => {
                    warn!(error = %e, url = %page.url, "failed to ingest crawled page");
                    outcome.failed_pages += 1;
                }
            }

            self.bus.publish(
                &self.tenant,
                Event::CrawlProgress {
                    source_id: source_id.to_string(),
                    documents: outcome.documents_created + outcome.documents_deduped,
                    chunks: outcome.chunks_created,
                },
            );
        }

        let attempted = outcome.documents_created + outcome.documents_deduped + outcome.failed_pages;
        outcome.status = if total_pages == 0 || outcome.failed_pages == 0 {
            CrawlStatus::Completed
        } else if outcome.failed_pages == attempted {
            CrawlStatus::Failed
        } else {
            CrawlStatus::Partial
        };

        self.set_terminal_fields(source_id, &outcome).await;
        self.bus.publish(
            &self.tenant,
            Event::CrawlComplete { source_id: source_id.to_string(), status: outcome.status.as_str().to_string() },
        );

        Ok(outcome)
    }
}

enum IngestResult {
    Created(u64),
    Deduped,
}

impl DirectCrawlerPipeline {
    async fn ingest_page(&self, source_id: &str, page: &FetchedPage, seen: &mut BTreeSet<String>) -> Result<IngestResult> {
        let hash = content_hash(&page.markdown);
        if seen.contains(&hash) {
            return Ok(IngestResult::Deduped);
        }
        seen.insert(hash.clone());

        let doc_id = format!("document_{}", Uuid::new_v4().simple());
        let mut doc = Entity::new(&doc_id, self.tenant.as_str(), EntityKind::Document, page_title(page));
        doc.content = Some(page.markdown.clone());
        doc.metadata.insert("url".to_string(), json!(page.url));
        doc.metadata.insert("content_hash".to_string(), json!(hash));
        doc.metadata.insert("headings".to_string(), json!(page.headings));
        doc.metadata.insert("code_languages".to_string(), json!(page.code_languages));
        self.entities.create_direct(doc, false).await?;

        self.relationships
            .create(Relationship::new(
                format!("rel_{}", Uuid::new_v4().simple()),
                self.tenant.as_str(),
                doc_id.clone(),
                source_id.to_string(),
                RelationshipKind::DerivedFrom,
            ))
            .await?;

        let chunks = segment(&page.markdown, self.chunk_chars, self.chunk_overlap_chars);
        let chunk_count = chunks.len() as u64;
        for chunk in chunks {
            let chunk_id = format!("chunk_{}", Uuid::new_v4().simple());
            let mut entity = Entity::new(&chunk_id, self.tenant.as_str(), EntityKind::Chunk, format!("{} #{}", page_title(page), chunk.index));
            entity.content = Some(chunk.content);
            entity.metadata.insert("chunk_index".to_string(), json!(chunk.index));
            entity.created_at = Utc::now();
            self.entities.create_direct(entity, false).await?;

            self.relationships
                .create(Relationship::new(
                    format!("rel_{}", Uuid::new_v4().simple()),
                    self.tenant.as_str(),
                    chunk_id,
                    doc_id.clone(),
                    RelationshipKind::PartOf,
                ))
                .await?;
        }

        Ok(IngestResult::Created(chunk_count))
    }
}

fn page_title(page: &FetchedPage) -> String {
    page.headings.first().cloned().unwrap_or_else(|| page.url.clone())
}
