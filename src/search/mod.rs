//! The search pipeline: category expansion, per-category paginated fetch,
//! normalization, filtering and capping.

pub mod categories;
pub mod filter;
pub mod normalize;
pub mod window;

use crate::models::{
    DetailRequest, NaturalKey, ProcurementRecord, SearchCriteria, SearchResponse, SourceOutcome,
    SourceReport,
};
use crate::pncp::{PageQuery, PncpConfig, PncpError, ProcurementSource};
use categories::CategoryDefinition;
use chrono::{DateTime, Utc};
use filter::ActiveFilters;
use futures::future::join_all;
use std::{collections::HashSet, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{info, warn};
use window::DateWindow;

/// Upper bound on records returned by one search.
pub const RESULT_CAP: usize = 200;

#[derive(Clone)]
pub struct SearchService {
    source: Arc<dyn ProcurementSource>,
    config: Arc<PncpConfig>,
}

impl SearchService {
    pub fn new(source: Arc<dyn ProcurementSource>, config: Arc<PncpConfig>) -> Self {
        Self { source, config }
    }

    pub async fn search(&self, criteria: SearchCriteria) -> Result<SearchResponse, SearchError> {
        self.search_at(criteria, Utc::now()).await
    }

    pub async fn search_at(
        &self,
        criteria: SearchCriteria,
        now: DateTime<Utc>,
    ) -> Result<SearchResponse, SearchError> {
        let started = Instant::now();
        let today = now.with_timezone(&normalize::brasilia()).date_naive();
        let window = DateWindow::resolve(
            criteria.date_from,
            criteria.date_to,
            today,
            self.config.window_days,
        )
        .map_err(|message| SearchError::invalid_input("date_window", message))?;
        let categories = categories::resolve(criteria.active_category());

        info!(
            target = "licita.search",
            from = %window.from,
            to = %window.to,
            codes = ?categories.iter().map(|c| c.code).collect::<Vec<_>>(),
            keyword = criteria.active_keyword().unwrap_or(""),
            "search started"
        );

        // Categories are independent; pages within one stay sequential.
        let harvests = join_all(
            categories
                .iter()
                .map(|category| self.collect_category(category, window, now)),
        )
        .await;

        let mut merged = Vec::new();
        let mut sources = Vec::with_capacity(harvests.len());
        for harvest in harvests {
            merged.extend(harvest.records);
            sources.push(harvest.report);
        }
        let fetched = merged.len();

        if criteria.dedupe {
            merged = dedupe(merged);
        }
        let mut results = ActiveFilters::from_criteria(&criteria).apply(merged);
        results.truncate(RESULT_CAP);

        let partial = sources
            .iter()
            .any(|report| matches!(report.outcome, SourceOutcome::Failed { .. }));
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::search_completed(results.len(), partial, elapsed_ms);
        info!(
            target = "licita.search",
            fetched,
            returned = results.len(),
            partial,
            elapsed_ms = elapsed_ms as u64,
            "search finished"
        );

        Ok(SearchResponse {
            results,
            sources,
            partial,
        })
    }

    async fn collect_category(
        &self,
        category: &'static CategoryDefinition,
        window: DateWindow,
        now: DateTime<Utc>,
    ) -> CategoryHarvest {
        let started = Instant::now();
        let mut records = Vec::new();
        let mut pages_fetched = 0;
        let mut outcome = SourceOutcome::PageCap;

        for page in 1..=self.config.max_pages {
            let query = PageQuery {
                window,
                code: category.code,
                page,
                page_size: self.config.page_size,
            };
            match self.source.fetch_page(&query).await {
                Err(err) => {
                    warn!(
                        target = "licita.search",
                        code = category.code,
                        page,
                        error = %err,
                        "upstream page failed; skipping rest of category"
                    );
                    outcome = SourceOutcome::Failed {
                        error: err.to_string(),
                    };
                    break;
                }
                Ok(upstream) => {
                    pages_fetched += 1;
                    if upstream.items.is_empty() {
                        outcome = SourceOutcome::Exhausted;
                        break;
                    }
                    records.extend(
                        upstream
                            .items
                            .into_iter()
                            .map(|raw| normalize::normalize(raw, &self.config, now)),
                    );
                    if upstream.remaining_pages == Some(0) {
                        outcome = SourceOutcome::Exhausted;
                        break;
                    }
                }
            }
        }

        let report = SourceReport {
            code: category.code,
            label: category.label.to_string(),
            pages_fetched,
            records: records.len(),
            elapsed_ms: started.elapsed().as_millis(),
            outcome,
        };
        CategoryHarvest { records, report }
    }

    /// Fetches and normalizes a single procurement by its natural key.
    pub async fn detail(&self, request: DetailRequest) -> Result<ProcurementRecord, SearchError> {
        let key = NaturalKey::parse(&request.tax_id, request.year, request.sequence_number)
            .map_err(|message| SearchError::invalid_input("detail", message))?;

        let mut raw = self.source.fetch_detail(&key).await.map_err(|err| {
            warn!(
                target = "licita.search",
                tax_id = %key.tax_id,
                year = key.year,
                sequence_number = key.sequence_number,
                error = %err,
                "detail lookup failed"
            );
            SearchError::upstream("detail", &err)
        })?;

        // Upstream detail payloads sometimes omit the key they were fetched by.
        let orgao = raw.orgao_entidade.get_or_insert_with(Default::default);
        if orgao.cnpj.as_deref().is_none_or(|cnpj| cnpj.trim().is_empty()) {
            orgao.cnpj = Some(key.tax_id.clone());
        }
        raw.ano_compra.get_or_insert(key.year);
        raw.sequencial_compra.get_or_insert(key.sequence_number);

        Ok(normalize::normalize(raw, &self.config, Utc::now()))
    }
}

struct CategoryHarvest {
    records: Vec<ProcurementRecord>,
    report: SourceReport,
}

/// Keeps the first record per natural key (or upstream id when the key is
/// incomplete). Records with neither are kept as-is.
fn dedupe(records: Vec<ProcurementRecord>) -> Vec<ProcurementRecord> {
    let mut seen_keys = HashSet::new();
    let mut seen_ids = HashSet::new();
    records
        .into_iter()
        .filter(|record| match record.natural_key() {
            Some(key) => seen_keys.insert(key),
            None if record.id.is_synthetic() => true,
            None => seen_ids.insert(record.id.clone()),
        })
        .collect()
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct SearchError {
    stage: &'static str,
    message: String,
    kind: SearchErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchErrorKind {
    InvalidInput,
    NotFound,
    Upstream,
}

impl SearchError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: SearchErrorKind::InvalidInput,
        }
    }

    pub fn upstream(stage: &'static str, err: &PncpError) -> Self {
        let kind = match err.status() {
            Some(404) => SearchErrorKind::NotFound,
            _ => SearchErrorKind::Upstream,
        };
        Self {
            stage,
            message: err.to_string(),
            kind,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> SearchErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}
