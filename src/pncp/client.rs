use crate::http::build_client;
use crate::models::NaturalKey;
use crate::pncp::config::PncpConfig;
use crate::pncp::raw::{RawPage, RawProcurement};
use crate::search::window::DateWindow;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PncpError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    Deserialize(String),
}

impl PncpError {
    pub fn status(&self) -> Option<u16> {
        match self {
            PncpError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// One page request against the publication-date search endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub window: DateWindow,
    pub code: u32,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Default)]
pub struct UpstreamPage {
    pub items: Vec<RawProcurement>,
    /// `paginasRestantes` when the envelope carries it.
    pub remaining_pages: Option<u32>,
}

/// Source of raw procurement records. The search pipeline only talks to
/// upstream through this trait.
#[async_trait]
pub trait ProcurementSource: Send + Sync {
    async fn fetch_page(&self, query: &PageQuery) -> Result<UpstreamPage, PncpError>;

    async fn fetch_detail(&self, key: &NaturalKey) -> Result<RawProcurement, PncpError>;
}

#[derive(Debug, Clone)]
pub struct PncpClient {
    http: Client,
    config: Arc<PncpConfig>,
}

impl PncpClient {
    pub fn new(config: Arc<PncpConfig>) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }
}

#[async_trait]
impl ProcurementSource for PncpClient {
    async fn fetch_page(&self, query: &PageQuery) -> Result<UpstreamPage, PncpError> {
        let url = format!("{}/v1/contratacoes/publicacao", self.config.api_url);
        let started = Instant::now();
        let response = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .query(&[
                ("dataInicial", query.window.upstream_from()),
                ("dataFinal", query.window.upstream_to()),
                ("codigoModalidadeContratacao", query.code.to_string()),
                ("pagina", query.page.to_string()),
                ("tamanhoPagina", query.page_size.to_string()),
            ])
            .send()
            .await
            .map_err(|err| PncpError::Request(err.to_string()))?;

        let status = response.status();
        crate::metrics::upstream_page(
            query.code,
            query.page,
            status.as_u16(),
            started.elapsed().as_millis(),
        );
        debug!(
            target = "licita.pncp",
            code = query.code,
            page = query.page,
            status = status.as_u16(),
            "search page fetched"
        );

        // Upstream answers an out-of-range page with 204 and no body.
        if status == StatusCode::NO_CONTENT {
            return Ok(UpstreamPage::default());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PncpError::Status {
                status: status.as_u16(),
                body: excerpt(&body),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| PncpError::Request(err.to_string()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(UpstreamPage::default());
        }
        let page: RawPage = serde_json::from_slice(&bytes)
            .map_err(|err| PncpError::Deserialize(err.to_string()))?;
        let (items, remaining_pages) = page.into_parts();
        Ok(UpstreamPage {
            items,
            remaining_pages,
        })
    }

    async fn fetch_detail(&self, key: &NaturalKey) -> Result<RawProcurement, PncpError> {
        let url = self
            .config
            .lookup_url(&key.tax_id, key.year, key.sequence_number);
        let response = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|err| PncpError::Request(err.to_string()))?;

        let status = response.status();
        debug!(
            target = "licita.pncp",
            tax_id = %key.tax_id,
            year = key.year,
            sequence_number = key.sequence_number,
            status = status.as_u16(),
            "detail fetched"
        );
        if !status.is_success() || status == StatusCode::NO_CONTENT {
            let body = response.text().await.unwrap_or_default();
            return Err(PncpError::Status {
                status: status.as_u16(),
                body: excerpt(&body),
            });
        }

        response
            .json::<RawProcurement>()
            .await
            .map_err(|err| PncpError::Deserialize(err.to_string()))
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(200).collect()
}
