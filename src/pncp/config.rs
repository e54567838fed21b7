use crate::config::{env_parse, env_string};

pub const DEFAULT_API_URL: &str = "https://pncp.gov.br/api/consulta";
pub const DEFAULT_PORTAL_URL: &str = "https://pncp.gov.br/app/editais";

// Upstream rejects page sizes outside this range.
const MIN_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone)]
pub struct PncpConfig {
    pub api_url: String,
    pub portal_url: String,
    pub page_size: u32,
    pub max_pages: u32,
    pub window_days: i64,
}

impl Default for PncpConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            portal_url: DEFAULT_PORTAL_URL.to_string(),
            page_size: MAX_PAGE_SIZE,
            max_pages: 5,
            window_days: 30,
        }
    }
}

impl PncpConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_url: env_string("PNCP_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_url),
            portal_url: env_string("PNCP_PORTAL_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.portal_url),
            page_size: env_parse::<u32>("PNCP_PAGE_SIZE")
                .map(|size| size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE))
                .unwrap_or(defaults.page_size),
            max_pages: env_parse::<u32>("PNCP_MAX_PAGES")
                .filter(|pages| *pages > 0)
                .unwrap_or(defaults.max_pages),
            window_days: env_parse::<i64>("PNCP_WINDOW_DAYS")
                .filter(|days| *days > 0)
                .unwrap_or(defaults.window_days),
        }
    }

    pub fn detail_url(&self, tax_id: &str, year: i32, sequence_number: i64) -> String {
        format!("{}/{tax_id}/{year}/{sequence_number}", self.portal_url)
    }

    pub fn lookup_url(&self, tax_id: &str, year: i32, sequence_number: i64) -> String {
        format!(
            "{}/v1/orgaos/{tax_id}/compras/{year}/{sequence_number}",
            self.api_url
        )
    }
}
