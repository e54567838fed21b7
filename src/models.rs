use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize, Serializer, ser::SerializeStruct};
use serde_with::{DisplayFromStr, PickFirst, serde_as, skip_serializing_none};
use std::fmt;
use uuid::Uuid;

/// Client-supplied search filters. Every field is optional; blank strings and
/// non-positive value bounds are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCriteria {
    #[serde(default, alias = "searchTerm")]
    pub keyword: Option<String>,
    #[serde(default, alias = "modalidade")]
    pub category: Option<String>,
    #[serde(default, alias = "estado")]
    pub locality: Option<String>,
    #[serde(default, alias = "valorMin")]
    pub value_min: Option<f64>,
    #[serde(default, alias = "valorMax")]
    pub value_max: Option<f64>,
    #[serde(default, alias = "dataInicial")]
    pub date_from: Option<NaiveDate>,
    #[serde(default, alias = "dataFinal")]
    pub date_to: Option<NaiveDate>,
    /// Drop repeated records sharing a natural key. Off by default, which
    /// keeps upstream overlap visible in the output.
    #[serde(default)]
    pub dedupe: bool,
}

impl SearchCriteria {
    pub fn active_keyword(&self) -> Option<&str> {
        non_blank(self.keyword.as_deref())
    }

    pub fn active_category(&self) -> Option<&str> {
        non_blank(self.category.as_deref())
    }

    pub fn active_locality(&self) -> Option<&str> {
        non_blank(self.locality.as_deref())
    }

    pub fn active_value_min(&self) -> Option<f64> {
        positive(self.value_min)
    }

    pub fn active_value_max(&self) -> Option<f64> {
        positive(self.value_max)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|value| value.is_finite() && *value > 0.0)
}

/// Identifier of a normalized record.
///
/// `Upstream` carries the PNCP control number. `Synthetic` is minted per
/// request when upstream omits it and must never be stored or compared
/// across requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordId {
    Upstream(String),
    Synthetic(Uuid),
}

impl RecordId {
    pub fn synthetic() -> Self {
        Self::Synthetic(Uuid::new_v4())
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, Self::Synthetic(_))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upstream(value) => f.write_str(value),
            Self::Synthetic(value) => write!(f, "synthetic:{value}"),
        }
    }
}

// Flattened into the record as `id` + `idSynthetic`.
impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("RecordId", 2)?;
        state.serialize_field("id", &self.to_string())?;
        state.serialize_field("idSynthetic", &self.is_synthetic())?;
        state.end()
    }
}

/// The (taxId, year, sequenceNumber) triple identifying a procurement upstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NaturalKey {
    pub tax_id: String,
    pub year: i32,
    pub sequence_number: i64,
}

impl NaturalKey {
    /// Validates a client-supplied key. The tax id may carry the usual CNPJ
    /// punctuation; it must reduce to exactly 14 digits.
    pub fn parse(tax_id: &str, year: i32, sequence_number: i64) -> Result<Self, String> {
        let digits: String = tax_id.chars().filter(char::is_ascii_digit).collect();
        let stray = tax_id
            .chars()
            .any(|c| !(c.is_ascii_digit() || matches!(c, '.' | '/' | '-' | ' ')));
        if stray || digits.len() != 14 {
            return Err(format!("taxId must contain 14 digits, got `{tax_id}`"));
        }
        if year <= 0 {
            return Err(format!("year must be positive, got {year}"));
        }
        if sequence_number <= 0 {
            return Err(format!(
                "sequenceNumber must be positive, got {sequence_number}"
            ));
        }
        Ok(Self {
            tax_id: digits,
            year,
            sequence_number,
        })
    }
}

/// A procurement notice normalized from one upstream record.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcurementRecord {
    #[serde(flatten)]
    pub id: RecordId,
    pub title: String,
    pub organization: String,
    pub category_label: String,
    pub estimated_value: f64,
    pub opening_date: DateTime<Utc>,
    pub status: String,
    pub description: String,
    pub detail_url: Option<String>,
    pub lookup_url: Option<String>,
    pub tax_id: Option<String>,
    pub year: Option<i32>,
    pub sequence_number: Option<i64>,
    pub state: Option<String>,
    pub municipality: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub procurement_number: Option<String>,
    pub source_system_url: Option<String>,
    pub complementary_info: Option<String>,
}

impl ProcurementRecord {
    pub fn natural_key(&self) -> Option<NaturalKey> {
        match (&self.tax_id, self.year, self.sequence_number) {
            (Some(tax_id), Some(year), Some(sequence_number)) => Some(NaturalKey {
                tax_id: tax_id.clone(),
                year,
                sequence_number,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<ProcurementRecord>,
    pub sources: Vec<SourceReport>,
    pub partial: bool,
}

/// Per-category fetch summary returned alongside the results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReport {
    pub code: u32,
    pub label: String,
    pub pages_fetched: u32,
    pub records: usize,
    pub elapsed_ms: u128,
    #[serde(flatten)]
    pub outcome: SourceOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SourceOutcome {
    /// Upstream ran out of pages for this category.
    Exhausted,
    /// Stopped at the configured page cap with data possibly remaining.
    PageCap,
    Failed { error: String },
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailRequest {
    #[serde(alias = "cnpj")]
    pub tax_id: String,
    #[serde(alias = "ano")]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub year: i32,
    #[serde(alias = "sequencial")]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub sequence_number: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetailResponse {
    pub detail: ProcurementRecord,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn criteria_accepts_dashboard_field_names() {
        let criteria: SearchCriteria = serde_json::from_value(json!({
            "searchTerm": "hospitalar",
            "modalidade": "pregao",
            "valorMin": 100000,
            "dataInicial": "2024-03-01",
        }))
        .expect("criteria");
        assert_eq!(criteria.active_keyword(), Some("hospitalar"));
        assert_eq!(criteria.active_category(), Some("pregao"));
        assert_eq!(criteria.active_value_min(), Some(100000.0));
        assert_eq!(
            criteria.date_from,
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
    }

    #[test]
    fn blank_and_non_positive_filters_are_inactive() {
        let criteria = SearchCriteria {
            keyword: Some("   ".into()),
            locality: Some(String::new()),
            value_min: Some(0.0),
            value_max: Some(-5.0),
            ..SearchCriteria::default()
        };
        assert_eq!(criteria.active_keyword(), None);
        assert_eq!(criteria.active_locality(), None);
        assert_eq!(criteria.active_value_min(), None);
        assert_eq!(criteria.active_value_max(), None);
    }

    #[test]
    fn synthetic_ids_are_marked_on_the_wire() {
        let value = serde_json::to_value(RecordId::synthetic()).expect("serialize");
        assert_eq!(value["idSynthetic"], json!(true));
        assert!(value["id"].as_str().unwrap().starts_with("synthetic:"));

        let value = serde_json::to_value(RecordId::Upstream("123-1-000007/2024".into()))
            .expect("serialize");
        assert_eq!(value, json!({"id": "123-1-000007/2024", "idSynthetic": false}));
    }

    #[test]
    fn natural_key_strips_cnpj_punctuation() {
        let key = NaturalKey::parse("12.345.678/0001-99", 2024, 7).expect("key");
        assert_eq!(key.tax_id, "12345678000199");
        assert!(NaturalKey::parse("1234", 2024, 7).is_err());
        assert!(NaturalKey::parse("12345678000199", 0, 7).is_err());
        assert!(NaturalKey::parse("12345678000199", 2024, -1).is_err());
        assert!(NaturalKey::parse("1234567800019x9", 2024, 1).is_err());
    }

    #[test]
    fn detail_request_accepts_upstream_aliases_and_strings() {
        let request: DetailRequest = serde_json::from_value(json!({
            "cnpj": "12345678000199",
            "ano": "2024",
            "sequencial": 7,
        }))
        .expect("detail request");
        assert_eq!(request.year, 2024);
        assert_eq!(request.sequence_number, 7);
    }

    #[test]
    fn source_report_flattens_outcome() {
        let report = SourceReport {
            code: 6,
            label: "Pregão - Eletrônico".into(),
            pages_fetched: 1,
            records: 0,
            elapsed_ms: 3,
            outcome: SourceOutcome::Failed {
                error: "upstream returned HTTP 500".into(),
            },
        };
        let value = serde_json::to_value(report).expect("serialize");
        assert_eq!(value["outcome"], json!("failed"));
        assert_eq!(value["pagesFetched"], json!(1));
        assert_eq!(value["error"], json!("upstream returned HTTP 500"));
    }
}
