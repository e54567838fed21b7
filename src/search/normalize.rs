use crate::models::{ProcurementRecord, RecordId};
use crate::pncp::{PncpConfig, RawProcurement};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};

pub const TITLE_MAX_CHARS: usize = 150;

const UNTITLED: &str = "Sem título";
const UNKNOWN_ORGANIZATION: &str = "Órgão não informado";
const UNKNOWN_CATEGORY: &str = "Não especificada";
const DEFAULT_STATUS: &str = "EM ANDAMENTO";
const NO_DESCRIPTION: &str = "Descrição não disponível";

/// Maps one upstream record onto a `ProcurementRecord`. Never fails: every
/// field has a default. `now` stands in for a missing opening date.
pub fn normalize(raw: RawProcurement, links: &PncpConfig, now: DateTime<Utc>) -> ProcurementRecord {
    let id = present(raw.numero_controle_pncp)
        .map(RecordId::Upstream)
        .unwrap_or_else(RecordId::synthetic);

    let object = present(raw.objeto_compra);
    let title = truncate_chars(object.as_deref().unwrap_or(UNTITLED), TITLE_MAX_CHARS);
    let description = object.unwrap_or_else(|| NO_DESCRIPTION.to_string());

    let (tax_id, legal_name) = match raw.orgao_entidade {
        Some(orgao) => (present(orgao.cnpj), present(orgao.razao_social)),
        None => (None, None),
    };
    let (state, municipality, unit_name) = match raw.unidade_orgao {
        Some(unit) => (
            present(unit.uf_sigla),
            present(unit.municipio_nome),
            present(unit.nome_unidade),
        ),
        None => (None, None, None),
    };
    let organization = legal_name
        .or_else(|| present(raw.nome_orgao))
        .or(unit_name)
        .unwrap_or_else(|| UNKNOWN_ORGANIZATION.to_string());

    let category_label = present(raw.modalidade_nome)
        .or_else(|| present(raw.modalidade_compra))
        .unwrap_or_else(|| UNKNOWN_CATEGORY.to_string());

    let estimated_value = raw
        .valor_total_estimado
        .or(raw.valor_estimado_total)
        .filter(|value| value.is_finite())
        .unwrap_or(0.0);

    let opening_date = [
        raw.data_abertura_proposta.as_deref(),
        raw.data_abertura_propostas.as_deref(),
        raw.data_inicio_propostas.as_deref(),
    ]
    .into_iter()
    .flatten()
    .find_map(parse_upstream_timestamp)
    .unwrap_or(now);

    let status = present(raw.situacao_compra_nome)
        .or_else(|| present(raw.situacao_compra))
        .unwrap_or_else(|| DEFAULT_STATUS.to_string());

    let year = raw.ano_compra;
    let sequence_number = raw.sequencial_compra;
    let (detail_url, lookup_url) = match (&tax_id, year, sequence_number) {
        (Some(tax_id), Some(year), Some(sequence)) => (
            Some(links.detail_url(tax_id, year, sequence)),
            Some(links.lookup_url(tax_id, year, sequence)),
        ),
        _ => (None, None),
    };

    ProcurementRecord {
        id,
        title,
        organization,
        category_label,
        estimated_value,
        opening_date,
        status,
        description,
        detail_url,
        lookup_url,
        tax_id,
        year,
        sequence_number,
        state,
        municipality,
        published_at: raw
            .data_publicacao_pncp
            .as_deref()
            .and_then(parse_upstream_timestamp),
        procurement_number: present(raw.numero_compra),
        source_system_url: present(raw.link_sistema_origem),
        complementary_info: present(raw.informacao_complementar),
    }
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn truncate_chars(value: &str, limit: usize) -> String {
    value.chars().take(limit).collect()
}

/// Upstream timestamps usually lack an offset; they are Brasília local time.
pub fn brasilia() -> FixedOffset {
    FixedOffset::west_opt(3 * 3600).expect("UTC-03:00 is a valid offset")
}

pub fn parse_upstream_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })?;
    naive
        .and_local_timezone(brasilia())
        .single()
        .map(|local| local.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pncp::raw::{RawOrgao, RawUnidade};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn full_raw() -> RawProcurement {
        RawProcurement {
            numero_controle_pncp: Some("12345678000199-1-000007/2024".into()),
            objeto_compra: Some("Aquisição de material de limpeza".into()),
            orgao_entidade: Some(RawOrgao {
                cnpj: Some("12345678000199".into()),
                razao_social: Some("MUNICIPIO DE OLINDA".into()),
            }),
            unidade_orgao: Some(RawUnidade {
                uf_sigla: Some("PE".into()),
                municipio_nome: Some("Olinda".into()),
                nome_unidade: None,
            }),
            modalidade_nome: Some("Pregão - Eletrônico".into()),
            valor_total_estimado: Some(98_500.0),
            data_abertura_proposta: Some("2024-05-10T08:00:00".into()),
            situacao_compra_nome: Some("Divulgada no PNCP".into()),
            ano_compra: Some(2024),
            sequencial_compra: Some(7),
            ..RawProcurement::default()
        }
    }

    #[test]
    fn maps_complete_record_and_builds_links() {
        let record = normalize(full_raw(), &PncpConfig::default(), now());
        assert_eq!(
            record.id,
            RecordId::Upstream("12345678000199-1-000007/2024".into())
        );
        assert_eq!(record.organization, "MUNICIPIO DE OLINDA");
        assert_eq!(record.estimated_value, 98_500.0);
        assert_eq!(record.state.as_deref(), Some("PE"));
        assert_eq!(
            record.opening_date,
            Utc.with_ymd_and_hms(2024, 5, 10, 11, 0, 0).unwrap()
        );
        assert_eq!(
            record.detail_url.as_deref(),
            Some("https://pncp.gov.br/app/editais/12345678000199/2024/7")
        );
        assert_eq!(
            record.lookup_url.as_deref(),
            Some("https://pncp.gov.br/api/consulta/v1/orgaos/12345678000199/compras/2024/7")
        );
    }

    #[test]
    fn empty_record_gets_every_default() {
        let record = normalize(RawProcurement::default(), &PncpConfig::default(), now());
        assert!(record.id.is_synthetic());
        assert_eq!(record.title, UNTITLED);
        assert_eq!(record.organization, UNKNOWN_ORGANIZATION);
        assert_eq!(record.category_label, UNKNOWN_CATEGORY);
        assert_eq!(record.estimated_value, 0.0);
        assert_eq!(record.opening_date, now());
        assert_eq!(record.status, DEFAULT_STATUS);
        assert_eq!(record.description, NO_DESCRIPTION);
        assert_eq!(record.detail_url, None);
        assert_eq!(record.lookup_url, None);
    }

    #[test]
    fn missing_total_estimate_falls_back_then_zero() {
        let raw = RawProcurement {
            valor_total_estimado: None,
            valor_estimado_total: Some(10.5),
            ..full_raw()
        };
        assert_eq!(normalize(raw, &PncpConfig::default(), now()).estimated_value, 10.5);

        let raw = RawProcurement {
            valor_total_estimado: None,
            ..full_raw()
        };
        assert_eq!(normalize(raw, &PncpConfig::default(), now()).estimated_value, 0.0);
    }

    #[test]
    fn organization_falls_back_to_agency_then_unit_name() {
        let unit = |name: &str| RawUnidade {
            uf_sigla: Some("PE".into()),
            municipio_nome: Some("Olinda".into()),
            nome_unidade: Some(name.into()),
        };
        let raw = RawProcurement {
            orgao_entidade: None,
            nome_orgao: Some("SECRETARIA DE SAUDE".into()),
            unidade_orgao: Some(unit("HOSPITAL TRICENTENARIO")),
            ..full_raw()
        };
        assert_eq!(
            normalize(raw, &PncpConfig::default(), now()).organization,
            "SECRETARIA DE SAUDE"
        );

        let raw = RawProcurement {
            orgao_entidade: None,
            nome_orgao: Some("  ".into()),
            unidade_orgao: Some(unit("HOSPITAL TRICENTENARIO")),
            ..full_raw()
        };
        assert_eq!(
            normalize(raw, &PncpConfig::default(), now()).organization,
            "HOSPITAL TRICENTENARIO"
        );
    }

    #[test]
    fn long_titles_are_cut_to_150_characters() {
        let object = "ç".repeat(400);
        let raw = RawProcurement {
            objeto_compra: Some(object.clone()),
            ..full_raw()
        };
        let record = normalize(raw, &PncpConfig::default(), now());
        assert_eq!(record.title.chars().count(), TITLE_MAX_CHARS);
        assert_eq!(record.description, object);
    }

    #[test]
    fn partial_natural_key_produces_no_links() {
        let raw = RawProcurement {
            sequencial_compra: None,
            ..full_raw()
        };
        let record = normalize(raw, &PncpConfig::default(), now());
        assert_eq!(record.detail_url, None);
        assert!(record.natural_key().is_none());
    }

    #[test]
    fn timestamps_with_offsets_and_dates_parse() {
        assert_eq!(
            parse_upstream_timestamp("2024-05-10T08:00:00Z"),
            Some(Utc.with_ymd_and_hms(2024, 5, 10, 8, 0, 0).unwrap())
        );
        assert_eq!(
            parse_upstream_timestamp("2024-05-10"),
            Some(Utc.with_ymd_and_hms(2024, 5, 10, 3, 0, 0).unwrap())
        );
        assert_eq!(parse_upstream_timestamp("ontem"), None);
    }
}
