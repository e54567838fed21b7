//! Upstream record shapes. Every field is optional and decoded with
//! `DefaultOnError`, so a missing, renamed or mistyped field degrades to
//! `None` instead of failing the page.

use serde::Deserialize;
use serde_json::Value;
use serde_with::{DefaultOnError, DisplayFromStr, PickFirst, serde_as};

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawProcurement {
    #[serde(rename = "numeroControlePNCP")]
    #[serde_as(as = "DefaultOnError")]
    pub numero_controle_pncp: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    pub numero_compra: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    pub objeto_compra: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    pub informacao_complementar: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    pub orgao_entidade: Option<RawOrgao>,
    #[serde_as(as = "DefaultOnError")]
    pub nome_orgao: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    pub unidade_orgao: Option<RawUnidade>,
    #[serde_as(as = "DefaultOnError")]
    pub modalidade_nome: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    pub modalidade_compra: Option<String>,
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    pub valor_total_estimado: Option<f64>,
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    pub valor_estimado_total: Option<f64>,
    #[serde_as(as = "DefaultOnError")]
    pub data_abertura_proposta: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    pub data_abertura_propostas: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    pub data_inicio_propostas: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    pub data_publicacao_pncp: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    pub situacao_compra_nome: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    pub situacao_compra: Option<String>,
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    pub ano_compra: Option<i32>,
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    pub sequencial_compra: Option<i64>,
    #[serde_as(as = "DefaultOnError")]
    pub link_sistema_origem: Option<String>,
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawOrgao {
    #[serde_as(as = "DefaultOnError")]
    pub cnpj: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    pub razao_social: Option<String>,
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawUnidade {
    #[serde_as(as = "DefaultOnError")]
    pub uf_sigla: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    pub municipio_nome: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    pub nome_unidade: Option<String>,
}

/// A search page as upstream sends it: usually the paged envelope, but a bare
/// array is accepted as well.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawPage {
    Bare(Vec<Value>),
    Paged(RawEnvelope),
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawEnvelope {
    #[serde_as(as = "DefaultOnError")]
    pub data: Vec<Value>,
    #[serde_as(as = "DefaultOnError")]
    pub paginas_restantes: Option<u32>,
}

impl RawPage {
    /// Splits the page into decodable records and the upstream's count of
    /// remaining pages, when it reports one.
    pub fn into_parts(self) -> (Vec<RawProcurement>, Option<u32>) {
        let (items, remaining) = match self {
            RawPage::Bare(items) => (items, None),
            RawPage::Paged(envelope) => (envelope.data, envelope.paginas_restantes),
        };
        let records = items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<RawProcurement>(item).ok())
            .collect();
        (records, remaining)
    }
}
