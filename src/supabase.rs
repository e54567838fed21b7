use crate::accounts::{
    ADMIN_ROLE, AccountError, Identity, IdentityProvider, NewSavedFilter, Profile, ProfileStore,
    RoleAssignment, RoleStore, SavedFilter, SavedFilterStore,
};
use crate::config::env_string;
use crate::http::build_client;
use crate::models::SearchCriteria;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use thiserror::Error;
use tracing::warn;
use urlencoding::encode;
use uuid::Uuid;

/// PostgREST + GoTrue client authenticated with the service-role key.
#[derive(Debug, Clone)]
pub struct SupabaseClient {
    base_url: String,
    service_key: String,
    http: Client,
}

#[derive(Debug, Error)]
pub enum SupabaseError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    Deserialize(String),
}

impl From<SupabaseError> for AccountError {
    fn from(value: SupabaseError) -> Self {
        AccountError::Backend(value.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
}

/// Row layout of `public.saved_filters`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SavedFilterRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Uuid>,
    user_id: Uuid,
    name: String,
    search_term: Option<String>,
    modalidade: Option<String>,
    estado: Option<String>,
    valor_min: Option<f64>,
    valor_max: Option<f64>,
    data_inicial: Option<NaiveDate>,
    data_final: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
}

impl SavedFilterRow {
    fn new(user_id: Uuid, filter: NewSavedFilter) -> Self {
        let criteria = filter.criteria;
        Self {
            id: None,
            user_id,
            name: filter.name,
            search_term: criteria.active_keyword().map(str::to_string),
            modalidade: criteria.active_category().map(str::to_string),
            estado: criteria.active_locality().map(str::to_string),
            valor_min: criteria.active_value_min(),
            valor_max: criteria.active_value_max(),
            data_inicial: criteria.date_from,
            data_final: criteria.date_to,
            created_at: None,
        }
    }

    fn into_saved(self) -> Result<SavedFilter, SupabaseError> {
        let id = self
            .id
            .ok_or_else(|| SupabaseError::Deserialize("saved filter row without id".into()))?;
        Ok(SavedFilter {
            id,
            name: self.name,
            criteria: SearchCriteria {
                keyword: self.search_term,
                category: self.modalidade,
                locality: self.estado,
                value_min: self.valor_min,
                value_max: self.valor_max,
                date_from: self.data_inicial,
                date_to: self.data_final,
                dedupe: false,
            },
            created_at: self.created_at.unwrap_or_else(Utc::now),
        })
    }
}

impl SupabaseClient {
    pub fn from_env() -> Option<Self> {
        let base_url = env_string("SUPABASE_URL")?;
        let service_key = env_string("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|| env_string("SUPABASE_SERVICE_KEY"))
            .or_else(|| env_string("SUPABASE_KEY"))?;
        Some(Self::new(base_url, service_key))
    }

    pub fn new(base_url: String, service_key: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            http: build_client(),
        }
    }

    fn rest(&self, method: Method, path_and_query: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/rest/v1/{path_and_query}", self.base_url))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, SupabaseError> {
        let response = request
            .send()
            .await
            .map_err(|err| SupabaseError::Request(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SupabaseError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|err| SupabaseError::Deserialize(err.to_string()))
    }
}

#[async_trait]
impl IdentityProvider for SupabaseClient {
    async fn resolve(&self, token: &str) -> Result<Option<Identity>, AccountError> {
        let response = self
            .http
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.service_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| SupabaseError::Request(err.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(None),
            status if !status.is_success() => {
                warn!(
                    target = "licita.supabase",
                    status = status.as_u16(),
                    "identity lookup failed"
                );
                Err(SupabaseError::Status {
                    status: status.as_u16(),
                    body: String::new(),
                }
                .into())
            }
            _ => {
                let user: AuthUser = response
                    .json()
                    .await
                    .map_err(|err| SupabaseError::Deserialize(err.to_string()))?;
                Ok(Some(Identity {
                    user_id: user.id,
                    email: user.email,
                }))
            }
        }
    }
}

#[async_trait]
impl RoleStore for SupabaseClient {
    async fn is_admin(&self, user_id: Uuid) -> Result<bool, AccountError> {
        let path = format!(
            "user_roles?user_id=eq.{user_id}&role=eq.{}&select=user_id,role&limit=1",
            encode(ADMIN_ROLE)
        );
        let rows: Vec<RoleAssignment> = self.send(self.rest(Method::GET, &path)).await?;
        Ok(!rows.is_empty())
    }

    async fn grant_admin(&self, user_id: Uuid) -> Result<(), AccountError> {
        let request = self
            .rest(Method::POST, "user_roles")
            .header("Prefer", "return=representation")
            .json(&json!({ "user_id": user_id, "role": ADMIN_ROLE }));
        match self.send::<Vec<RoleAssignment>>(request).await {
            Ok(_) => Ok(()),
            // Unique (user_id, role) violation.
            Err(SupabaseError::Status { status: 409, .. }) => Err(AccountError::AlreadyAdmin),
            Err(SupabaseError::Status { body, .. }) if body.contains("23505") => {
                Err(AccountError::AlreadyAdmin)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn claim_first_admin(&self, user_id: Uuid) -> Result<bool, AccountError> {
        // See migrations/0001_claim_first_admin.sql for the transactional guard.
        let request = self
            .rest(Method::POST, "rpc/claim_first_admin")
            .json(&json!({ "p_user_id": user_id }));
        Ok(self.send::<bool>(request).await?)
    }

    async fn list_roles(&self) -> Result<Vec<RoleAssignment>, AccountError> {
        Ok(self
            .send(self.rest(Method::GET, "user_roles?select=user_id,role"))
            .await?)
    }
}

#[async_trait]
impl SavedFilterStore for SupabaseClient {
    async fn list(&self, user_id: Uuid) -> Result<Vec<SavedFilter>, AccountError> {
        let path = format!("saved_filters?user_id=eq.{user_id}&select=*&order=created_at.desc");
        let rows: Vec<SavedFilterRow> = self.send(self.rest(Method::GET, &path)).await?;
        Ok(rows
            .into_iter()
            .map(SavedFilterRow::into_saved)
            .collect::<Result<_, _>>()?)
    }

    async fn create(
        &self,
        user_id: Uuid,
        filter: NewSavedFilter,
    ) -> Result<SavedFilter, AccountError> {
        let row = SavedFilterRow::new(user_id, filter.validated()?);
        let request = self
            .rest(Method::POST, "saved_filters")
            .header("Prefer", "return=representation")
            .json(&row);
        let mut rows: Vec<SavedFilterRow> = self.send(request).await?;
        let row = rows
            .pop()
            .ok_or_else(|| SupabaseError::Deserialize("insert returned no rows".into()))?;
        Ok(row.into_saved()?)
    }

    async fn delete(&self, user_id: Uuid, filter_id: Uuid) -> Result<(), AccountError> {
        let path = format!("saved_filters?id=eq.{filter_id}&user_id=eq.{user_id}");
        let request = self
            .rest(Method::DELETE, &path)
            .header("Prefer", "return=representation");
        let rows: Vec<SavedFilterRow> = self.send(request).await?;
        if rows.is_empty() {
            return Err(AccountError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for SupabaseClient {
    async fn list_profiles(&self) -> Result<Vec<Profile>, AccountError> {
        Ok(self
            .send(self.rest(
                Method::GET,
                "profiles?select=id,email,full_name,created_at&order=created_at.desc",
            ))
            .await?)
    }
}
