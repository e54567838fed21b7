//! Identity, roles, profiles and saved filters. The service never owns this
//! data; it reaches it through the traits below, backed by Supabase when
//! configured and by in-memory stores otherwise.

pub mod admin;
pub mod memory;

use crate::models::SearchCriteria;
use crate::supabase::SupabaseClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: Option<String>,
}

pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub user_id: Uuid,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A named snapshot of search criteria. Created and deleted, never edited.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedFilter {
    pub id: Uuid,
    pub name: String,
    pub criteria: SearchCriteria,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSavedFilter {
    pub name: String,
    #[serde(default)]
    pub criteria: SearchCriteria,
}

impl NewSavedFilter {
    pub fn validated(self) -> Result<Self, AccountError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(AccountError::InvalidInput("filter name is required".into()));
        }
        Ok(Self { name, ..self })
    }
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("user is already an administrator")]
    AlreadyAdmin,
    #[error("not found")]
    NotFound,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolves a bearer token; `Ok(None)` for unknown or expired tokens.
    async fn resolve(&self, token: &str) -> Result<Option<Identity>, AccountError>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn is_admin(&self, user_id: Uuid) -> Result<bool, AccountError>;

    /// Fails with `AlreadyAdmin` when the grant exists.
    async fn grant_admin(&self, user_id: Uuid) -> Result<(), AccountError>;

    /// Makes `user_id` an admin only if no admin exists yet. Must be atomic
    /// in the backing store; returns whether the claim succeeded.
    async fn claim_first_admin(&self, user_id: Uuid) -> Result<bool, AccountError>;

    async fn list_roles(&self) -> Result<Vec<RoleAssignment>, AccountError>;
}

#[async_trait]
pub trait SavedFilterStore: Send + Sync {
    /// Newest first.
    async fn list(&self, user_id: Uuid) -> Result<Vec<SavedFilter>, AccountError>;

    async fn create(&self, user_id: Uuid, filter: NewSavedFilter)
    -> Result<SavedFilter, AccountError>;

    /// Deletes one of the user's own filters; `NotFound` otherwise.
    async fn delete(&self, user_id: Uuid, filter_id: Uuid) -> Result<(), AccountError>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Newest first.
    async fn list_profiles(&self) -> Result<Vec<Profile>, AccountError>;
}

#[derive(Clone)]
pub struct Backends {
    pub identities: Arc<dyn IdentityProvider>,
    pub roles: Arc<dyn RoleStore>,
    pub filters: Arc<dyn SavedFilterStore>,
    pub profiles: Arc<dyn ProfileStore>,
}

impl Backends {
    pub fn from_env() -> Self {
        if let Some(client) = SupabaseClient::from_env() {
            info!(target = "licita.api", "using supabase account backends");
            let client = Arc::new(client);
            return Self {
                identities: client.clone(),
                roles: client.clone(),
                filters: client.clone(),
                profiles: client,
            };
        }
        Self::in_memory(memory::StaticIdentities::from_env())
    }

    pub fn in_memory(identities: memory::StaticIdentities) -> Self {
        let profiles = Arc::new(memory::MemoryProfiles::from_identities(&identities));
        Self {
            identities: Arc::new(identities),
            roles: Arc::new(memory::MemoryRoles::default()),
            filters: Arc::new(memory::MemoryFilters::default()),
            profiles,
        }
    }
}
