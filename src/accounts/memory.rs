//! Process-local stores used when no Supabase project is configured.

use super::{
    ADMIN_ROLE, AccountError, Identity, IdentityProvider, NewSavedFilter, Profile, ProfileStore,
    RoleAssignment, RoleStore, SavedFilter, SavedFilterStore,
};
use async_trait::async_trait;
use chrono::Utc;
use std::{collections::HashMap, env, sync::Arc};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

const DEMO_USER_ID: Uuid = Uuid::from_u128(1);
const DEMO_TOKEN: &str = "demo-token";

/// Bearer tokens mapped to fixed identities, from `DEMO_USER_TOKENS`
/// (`<user-uuid>:<token>[,...]`).
#[derive(Debug, Clone)]
pub struct StaticIdentities {
    tokens: Arc<HashMap<String, Identity>>,
}

impl StaticIdentities {
    pub fn from_env() -> Self {
        let raw = env::var("DEMO_USER_TOKENS").unwrap_or_default();
        let mut tokens = HashMap::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let mut parts = entry.splitn(2, ':');
            let user = parts.next().and_then(|id| Uuid::parse_str(id.trim()).ok());
            let token = parts.next().map(str::trim).filter(|t| !t.is_empty());
            match (user, token) {
                (Some(user_id), Some(token)) => {
                    tokens.insert(
                        token.to_string(),
                        Identity {
                            user_id,
                            email: None,
                        },
                    );
                }
                _ => warn!(
                    target = "licita.api",
                    "ignored malformed DEMO_USER_TOKENS entry: {entry}"
                ),
            }
        }

        if tokens.is_empty() {
            warn!(
                target = "licita.api",
                "no DEMO_USER_TOKENS configured; accepting the demo token"
            );
            tokens.insert(
                DEMO_TOKEN.to_string(),
                Identity {
                    user_id: DEMO_USER_ID,
                    email: Some("demo@licita.local".to_string()),
                },
            );
        } else {
            info!(
                target = "licita.api",
                token_count = tokens.len(),
                "loaded demo user tokens from env"
            );
        }
        Self {
            tokens: Arc::new(tokens),
        }
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, Identity)>) -> Self {
        Self {
            tokens: Arc::new(pairs.into_iter().collect()),
        }
    }

    fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.tokens.values()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentities {
    async fn resolve(&self, token: &str) -> Result<Option<Identity>, AccountError> {
        Ok(self.tokens.get(token).cloned())
    }
}

#[derive(Default)]
pub struct MemoryRoles {
    assignments: Mutex<Vec<RoleAssignment>>,
}

impl MemoryRoles {
    fn has_admin(assignments: &[RoleAssignment], user_id: Option<Uuid>) -> bool {
        assignments.iter().any(|a| {
            a.role == ADMIN_ROLE && user_id.is_none_or(|user_id| a.user_id == user_id)
        })
    }
}

#[async_trait]
impl RoleStore for MemoryRoles {
    async fn is_admin(&self, user_id: Uuid) -> Result<bool, AccountError> {
        let guard = self.assignments.lock().await;
        Ok(Self::has_admin(&guard, Some(user_id)))
    }

    async fn grant_admin(&self, user_id: Uuid) -> Result<(), AccountError> {
        let mut guard = self.assignments.lock().await;
        if Self::has_admin(&guard, Some(user_id)) {
            return Err(AccountError::AlreadyAdmin);
        }
        guard.push(RoleAssignment {
            user_id,
            role: ADMIN_ROLE.to_string(),
        });
        Ok(())
    }

    async fn claim_first_admin(&self, user_id: Uuid) -> Result<bool, AccountError> {
        // Check and insert under one lock so concurrent claims cannot both win.
        let mut guard = self.assignments.lock().await;
        if Self::has_admin(&guard, None) {
            return Ok(false);
        }
        guard.push(RoleAssignment {
            user_id,
            role: ADMIN_ROLE.to_string(),
        });
        Ok(true)
    }

    async fn list_roles(&self) -> Result<Vec<RoleAssignment>, AccountError> {
        Ok(self.assignments.lock().await.clone())
    }
}

#[derive(Default)]
pub struct MemoryFilters {
    filters: Mutex<Vec<(Uuid, SavedFilter)>>,
}

#[async_trait]
impl SavedFilterStore for MemoryFilters {
    async fn list(&self, user_id: Uuid) -> Result<Vec<SavedFilter>, AccountError> {
        let guard = self.filters.lock().await;
        let mut owned: Vec<SavedFilter> = guard
            .iter()
            .filter(|(owner, _)| *owner == user_id)
            .map(|(_, filter)| filter.clone())
            .collect();
        owned.reverse();
        Ok(owned)
    }

    async fn create(
        &self,
        user_id: Uuid,
        filter: NewSavedFilter,
    ) -> Result<SavedFilter, AccountError> {
        let filter = filter.validated()?;
        let saved = SavedFilter {
            id: Uuid::new_v4(),
            name: filter.name,
            criteria: filter.criteria,
            created_at: Utc::now(),
        };
        self.filters.lock().await.push((user_id, saved.clone()));
        Ok(saved)
    }

    async fn delete(&self, user_id: Uuid, filter_id: Uuid) -> Result<(), AccountError> {
        let mut guard = self.filters.lock().await;
        let before = guard.len();
        guard.retain(|(owner, filter)| !(*owner == user_id && filter.id == filter_id));
        if guard.len() == before {
            return Err(AccountError::NotFound);
        }
        Ok(())
    }
}

pub struct MemoryProfiles {
    profiles: Vec<Profile>,
}

impl MemoryProfiles {
    pub fn from_identities(identities: &StaticIdentities) -> Self {
        let mut profiles: Vec<Profile> = identities
            .identities()
            .map(|identity| Profile {
                id: identity.user_id,
                email: identity.email.clone(),
                full_name: None,
                created_at: None,
            })
            .collect();
        profiles.sort_by_key(|profile| profile.id);
        profiles.dedup_by_key(|profile| profile.id);
        Self { profiles }
    }
}

#[async_trait]
impl ProfileStore for MemoryProfiles {
    async fn list_profiles(&self) -> Result<Vec<Profile>, AccountError> {
        Ok(self.profiles.clone())
    }
}
