use super::{ADMIN_ROLE, AccountError, Identity, ProfileStore, RoleStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct AdminService {
    roles: Arc<dyn RoleStore>,
    profiles: Arc<dyn ProfileStore>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromoteOutcome {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Apenas administradores podem executar esta ação.")]
    Forbidden,
    #[error("Target user ID is required")]
    MissingTarget,
    #[error("Este usuário já é um administrador")]
    AlreadyAdmin,
    #[error(transparent)]
    Store(AccountError),
}

impl From<AccountError> for AdminError {
    fn from(value: AccountError) -> Self {
        match value {
            AccountError::AlreadyAdmin => AdminError::AlreadyAdmin,
            other => AdminError::Store(other),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub roles: Vec<String>,
    pub is_admin: bool,
}

impl AdminService {
    pub fn new(roles: Arc<dyn RoleStore>, profiles: Arc<dyn ProfileStore>) -> Self {
        Self { roles, profiles }
    }

    /// Bootstraps the first administrator, or lets an existing admin promote
    /// `target`. The bootstrap claim is atomic in the role store.
    pub async fn promote(
        &self,
        caller: &Identity,
        target: Option<Uuid>,
    ) -> Result<PromoteOutcome, AdminError> {
        if self.roles.claim_first_admin(caller.user_id).await? {
            info!(
                target = "licita.admin",
                user_id = %caller.user_id,
                "first admin created"
            );
            return Ok(PromoteOutcome {
                success: true,
                message: "Você é agora o primeiro administrador do sistema!".to_string(),
            });
        }

        if !self.roles.is_admin(caller.user_id).await? {
            info!(
                target = "licita.admin",
                user_id = %caller.user_id,
                "promotion refused: caller is not an admin"
            );
            return Err(AdminError::Forbidden);
        }

        let target = target.ok_or(AdminError::MissingTarget)?;
        self.roles.grant_admin(target).await?;
        info!(
            target = "licita.admin",
            admin_id = %caller.user_id,
            target_id = %target,
            "user promoted to admin"
        );
        Ok(PromoteOutcome {
            success: true,
            message: "Usuário promovido a administrador com sucesso!".to_string(),
        })
    }

    /// All profiles with their role names, newest first. Admins only.
    pub async fn list_users(&self, caller: &Identity) -> Result<Vec<UserSummary>, AdminError> {
        if !self.roles.is_admin(caller.user_id).await? {
            return Err(AdminError::Forbidden);
        }

        let profiles = self.profiles.list_profiles().await?;
        let mut roles_by_user: HashMap<Uuid, Vec<String>> = HashMap::new();
        for assignment in self.roles.list_roles().await? {
            roles_by_user
                .entry(assignment.user_id)
                .or_default()
                .push(assignment.role);
        }

        let users: Vec<UserSummary> = profiles
            .into_iter()
            .map(|profile| {
                let roles = roles_by_user.remove(&profile.id).unwrap_or_default();
                let is_admin = roles.iter().any(|role| role == ADMIN_ROLE);
                UserSummary {
                    id: profile.id,
                    email: profile.email,
                    full_name: profile.full_name,
                    created_at: profile.created_at,
                    roles,
                    is_admin,
                }
            })
            .collect();
        info!(target = "licita.admin", count = users.len(), "users listed");
        Ok(users)
    }
}
