//! Locate the refresh token the sync uses to read the sector sheets.

use tracing::{debug, info};

use crate::errors::SyncError;
use crate::store::DocumentStore;
use crate::sync::model::{Role, UserAccount};

/// Credential handed to the tabular source for one sync run.
#[derive(Clone)]
pub struct Credential {
    pub refresh_token: String,
    /// Account the token belongs to, for logs only.
    pub account: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("refresh_token", &"<redacted>")
            .field("account", &self.account)
            .finish()
    }
}

/// Pick the credential: the first admin with a token, else the first
/// account of any role with one.
pub fn select_credential(users: &[UserAccount]) -> Option<Credential> {
    let has_token = |u: &&UserAccount| {
        u.refresh_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    };

    users
        .iter()
        .filter(has_token)
        .find(|u| u.role == Role::Admin)
        .or_else(|| users.iter().find(has_token))
        .and_then(|u| {
            u.refresh_token.as_ref().map(|token| Credential {
                refresh_token: token.trim().to_string(),
                account: u.email.clone(),
            })
        })
}

/// Resolve the sync credential from the store. Failing here is fatal for
/// the whole run.
pub async fn resolve_credential(store: &dyn DocumentStore) -> Result<Credential, SyncError> {
    let users = store.list_users().await?;
    debug!(accounts = users.len(), "resolving sync credential");

    let credential = select_credential(&users).ok_or_else(|| {
        SyncError::Credential("no user account holds a refresh token".to_string())
    })?;
    info!(account = %credential.account, "using stored refresh token");
    Ok(credential)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn user(email: &str, role: Role, token: Option<&str>) -> UserAccount {
        UserAccount {
            id: email.to_string(),
            email: email.to_string(),
            role,
            refresh_token: token.map(str::to_string),
        }
    }

    #[test]
    fn prefers_admin_over_earlier_user() {
        let users = vec![
            user("tech@x", Role::Technician, Some("rt-tech")),
            user("admin@x", Role::Admin, Some("rt-admin")),
        ];
        let cred = select_credential(&users).unwrap();
        assert_eq!(cred.refresh_token, "rt-admin");
        assert_eq!(cred.account, "admin@x");
    }

    #[test]
    fn skips_admin_without_token() {
        let users = vec![
            user("admin@x", Role::Admin, None),
            user("blank@x", Role::Admin, Some("  ")),
            user("mgr@x", Role::Manager, Some("rt-mgr")),
        ];
        assert_eq!(select_credential(&users).unwrap().refresh_token, "rt-mgr");
    }

    #[test]
    fn first_admin_wins_among_admins() {
        let users = vec![
            user("a@x", Role::Admin, Some("rt-a")),
            user("b@x", Role::Admin, Some("rt-b")),
        ];
        assert_eq!(select_credential(&users).unwrap().account, "a@x");
    }

    #[test]
    fn none_without_any_token() {
        let users = vec![user("a@x", Role::Admin, None)];
        assert!(select_credential(&users).is_none());
        assert!(select_credential(&[]).is_none());
    }

    #[test]
    fn debug_output_redacts_token() {
        let cred = Credential {
            refresh_token: "secret-token".into(),
            account: "a@x".into(),
        };
        let printed = format!("{:?}", cred);
        assert!(!printed.contains("secret-token"));
        assert!(printed.contains("a@x"));
    }

    #[tokio::test]
    async fn resolve_errors_when_store_has_no_token() {
        let store = MemoryStore::new();
        store.seed_user(user("a@x", Role::User, None));
        let err = resolve_credential(&store).await.unwrap_err();
        assert!(matches!(err, SyncError::Credential(_)));
    }

    #[tokio::test]
    async fn resolve_reads_users_from_store() {
        let store = MemoryStore::new();
        store.seed_user(user("a@x", Role::Admin, Some("rt")));
        let cred = resolve_credential(&store).await.unwrap();
        assert_eq!(cred.refresh_token, "rt");
    }
}
