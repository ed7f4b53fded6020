use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::user::{Role, User};

/// Identity directory: user records plus the opaque bearer-token table.
/// Token issuance mechanics live outside this core; registering a user hands
/// back a token the way an auth service would.
#[derive(Clone, Default)]
pub struct UserDirectory {
    users: Arc<DashMap<Uuid, User>>,
    tokens: Arc<DashMap<String, Uuid>>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: String, phone: String, role: Role) -> (User, String) {
        let user = User {
            id: Uuid::new_v4(),
            name,
            phone,
            role,
            active: true,
            push_token: None,
            created_at: Utc::now(),
        };
        let token = Uuid::new_v4().simple().to_string();

        self.users.insert(user.id, user.clone());
        self.tokens.insert(token.clone(), user.id);
        (user, token)
    }

    pub fn find(&self, id: Uuid) -> Option<User> {
        self.users.get(&id).map(|entry| entry.value().clone())
    }

    pub fn find_by_token(&self, token: &str) -> Option<User> {
        let id = *self.tokens.get(token)?.value();
        self.find(id)
    }

    pub fn set_push_token(&self, id: Uuid, token: String) -> Result<User, AppError> {
        let mut user = self
            .users
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;
        user.push_token = Some(token);
        Ok(user.clone())
    }

    pub fn set_active(&self, id: Uuid, active: bool) -> Result<User, AppError> {
        let mut user = self
            .users
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;
        user.active = active;
        Ok(user.clone())
    }

    /// Push targets for a set of roles: active accounts that registered a
    /// token. Accounts without a token are silently skipped.
    pub fn push_targets(&self, roles: &[Role]) -> Vec<(Uuid, String)> {
        self.users
            .iter()
            .filter(|entry| {
                let user = entry.value();
                user.active && roles.contains(&user.role)
            })
            .filter_map(|entry| {
                let user = entry.value();
                user.push_token.clone().map(|token| (user.id, token))
            })
            .collect()
    }

    pub fn push_target(&self, id: Uuid) -> Option<(Uuid, String)> {
        let user = self.find(id)?;
        user.push_token.map(|token| (id, token))
    }

    pub fn couriers(&self) -> Vec<User> {
        self.users
            .iter()
            .filter(|entry| entry.value().role == Role::Courier)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn count_active_couriers(&self) -> usize {
        self.users
            .iter()
            .filter(|entry| entry.value().role == Role::Courier && entry.value().active)
            .count()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::UserDirectory;
    use crate::models::user::Role;

    #[test]
    fn registered_token_resolves_back_to_the_user() {
        let directory = UserDirectory::new();
        let (user, token) = directory.register("Awa".into(), "70000000".into(), Role::Client);

        let resolved = directory.find_by_token(&token).unwrap();
        assert_eq!(resolved.id, user.id);
        assert!(resolved.active);
    }

    #[test]
    fn push_targets_skip_inactive_and_tokenless() {
        let directory = UserDirectory::new();
        let (with_token, _) = directory.register("A".into(), "1".into(), Role::Courier);
        let (_tokenless, _) = directory.register("B".into(), "2".into(), Role::Courier);
        let (suspended, _) = directory.register("C".into(), "3".into(), Role::Courier);

        directory
            .set_push_token(with_token.id, "fcm-a".into())
            .unwrap();
        directory
            .set_push_token(suspended.id, "fcm-c".into())
            .unwrap();
        directory.set_active(suspended.id, false).unwrap();

        let targets = directory.push_targets(&[Role::Courier]);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].0, with_token.id);
    }
}
