//! Subscriber accounts
//!
//! Every subscription is linked to a customer account. An account already
//! linked to the subscription wins over one found by email address; when
//! neither exists a new account is created with the subscription number as
//! login.

use crate::error::RecordError;
use crate::model::{SubscriberAccount, UserId};
use crate::store::{ContentStore, NewUser, Role, StoreError, StoredEntity, UserUpdate};
use serde_json::Value;
use tracing::{error, info};

/// Entity meta field holding the linked account
pub const CUSTOMER_META: &str = "_customer_user";

/// How a subscription was linked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountLink {
    pub user_id: UserId,
    pub created: bool,
    /// Existing account seen by the importer for the first time
    pub notified: bool,
}

pub struct AccountLinker<'a> {
    store: &'a dyn ContentStore,
}

impl<'a> AccountLinker<'a> {
    pub fn new(store: &'a dyn ContentStore) -> Self {
        Self { store }
    }

    fn write_meta(&self, id: UserId, account: &SubscriberAccount, fingerprint: &str) -> Result<(), StoreError> {
        let editions: Vec<Value> = account.editions.iter().map(|e| Value::from(e.as_str())).collect();
        self.store.set_user_meta(id, "_editions", &Value::Array(editions))?;
        self.store.set_user_meta(id, "_importer_fingerprint", &Value::from(fingerprint))
    }

    /// Find, update or create the account of a subscription.
    pub fn link(
        &self,
        account: &SubscriberAccount,
        existing: Option<&StoredEntity>,
        fingerprint: &str,
    ) -> Result<AccountLink, RecordError> {
        let linked = existing.and_then(|e| e.meta_i64(CUSTOMER_META));
        let by_email = self.store.find_user_by_email(&account.email)?;

        let user = match linked {
            Some(id) => self.store.get_user(id)?.or(by_email),
            None => by_email,
        };

        let Some(user) = user else {
            if self.store.find_user_by_login(&account.login)?.is_some() {
                error!(login = %account.login, email = %account.email, "Duplicate subscriber login");
                return Err(RecordError::DuplicateLogin(account.login.clone()));
            }

            let display_name = match &account.first_name {
                Some(first) => format!("{} {}", first, account.last_name),
                None => account.last_name.clone(),
            };
            let id = self.store.insert_user(&NewUser {
                login: account.login.clone(),
                email: account.email.clone(),
                password: account.password.clone(),
                display_name: display_name.trim().to_string(),
                first_name: account.first_name.clone(),
                last_name: Some(account.last_name.clone()),
                roles: vec![Role::Customer],
            })?;
            self.write_meta(id, account, fingerprint)?;
            self.store.set_user_meta(id, "_email_verified", &Value::Bool(false))?;
            self.store.set_user_meta(id, "_send_welcome_email", &Value::from(1))?;
            info!(user_id = id, login = %account.login, "Created subscriber account");
            return Ok(AccountLink {
                user_id: id,
                created: true,
                notified: false,
            });
        };

        // passwords of existing accounts are never overwritten
        let notified = !user.meta.contains_key("_importer_fingerprint");
        self.store.update_user(
            user.id,
            &UserUpdate {
                email: Some(account.email.clone()),
                first_name: account.first_name.clone(),
                last_name: Some(account.last_name.clone()),
            },
        )?;
        self.write_meta(user.id, account, fingerprint)?;
        if notified {
            self.store.set_user_meta(user.id, "_password_update_notice", &Value::from(1))?;
            info!(user_id = user.id, "Flagged subscriber for password update notice");
        }
        Ok(AccountLink {
            user_id: user.id,
            created: false,
            notified,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn account(login: &str, email: &str) -> SubscriberAccount {
        SubscriberAccount {
            login: login.into(),
            email: email.into(),
            password: Some("geheim".into()),
            last_name: "Muster".into(),
            first_name: Some("Erika".into()),
            editions: vec!["PZ".into()],
        }
    }

    #[test]
    fn test_new_account_created_unverified() {
        let store = MemoryStore::new();
        let link = AccountLinker::new(&store).link(&account("100", "e@example.org"), None, "fp").unwrap();

        assert!(link.created);
        let user = store.get_user(link.user_id).unwrap().unwrap();
        assert_eq!(user.login, "100");
        assert_eq!(user.display_name, "Erika Muster");
        assert_eq!(user.roles, vec![Role::Customer]);
        assert_eq!(user.meta["_email_verified"], Value::Bool(false));
        assert_eq!(user.meta["_send_welcome_email"], 1);
        assert_eq!(user.meta["_editions"], serde_json::json!(["PZ"]));
    }

    #[test]
    fn test_existing_account_notified_once() {
        let store = MemoryStore::new();
        let id = store
            .insert_user(&NewUser {
                login: "erika".into(),
                email: "E@example.org".into(),
                ..Default::default()
            })
            .unwrap();
        let linker = AccountLinker::new(&store);

        let first = linker.link(&account("100", "e@example.org"), None, "fp1").unwrap();
        assert_eq!(first.user_id, id);
        assert!(first.notified);
        assert!(!first.created);

        let second = linker.link(&account("100", "e@example.org"), None, "fp2").unwrap();
        assert!(!second.notified);
        let user = store.get_user(id).unwrap().unwrap();
        assert_eq!(user.login, "erika");
        assert_eq!(user.email, "e@example.org");
        assert_eq!(user.last_name.as_deref(), Some("Muster"));
    }

    #[test]
    fn test_duplicate_login_is_rejected() {
        let store = MemoryStore::new();
        store
            .insert_user(&NewUser {
                login: "100".into(),
                email: "other@example.org".into(),
                ..Default::default()
            })
            .unwrap();
        let err = AccountLinker::new(&store)
            .link(&account("100", "e@example.org"), None, "fp")
            .unwrap_err();
        assert!(matches!(err, RecordError::DuplicateLogin(login) if login == "100"));
    }
}
