//! Player accounts: identity, gem balance, and opaque profile blobs.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gt_rs_store::{Clock, Credential, IdAllocator, RecordStore, RecordStoreExt, StoreError, User};
use tracing::{debug, info};

use crate::error::AccountError;

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 20;

fn validate_username(username: &str) -> Result<(), AccountError> {
    let valid = (USERNAME_MIN..=USERNAME_MAX).contains(&username.len())
        && username
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(AccountError::InvalidUsername(username.to_string()))
    }
}

pub struct AccountStore {
    users: DashMap<String, User>,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    ids: IdAllocator,
}

impl AccountStore {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            users: DashMap::new(),
            store,
            clock,
            ids: IdAllocator::default(),
        }
    }

    pub fn load(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Result<Self, AccountError> {
        let records: Vec<User> = store.scan_records("")?;
        let ids = IdAllocator::after(records.iter().map(|u| u.id));
        let users: DashMap<String, User> = records
            .into_iter()
            .map(|u| (u.username.clone(), u))
            .collect();
        info!("loaded {} account(s)", users.len());
        Ok(Self {
            users,
            store,
            clock,
            ids,
        })
    }

    /// Register a new player. Usernames are case-sensitive and immutable.
    pub fn create_user(&self, username: &str, password: Credential) -> Result<User, AccountError> {
        validate_username(username)?;
        match self.users.entry(username.to_string()) {
            Entry::Occupied(_) => Err(AccountError::UsernameTaken(username.to_string())),
            Entry::Vacant(vacant) => {
                let user = User::new(self.ids.allocate(), username, password, self.clock.now_ms());
                self.store.insert_record(&user).map_err(|e| match e {
                    StoreError::Conflict { .. } => {
                        AccountError::UsernameTaken(username.to_string())
                    }
                    other => other.into(),
                })?;
                vacant.insert(user.clone());
                info!("registered user {username} (id {})", user.id);
                Ok(user)
            }
        }
    }

    pub fn get(&self, username: &str) -> Result<User, AccountError> {
        self.users
            .get(username)
            .map(|u| u.clone())
            .ok_or_else(|| AccountError::NotFound(username.to_string()))
    }

    pub fn update_appearance(
        &self,
        username: &str,
        appearance: Option<String>,
    ) -> Result<User, AccountError> {
        self.modify(username, |user| {
            user.appearance = appearance;
            Ok(())
        })
    }

    pub fn update_inventory(
        &self,
        username: &str,
        inventory: Option<String>,
    ) -> Result<User, AccountError> {
        self.modify(username, |user| {
            user.inventory = inventory;
            Ok(())
        })
    }

    /// Returns the new balance.
    pub fn credit_gems(&self, username: &str, amount: u64) -> Result<u64, AccountError> {
        let user = self.modify(username, |user| {
            user.gems = user
                .gems
                .checked_add(amount)
                .ok_or(AccountError::GemOverflow)?;
            Ok(())
        })?;
        debug!("credited {amount} gems to {username}");
        Ok(user.gems)
    }

    /// Returns the new balance. The balance never goes below zero.
    pub fn debit_gems(&self, username: &str, amount: u64) -> Result<u64, AccountError> {
        let user = self.modify(username, |user| {
            user.gems = user
                .gems
                .checked_sub(amount)
                .ok_or(AccountError::InsufficientGems {
                    balance: user.gems,
                    requested: amount,
                })?;
            Ok(())
        })?;
        debug!("debited {amount} gems from {username}");
        Ok(user.gems)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Apply `f` to a copy, persist it, then publish it. The map entry stays
    /// locked throughout, so concurrent changes to one user serialize.
    fn modify(
        &self,
        username: &str,
        f: impl FnOnce(&mut User) -> Result<(), AccountError>,
    ) -> Result<User, AccountError> {
        let mut entry = self
            .users
            .get_mut(username)
            .ok_or_else(|| AccountError::NotFound(username.to_string()))?;
        let mut next = entry.clone();
        f(&mut next)?;
        next.updated_at = self.clock.now_ms();
        self.store.save(&next)?;
        *entry = next.clone();
        Ok(next)
    }
}
