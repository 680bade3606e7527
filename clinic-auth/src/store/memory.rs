use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    AccountStore, AuditQuery, AuditStore, ResetTokenStore, SessionStore, StoreError,
};
use crate::models::{
    Account, AuditEvent, AuditEventType, PasswordResetToken, Profile, Role, Session,
};

#[derive(Default)]
struct Tables {
    accounts: HashMap<Uuid, Account>,
    email_index: HashMap<String, Uuid>,
    sessions: HashMap<String, Session>,
    audit_events: BTreeMap<i64, AuditEvent>,
    reset_tokens: HashMap<String, PasswordResetToken>,
}

/// In-process store. Every operation holds one lock for its whole duration,
/// which makes each trait method atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Raw access to stored audit rows, bypassing the ledger. Intended for
    /// integrity tests that simulate tampering with the backing table.
    pub fn modify_audit_rows<F>(&self, f: F)
    where
        F: FnOnce(&mut BTreeMap<i64, AuditEvent>),
    {
        f(&mut self.tables().audit_events);
    }

    pub fn audit_row_count(&self) -> usize {
        self.tables().audit_events.len()
    }

    fn account_by_email_mut<'a>(tables: &'a mut Tables, email: &str) -> Option<&'a mut Account> {
        let id = *tables.email_index.get(email)?;
        tables.accounts.get_mut(&id)
    }
}

fn page(events: Vec<AuditEvent>, query: &AuditQuery) -> Vec<AuditEvent> {
    events
        .into_iter()
        .skip(query.offset as usize)
        .take(query.limit as usize)
        .collect()
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut tables = self.tables();
        if tables.email_index.contains_key(&account.email) {
            return Err(StoreError::Conflict(format!(
                "email {} already registered",
                account.email
            )));
        }
        tables
            .email_index
            .insert(account.email.clone(), account.account_id);
        tables.accounts.insert(account.account_id, account.clone());
        Ok(())
    }

    async fn delete_account(&self, account_id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables();
        let referenced = tables
            .audit_events
            .values()
            .any(|e| e.account_id == Some(account_id));
        if referenced {
            return Ok(false);
        }
        Ok(match tables.accounts.remove(&account_id) {
            Some(account) => {
                tables.email_index.remove(&account.email);
                true
            }
            None => false,
        })
    }

    async fn find_account_by_id(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.tables().accounts.get(&account_id).cloned())
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let tables = self.tables();
        Ok(tables
            .email_index
            .get(email)
            .and_then(|id| tables.accounts.get(id))
            .cloned())
    }

    async fn increment_failed_attempts(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<i32>, StoreError> {
        let mut tables = self.tables();
        Ok(Self::account_by_email_mut(&mut tables, email).map(|account| {
            account.failed_login_attempts += 1;
            account.updated_at = now;
            account.failed_login_attempts
        }))
    }

    async fn reset_failed_attempts(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables();
        if let Some(account) = Self::account_by_email_mut(&mut tables, email) {
            account.failed_login_attempts = 0;
            account.updated_at = now;
        }
        Ok(())
    }

    async fn revert_failed_attempt(
        &self,
        email: &str,
        clear_lock: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables();
        Ok(match Self::account_by_email_mut(&mut tables, email) {
            Some(account) => {
                account.failed_login_attempts = (account.failed_login_attempts - 1).max(0);
                if clear_lock {
                    account.locked_until = None;
                }
                account.updated_at = now;
                true
            }
            None => false,
        })
    }

    async fn restore_lockout(
        &self,
        email: &str,
        failed_attempts: i32,
        locked_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables();
        Ok(match Self::account_by_email_mut(&mut tables, email) {
            Some(account) => {
                account.failed_login_attempts = failed_attempts;
                account.locked_until = locked_until;
                account.updated_at = now;
                true
            }
            None => false,
        })
    }

    async fn set_locked_until(
        &self,
        email: &str,
        until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables();
        Ok(match Self::account_by_email_mut(&mut tables, email) {
            Some(account) => {
                account.locked_until = until;
                account.updated_at = now;
                true
            }
            None => false,
        })
    }

    async fn unlock_account(&self, email: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut tables = self.tables();
        Ok(match Self::account_by_email_mut(&mut tables, email) {
            Some(account) => {
                account.locked_until = None;
                account.failed_login_attempts = 0;
                account.updated_at = now;
                true
            }
            None => false,
        })
    }

    async fn clear_lapsed_lock(&self, email: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut tables = self.tables();
        Ok(match Self::account_by_email_mut(&mut tables, email) {
            Some(account) if matches!(account.locked_until, Some(until) if until <= now) => {
                account.locked_until = None;
                account.failed_login_attempts = 0;
                account.updated_at = now;
                true
            }
            _ => false,
        })
    }

    async fn update_password_hash(
        &self,
        account_id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables();
        Ok(match tables.accounts.get_mut(&account_id) {
            Some(account) => {
                account.password_hash = password_hash.to_string();
                account.updated_at = now;
                true
            }
            None => false,
        })
    }

    async fn update_profile(
        &self,
        account_id: Uuid,
        profile: &Profile,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>, StoreError> {
        let mut tables = self.tables();
        Ok(tables.accounts.get_mut(&account_id).map(|account| {
            account.profile = profile.clone();
            account.updated_at = now;
            account.clone()
        }))
    }

    async fn update_role(
        &self,
        account_id: Uuid,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables();
        Ok(match tables.accounts.get_mut(&account_id) {
            Some(account) => {
                account.role = role;
                account.updated_at = now;
                true
            }
            None => false,
        })
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut tables = self.tables();
        if tables.sessions.contains_key(&session.token) {
            return Err(StoreError::Conflict("session token collision".to_string()));
        }
        tables
            .sessions
            .insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn find_session(&self, token: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.tables().sessions.get(token).cloned())
    }

    async fn extend_session(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let mut tables = self.tables();
        Ok(match tables.sessions.get_mut(token) {
            Some(session) if session.is_usable_at(now) => {
                session.expires_at = expires_at;
                Some(session.clone())
            }
            _ => None,
        })
    }

    async fn invalidate_session(&self, token: &str) -> Result<Option<Session>, StoreError> {
        let mut tables = self.tables();
        Ok(match tables.sessions.get_mut(token) {
            Some(session) if !session.invalidated => {
                session.invalidated = true;
                Some(session.clone())
            }
            _ => None,
        })
    }

    async fn invalidate_account_sessions(
        &self,
        account_id: Uuid,
        keep_token: Option<&str>,
    ) -> Result<Vec<String>, StoreError> {
        let mut tables = self.tables();
        let mut tokens = Vec::new();
        for session in tables.sessions.values_mut() {
            if session.account_id == account_id
                && !session.invalidated
                && Some(session.token.as_str()) != keep_token
            {
                session.invalidated = true;
                tokens.push(session.token.clone());
            }
        }
        Ok(tokens)
    }

    async fn restore_sessions(&self, tokens: &[String]) -> Result<u64, StoreError> {
        let mut tables = self.tables();
        let mut count = 0;
        for token in tokens {
            if let Some(session) = tables.sessions.get_mut(token) {
                if session.invalidated {
                    session.invalidated = false;
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    async fn list_active_sessions(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError> {
        let mut sessions: Vec<Session> = self
            .tables()
            .sessions
            .values()
            .filter(|s| s.account_id == account_id && s.is_usable_at(now))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables();
        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| s.is_usable_at(now));
        Ok((before - tables.sessions.len()) as u64)
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn last_audit_event(&self) -> Result<Option<AuditEvent>, StoreError> {
        Ok(self
            .tables()
            .audit_events
            .last_key_value()
            .map(|(_, event)| event.clone()))
    }

    async fn insert_audit_event(&self, event: &AuditEvent) -> Result<(), StoreError> {
        let mut tables = self.tables();
        if tables.audit_events.contains_key(&event.sequence) {
            return Err(StoreError::Conflict(format!(
                "audit sequence {} already written",
                event.sequence
            )));
        }
        tables.audit_events.insert(event.sequence, event.clone());
        Ok(())
    }

    async fn find_audit_by_account(
        &self,
        account_id: Uuid,
        query: &AuditQuery,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let events = self
            .tables()
            .audit_events
            .values()
            .rev()
            .filter(|e| e.account_id == Some(account_id) && query.matches(e.timestamp))
            .cloned()
            .collect();
        Ok(page(events, query))
    }

    async fn find_audit_by_type(
        &self,
        event_type: AuditEventType,
        query: &AuditQuery,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let events = self
            .tables()
            .audit_events
            .values()
            .rev()
            .filter(|e| e.event_type == event_type && query.matches(e.timestamp))
            .cloned()
            .collect();
        Ok(page(events, query))
    }

    async fn scan_audit(
        &self,
        after_sequence: i64,
        limit: i64,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        Ok(self
            .tables()
            .audit_events
            .range(after_sequence.saturating_add(1)..)
            .take(limit.max(0) as usize)
            .map(|(_, event)| event.clone())
            .collect())
    }
}

#[async_trait]
impl ResetTokenStore for MemoryStore {
    async fn insert_reset_token(&self, token: &PasswordResetToken) -> Result<(), StoreError> {
        let mut tables = self.tables();
        if tables.reset_tokens.contains_key(&token.token_hash) {
            return Err(StoreError::Conflict("reset token collision".to_string()));
        }
        for existing in tables.reset_tokens.values_mut() {
            if existing.account_id == token.account_id {
                existing.superseded = true;
            }
        }
        tables
            .reset_tokens
            .insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn find_reset_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<PasswordResetToken>, StoreError> {
        Ok(self.tables().reset_tokens.get(token_hash).cloned())
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PasswordResetToken>, StoreError> {
        let mut tables = self.tables();
        Ok(match tables.reset_tokens.get_mut(token_hash) {
            Some(token) if token.is_usable_at(now) => {
                token.used_at = Some(now);
                Some(token.clone())
            }
            _ => None,
        })
    }

    async fn release_reset_token(&self, token_hash: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables();
        Ok(match tables.reset_tokens.get_mut(token_hash) {
            Some(token) if token.used_at.is_some() && !token.superseded => {
                token.used_at = None;
                true
            }
            _ => false,
        })
    }
}
