//! In-process identity provider for development and tests.
//!
//! Behaves like a small Firebase project per [`ProjectId`]:
//! - users live per project and survive handle shutdown,
//! - ID tokens are minted by [`InMemoryBackend::sign_in`] (the client-side
//!   step) and only verify against the project that minted them,
//! - tokens stay valid after their user is deleted (no revocation check), so a
//!   second delete reports `UserNotFound`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use authgate_core::{ProjectId, ProviderUid};

use super::{
    IdentityBackend, NewUser, ProviderApp, ProviderError, ProviderUser, UserMetadata,
    VerifiedIdToken,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
struct StoredUser {
    user: ProviderUser,
    password: String,
}

#[derive(Debug, Default)]
struct ProjectData {
    users: Mutex<HashMap<ProviderUid, StoredUser>>,
    id_tokens: Mutex<HashMap<String, ProviderUid>>,
    mutations: AtomicUsize,
}

fn owner_of(users: &HashMap<ProviderUid, StoredUser>, email: &str) -> Option<ProviderUid> {
    users
        .values()
        .find(|u| u.user.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
        .map(|u| u.user.uid.clone())
}

impl ProjectData {
    fn find_by_email(&self, email: &str) -> Option<ProviderUid> {
        owner_of(&lock(&self.users), email)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    projects: Mutex<HashMap<ProjectId, Arc<ProjectData>>>,
    failing: Mutex<HashSet<ProjectId>>,
    latency: Option<Duration>,
    initializations: AtomicUsize,
    shutdowns: Arc<AtomicUsize>,
    custom_tokens: Arc<AtomicU64>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every provider call by `latency`, forcing requests to interleave.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make `initialize` fail for `project_id` until cleared.
    pub fn fail_initialization_for(&self, project_id: &ProjectId) {
        lock(&self.failing).insert(project_id.clone());
    }

    pub fn clear_failures(&self) {
        lock(&self.failing).clear();
    }

    fn project(&self, project_id: &ProjectId) -> Arc<ProjectData> {
        lock(&self.projects)
            .entry(project_id.clone())
            .or_default()
            .clone()
    }

    /// Client-side sign-in: check email and password, return an ID token.
    pub fn sign_in(&self, project_id: &ProjectId, email: &str, password: &str) -> Result<String, ProviderError> {
        let project = self.project(project_id);
        let uid = project
            .find_by_email(email)
            .ok_or(ProviderError::UserNotFound)?;
        let matches = lock(&project.users)
            .get(&uid)
            .is_some_and(|u| u.password == password);
        if !matches {
            return Err(ProviderError::InvalidArgument("INVALID_PASSWORD".into()));
        }
        Ok(Self::mint(project_id, &project, uid))
    }

    /// Mint an ID token for an existing user without a password check.
    pub fn mint_id_token(&self, project_id: &ProjectId, uid: &ProviderUid) -> Result<String, ProviderError> {
        let project = self.project(project_id);
        if !lock(&project.users).contains_key(uid) {
            return Err(ProviderError::UserNotFound);
        }
        Ok(Self::mint(project_id, &project, uid.clone()))
    }

    /// Register a user directly (a social sign-in that created the account client-side).
    pub fn seed_user(
        &self,
        project_id: &ProjectId,
        email: &str,
        display_name: Option<&str>,
    ) -> ProviderUid {
        let project = self.project(project_id);
        let user = new_record(email.to_string(), display_name.map(str::to_string));
        let uid = user.uid.clone();
        lock(&project.users).insert(
            uid.clone(),
            StoredUser {
                user,
                password: String::new(),
            },
        );
        uid
    }

    fn mint(project_id: &ProjectId, project: &ProjectData, uid: ProviderUid) -> String {
        let token = format!("idt.{}.{}", project_id, Uuid::now_v7().simple());
        lock(&project.id_tokens).insert(token.clone(), uid);
        token
    }

    pub fn user(&self, project_id: &ProjectId, uid: &ProviderUid) -> Option<ProviderUser> {
        lock(&self.project(project_id).users)
            .get(uid)
            .map(|u| u.user.clone())
    }

    pub fn user_count(&self, project_id: &ProjectId) -> usize {
        lock(&self.project(project_id).users).len()
    }

    /// Successful create/update/delete calls made against `project_id`.
    pub fn mutation_count(&self, project_id: &ProjectId) -> usize {
        self.project(project_id).mutations.load(Ordering::SeqCst)
    }

    pub fn initializations(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

fn new_record(email: String, display_name: Option<String>) -> ProviderUser {
    let uid: ProviderUid = Uuid::now_v7()
        .simple()
        .to_string()
        .parse()
        .unwrap_or_else(|_| unreachable!("uuid strings are valid uids"));
    ProviderUser {
        uid,
        email: Some(email),
        email_verified: false,
        display_name,
        disabled: false,
        metadata: UserMetadata {
            creation_time: Some(Utc::now()),
            last_sign_in_time: None,
        },
    }
}

#[async_trait]
impl IdentityBackend for InMemoryBackend {
    async fn initialize(&self, project_id: &ProjectId) -> Result<Arc<dyn ProviderApp>, ProviderError> {
        if lock(&self.failing).contains(project_id) {
            return Err(ProviderError::Unavailable(format!(
                "project '{project_id}' rejected initialization"
            )));
        }
        self.initializations.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(InMemoryApp {
            project_id: project_id.clone(),
            data: self.project(project_id),
            latency: self.latency,
            shutdowns: self.shutdowns.clone(),
            custom_tokens: self.custom_tokens.clone(),
            deleted: AtomicBool::new(false),
        }))
    }
}

pub struct InMemoryApp {
    project_id: ProjectId,
    data: Arc<ProjectData>,
    latency: Option<Duration>,
    shutdowns: Arc<AtomicUsize>,
    custom_tokens: Arc<AtomicU64>,
    deleted: AtomicBool,
}

impl InMemoryApp {
    async fn enter(&self) -> Result<(), ProviderError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.deleted.load(Ordering::Acquire) {
            return Err(ProviderError::Unavailable(format!(
                "app for '{}' has been deleted",
                self.project_id
            )));
        }
        Ok(())
    }

    fn mutated(&self) {
        self.data.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProviderApp for InMemoryApp {
    fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    async fn create_user(&self, user: NewUser) -> Result<ProviderUser, ProviderError> {
        self.enter().await?;
        if user.password.chars().count() < 6 {
            return Err(ProviderError::InvalidArgument(
                "WEAK_PASSWORD : Password should be at least 6 characters".into(),
            ));
        }

        let record = {
            let mut users = lock(&self.data.users);
            if owner_of(&users, &user.email).is_some() {
                return Err(ProviderError::EmailExists);
            }
            let record = new_record(user.email, Some(user.display_name));
            users.insert(
                record.uid.clone(),
                StoredUser {
                    user: record.clone(),
                    password: user.password,
                },
            );
            record
        };
        self.mutated();
        Ok(record)
    }

    async fn verify_id_token(&self, id_token: &str) -> Result<VerifiedIdToken, ProviderError> {
        self.enter().await?;
        let uid = lock(&self.data.id_tokens)
            .get(id_token)
            .cloned()
            .ok_or_else(|| ProviderError::InvalidToken("unknown ID token".into()))?;

        // A deleted user's token still carries its original claims.
        let user = lock(&self.data.users).get(&uid).map(|u| u.user.clone());
        Ok(VerifiedIdToken {
            uid,
            email: user.as_ref().and_then(|u| u.email.clone()),
            email_verified: user.as_ref().is_some_and(|u| u.email_verified),
            name: user.and_then(|u| u.display_name),
        })
    }

    async fn create_custom_token(&self, uid: &ProviderUid) -> Result<String, ProviderError> {
        self.enter().await?;
        let n = self.custom_tokens.fetch_add(1, Ordering::SeqCst);
        Ok(format!("ct.{}.{}.{}", self.project_id, uid, n))
    }

    async fn get_user(&self, uid: &ProviderUid) -> Result<ProviderUser, ProviderError> {
        self.enter().await?;
        lock(&self.data.users)
            .get(uid)
            .map(|u| u.user.clone())
            .ok_or(ProviderError::UserNotFound)
    }

    async fn update_email(&self, uid: &ProviderUid, email: &str) -> Result<ProviderUser, ProviderError> {
        self.enter().await?;
        let updated = {
            let mut users = lock(&self.data.users);
            if owner_of(&users, email).is_some_and(|owner| &owner != uid) {
                return Err(ProviderError::EmailExists);
            }
            let stored = users.get_mut(uid).ok_or(ProviderError::UserNotFound)?;
            stored.user.email = Some(email.to_string());
            stored.user.clone()
        };
        self.mutated();
        Ok(updated)
    }

    async fn delete_user(&self, uid: &ProviderUid) -> Result<(), ProviderError> {
        self.enter().await?;
        lock(&self.data.users)
            .remove(uid)
            .ok_or(ProviderError::UserNotFound)?;
        self.mutated();
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ProviderError> {
        if self.deleted.swap(true, Ordering::AcqRel) {
            return Err(ProviderError::Unavailable("app already deleted".into()));
        }
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
