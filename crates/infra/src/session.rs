//! Request-scoped provider sessions.
//!
//! A [`ProviderSession`] is opened at the start of a request for the project
//! named by that request and closed at its end. Sessions are values: they are
//! carried by the request that opened them and are never parked in a shared
//! slot another request could overwrite.
//!
//! Backend handles are cached per project. Every `open` takes a lease on the
//! project's handle and the lease is returned when the session is closed or
//! when its last clone is dropped, so a request future cancelled mid-flight
//! still gives its lease back. With handle caching disabled the handle is shut
//! down as soon as its last lease is returned. With caching enabled at most
//! `max_idle_handles` unleased handles are kept; the least recently released
//! ones are shut down first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use authgate_core::ProjectId;

use crate::provider::{IdentityBackend, ProviderApp, ProviderError};

/// Default bound on cached handles that no request is using.
pub const DEFAULT_MAX_IDLE_HANDLES: usize = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("project id is required in the 'project-id' header")]
    MissingProject,

    #[error("invalid project id: {0}")]
    InvalidProject(String),

    #[error("identity provider unavailable for project '{project_id}': {source}")]
    Unavailable {
        project_id: ProjectId,
        #[source]
        source: ProviderError,
    },
}

type Released = Vec<(ProjectId, Arc<dyn ProviderApp>)>;

/// Handle to the identity provider for one request's project.
///
/// Clones share one lease.
#[derive(Clone)]
pub struct ProviderSession {
    project_id: ProjectId,
    app: Arc<dyn ProviderApp>,
    lease: Arc<Lease>,
}

impl ProviderSession {
    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    pub fn app(&self) -> &dyn ProviderApp {
        self.app.as_ref()
    }
}

impl core::fmt::Debug for ProviderSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProviderSession")
            .field("project_id", &self.project_id)
            .field("generation", &self.lease.generation)
            .finish_non_exhaustive()
    }
}

/// One outstanding lease on a cached handle. Returned exactly once, either by
/// [`SessionManager::close`] or on drop.
struct Lease {
    pool: Arc<Pool>,
    project_id: ProjectId,
    generation: u64,
    returned: AtomicBool,
}

impl Lease {
    fn give_back(&self) -> Released {
        if self.returned.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }
        self.pool.release(&self.project_id, self.generation)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let released = self.give_back();
        if released.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                for (project_id, app) in released {
                    runtime.spawn(shutdown_logged(project_id, app));
                }
            }
            Err(_) => {
                for (project_id, _) in released {
                    tracing::warn!(project_id = %project_id, "no runtime to shut down provider handle; dropping it");
                }
            }
        }
    }
}

struct CachedHandle {
    app: Arc<dyn ProviderApp>,
    generation: u64,
    leases: usize,
    /// Value of `Handles::clock` when the last lease was returned.
    idle_since: u64,
}

#[derive(Default)]
struct Handles {
    by_project: HashMap<ProjectId, CachedHandle>,
    next_generation: u64,
    clock: u64,
}

struct Pool {
    cache_handles: bool,
    max_idle_handles: usize,
    handles: Mutex<Handles>,
}

impl Pool {
    fn handles(&self) -> MutexGuard<'_, Handles> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return one lease, handing back whatever handles must now be shut down.
    fn release(&self, project_id: &ProjectId, generation: u64) -> Released {
        let mut handles = self.handles();
        handles.clock += 1;
        let now = handles.clock;

        let now_idle = match handles.by_project.get_mut(project_id) {
            Some(cached) if cached.generation == generation => {
                cached.leases = cached.leases.saturating_sub(1);
                if cached.leases == 0 {
                    cached.idle_since = now;
                }
                cached.leases == 0
            }
            _ => {
                tracing::debug!(project_id = %project_id, generation, "returning a lease whose handle was already released");
                return Vec::new();
            }
        };
        if !now_idle {
            return Vec::new();
        }

        if !self.cache_handles {
            return handles
                .by_project
                .remove_entry(project_id)
                .map(|(project_id, cached)| vec![(project_id, cached.app)])
                .unwrap_or_default();
        }

        let mut idle: Vec<(u64, ProjectId)> = handles
            .by_project
            .iter()
            .filter(|(_, cached)| cached.leases == 0)
            .map(|(project_id, cached)| (cached.idle_since, project_id.clone()))
            .collect();
        if idle.len() <= self.max_idle_handles {
            return Vec::new();
        }

        idle.sort_unstable_by_key(|(idle_since, _)| *idle_since);
        let excess = idle.len() - self.max_idle_handles;
        idle.into_iter()
            .take(excess)
            .filter_map(|(_, project_id)| handles.by_project.remove_entry(&project_id))
            .map(|(project_id, cached)| {
                tracing::debug!(project_id = %project_id, "evicting idle provider handle");
                (project_id, cached.app)
            })
            .collect()
    }

    fn session(pool: &Arc<Self>, project_id: &ProjectId, cached: &CachedHandle) -> ProviderSession {
        ProviderSession {
            project_id: project_id.clone(),
            app: cached.app.clone(),
            lease: Arc::new(Lease {
                pool: pool.clone(),
                project_id: project_id.clone(),
                generation: cached.generation,
                returned: AtomicBool::new(false),
            }),
        }
    }
}

pub struct SessionManager {
    backend: Arc<dyn IdentityBackend>,
    pool: Arc<Pool>,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn IdentityBackend>, cache_handles: bool) -> Self {
        Self::with_limits(backend, cache_handles, DEFAULT_MAX_IDLE_HANDLES)
    }

    /// Like [`Self::new`], keeping at most `max_idle_handles` cached handles
    /// that no request is using.
    pub fn with_limits(backend: Arc<dyn IdentityBackend>, cache_handles: bool, max_idle_handles: usize) -> Self {
        Self {
            backend,
            pool: Arc::new(Pool {
                cache_handles,
                max_idle_handles,
                handles: Mutex::new(Handles::default()),
            }),
        }
    }

    /// Take a lease on an existing handle for `project_id`, if any.
    fn lease(&self, project_id: &ProjectId) -> Option<ProviderSession> {
        let mut handles = self.pool.handles();
        let cached = handles.by_project.get_mut(project_id)?;
        cached.leases += 1;
        Some(Pool::session(&self.pool, project_id, cached))
    }

    /// Open a session for the raw `project-id` header value.
    ///
    /// Initialization failures are returned to the caller; they never affect
    /// other projects or other requests.
    pub async fn open(&self, project_header: Option<&str>) -> Result<ProviderSession, SessionError> {
        let raw = project_header
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(SessionError::MissingProject)?;
        let project_id: ProjectId = raw
            .parse()
            .map_err(|e: authgate_core::DomainError| SessionError::InvalidProject(e.to_string()))?;

        if let Some(session) = self.lease(&project_id) {
            return Ok(session);
        }

        // Initialize without holding the lock; another request for the same
        // project may race us here.
        let app = self
            .backend
            .initialize(&project_id)
            .await
            .map_err(|source| {
                tracing::error!(project_id = %project_id, error = %source, "could not open provider session");
                SessionError::Unavailable {
                    project_id: project_id.clone(),
                    source,
                }
            })?;

        let (session, redundant) = {
            let mut handles = self.pool.handles();
            if let Some(cached) = handles.by_project.get_mut(&project_id) {
                cached.leases += 1;
                (Pool::session(&self.pool, &project_id, cached), Some(app))
            } else {
                handles.next_generation += 1;
                let cached = CachedHandle {
                    app,
                    generation: handles.next_generation,
                    leases: 1,
                    idle_since: 0,
                };
                let session = Pool::session(&self.pool, &project_id, &cached);
                handles.by_project.insert(project_id.clone(), cached);
                (session, None)
            }
        };

        if let Some(app) = redundant {
            shutdown_logged(project_id, app).await;
        } else {
            tracing::debug!(project_id = %project_id, "provider session opened");
        }

        Ok(session)
    }

    /// Return a session's lease. Best effort: shutdown failures are logged.
    ///
    /// While other clones of `session` are alive the lease stays out; the
    /// last clone to be dropped returns it.
    pub async fn close(&self, session: ProviderSession) {
        let ProviderSession { lease, .. } = session;
        let Ok(lease) = Arc::try_unwrap(lease) else {
            return;
        };

        for (project_id, app) in lease.give_back() {
            shutdown_logged(project_id, app).await;
        }
    }

    /// Shut down every cached handle (process shutdown).
    pub async fn shutdown_all(&self) {
        let drained: Released = {
            let mut handles = self.pool.handles();
            handles
                .by_project
                .drain()
                .map(|(project_id, cached)| (project_id, cached.app))
                .collect()
        };

        for (project_id, app) in drained {
            shutdown_logged(project_id, app).await;
        }
    }

    /// Number of live backend handles.
    pub fn open_handles(&self) -> usize {
        self.pool.handles().by_project.len()
    }

    /// Outstanding leases on `project_id`'s handle.
    pub fn leases(&self, project_id: &ProjectId) -> usize {
        self.pool
            .handles()
            .by_project
            .get(project_id)
            .map(|c| c.leases)
            .unwrap_or(0)
    }
}

async fn shutdown_logged(project_id: ProjectId, app: Arc<dyn ProviderApp>) {
    match app.shutdown().await {
        Ok(()) => tracing::debug!(project_id = %project_id, "provider handle shut down"),
        Err(e) => tracing::warn!(project_id = %project_id, error = %e, "could not shut down provider handle"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::InMemoryBackend;

    fn manager(cache_handles: bool) -> (Arc<InMemoryBackend>, SessionManager) {
        let backend = Arc::new(InMemoryBackend::new());
        let manager = SessionManager::new(backend.clone(), cache_handles);
        (backend, manager)
    }

    #[tokio::test]
    async fn missing_or_blank_project_is_a_configuration_error() {
        let (_, m) = manager(true);
        assert_eq!(m.open(None).await.unwrap_err(), SessionError::MissingProject);
        assert_eq!(m.open(Some("   ")).await.unwrap_err(), SessionError::MissingProject);
        assert!(matches!(
            m.open(Some("bad project")).await.unwrap_err(),
            SessionError::InvalidProject(_)
        ));
    }

    #[tokio::test]
    async fn sessions_are_bound_to_their_own_project() {
        let (_, m) = manager(true);
        let a = m.open(Some("tenant-a")).await.unwrap();
        let b = m.open(Some("tenant-b")).await.unwrap();

        assert_eq!(a.project_id().as_str(), "tenant-a");
        assert_eq!(a.app().project_id().as_str(), "tenant-a");
        assert_eq!(b.app().project_id().as_str(), "tenant-b");
        assert_eq!(m.open_handles(), 2);
    }

    #[tokio::test]
    async fn cached_handles_are_shared_and_kept() {
        let (backend, m) = manager(true);
        let first = m.open(Some("acme")).await.unwrap();
        let second = m.open(Some("acme")).await.unwrap();
        assert_eq!(backend.initializations(), 1);
        assert_eq!(m.leases(&"acme".parse().unwrap()), 2);

        m.close(first).await;
        m.close(second).await;
        assert_eq!(m.open_handles(), 1);
        assert_eq!(backend.shutdowns(), 0);

        m.shutdown_all().await;
        assert_eq!(m.open_handles(), 0);
        assert_eq!(backend.shutdowns(), 1);
    }

    #[tokio::test]
    async fn uncached_handles_are_released_with_the_last_lease() {
        let (backend, m) = manager(false);
        let first = m.open(Some("acme")).await.unwrap();
        let second = m.open(Some("acme")).await.unwrap();

        m.close(first).await;
        assert_eq!(backend.shutdowns(), 0);
        m.close(second).await;
        assert_eq!(backend.shutdowns(), 1);
        assert_eq!(m.open_handles(), 0);

        let _third = m.open(Some("acme")).await.unwrap();
        assert_eq!(backend.initializations(), 2);
    }

    #[tokio::test]
    async fn initialization_failure_is_scoped_to_its_project() {
        let (backend, m) = manager(true);
        backend.fail_initialization_for(&"down".parse().unwrap());

        let err = m.open(Some("down")).await.unwrap_err();
        assert!(matches!(err, SessionError::Unavailable { .. }));
        assert!(m.open(Some("up")).await.is_ok());
        assert_eq!(m.open_handles(), 1);
    }

    #[tokio::test]
    async fn closing_twice_does_not_underflow() {
        let (_, m) = manager(true);
        let session = m.open(Some("acme")).await.unwrap();
        m.close(session.clone()).await;
        m.close(session).await;
        assert_eq!(m.leases(&"acme".parse().unwrap()), 0);
    }

    #[tokio::test]
    async fn concurrent_opens_for_one_project_end_up_on_one_handle() {
        let backend = Arc::new(InMemoryBackend::new().with_latency(std::time::Duration::from_millis(5)));
        let m = Arc::new(SessionManager::new(backend.clone(), true));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let m = m.clone();
                tokio::spawn(async move { m.open(Some("acme")).await.unwrap() })
            })
            .collect();
        let mut sessions = Vec::new();
        for t in tasks {
            sessions.push(t.await.unwrap());
        }

        assert_eq!(m.open_handles(), 1);
        assert_eq!(m.leases(&"acme".parse().unwrap()), 8);
        // Handles initialized by losing racers were shut down again.
        assert_eq!(backend.initializations() - backend.shutdowns(), 1);
    }

    async fn eventually(mut done: impl FnMut() -> bool) {
        for _ in 0..100 {
            if done() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(done(), "condition not reached in time");
    }

    #[tokio::test]
    async fn dropping_a_session_returns_its_lease() {
        let (backend, m) = manager(false);
        let session = m.open(Some("acme")).await.unwrap();
        let clone = session.clone();

        drop(session);
        assert_eq!(m.leases(&"acme".parse().unwrap()), 1);
        drop(clone);
        assert_eq!(m.open_handles(), 0);
        eventually(|| backend.shutdowns() == 1).await;
    }

    #[tokio::test]
    async fn cancelled_work_returns_its_lease() {
        let backend = Arc::new(InMemoryBackend::new().with_latency(std::time::Duration::from_millis(200)));
        let m = SessionManager::new(backend.clone(), false);

        let work = async {
            let session = m.open(Some("acme")).await.unwrap();
            let _ = session.app().get_user(&"uid-1".parse().unwrap()).await;
            m.close(session).await;
        };
        assert!(tokio::time::timeout(std::time::Duration::from_millis(20), work).await.is_err());

        assert_eq!(m.leases(&"acme".parse().unwrap()), 0);
        assert_eq!(m.open_handles(), 0);
        eventually(|| backend.shutdowns() == backend.initializations()).await;
    }

    #[tokio::test]
    async fn idle_handles_are_bounded_least_recent_first() {
        let backend = Arc::new(InMemoryBackend::new());
        let m = SessionManager::with_limits(backend.clone(), true, 2);

        for i in 0..5 {
            let session = m.open(Some(&format!("tenant-{i}"))).await.unwrap();
            m.close(session).await;
        }
        assert_eq!(m.open_handles(), 2);
        assert_eq!(backend.shutdowns(), 3);

        // The two most recently used projects are still cached.
        let session = m.open(Some("tenant-4")).await.unwrap();
        m.close(session).await;
        let session = m.open(Some("tenant-3")).await.unwrap();
        m.close(session).await;
        assert_eq!(backend.initializations(), 5);
    }

    #[tokio::test]
    async fn leased_handles_are_never_evicted() {
        let backend = Arc::new(InMemoryBackend::new());
        let m = SessionManager::with_limits(backend.clone(), true, 0);

        let held = m.open(Some("held")).await.unwrap();
        let brief = m.open(Some("brief")).await.unwrap();
        m.close(brief).await;

        assert_eq!(m.open_handles(), 1);
        assert_eq!(m.leases(&"held".parse().unwrap()), 1);
        assert_eq!(held.app().project_id().as_str(), "held");

        m.close(held).await;
        assert_eq!(m.open_handles(), 0);
        assert_eq!(backend.shutdowns(), 2);
    }
}
