//! The session & authorization store: single source of truth for who is signed in,
//! what they may do, whether a super-admin is impersonating a tenant, and where a
//! navigation should land.
//!
//! Identity is only ever replaced whole. Overlapping refreshes are not coordinated:
//! whichever response arrives last wins, and a superseded refresh still applies its
//! result when it lands. The lock is held for synchronous reads and swaps only,
//! never across an `.await`.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::storage::{SharedStorage, StorageEvent, KEY_IMPERSONATION, KEY_TOKEN, KEY_USER};
use crate::tprintln;

use super::authorizer;
use super::events::{SessionEvent, SessionEvents};
use super::guard::{self, RouteDecision, LOGIN_PATH};
use super::principal::Identity;
use super::provider::{Ack, AuthApi, ChangePassword, Credentials, Registration, ResetPassword};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Impersonating,
}

#[derive(Debug, Default)]
struct Inner {
    identity: Option<Arc<Identity>>,
    impersonating: bool,
    /// In-flight login/register/startup checks with no identity to show yet.
    authenticating: usize,
    /// In-flight blocking refreshes.
    loading: usize,
    /// Impersonation requests awaiting the backend; at most one.
    entering: usize,
}

pub struct SessionStore {
    api: Arc<dyn AuthApi>,
    storage: SharedStorage,
    inner: RwLock<Inner>,
    events: SessionEvents,
}

// Decrements a counter in `Inner` when dropped, so a cancelled call cannot leave the
// store stuck in Authenticating or loading.
struct Pending<'a> {
    store: &'a SessionStore,
    which: fn(&mut Inner) -> &mut usize,
}

impl<'a> Pending<'a> {
    fn begin(store: &'a SessionStore, which: fn(&mut Inner) -> &mut usize) -> Self {
        *which(&mut store.inner.write()) += 1;
        Self { store, which }
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        let mut inner = self.store.inner.write();
        let n = (self.which)(&mut inner);
        *n = n.saturating_sub(1);
    }
}

fn authenticating(i: &mut Inner) -> &mut usize { &mut i.authenticating }
fn loading(i: &mut Inner) -> &mut usize { &mut i.loading }
fn entering(i: &mut Inner) -> &mut usize { &mut i.entering }

impl SessionStore {
    pub fn new(api: Arc<dyn AuthApi>, storage: SharedStorage) -> Self {
        Self { api, storage, inner: RwLock::new(Inner::default()), events: SessionEvents::default() }
    }

    // --- queries -----------------------------------------------------------------

    pub fn identity(&self) -> Option<Arc<Identity>> {
        self.inner.read().identity.clone()
    }

    pub fn state(&self) -> SessionState {
        let inner = self.inner.read();
        match (&inner.identity, inner.impersonating) {
            (Some(_), true) => SessionState::Impersonating,
            (Some(_), false) => SessionState::Authenticated,
            (None, _) if inner.authenticating > 0 => SessionState::Authenticating,
            (None, _) => SessionState::Unauthenticated,
        }
    }

    pub fn is_loading(&self) -> bool { self.inner.read().loading > 0 }

    pub fn is_impersonating(&self) -> bool { self.inner.read().impersonating }

    pub fn can(&self, permission: &str) -> bool {
        authorizer::can(self.identity().as_deref(), permission)
    }

    pub fn can_any<S: AsRef<str>>(&self, permissions: &[S]) -> bool {
        authorizer::can_any(self.identity().as_deref(), permissions)
    }

    /// Role-appropriate landing page, if signed in.
    pub fn home_path(&self) -> Option<&'static str> {
        self.identity().map(|id| guard::home_for(&id))
    }

    pub fn guard(&self, path: &str) -> RouteDecision {
        guard::decide(path, self.identity().as_deref())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn storage(&self) -> &SharedStorage { &self.storage }

    // --- lifecycle ---------------------------------------------------------------

    /// Load the persisted session without touching the network. A cached `user`
    /// only counts when a token sits beside it; unreadable JSON counts as absent.
    pub fn restore(&self) -> Option<Arc<Identity>> {
        let has_token = self.storage.get(KEY_TOKEN).is_some_and(|t| !t.is_empty());
        let impersonating = self.storage.get(KEY_IMPERSONATION).is_some_and(|t| !t.is_empty());
        let cached = if has_token { self.storage.get(KEY_USER).and_then(|raw| parse_cached_user(&raw)) } else { None };
        let mut inner = self.inner.write();
        inner.impersonating = has_token && impersonating;
        inner.identity = cached.map(Arc::new);
        debug!(target: "session", has_token, impersonating = inner.impersonating, cached = inner.identity.is_some(), "session.restore");
        inner.identity.clone()
    }

    /// Startup: restore from storage, then confirm with the backend.
    pub async fn start(&self) -> Option<Arc<Identity>> {
        let restored = self.restore();
        let has_token = self.storage.get(KEY_TOKEN).is_some_and(|t| !t.is_empty());
        if !has_token {
            return None;
        }
        if restored.is_some() {
            self.events.publish(SessionEvent::SignedIn);
        }
        let _pending = restored.is_none().then(|| Pending::begin(self, authenticating));
        let _ = self.refresh_identity(true).await;
        self.identity()
    }

    /// Re-query `GET /me` and swap the cached identity on success.
    ///
    /// Transient failures keep the previous identity and only log. An auth failure
    /// (401/403) means the token no longer identifies anyone and ends the session.
    pub async fn refresh_identity(&self, blocking: bool) -> AppResult<Arc<Identity>> {
        let _loading = blocking.then(|| Pending::begin(self, loading));
        match self.api.me().await {
            Ok(fresh) => self.apply_identity(fresh),
            Err(e) if e.is_auth_failure() => {
                warn!(target: "session", code = e.code_str(), "identity refresh rejected, ending session: {}", e.message());
                self.clear_local();
                Err(e)
            }
            Err(e) => {
                warn!(target: "session", code = e.code_str(), "Failed to refresh user: {}", e.message());
                Err(e)
            }
        }
    }

    fn apply_identity(&self, fresh: Identity) -> AppResult<Arc<Identity>> {
        // A refresh that lands after logout must not resurrect the session.
        if !self.storage.get(KEY_TOKEN).is_some_and(|t| !t.is_empty()) {
            debug!(target: "session", "dropping refresh result: no session token");
            return Err(AppError::session_expired("signed_out", "session ended before refresh completed"));
        }
        let fresh = Arc::new(fresh);
        let was_signed_in = {
            let mut inner = self.inner.write();
            let was = inner.identity.is_some();
            inner.identity = Some(Arc::clone(&fresh));
            was
        };
        self.persist_user(&fresh);
        self.events.publish(if was_signed_in { SessionEvent::IdentityReplaced } else { SessionEvent::SignedIn });
        tprintln!("session.refresh user={} perms={}", fresh.id, fresh.permissions.len());
        Ok(fresh)
    }

    fn persist_user(&self, identity: &Identity) {
        match serde_json::to_string(identity) {
            Ok(text) => {
                if let Err(e) = self.storage.set(KEY_USER, &text) {
                    warn!(target: "session", "failed to persist user: {}", e);
                }
            }
            Err(e) => warn!(target: "session", "failed to serialize user: {}", e),
        }
    }

    /// Sign in. The returned identity is cached before this returns, so the caller can
    /// redirect immediately with no unauthenticated flash.
    pub async fn login(&self, creds: &Credentials) -> AppResult<Arc<Identity>> {
        creds.validate()?;
        let _pending = Pending::begin(self, authenticating);
        let grant = self.api.login(creds).await.inspect_err(|e| {
            info!(target: "session", code = e.code_str(), "login rejected");
        })?;
        self.sign_in(&grant.token, grant.identity)
    }

    /// Create an account. Returns the identity when the backend signed the new
    /// account in, `None` when the user still has to log in.
    pub async fn register(&self, reg: &Registration) -> AppResult<Option<Arc<Identity>>> {
        reg.validate()?;
        let _pending = Pending::begin(self, authenticating);
        let outcome = self.api.register(reg).await?;
        match outcome.grant {
            Some(grant) => self.sign_in(&grant.token, grant.identity).map(Some),
            None => Ok(None),
        }
    }

    fn sign_in(&self, token: &str, identity: Identity) -> AppResult<Arc<Identity>> {
        // A fresh sign-in never inherits somebody else's impersonation overlay.
        self.storage.remove(KEY_IMPERSONATION)?;
        self.storage.set(KEY_TOKEN, token)?;
        let identity = Arc::new(identity);
        {
            let mut inner = self.inner.write();
            inner.identity = Some(Arc::clone(&identity));
            inner.impersonating = false;
        }
        self.persist_user(&identity);
        info!(target: "session", user_id = identity.id, super_admin = identity.is_super_admin, "signed in");
        self.events.publish(SessionEvent::SignedIn);
        Ok(identity)
    }

    /// Best-effort backend logout, then unconditional local teardown. Returns the
    /// public entry point to navigate to.
    pub async fn logout(&self) -> &'static str {
        if let Err(e) = self.api.logout().await {
            warn!(target: "session", code = e.code_str(), "Logout API failed (ignored): {}", e.message());
        }
        self.clear_local();
        LOGIN_PATH
    }

    fn clear_local(&self) {
        let had_identity = {
            let mut inner = self.inner.write();
            let had = inner.identity.take().is_some();
            inner.impersonating = false;
            had
        };
        for key in [KEY_IMPERSONATION, KEY_USER, KEY_TOKEN] {
            if let Err(e) = self.storage.remove(key) {
                warn!(target: "session", key, "failed to clear persisted key: {}", e);
            }
        }
        if had_identity {
            info!(target: "session", "signed out");
        }
        self.events.publish(SessionEvent::SignedOut);
    }

    // --- impersonation -------------------------------------------------------------

    /// Act as `tenant_id`. Only a signed-in super-admin may start, and only when no
    /// impersonation is active.
    pub async fn enter_impersonation(&self, tenant_id: i64) -> AppResult<()> {
        let Some(id) = self.identity() else {
            return Err(AppError::session_expired("not_signed_in", "sign in before impersonating"));
        };
        if !id.is_super_admin {
            return Err(AppError::forbidden("not_super_admin", "only super-admins can impersonate a tenant"));
        }
        // Claim the slot before awaiting so a second caller cannot obtain another token.
        let claim = {
            let mut inner = self.inner.write();
            if inner.impersonating || inner.entering > 0 {
                return Err(AppError::conflict("impersonation_active", "exit the current impersonation first"));
            }
            inner.entering += 1;
            Pending { store: self, which: entering }
        };
        let token = self.api.impersonate(tenant_id).await?;

        // Flip the flag before the write so our own storage event reads as already applied.
        self.inner.write().impersonating = true;
        if let Err(e) = self.storage.set(KEY_IMPERSONATION, &token) {
            self.inner.write().impersonating = false;
            return Err(e);
        }
        drop(claim);
        info!(target: "session", tenant_id, "impersonation started");
        self.events.publish(SessionEvent::ImpersonationChanged { active: true });
        let _ = self.refresh_identity(false).await;
        Ok(())
    }

    /// Leave impersonation. The backend is told first, under the overlay token; then
    /// the overlay is dropped so the primary token is what the next request carries.
    pub async fn exit_impersonation(&self) -> AppResult<()> {
        let overlay = self.storage.get(KEY_IMPERSONATION).is_some();
        if !self.is_impersonating() && !overlay {
            return Ok(());
        }
        if let Err(e) = self.api.exit_impersonation().await {
            warn!(target: "session", code = e.code_str(), "Failed to exit impersonation: {}", e.message());
        }
        let was = std::mem::replace(&mut self.inner.write().impersonating, false);
        if let Err(e) = self.storage.remove(KEY_IMPERSONATION) {
            // The overlay still drives the bearer, so memory must keep saying so.
            self.inner.write().impersonating = was || overlay;
            return Err(e);
        }
        info!(target: "session", "impersonation ended");
        self.events.publish(SessionEvent::ImpersonationChanged { active: false });
        let _ = self.refresh_identity(false).await;
        Ok(())
    }

    // --- password flows (never touch session state) ----------------------------

    pub async fn request_password_reset(&self, email: &str) -> AppResult<Ack> {
        if email.trim().is_empty() {
            return Err(AppError::field("email", "Email is required."));
        }
        self.api.forgot_password(email.trim()).await
    }

    pub async fn reset_password(&self, req: &ResetPassword) -> AppResult<Ack> {
        req.validate()?;
        self.api.reset_password(req).await
    }

    pub async fn change_password(&self, req: &ChangePassword) -> AppResult<Ack> {
        req.validate()?;
        self.api.change_password(req).await
    }

    /// Extended profile (`GET /profile`); does not replace the cached identity.
    pub async fn profile(&self) -> AppResult<Identity> {
        self.api.profile().await
    }

    // --- cross-tab sync ----------------------------------------------------------

    /// Follow storage changes made elsewhere (other stores on the same storage, or
    /// other processes via `FileStorage::reload`) until the task is aborted.
    pub fn watch_storage(self: &Arc<Self>) -> JoinHandle<()> {
        let me = Arc::clone(self);
        let mut rx = self.storage.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => me.on_storage_event(&ev).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(target: "session", skipped = n, "storage events lagged; re-reading state");
                        me.reconcile_impersonation().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Reconcile one storage change against in-memory state. Changes this store made
    /// itself already match and are ignored.
    pub async fn on_storage_event(&self, ev: &StorageEvent) {
        match ev.key.as_str() {
            KEY_IMPERSONATION => self.reconcile_impersonation().await,
            KEY_TOKEN if ev.new_value.is_none() => {
                let had_identity = {
                    let mut inner = self.inner.write();
                    inner.impersonating = false;
                    inner.identity.take().is_some()
                };
                if had_identity {
                    info!(target: "session", "session ended elsewhere");
                    self.events.publish(SessionEvent::SignedOut);
                }
            }
            KEY_USER => {
                let Some(raw) = ev.new_value.as_deref() else { return; };
                if !self.storage.get(KEY_TOKEN).is_some_and(|t| !t.is_empty()) {
                    return;
                }
                let Some(parsed) = parse_cached_user(raw) else { return; };
                let was_signed_in = {
                    let mut inner = self.inner.write();
                    if inner.identity.as_deref() == Some(&parsed) {
                        return;
                    }
                    let was = inner.identity.is_some();
                    inner.identity = Some(Arc::new(parsed));
                    was
                };
                self.events.publish(if was_signed_in { SessionEvent::IdentityReplaced } else { SessionEvent::SignedIn });
            }
            _ => {}
        }
    }

    async fn reconcile_impersonation(&self) {
        let active = self.storage.get(KEY_IMPERSONATION).is_some_and(|t| !t.is_empty());
        {
            let mut inner = self.inner.write();
            if inner.impersonating == active {
                return;
            }
            inner.impersonating = active;
        }
        info!(target: "session", active, "impersonation changed elsewhere");
        self.events.publish(SessionEvent::ImpersonationChanged { active });
        if self.identity().is_some() {
            let _ = self.refresh_identity(false).await;
        }
    }
}

fn parse_cached_user(raw: &str) -> Option<Identity> {
    match serde_json::from_str::<serde_json::Value>(raw).map_err(AppError::from).and_then(Identity::from_value) {
        Ok(id) => Some(id),
        Err(e) => {
            debug!(target: "session", "ignoring unreadable cached user: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::fake::{FakeApi, MeReply};
    use crate::storage::{MemoryStorage, SessionStorage};
    use tokio::sync::oneshot;

    fn tenant_user(id: i64, perms: &[&str]) -> Identity {
        Identity {
            id,
            name: format!("user{}", id),
            email: format!("u{}@example.test", id),
            tenant_id: Some(10),
            permissions: perms.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn super_admin() -> Identity {
        Identity { id: 1, name: "root".into(), email: "root@example.test".into(), is_super_admin: true, ..Default::default() }
    }

    fn store_with(api: Arc<FakeApi>, storage: &MemoryStorage) -> SessionStore {
        SessionStore::new(api, storage.shared())
    }

    #[tokio::test]
    async fn login_caches_identity_before_any_refresh() {
        let storage = MemoryStorage::new();
        let api = Arc::new(FakeApi::new(storage.shared()));
        api.set_login(Ok(("tok-1".into(), tenant_user(2, &["view-users"]))));
        let (_tx, rx) = oneshot::channel();
        api.push_me(MeReply::Wait(rx));
        let store = store_with(api.clone(), &storage);

        let id = store.login(&Credentials::new("u2@example.test", "secret")).await.unwrap();
        assert_eq!(id.id, 2);
        assert_eq!(store.identity().unwrap().id, 2);
        assert_eq!(store.state(), SessionState::Authenticated);
        assert!(store.can("view-users"));
        assert_eq!(storage.get(KEY_TOKEN).as_deref(), Some("tok-1"));
        assert!(storage.get(KEY_USER).unwrap().contains("u2@example.test"));
        assert_eq!(store.guard("/login"), RouteDecision::Redirect(guard::DASHBOARD_PATH));
    }

    #[tokio::test]
    async fn failed_login_leaves_state_untouched() {
        let storage = MemoryStorage::new();
        let api = Arc::new(FakeApi::new(storage.shared()));
        api.set_login(Err(AppError::invalid_credentials("invalid_credentials", "Invalid email or password")));
        let store = store_with(api, &storage);
        let err = store.login(&Credentials::new("x@example.test", "nope")).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials { .. }));
        assert_eq!(store.state(), SessionState::Unauthenticated);
        assert_eq!(storage.get(KEY_TOKEN), None);
    }

    #[tokio::test]
    async fn impersonation_round_trip_restores_primary_bearer() {
        let storage = MemoryStorage::new();
        let api = Arc::new(FakeApi::new(storage.shared()));
        api.set_login(Ok(("primary".into(), super_admin())));
        api.set_impersonation_token("imp-77");
        let store = store_with(api.clone(), &storage);
        let mut events = store.subscribe();

        store.login(&Credentials::new("root@example.test", "pw")).await.unwrap();
        store.enter_impersonation(77).await.unwrap();
        assert_eq!(store.state(), SessionState::Impersonating);
        assert_eq!(api.last_bearer(), Some("imp-77".to_string()), "refresh after entering runs under the overlay");

        store.exit_impersonation().await.unwrap();
        assert_eq!(store.state(), SessionState::Authenticated);
        assert_eq!(storage.get(KEY_IMPERSONATION), None);
        assert_eq!(api.last_bearer(), Some("primary".to_string()));
        assert_eq!(crate::client::bearer_token(&storage).as_deref(), Some("primary"));

        let mut seen = Vec::new();
        while let Ok(ev) = events.try_recv() { seen.push(ev); }
        assert!(seen.contains(&SessionEvent::ImpersonationChanged { active: true }));
        assert!(seen.contains(&SessionEvent::ImpersonationChanged { active: false }));
    }

    #[tokio::test]
    async fn exit_notifies_backend_under_overlay_token() {
        let storage = MemoryStorage::new();
        let api = Arc::new(FakeApi::new(storage.shared()));
        api.set_login(Ok(("primary".into(), super_admin())));
        api.set_impersonation_token("imp-1");
        let store = store_with(api.clone(), &storage);
        store.login(&Credentials::new("root@example.test", "pw")).await.unwrap();
        store.enter_impersonation(1).await.unwrap();
        store.exit_impersonation().await.unwrap();
        let calls = api.calls();
        let exit = calls.iter().find(|c| c.0 == "exit_impersonation").unwrap();
        assert_eq!(exit.1.as_deref(), Some("imp-1"));
    }

    #[tokio::test]
    async fn impersonation_requires_idle_super_admin() {
        let storage = MemoryStorage::new();
        let api = Arc::new(FakeApi::new(storage.shared()));
        let store = store_with(api.clone(), &storage);
        assert!(matches!(store.enter_impersonation(3).await, Err(AppError::SessionExpired { .. })));

        api.set_login(Ok(("t".into(), tenant_user(2, &[]))));
        store.login(&Credentials::new("u@example.test", "pw")).await.unwrap();
        assert!(matches!(store.enter_impersonation(3).await, Err(AppError::Forbidden { .. })));

        let storage = MemoryStorage::new();
        let api = Arc::new(FakeApi::new(storage.shared()));
        api.set_login(Ok(("t".into(), super_admin())));
        api.set_impersonation_token("imp");
        let store = store_with(api, &storage);
        store.login(&Credentials::new("root@example.test", "pw")).await.unwrap();
        store.enter_impersonation(3).await.unwrap();
        assert!(matches!(store.enter_impersonation(4).await, Err(AppError::Conflict { .. })));
        assert_eq!(storage.get(KEY_IMPERSONATION).as_deref(), Some("imp"));
    }

    #[tokio::test]
    async fn overlapping_impersonation_requests_get_one_token() {
        let storage = MemoryStorage::new();
        let api = Arc::new(FakeApi::new(storage.shared()));
        api.set_login(Ok(("primary".into(), super_admin())));
        api.set_impersonation_token("imp-7");
        let store = store_with(api.clone(), &storage);
        store.login(&Credentials::new("root@example.test", "pw")).await.unwrap();

        let (a, b) = tokio::join!(store.enter_impersonation(7), store.enter_impersonation(8));
        assert!(a.is_ok());
        assert!(matches!(b, Err(AppError::Conflict { .. })));
        assert_eq!(api.calls().iter().filter(|c| c.0 == "impersonate").count(), 1);
        assert_eq!(storage.get(KEY_IMPERSONATION).as_deref(), Some("imp-7"));

        // A rejected request releases the slot.
        store.exit_impersonation().await.unwrap();
        let denied = Arc::new(FakeApi::new(storage.shared()));
        denied.set_login(Ok(("primary".into(), super_admin())));
        let store = store_with(denied.clone(), &storage);
        store.login(&Credentials::new("root@example.test", "pw")).await.unwrap();
        assert!(matches!(store.enter_impersonation(7).await, Err(AppError::Forbidden { .. })));
        denied.set_impersonation_token("imp-9");
        store.enter_impersonation(9).await.unwrap();
        assert!(store.is_impersonating());
    }

    struct StickyOverlay {
        inner: MemoryStorage,
        fail_remove: std::sync::atomic::AtomicBool,
    }

    impl SessionStorage for StickyOverlay {
        fn get(&self, key: &str) -> Option<String> { self.inner.get(key) }
        fn set(&self, key: &str, value: &str) -> AppResult<()> { self.inner.set(key, value) }
        fn remove(&self, key: &str) -> AppResult<()> {
            if self.fail_remove.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(AppError::storage("storage_io", "read-only file system"));
            }
            self.inner.remove(key)
        }
        fn subscribe(&self) -> broadcast::Receiver<StorageEvent> { self.inner.subscribe() }
    }

    #[tokio::test]
    async fn failed_overlay_removal_keeps_impersonating() {
        let sticky = Arc::new(StickyOverlay { inner: MemoryStorage::new(), fail_remove: Default::default() });
        let api = Arc::new(FakeApi::new(sticky.clone()));
        api.set_login(Ok(("primary".into(), super_admin())));
        api.set_impersonation_token("imp-5");
        let store = SessionStore::new(api.clone(), sticky.clone());
        store.login(&Credentials::new("root@example.test", "pw")).await.unwrap();
        store.enter_impersonation(5).await.unwrap();

        sticky.fail_remove.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(matches!(store.exit_impersonation().await, Err(AppError::Storage { .. })));
        assert!(store.is_impersonating());
        assert_eq!(store.state(), SessionState::Impersonating);
        assert_eq!(crate::client::bearer_token(&sticky.inner).as_deref(), Some("imp-5"));

        sticky.fail_remove.store(false, std::sync::atomic::Ordering::SeqCst);
        store.exit_impersonation().await.unwrap();
        assert!(!store.is_impersonating());
    }

    #[tokio::test]
    async fn logout_clears_storage_even_when_backend_fails() {
        let storage = MemoryStorage::new();
        let api = Arc::new(FakeApi::new(storage.shared()));
        api.set_login(Ok(("tok".into(), super_admin())));
        api.set_impersonation_token("imp");
        api.fail_logout(AppError::network("network_unavailable", "connection refused"));
        let store = store_with(api, &storage);
        store.login(&Credentials::new("root@example.test", "pw")).await.unwrap();
        store.enter_impersonation(5).await.unwrap();

        let target = store.logout().await;
        assert_eq!(target, LOGIN_PATH);
        assert_eq!(storage.get(KEY_TOKEN), None);
        assert_eq!(storage.get(KEY_USER), None);
        assert_eq!(storage.get(KEY_IMPERSONATION), None);
        assert_eq!(store.identity(), None);
        assert_eq!(store.state(), SessionState::Unauthenticated);
        assert_eq!(store.guard("/dashboard"), RouteDecision::Redirect(LOGIN_PATH));
    }

    #[tokio::test]
    async fn out_of_order_refreshes_keep_the_last_arrival() {
        let storage = MemoryStorage::new();
        storage.set(KEY_TOKEN, "tok").unwrap();
        let api = Arc::new(FakeApi::new(storage.shared()));
        let (tx_first, rx_first) = oneshot::channel();
        let (tx_second, rx_second) = oneshot::channel();
        api.push_me(MeReply::Wait(rx_first));
        api.push_me(MeReply::Wait(rx_second));
        let store = Arc::new(store_with(api, &storage));

        let s1 = Arc::clone(&store);
        let first = tokio::spawn(async move { s1.refresh_identity(false).await });
        tokio::task::yield_now().await;
        let s2 = Arc::clone(&store);
        let second = tokio::spawn(async move { s2.refresh_identity(false).await });
        tokio::task::yield_now().await;

        // Second request answers first, the first one lands afterwards.
        tx_second.send(Ok(tenant_user(2, &["b"]))).unwrap();
        second.await.unwrap().unwrap();
        assert_eq!(store.identity().unwrap().id, 2);
        tx_first.send(Ok(tenant_user(1, &["a"]))).unwrap();
        first.await.unwrap().unwrap();

        let held = store.identity().unwrap();
        assert_eq!(held.id, 1);
        assert!(held.has_permission("a"));
        assert!(!held.has_permission("b"), "no merging between responses");
    }

    #[tokio::test]
    async fn transient_refresh_failure_keeps_identity() {
        let storage = MemoryStorage::new();
        let api = Arc::new(FakeApi::new(storage.shared()));
        api.set_login(Ok(("tok".into(), tenant_user(2, &["a"]))));
        api.push_me(MeReply::Now(Err(AppError::server("http_500", "boom"))));
        let store = store_with(api, &storage);
        store.login(&Credentials::new("u@example.test", "pw")).await.unwrap();
        assert!(store.refresh_identity(true).await.is_err());
        assert_eq!(store.identity().unwrap().id, 2);
        assert!(!store.is_loading());
        assert_eq!(storage.get(KEY_TOKEN).as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn rejected_refresh_ends_the_session() {
        let storage = MemoryStorage::new();
        let api = Arc::new(FakeApi::new(storage.shared()));
        api.set_login(Ok(("tok".into(), tenant_user(2, &["a"]))));
        api.push_me(MeReply::Now(Err(AppError::session_expired("session_expired", "Unauthenticated."))));
        let store = store_with(api, &storage);
        store.login(&Credentials::new("u@example.test", "pw")).await.unwrap();
        assert!(store.refresh_identity(false).await.is_err());
        assert_eq!(store.identity(), None);
        assert_eq!(storage.get(KEY_TOKEN), None);
    }

    #[tokio::test]
    async fn refresh_landing_after_logout_is_dropped() {
        let storage = MemoryStorage::new();
        let api = Arc::new(FakeApi::new(storage.shared()));
        api.set_login(Ok(("tok".into(), tenant_user(2, &[]))));
        let (tx, rx) = oneshot::channel();
        api.push_me(MeReply::Wait(rx));
        let store = Arc::new(store_with(api, &storage));
        store.login(&Credentials::new("u@example.test", "pw")).await.unwrap();

        let s = Arc::clone(&store);
        let pending = tokio::spawn(async move { s.refresh_identity(false).await });
        tokio::task::yield_now().await;
        store.logout().await;
        tx.send(Ok(tenant_user(2, &[]))).unwrap();
        assert!(pending.await.unwrap().is_err());
        assert_eq!(store.identity(), None);
        assert_eq!(storage.get(KEY_USER), None);
    }

    #[tokio::test]
    async fn start_restores_then_refreshes() {
        let storage = MemoryStorage::new();
        storage.set(KEY_TOKEN, "tok").unwrap();
        storage.set(KEY_USER, &serde_json::to_string(&tenant_user(2, &["old"])).unwrap()).unwrap();
        let api = Arc::new(FakeApi::new(storage.shared()));
        api.push_me(MeReply::Now(Ok(tenant_user(2, &["new"]))));
        let store = store_with(api, &storage);

        assert_eq!(store.restore().unwrap().permissions.len(), 1);
        assert!(store.can("old"));
        let id = store.start().await.unwrap();
        assert!(id.has_permission("new"));
        assert!(!store.can("old"));
        assert!(storage.get(KEY_USER).unwrap().contains("new"));
    }

    #[tokio::test]
    async fn start_without_token_stays_anonymous() {
        let storage = MemoryStorage::new();
        storage.set(KEY_USER, "{\"id\": 3}").unwrap();
        let api = Arc::new(FakeApi::new(storage.shared()));
        let store = store_with(api.clone(), &storage);
        assert_eq!(store.start().await, None);
        assert_eq!(store.state(), SessionState::Unauthenticated);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn corrupt_cached_user_is_ignored() {
        let storage = MemoryStorage::new();
        storage.set(KEY_TOKEN, "tok").unwrap();
        storage.set(KEY_USER, "{not json").unwrap();
        let api = Arc::new(FakeApi::new(storage.shared()));
        api.push_me(MeReply::Now(Err(AppError::network("network_unavailable", "offline"))));
        let store = store_with(api, &storage);
        assert_eq!(store.restore(), None);
        assert_eq!(store.start().await, None);
        assert_eq!(store.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn other_tab_impersonation_is_observed() {
        let storage = MemoryStorage::new();
        let api_a = Arc::new(FakeApi::new(storage.shared()));
        api_a.set_login(Ok(("primary".into(), super_admin())));
        api_a.set_impersonation_token("imp-9");
        let tab_a = store_with(api_a, &storage);
        tab_a.login(&Credentials::new("root@example.test", "pw")).await.unwrap();

        let api_b = Arc::new(FakeApi::new(storage.shared()));
        let tab_b = Arc::new(store_with(api_b.clone(), &storage));
        tab_b.restore();
        let mut b_events = tab_b.subscribe();
        let mut changes = storage.subscribe();

        tab_a.enter_impersonation(9).await.unwrap();
        while let Ok(ev) = changes.try_recv() {
            tab_b.on_storage_event(&ev).await;
        }
        assert!(tab_b.is_impersonating());
        assert_eq!(tab_b.state(), SessionState::Impersonating);
        assert_eq!(b_events.try_recv().unwrap(), SessionEvent::ImpersonationChanged { active: true });
        assert!(api_b.calls().iter().any(|c| c.0 == "me" && c.1.as_deref() == Some("imp-9")));

        // Replaying our own change is a no-op.
        let before = api_b.calls().len();
        tab_b.on_storage_event(&StorageEvent { key: KEY_IMPERSONATION.into(), old_value: None, new_value: Some("imp-9".into()) }).await;
        assert_eq!(api_b.calls().len(), before);

        tab_a.logout().await;
        while let Ok(ev) = changes.try_recv() {
            tab_b.on_storage_event(&ev).await;
        }
        assert_eq!(tab_b.identity(), None);
        assert!(!tab_b.is_impersonating());
    }

    #[tokio::test]
    async fn watcher_task_follows_storage() {
        let storage = MemoryStorage::new();
        let api = Arc::new(FakeApi::new(storage.shared()));
        let store = Arc::new(store_with(api, &storage));
        let mut events = store.subscribe();
        let handle = store.watch_storage();

        storage.set(KEY_TOKEN, "tok").unwrap();
        storage.set(KEY_USER, &serde_json::to_string(&tenant_user(4, &["x"])).unwrap()).unwrap();
        let ev = tokio::time::timeout(std::time::Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
        assert_eq!(ev, SessionEvent::SignedIn);
        assert!(store.can("x"));
        handle.abort();
    }

    #[tokio::test]
    async fn other_process_writes_reach_store_through_poller() {
        use crate::storage::FileStorage;
        use std::time::Duration;

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("session.json");
        let file = Arc::new(FileStorage::open(&path).unwrap());
        let shared: SharedStorage = file.clone();
        let api = Arc::new(FakeApi::new(shared.clone()));
        let store = Arc::new(SessionStore::new(api, shared));
        let mut events = store.subscribe();
        let poller = file.spawn_poller(Duration::from_millis(20));
        let watcher = store.watch_storage();

        let other = FileStorage::open(&path).unwrap();
        other.set(KEY_TOKEN, "tok").unwrap();
        other.set(KEY_USER, &serde_json::to_string(&super_admin()).unwrap()).unwrap();
        let ev = tokio::time::timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
        assert_eq!(ev, SessionEvent::SignedIn);
        assert_eq!(store.identity().unwrap().id, 1);

        other.set(KEY_IMPERSONATION, "imp-3").unwrap();
        let ev = tokio::time::timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
        assert_eq!(ev, SessionEvent::ImpersonationChanged { active: true });
        assert_eq!(store.state(), SessionState::Impersonating);

        poller.abort();
        watcher.abort();
    }

    #[tokio::test]
    async fn password_flows_validate_locally() {
        let storage = MemoryStorage::new();
        let api = Arc::new(FakeApi::new(storage.shared()));
        let store = store_with(api.clone(), &storage);
        let bad = ResetPassword { email: "a@b.cd".into(), token: "t".into(), password: "abcdef".into(), password_confirmation: "abcdeg".into() };
        assert!(matches!(store.reset_password(&bad).await, Err(AppError::ValidationFailed { .. })));
        assert!(store.request_password_reset("  ").await.is_err());
        assert!(api.calls().is_empty());
        assert!(store.request_password_reset("a@b.cd").await.is_ok());
        assert_eq!(store.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn register_without_token_does_not_sign_in() {
        let storage = MemoryStorage::new();
        let api = Arc::new(FakeApi::new(storage.shared()));
        let store = store_with(api.clone(), &storage);
        let reg = Registration { name: "Nadia".into(), email: "n@example.test".into(), password: "secret1".into(), ..Default::default() };
        assert_eq!(store.register(&reg).await.unwrap(), None);
        assert_eq!(store.state(), SessionState::Unauthenticated);

        api.set_register_grant(("tok-r".into(), tenant_user(8, &[])));
        let id = store.register(&reg).await.unwrap().unwrap();
        assert_eq!(id.id, 8);
        assert_eq!(storage.get(KEY_TOKEN).as_deref(), Some("tok-r"));
    }
}
