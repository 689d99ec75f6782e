//! In-memory collaborators for driving the gate in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::{AuthError, StoreError};
use crate::gate::{GateConfig, SessionGate};
use crate::notify::{Notice, Notifier};
use crate::provider::{EventHub, IdentityProvider, Subscription};
use crate::storage::{MemoryStorage, SessionStorage};
use crate::store::{Query, Record, RecordStore};
use crate::types::{ALLOWED_EMAILS, AuthEvent, PROJECTS, RedirectTokens, Session, SignOutScope, User};

pub const SESSION_KEY: &str = "sb-test-auth-token";
pub const VERIFIER_KEY: &str = "sb-test-code-verifier";
pub const USER_EMAIL: &str = "user@example.com";
pub const STRANGER_EMAIL: &str = "stranger@example.com";
pub const PASSWORD: &str = "hunter2";

// =============================================================================
// FakeProvider
// =============================================================================

pub struct FakeProvider {
    hub: EventHub,
    storage: Arc<MemoryStorage>,
    accounts: HashMap<String, User>,
    current: Mutex<Option<Session>>,
    sign_outs: Mutex<Vec<SignOutScope>>,
    otp_requests: Mutex<Vec<String>>,
    issued: AtomicUsize,
    sign_in_delay: Mutex<Option<Duration>>,
}

impl FakeProvider {
    pub fn new(storage: Arc<MemoryStorage>) -> Self {
        let accounts = [(USER_EMAIL, "u-user"), (STRANGER_EMAIL, "u-stranger")]
            .into_iter()
            .map(|(email, id)| (email.to_owned(), User { id: id.to_owned(), email: email.to_owned() }))
            .collect();
        Self {
            hub: EventHub::new(),
            storage,
            accounts,
            current: Mutex::new(None),
            sign_outs: Mutex::new(Vec::new()),
            otp_requests: Mutex::new(Vec::new()),
            issued: AtomicUsize::new(0),
            sign_in_delay: Mutex::new(None),
        }
    }

    pub fn issue(&self, email: &str) -> Session {
        let n = self.issued.fetch_add(1, Ordering::Relaxed);
        let user = self
            .accounts
            .get(email)
            .cloned()
            .unwrap_or_else(|| User { id: format!("u-{n}"), email: email.to_owned() });
        Session {
            access_token: format!("access-{n}"),
            refresh_token: format!("refresh-{n}"),
            expires_at: Some(4_000_000_000),
            user,
        }
    }

    /// Persist `session` as if a previous run had signed in.
    pub fn persist(&self, session: &Session) {
        self.storage
            .set_item(SESSION_KEY, &serde_json::to_string(session).unwrap())
            .unwrap();
        self.storage.set_item(VERIFIER_KEY, "verifier").unwrap();
        *self.current.lock().unwrap() = Some(session.clone());
    }

    pub fn delay_sign_in(&self, delay: Duration) {
        *self.sign_in_delay.lock().unwrap() = Some(delay);
    }

    pub fn emit(&self, event: &AuthEvent) {
        self.hub.emit(event);
    }

    pub fn sign_out_calls(&self) -> Vec<SignOutScope> {
        self.sign_outs.lock().unwrap().clone()
    }

    pub fn otp_requests(&self) -> Vec<String> {
        self.otp_requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl IdentityProvider for FakeProvider {
    async fn current_session(&self) -> Option<Session> {
        self.current.lock().unwrap().clone()
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let delay = *self.sign_in_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if password != PASSWORD || !self.accounts.contains_key(email) {
            return Err(AuthError::Rejected("Invalid login credentials".into()));
        }
        let session = self.issue(email);
        self.persist(&session);
        self.hub.emit(&AuthEvent::signed_in(session.clone()));
        Ok(session)
    }

    async fn sign_in_with_otp(&self, email: &str, _redirect_to: Option<&str>) -> Result<(), AuthError> {
        if !email.contains('@') {
            return Err(AuthError::Rejected("Unable to validate email address: invalid format".into()));
        }
        self.otp_requests.lock().unwrap().push(email.to_owned());
        Ok(())
    }

    async fn session_from_redirect(&self, tokens: RedirectTokens) -> Result<Session, AuthError> {
        if tokens.access_token == "expired" {
            return Err(AuthError::Rejected("invalid JWT: token is expired".into()));
        }
        let mut session = self.issue(USER_EMAIL);
        session.access_token = tokens.access_token;
        session.refresh_token = tokens.refresh_token;
        self.persist(&session);
        self.hub.emit(&AuthEvent::signed_in(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self, scope: SignOutScope) -> Result<(), AuthError> {
        self.sign_outs.lock().unwrap().push(scope);
        *self.current.lock().unwrap() = None;
        // Only the session key; residual keys are left for the gate to erase.
        self.storage.remove_item(SESSION_KEY)?;
        tokio::task::yield_now().await;
        self.hub.emit(&AuthEvent::signed_out());
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    fn storage_key_prefix(&self) -> String {
        "sb-test-".to_owned()
    }
}

// =============================================================================
// FakeStore
// =============================================================================

#[derive(Default)]
pub struct FakeStore {
    allowed: Mutex<Vec<String>>,
    projects: Mutex<Vec<Record>>,
    failing_lookups: AtomicUsize,
    lookup_delay: Mutex<Option<Duration>>,
    lookup_yields: AtomicBool,
    project_delay: Mutex<Option<Duration>>,
    fail_project_queries: AtomicBool,
    fail_inserts: AtomicBool,
    lookups: AtomicUsize,
    clock: AtomicI64,
}

impl FakeStore {
    pub fn allowing(emails: &[&str]) -> Self {
        let store = Self::default();
        *store.allowed.lock().unwrap() = emails.iter().map(|e| (*e).to_owned()).collect();
        store
    }

    pub fn fail_next_lookups(&self, count: usize) {
        self.failing_lookups.store(count, Ordering::SeqCst);
    }

    pub fn delay_lookups(&self, delay: Duration) {
        *self.lookup_delay.lock().unwrap() = Some(delay);
    }

    pub fn yield_during_lookups(&self) {
        self.lookup_yields.store(true, Ordering::SeqCst);
    }

    /// Delay every `projects` query and insert.
    pub fn delay_projects(&self, delay: Duration) {
        *self.project_delay.lock().unwrap() = Some(delay);
    }

    async fn project_latency(&self) {
        let delay = *self.project_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn fail_project_queries(&self, fail: bool) {
        self.fail_project_queries.store(fail, Ordering::SeqCst);
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn rows(&self) -> Vec<Record> {
        self.projects.lock().unwrap().clone()
    }

    pub fn seed_project(&self, name: &str, owner_uid: &str) {
        let record = json!({ "name": name, "owner_uid": owner_uid, "status": "active" });
        self.store_project(record);
    }

    /// Store a row exactly as given, apart from the store-assigned columns.
    pub fn insert_raw(&self, record: Record) {
        self.store_project(record);
    }

    fn store_project(&self, mut record: Record) {
        let tick = self.clock.fetch_add(60, Ordering::SeqCst);
        let updated_at = OffsetDateTime::from_unix_timestamp(1_700_000_000 + tick)
            .unwrap()
            .format(&Rfc3339)
            .unwrap();
        let mut projects = self.projects.lock().unwrap();
        record["id"] = json!(projects.len() + 1);
        record["updated_at"] = json!(updated_at);
        projects.push(record);
    }
}

#[async_trait::async_trait]
impl RecordStore for FakeStore {
    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Record>, StoreError> {
        match collection {
            ALLOWED_EMAILS => {
                self.lookups.fetch_add(1, Ordering::SeqCst);
                if self.lookup_yields.load(Ordering::SeqCst) {
                    tokio::task::yield_now().await;
                }
                let delay = *self.lookup_delay.lock().unwrap();
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if self
                    .failing_lookups
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    return Err(StoreError::Request("network unreachable".into()));
                }
                let rows: Vec<Record> = self
                    .allowed
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|email| json!({ "email": email }))
                    .filter(|row| query.matches(row))
                    .take(query.limit.unwrap_or(usize::MAX))
                    .collect();
                Ok(rows)
            }
            PROJECTS => {
                self.project_latency().await;
                if self.fail_project_queries.load(Ordering::SeqCst) {
                    return Err(StoreError::Response { status: 503, message: "upstream unavailable".into() });
                }
                let mut rows: Vec<Record> = self
                    .projects
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|row| query.matches(row))
                    .cloned()
                    .collect();
                if let Some(order) = &query.order {
                    rows.sort_by(|a, b| {
                        let (a, b) = (a[&order.column].to_string(), b[&order.column].to_string());
                        if order.ascending { a.cmp(&b) } else { b.cmp(&a) }
                    });
                }
                Ok(rows)
            }
            other => Err(StoreError::Response { status: 404, message: format!("unknown collection {other}") }),
        }
    }

    async fn insert(&self, collection: &str, record: Record) -> Result<(), StoreError> {
        if collection != PROJECTS {
            return Err(StoreError::Response { status: 404, message: format!("unknown collection {collection}") });
        }
        self.project_latency().await;
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Response { status: 403, message: "new row violates row-level security".into() });
        }
        self.store_project(record);
        Ok(())
    }
}

// =============================================================================
// RecordingNotifier
// =============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn count(&self, notice: &Notice) -> usize {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .filter(|n| *n == notice)
            .count()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub gate: SessionGate,
    pub provider: Arc<FakeProvider>,
    pub store: Arc<FakeStore>,
    pub storage: Arc<MemoryStorage>,
    pub notifier: Arc<RecordingNotifier>,
    pub events: Subscription,
}

impl Harness {
    /// Feed every already-delivered lifecycle event to the gate.
    pub async fn pump(&mut self) {
        while let Some(event) = self.events.try_recv() {
            self.gate.handle_event(event).await;
        }
    }
}

/// Gate whose allow-list contains only [`USER_EMAIL`].
pub fn harness() -> Harness {
    harness_with(FakeStore::allowing(&[USER_EMAIL]))
}

pub fn harness_with(store: FakeStore) -> Harness {
    let storage = Arc::new(MemoryStorage::new());
    let provider = Arc::new(FakeProvider::new(storage.clone()));
    let store = Arc::new(store);
    let notifier = Arc::new(RecordingNotifier::default());
    let gate = SessionGate::new(
        provider.clone(),
        store.clone(),
        storage.clone(),
        notifier.clone(),
        GateConfig { request_timeout: Duration::from_secs(5) },
    );
    let events = provider.subscribe();
    Harness { gate, provider, store, storage, notifier, events }
}
