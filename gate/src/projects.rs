//! Project listing and creation, reachable only from `Authorized`.
//!
//! The cached list is replaced wholesale on a successful load and never
//! touched on failure, so repeated loads cannot duplicate rows and a failed
//! one cannot leave a half-applied list behind.

#[cfg(test)]
#[path = "projects_test.rs"]
mod projects_test;

use tracing::{debug, info, warn};

use crate::error::{GateError, StoreError};
use crate::gate::{GateState, SessionGate};
use crate::notify::Notice;
use crate::store::{Query, Record};
use crate::types::{NewProject, PROJECTS, Project};

impl SessionGate {
    /// Fetch every project, most recently updated first, and cache the list.
    ///
    /// # Errors
    ///
    /// - [`GateError::NotAuthorized`] outside `Authorized`.
    /// - [`GateError::Record`] if the store fails; the cached list is kept.
    /// - [`GateError::Superseded`] if the session changed before the response arrived.
    pub async fn load_projects(&self) -> Result<Vec<Project>, GateError> {
        let generation = self.authorized_generation()?;

        let query = Query::all().order_desc("updated_at");
        let fetched = match self.bounded(self.store.query(PROJECTS, &query)).await {
            Some(result) => result.and_then(decode_projects),
            None => Err(StoreError::Request(self.timeout_message("project list"))),
        };
        let projects = match fetched {
            Ok(projects) => projects,
            Err(e) => return self.record_failed(generation, e).await,
        };

        {
            let mut inner = self.inner();
            if !inner.is_current(generation) {
                debug!("session changed during project list; result dropped");
                return Err(GateError::Superseded);
            }
            inner.projects.clone_from(&projects);
        }
        info!(count = projects.len(), "projects loaded");
        Ok(projects)
    }

    /// Insert a project owned by the signed-in user, then reload the list.
    ///
    /// # Errors
    ///
    /// - [`GateError::InvalidInput`] if `name` is blank.
    /// - [`GateError::NotAuthorized`] outside `Authorized`.
    /// - [`GateError::Record`] if the insert or the reload fails.
    /// - [`GateError::Superseded`] if the session changed before the response arrived.
    pub async fn create_project(&self, name: &str) -> Result<(), GateError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GateError::InvalidInput("project name is required"));
        }

        let (generation, owner_uid) = {
            let inner = self.inner();
            let Some(session) = inner.session.as_ref().filter(|_| inner.state == GateState::Authorized) else {
                return Err(GateError::NotAuthorized);
            };
            (inner.generation, session.user.id.clone())
        };

        let payload = NewProject { name: name.to_owned(), owner_uid };
        let record = serde_json::to_value(&payload).map_err(|e| StoreError::Parse(e.to_string()))?;
        let inserted = match self.bounded(self.store.insert(PROJECTS, record)).await {
            Some(result) => result,
            None => Err(StoreError::Request(self.timeout_message("project insert"))),
        };
        if let Err(e) = inserted {
            return self.record_failed(generation, e).await;
        }

        if !self.inner().is_current(generation) {
            debug!(name, "session changed during project insert; refresh skipped");
            return Err(GateError::Superseded);
        }
        info!(name, "project created");
        self.load_projects().await.map(|_| ())
    }

    fn authorized_generation(&self) -> Result<u64, GateError> {
        let inner = self.inner();
        if inner.state == GateState::Authorized {
            Ok(inner.generation)
        } else {
            Err(GateError::NotAuthorized)
        }
    }

    async fn record_failed<T>(&self, generation: u64, error: StoreError) -> Result<T, GateError> {
        if !self.inner().is_current(generation) {
            debug!(error = %error, "record operation failed after session change; ignored");
            return Err(GateError::Superseded);
        }
        warn!(error = %error, "record operation failed");
        self.notifier
            .notify(Notice::RecordFailed(error.to_string()))
            .await;
        Err(GateError::Record(error))
    }
}

fn decode_projects(rows: Vec<Record>) -> Result<Vec<Project>, StoreError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(|e| StoreError::Parse(e.to_string())))
        .collect()
}
