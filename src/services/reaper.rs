use std::sync::Arc;

use chrono::{Duration, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    entities::warehouse_session::{self, SessionStatus},
    errors::ServiceError,
    services::sessions::{SessionService, SessionView},
};

/// System actor recorded for reaper-initiated abandonments.
const SYSTEM_USER: Uuid = Uuid::nil();

#[derive(Debug, Clone, Serialize)]
pub struct CleanupFailure {
    pub session_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub processed: usize,
    pub abandoned: Vec<Uuid>,
    pub failed: Vec<CleanupFailure>,
}

/// Finds sessions with no recorded activity beyond the threshold and
/// abandons them, restoring their orders. Invoked by an external scheduled
/// job, not self-scheduling.
#[derive(Clone)]
pub struct SessionReaper {
    db: Arc<DatabaseConnection>,
    sessions: Arc<SessionService>,
}

impl SessionReaper {
    pub fn new(db: Arc<DatabaseConnection>, sessions: Arc<SessionService>) -> Self {
        Self { db, sessions }
    }

    /// Abandons every active session inactive for longer than
    /// `hours_inactive`. One session failing does not stop the sweep; the
    /// report carries per-session failures.
    #[instrument(skip(self))]
    pub async fn cleanup_expired_sessions(
        &self,
        hours_inactive: i64,
    ) -> Result<CleanupReport, ServiceError> {
        let stale = self.find_stale(None, hours_inactive).await?;
        Ok(self.sweep(stale).await)
    }

    /// Abandons the given candidates one by one. A candidate can lose a
    /// race between discovery and abandonment (an operator abandons or
    /// completes it, or a concurrent sweep gets there first); such failures
    /// are recorded per session and never stop the sweep.
    pub async fn sweep(&self, stale: Vec<warehouse_session::Model>) -> CleanupReport {
        let processed = stale.len();
        let mut abandoned = Vec::new();
        let mut failed = Vec::new();

        for session in stale {
            match self
                .sessions
                .abandon_session(
                    session.id,
                    session.store_id,
                    SYSTEM_USER,
                    Some("stale".to_string()),
                )
                .await
            {
                Ok(_) => abandoned.push(session.id),
                Err(e) => {
                    error!(session_id = %session.id, error = %e, "failed to abandon stale session");
                    failed.push(CleanupFailure {
                        session_id: session.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            processed,
            abandoned = abandoned.len(),
            failed = failed.len(),
            "stale session cleanup finished"
        );
        CleanupReport {
            processed,
            abandoned,
            failed,
        }
    }

    /// Read-only preview of cleanup candidates for one store, for human
    /// review before a forced cleanup.
    #[instrument(skip(self))]
    pub async fn get_stale_sessions(
        &self,
        store_id: Uuid,
        hours_inactive: i64,
    ) -> Result<Vec<SessionView>, ServiceError> {
        let stale = self.find_stale(Some(store_id), hours_inactive).await?;
        let mut views = Vec::with_capacity(stale.len());
        for session in &stale {
            views.push(self.sessions.view(session).await?);
        }
        Ok(views)
    }

    async fn find_stale(
        &self,
        store_id: Option<Uuid>,
        hours_inactive: i64,
    ) -> Result<Vec<warehouse_session::Model>, ServiceError> {
        let cutoff = Utc::now() - Duration::hours(hours_inactive.max(1));
        let mut query = warehouse_session::Entity::find()
            .filter(
                warehouse_session::Column::Status
                    .is_in([SessionStatus::Picking, SessionStatus::Packing]),
            )
            .filter(warehouse_session::Column::LastActivityAt.lt(cutoff))
            .order_by_asc(warehouse_session::Column::LastActivityAt);
        if let Some(store_id) = store_id {
            query = query.filter(warehouse_session::Column::StoreId.eq(store_id));
        }
        Ok(query.all(self.db.as_ref()).await?)
    }
}
