use crate::catalog::{self, DiseaseCatalog, OfflineCatalog, SqliteCatalog};
use crate::classifier::LabelSpace;
use crate::config::{AppConfig, AppPaths, HistoryConfig};
use crate::db::DbPool;
use crate::error::{Error, Result};
use crate::history::{self, Recorded};
use crate::models::{
    Diagnosis, DiseaseRecord, HistoryEntry, NewDisease, PersistenceOutcome, ResolvedPrediction,
    UserId, UserRecord,
};
use crate::normalizer::{normalize, NormalizeConfig, Upload};
use crate::resolver::resolve;
use crate::slot::InferenceSlot;
use crate::uploads::UploadStore;
use crate::users;
use rusqlite::Connection;

/// Resolve-and-record entry point plus the read operations around it.
/// Every call checks out its own pooled connection and returns it on exit.
pub struct DiagnosisService {
    slot: InferenceSlot,
    labels: LabelSpace,
    pool: DbPool,
    uploads: UploadStore,
    normalize: NormalizeConfig,
    history: HistoryConfig,
}

impl DiagnosisService {
    pub fn new(
        config: &AppConfig,
        paths: &AppPaths,
        pool: DbPool,
        slot: InferenceSlot,
        labels: LabelSpace,
    ) -> Self {
        Self {
            slot,
            labels,
            pool,
            uploads: UploadStore::new(&paths.uploads_dir),
            normalize: NormalizeConfig::from_app(config),
            history: config.history.clone(),
        }
    }

    pub fn diagnose(&self, upload: &Upload, user: Option<UserId>) -> Result<Diagnosis> {
        let tensor = normalize(upload, &self.normalize)?;
        let scores = self.slot.classify(tensor)?;
        let ranking = self.labels.rank(&scores);

        let conn = match self.pool.get() {
            Ok(conn) => Ok(conn),
            Err(err) => {
                log::warn!("Catalog unavailable, resolving without details: {err}");
                Err(err.to_string())
            }
        };
        let (prediction, disease) = match &conn {
            Ok(conn) => resolve(
                &SqliteCatalog::new(conn),
                &ranking.primary,
                ranking.second.as_ref(),
            ),
            Err(reason) => resolve(
                &OfflineCatalog::new(reason.as_str()),
                &ranking.primary,
                ranking.second.as_ref(),
            ),
        };

        let outcome = match (user, &conn) {
            (None, _) => PersistenceOutcome::Anonymous,
            (Some(user), Ok(conn)) => self.persist(conn, user, upload, &prediction),
            (Some(user), Err(reason)) => {
                log::error!("History not recorded for user {user}: {reason}");
                PersistenceOutcome::Failed {
                    reason: format!("Storage unavailable: {reason}"),
                }
            }
        };

        Ok(Diagnosis {
            prediction,
            disease,
            history: outcome,
            is_guest: user.is_none(),
        })
    }

    fn persist(
        &self,
        conn: &Connection,
        user: UserId,
        upload: &Upload,
        prediction: &ResolvedPrediction,
    ) -> PersistenceOutcome {
        // the image is only written for a user the ledger can reference
        let recorded = users::user_exists(conn, user)
            .and_then(|exists| {
                if exists {
                    self.uploads.save(upload)
                } else {
                    Err(Error::NotFound(format!("user {user}")))
                }
            })
            .and_then(|image_reference| {
                history::record(conn, Some(user), prediction, &image_reference)
            });
        match recorded {
            Ok(Recorded::Stored(history_id)) => PersistenceOutcome::Recorded { history_id },
            Ok(Recorded::Skipped) => PersistenceOutcome::Anonymous,
            Err(err) => {
                log::error!("History not recorded for user {user}: {err}");
                PersistenceOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    /// `limit` falls back to the configured default and is capped at the maximum.
    pub fn history(&self, user: UserId, limit: Option<u32>) -> Result<Vec<HistoryEntry>> {
        let limit = limit
            .unwrap_or(self.history.default_limit)
            .min(self.history.max_limit);
        let conn = self.pool.get()?;
        history::list(&conn, user, limit)
    }

    pub fn diseases(&self) -> Result<Vec<DiseaseRecord>> {
        let conn = self.pool.get()?;
        SqliteCatalog::new(&conn).list_all()
    }

    pub fn disease(&self, id: i64) -> Result<DiseaseRecord> {
        let conn = self.pool.get()?;
        SqliteCatalog::new(&conn)
            .find_by_id(id)?
            .ok_or_else(|| Error::NotFound(format!("disease {id}")))
    }

    pub fn search(&self, name: &str) -> Result<DiseaseRecord> {
        let conn = self.pool.get()?;
        SqliteCatalog::new(&conn)
            .find_by_short_name(name)?
            .ok_or_else(|| Error::NotFound(format!("disease named {:?}", name.trim())))
    }

    pub fn import_catalog(&self, records: &[NewDisease]) -> Result<usize> {
        let mut conn = self.pool.get()?;
        catalog::import_catalog(&mut conn, records)
    }

    pub fn add_user(&self, full_name: &str, email: &str) -> Result<UserRecord> {
        let conn = self.pool.get()?;
        users::create_user(&conn, full_name, email)
    }
}
