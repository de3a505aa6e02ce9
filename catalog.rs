use crate::error::{Result, StorageError};
use crate::models::{millis_to_datetime, DiseaseRecord, NewDisease};
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Read side of the disease catalog, as the resolver sees it.
pub trait DiseaseCatalog {
    fn find_by_id(&self, id: i64) -> Result<Option<DiseaseRecord>>;
    fn find_by_short_name(&self, name: &str) -> Result<Option<DiseaseRecord>>;
    fn list_all(&self) -> Result<Vec<DiseaseRecord>>;
}

const DISEASE_COLUMNS: &str = "id, short_name, scientific_name, description_en, description_ar, \
     symptoms_en, symptoms_ar, treatment_en, treatment_ar, created_at";

pub struct SqliteCatalog<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteCatalog<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl DiseaseCatalog for SqliteCatalog<'_> {
    fn find_by_id(&self, id: i64) -> Result<Option<DiseaseRecord>> {
        let sql = format!("SELECT {DISEASE_COLUMNS} FROM diseases WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], disease_from_row)
            .optional()?)
    }

    fn find_by_short_name(&self, name: &str) -> Result<Option<DiseaseRecord>> {
        // short_name is declared COLLATE NOCASE, so `=` is case-insensitive.
        let sql = format!("SELECT {DISEASE_COLUMNS} FROM diseases WHERE short_name = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![name.trim()], disease_from_row)
            .optional()?)
    }

    fn list_all(&self) -> Result<Vec<DiseaseRecord>> {
        let sql = format!("SELECT {DISEASE_COLUMNS} FROM diseases ORDER BY short_name, id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], disease_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

/// Stand-in used when no storage connection could be obtained; every lookup fails
/// so the resolver takes its degraded path.
pub struct OfflineCatalog {
    reason: String,
}

impl OfflineCatalog {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn unavailable<T>(&self) -> Result<T> {
        Err(StorageError::Offline(self.reason.clone()).into())
    }
}

impl DiseaseCatalog for OfflineCatalog {
    fn find_by_id(&self, _id: i64) -> Result<Option<DiseaseRecord>> {
        self.unavailable()
    }

    fn find_by_short_name(&self, _name: &str) -> Result<Option<DiseaseRecord>> {
        self.unavailable()
    }

    fn list_all(&self) -> Result<Vec<DiseaseRecord>> {
        self.unavailable()
    }
}

fn disease_from_row(row: &Row<'_>) -> rusqlite::Result<DiseaseRecord> {
    Ok(DiseaseRecord {
        id: row.get(0)?,
        short_name: row.get(1)?,
        scientific_name: row.get(2)?,
        description_en: row.get(3)?,
        description_ar: row.get(4)?,
        symptoms_en: row.get(5)?,
        symptoms_ar: row.get(6)?,
        treatment_en: row.get(7)?,
        treatment_ar: row.get(8)?,
        created_at: millis_to_datetime(row.get(9)?),
    })
}

/// Inserts or updates catalog rows in one transaction, matching on short_name
/// case-insensitively. Returns the number of rows written.
pub fn import_catalog(conn: &mut Connection, records: &[NewDisease]) -> Result<usize> {
    let tx = conn.transaction()?;
    let now = chrono::Utc::now().timestamp_millis();
    let mut written = 0usize;
    for record in records {
        let short_name = record.short_name.trim();
        if short_name.is_empty() {
            log::warn!("Skipping catalog row with empty short_name");
            continue;
        }
        written += tx.execute(
            "INSERT INTO diseases (id, short_name, scientific_name, description_en, description_ar,
                 symptoms_en, symptoms_ar, treatment_en, treatment_ar, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(short_name) DO UPDATE SET
                 scientific_name = excluded.scientific_name,
                 description_en = excluded.description_en,
                 description_ar = excluded.description_ar,
                 symptoms_en = excluded.symptoms_en,
                 symptoms_ar = excluded.symptoms_ar,
                 treatment_en = excluded.treatment_en,
                 treatment_ar = excluded.treatment_ar",
            params![
                record.id,
                short_name,
                record.scientific_name,
                record.description_en,
                record.description_ar,
                record.symptoms_en,
                record.symptoms_ar,
                record.treatment_en,
                record.treatment_ar,
                now,
            ],
        )?;
    }
    tx.commit()?;
    log::info!("Imported {written} catalog rows");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    fn seed(conn: &mut Connection) {
        let rows = vec![
            NewDisease {
                id: Some(1),
                short_name: "Apple scab".into(),
                scientific_name: Some("Venturia inaequalis".into()),
                ..NewDisease::default()
            },
            NewDisease {
                id: Some(4),
                short_name: "Apple healthy".into(),
                ..NewDisease::default()
            },
            NewDisease {
                id: Some(2),
                short_name: "Tomato Late blight".into(),
                scientific_name: Some("Phytophthora infestans".into()),
                ..NewDisease::default()
            },
        ];
        assert_eq!(import_catalog(conn, &rows).unwrap(), 3);
    }

    #[test]
    fn finds_by_id_and_case_insensitive_name() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        seed(&mut conn);
        let catalog = SqliteCatalog::new(&conn);

        let by_id = catalog.find_by_id(2).unwrap().unwrap();
        assert_eq!(by_id.short_name, "Tomato Late blight");

        let by_name = catalog.find_by_short_name("apple SCAB").unwrap().unwrap();
        assert_eq!(by_name.id, 1);
        assert_eq!(by_name.scientific_name.as_deref(), Some("Venturia inaequalis"));

        assert!(catalog.find_by_id(99).unwrap().is_none());
        assert!(catalog.find_by_short_name("Corn healthy").unwrap().is_none());
    }

    #[test]
    fn list_all_orders_by_short_name() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        seed(&mut conn);
        let names: Vec<String> = SqliteCatalog::new(&conn)
            .list_all()
            .unwrap()
            .into_iter()
            .map(|d| d.short_name)
            .collect();
        assert_eq!(names, vec!["Apple healthy", "Apple scab", "Tomato Late blight"]);
    }

    #[test]
    fn reimport_updates_by_short_name_regardless_of_case() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        seed(&mut conn);
        let update = vec![NewDisease {
            short_name: "APPLE SCAB".into(),
            treatment_en: Some("Fungicide in early spring".into()),
            ..NewDisease::default()
        }];
        import_catalog(&mut conn, &update).unwrap();

        let catalog = SqliteCatalog::new(&conn);
        assert_eq!(catalog.list_all().unwrap().len(), 3);
        let scab = catalog.find_by_id(1).unwrap().unwrap();
        assert_eq!(scab.short_name, "Apple scab");
        assert_eq!(scab.treatment_en.as_deref(), Some("Fungicide in early spring"));
    }

    #[test]
    fn empty_short_names_are_skipped() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let rows = vec![NewDisease {
            short_name: "   ".into(),
            ..NewDisease::default()
        }];
        assert_eq!(import_catalog(&mut conn, &rows).unwrap(), 0);
    }

    #[test]
    fn offline_catalog_always_errors() {
        let catalog = OfflineCatalog::new("pool exhausted");
        assert!(catalog.find_by_id(1).is_err());
        assert!(catalog.find_by_short_name("Apple scab").is_err());
        assert!(catalog.list_all().is_err());
    }
}
