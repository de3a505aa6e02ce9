/// MIGRATION 0001: users and the disease catalog.
pub const MIGRATION_0001: &str = r#"
-- Users Table: identity rows referenced by history. Credentials live elsewhere.
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    full_name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE COLLATE NOCASE,
    created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER) * 1000)
);

-- Diseases Table: canonical identities the classifier output resolves to.
CREATE TABLE IF NOT EXISTS diseases (
    id INTEGER PRIMARY KEY,
    short_name TEXT NOT NULL UNIQUE COLLATE NOCASE,
    scientific_name TEXT,
    description_en TEXT,
    description_ar TEXT,
    symptoms_en TEXT,
    symptoms_ar TEXT,
    treatment_en TEXT,
    treatment_ar TEXT,
    created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER) * 1000)
);
"#;

/// MIGRATION 0002: prediction history.
pub const MIGRATION_0002: &str = r#"
-- History Table: append-only, one row per recorded prediction.
CREATE TABLE IF NOT EXISTS history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    image_reference TEXT NOT NULL,
    predicted_class TEXT NOT NULL,
    raw_label TEXT NOT NULL,
    plant TEXT NOT NULL,
    condition TEXT NOT NULL,
    confidence REAL NOT NULL, -- 0.0 to 1.0
    has_details BOOLEAN NOT NULL DEFAULT 0,
    second_guess TEXT,
    second_confidence REAL,
    created_at INTEGER NOT NULL, -- Unix epoch millis
    FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_history_user_created ON history (user_id, created_at DESC, id DESC);
CREATE INDEX IF NOT EXISTS idx_history_predicted_class ON history (predicted_class COLLATE NOCASE);
"#;

/// Ordered list applied by `db::run_migrations`; position + 1 is the schema version.
pub const MIGRATIONS: &[&str] = &[MIGRATION_0001, MIGRATION_0002];
