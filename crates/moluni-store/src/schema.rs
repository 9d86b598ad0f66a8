//! Database schema SQL.

/// Calculations and their properties. One property row per (job, name).
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS calculations (
    id TEXT PRIMARY KEY,
    canonical_form TEXT,
    alternate_form TEXT,
    formula TEXT,
    calculation_type TEXT,
    status TEXT NOT NULL,
    submission_time TEXT,
    completion_time TEXT,
    diagnostic TEXT
);

CREATE TABLE IF NOT EXISTS properties (
    calculation_id TEXT NOT NULL REFERENCES calculations(id) ON DELETE CASCADE,
    property_name TEXT NOT NULL,
    property_value REAL NOT NULL,
    units TEXT,
    PRIMARY KEY (calculation_id, property_name)
);

CREATE INDEX IF NOT EXISTS idx_calculations_status ON calculations(status);
CREATE INDEX IF NOT EXISTS idx_properties_name ON properties(property_name);
"#;
