//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS series (
            id TEXT PRIMARY KEY,
            name TEXT,
            metric TEXT NOT NULL CHECK (metric IN ('price', 'tariff', 'freight', 'fx')),
            category TEXT,
            sector TEXT
        );

        CREATE TABLE IF NOT EXISTS observations (
            series_id TEXT NOT NULL,
            date TEXT NOT NULL,
            value REAL NOT NULL,
            source TEXT,
            PRIMARY KEY (series_id, date)
        );

        CREATE TABLE IF NOT EXISTS anomalies (
            id TEXT PRIMARY KEY,
            type TEXT NOT NULL
                CHECK (type IN ('price_spike', 'tariff_change', 'freight_surge', 'fx_volatility')),
            product_id TEXT NOT NULL,
            severity TEXT NOT NULL CHECK (severity IN ('low', 'medium', 'high', 'critical')),
            detected_at TEXT NOT NULL,
            details_json TEXT NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS alerts (
            id TEXT PRIMARY KEY,
            anomaly_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'new' CHECK (status IN ('new', 'viewed', 'resolved')),
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_series_category ON series(category);
        CREATE INDEX IF NOT EXISTS idx_observations_date ON observations(date);
        CREATE INDEX IF NOT EXISTS idx_anomalies_product ON anomalies(product_id);
        CREATE INDEX IF NOT EXISTS idx_alerts_anomaly ON alerts(anomaly_id);",
    )?;

    // Migration: risk fields on alerts, absent until first scored.
    let has_risk: i32 = conn
        .query_row(
            "SELECT count(*) FROM pragma_table_info('alerts') WHERE name = 'risk_score'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if has_risk == 0 {
        conn.execute_batch(
            "ALTER TABLE alerts ADD COLUMN risk_score REAL
                CHECK (risk_score IS NULL OR (risk_score >= 0 AND risk_score <= 100));
             ALTER TABLE alerts ADD COLUMN risk_level TEXT;
             ALTER TABLE alerts ADD COLUMN risk_breakdown TEXT;
             ALTER TABLE alerts ADD COLUMN risk_updated_at TEXT;
             INSERT OR IGNORE INTO schema_version (version) VALUES (2);",
        )?;
    }

    conn.execute("INSERT OR IGNORE INTO schema_version (version) VALUES (1)", [])?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        for table in ["series", "observations", "anomalies", "alerts"] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 0);
        }

        let risk_cols: i64 = conn
            .query_row(
                "SELECT count(*) FROM pragma_table_info('alerts') WHERE name LIKE 'risk_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(risk_cols, 4);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap(); // Should not error
    }

    #[test]
    fn test_observation_dates_unique_per_series() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn.execute(
            "INSERT INTO observations (series_id, date, value) VALUES ('p', '2024-01-01', 1.0)",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO observations (series_id, date, value) VALUES ('p', '2024-01-01', 2.0)",
            [],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_risk_score_range_enforced() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn.execute("INSERT INTO alerts (id, anomaly_id) VALUES ('a', 'x')", []).unwrap();
        let bad = conn.execute("UPDATE alerts SET risk_score = 120 WHERE id = 'a'", []);
        assert!(bad.is_err());
    }
}
