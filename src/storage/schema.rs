//! SQLite schema definitions for PMU programme data
//!
//! Tables:
//! - countries: Country by code
//! - venues: Hippodromes by code
//! - meetings: Réunions keyed by (meeting_date, official_number)
//! - races: Courses keyed by (meeting_date, meeting_number, order_number)
//! - participants: Partants keyed by (race_id, program_number)
//!
//! The `*_COLUMNS` constants are the per-entity allow-lists. Insert
//! statements are built from them, and [`validate_columns`] checks a live
//! database against them.

use anyhow::{bail, Result};
use rusqlite::Connection;

pub const COUNTRY_COLUMNS: &[&str] = &["code", "name"];

pub const VENUE_COLUMNS: &[&str] = &["code", "short_name", "long_name", "country_code"];

pub const MEETING_COLUMNS: &[&str] = &[
    "meeting_date",
    "official_number",
    "external_number",
    "nature",
    "venue_code",
    "country_code",
];

pub const RACE_COLUMNS: &[&str] = &[
    "meeting_date",
    "meeting_number",
    "order_number",
    "name",
    "start_time",
    "distance",
    "discipline",
    "specialty",
    "track_bias",
    "prize_money",
    "declared_runners",
    "venue_code",
];

pub const PARTICIPANT_COLUMNS: &[&str] = &[
    "race_id",
    "program_number",
    "name",
    "age",
    "sex",
    "form",
    "odds",
    "commentary",
    "finishing_order",
    "driver",
    "trainer",
];

/// Tables and their allow-listed columns
pub const TABLES: &[(&str, &[&str])] = &[
    ("countries", COUNTRY_COLUMNS),
    ("venues", VENUE_COLUMNS),
    ("meetings", MEETING_COLUMNS),
    ("races", RACE_COLUMNS),
    ("participants", PARTICIPANT_COLUMNS),
];

/// Build `INSERT INTO table (cols...) VALUES (?1, ...)` from an allow-list
pub fn insert_sql(table: &str, columns: &[&str]) -> String {
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    )
}

/// Create all tables in the database
pub fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS countries (
            code TEXT PRIMARY KEY,
            name TEXT
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS venues (
            code TEXT PRIMARY KEY,
            short_name TEXT,
            long_name TEXT,
            country_code TEXT REFERENCES countries(code)
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS meetings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            meeting_date TEXT NOT NULL,
            official_number INTEGER NOT NULL,
            external_number INTEGER,
            nature TEXT,
            venue_code TEXT REFERENCES venues(code),
            country_code TEXT REFERENCES countries(code),
            created_at TEXT DEFAULT (datetime('now')),
            UNIQUE(meeting_date, official_number)
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS races (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            meeting_date TEXT NOT NULL,
            meeting_number INTEGER NOT NULL,
            order_number INTEGER NOT NULL,
            name TEXT,
            start_time TEXT NOT NULL,
            distance INTEGER,
            discipline TEXT,
            specialty TEXT,
            track_bias TEXT,
            prize_money INTEGER,
            declared_runners INTEGER,
            venue_code TEXT REFERENCES venues(code),
            created_at TEXT DEFAULT (datetime('now')),
            UNIQUE(meeting_date, meeting_number, order_number)
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS participants (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            race_id INTEGER NOT NULL REFERENCES races(id),
            program_number INTEGER NOT NULL,
            name TEXT,
            age INTEGER,
            sex TEXT,
            form TEXT,
            odds REAL,
            commentary TEXT,
            finishing_order INTEGER,
            driver TEXT,
            trainer TEXT,
            UNIQUE(race_id, program_number)
        )
        "#,
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_races_meeting ON races(meeting_date, meeting_number)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_participants_race ON participants(race_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_participants_finish ON participants(finishing_order)",
        [],
    )?;

    Ok(())
}

/// Check that every allow-listed column exists in the live tables
pub fn validate_columns(conn: &Connection) -> Result<()> {
    for (table, columns) in TABLES {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let present = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let missing: Vec<&str> = columns
            .iter()
            .copied()
            .filter(|c| !present.iter().any(|p| p == c))
            .collect();
        if !missing.is_empty() {
            bail!("Table {} is missing columns: {}", table, missing.join(", "));
        }
    }
    Ok(())
}
