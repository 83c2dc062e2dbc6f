//! SQLite repository for PMU programme data
//!
//! [`Database`] owns the connection and serves read queries.
//! [`UnitOfWork`] wraps one transaction and carries the natural-key lookups
//! and inserts used during ingestion.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;

use super::schema::{
    create_tables, insert_sql, validate_columns, COUNTRY_COLUMNS, MEETING_COLUMNS,
    PARTICIPANT_COLUMNS, RACE_COLUMNS, VENUE_COLUMNS,
};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Country row
#[derive(Debug, Clone, PartialEq)]
pub struct CountryRow {
    pub code: String,
    pub name: Option<String>,
}

/// Venue (hippodrome) row
#[derive(Debug, Clone, PartialEq)]
pub struct VenueRow {
    pub code: String,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub country_code: Option<String>,
}

/// Meeting (réunion) row
#[derive(Debug, Clone, PartialEq)]
pub struct MeetingRow {
    pub meeting_date: NaiveDate,
    pub official_number: u32,
    pub external_number: Option<u32>,
    pub nature: Option<String>,
    pub venue_code: String,
    pub country_code: String,
}

/// Race (course) ready to insert
#[derive(Debug, Clone, PartialEq)]
pub struct NewRace {
    pub meeting_date: NaiveDate,
    pub meeting_number: u32,
    pub order_number: u32,
    pub name: Option<String>,
    pub start_time: DateTime<Utc>,
    pub distance: Option<u32>,
    pub discipline: Option<String>,
    pub specialty: Option<String>,
    pub track_bias: Option<String>,
    pub prize_money: Option<i64>,
    pub declared_runners: Option<u32>,
    pub venue_code: Option<String>,
}

/// Stored race
#[derive(Debug, Clone, PartialEq)]
pub struct RaceRow {
    pub id: i64,
    pub meeting_date: NaiveDate,
    pub meeting_number: u32,
    pub order_number: u32,
    pub name: Option<String>,
    pub start_time: DateTime<Utc>,
    pub distance: Option<u32>,
    pub discipline: Option<String>,
    pub specialty: Option<String>,
    pub track_bias: Option<String>,
    pub prize_money: Option<i64>,
    pub declared_runners: Option<u32>,
    pub venue_code: Option<String>,
}

/// Participant (partant) ready to insert
#[derive(Debug, Clone, PartialEq)]
pub struct NewParticipant {
    pub race_id: i64,
    pub program_number: u32,
    pub name: Option<String>,
    pub age: Option<u32>,
    pub sex: Option<String>,
    pub form: Option<String>,
    pub odds: Option<f64>,
    pub commentary: Option<String>,
    pub finishing_order: Option<u32>,
    pub driver: Option<String>,
    pub trainer: Option<String>,
}

/// Stored participant
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantRow {
    pub id: i64,
    pub race_id: i64,
    pub program_number: u32,
    pub name: Option<String>,
    pub age: Option<u32>,
    pub sex: Option<String>,
    pub form: Option<String>,
    pub odds: Option<f64>,
    pub commentary: Option<String>,
    pub finishing_order: Option<u32>,
    pub driver: Option<String>,
    pub trainer: Option<String>,
}

const RACE_SELECT: &str = "r.id, r.meeting_date, r.meeting_number, r.order_number, r.name, \
     r.start_time, r.distance, r.discipline, r.specialty, r.track_bias, r.prize_money, \
     r.declared_runners, r.venue_code";

const RACE_SELECT_WIDTH: usize = 13;

const PARTICIPANT_SELECT: &str = "p.id, p.race_id, p.program_number, p.name, p.age, p.sex, \
     p.form, p.odds, p.commentary, p.finishing_order, p.driver, p.trainer";

/// Format a date the way it is stored
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Format a timestamp the way it is stored
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn read_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| conversion_error(idx, e))
}

fn read_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| conversion_error(idx, e))
}

fn race_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<RaceRow> {
    Ok(RaceRow {
        id: row.get(offset)?,
        meeting_date: read_date(row, offset + 1)?,
        meeting_number: row.get(offset + 2)?,
        order_number: row.get(offset + 3)?,
        name: row.get(offset + 4)?,
        start_time: read_timestamp(row, offset + 5)?,
        distance: row.get(offset + 6)?,
        discipline: row.get(offset + 7)?,
        specialty: row.get(offset + 8)?,
        track_bias: row.get(offset + 9)?,
        prize_money: row.get(offset + 10)?,
        declared_runners: row.get(offset + 11)?,
        venue_code: row.get(offset + 12)?,
    })
}

fn participant_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<ParticipantRow> {
    Ok(ParticipantRow {
        id: row.get(offset)?,
        race_id: row.get(offset + 1)?,
        program_number: row.get(offset + 2)?,
        name: row.get(offset + 3)?,
        age: row.get(offset + 4)?,
        sex: row.get(offset + 5)?,
        form: row.get(offset + 6)?,
        odds: row.get(offset + 7)?,
        commentary: row.get(offset + 8)?,
        finishing_order: row.get(offset + 9)?,
        driver: row.get(offset + 10)?,
        trainer: row.get(offset + 11)?,
    })
}

/// SQLite database handle
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database, creating it and its tables if needed
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open(db_path).context("Failed to open database")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        create_tables(&conn).context("Failed to create tables")?;
        validate_columns(&conn)
            .with_context(|| format!("Schema mismatch in {}", db_path.display()))?;

        Ok(Self { conn })
    }

    /// Create an in-memory database (for testing)
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        create_tables(&conn)?;
        validate_columns(&conn)?;
        Ok(Self { conn })
    }

    /// Begin a unit of work (one transaction)
    pub fn begin(&mut self) -> Result<UnitOfWork<'_>> {
        let tx = self
            .conn
            .transaction()
            .context("Failed to begin transaction")?;
        Ok(UnitOfWork { tx })
    }

    // ==================== Query Operations ====================

    /// Get a race by its surrogate id
    pub fn get_race(&self, race_id: i64) -> Result<Option<RaceRow>> {
        let sql = format!("SELECT {} FROM races r WHERE r.id = ?1", RACE_SELECT);
        let race = self
            .conn
            .query_row(&sql, [race_id], |row| race_from_row(row, 0))
            .optional()?;
        Ok(race)
    }

    /// Get participants of a race ordered by program number
    pub fn get_participants(&self, race_id: i64) -> Result<Vec<ParticipantRow>> {
        let sql = format!(
            "SELECT {} FROM participants p WHERE p.race_id = ?1 ORDER BY p.program_number",
            PARTICIPANT_SELECT
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let participants = stmt
            .query_map([race_id], |row| participant_from_row(row, 0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(participants)
    }

    /// All participants with a known finishing order, joined to their race
    pub fn get_finished_entries(&self) -> Result<Vec<(ParticipantRow, RaceRow)>> {
        let sql = format!(
            "SELECT {}, {} FROM participants p JOIN races r ON p.race_id = r.id \
             WHERE p.finishing_order IS NOT NULL ORDER BY r.id, p.program_number",
            RACE_SELECT, PARTICIPANT_SELECT
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map([], |row| {
                let race = race_from_row(row, 0)?;
                let participant = participant_from_row(row, RACE_SELECT_WIDTH)?;
                Ok((participant, race))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Count rows of a table
    pub fn count(&self, table: &str) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", table),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

/// One transaction over the database.
///
/// Dropping without [`UnitOfWork::commit`] rolls back.
pub struct UnitOfWork<'a> {
    tx: Transaction<'a>,
}

impl UnitOfWork<'_> {
    /// Commit everything written through this unit of work
    pub fn commit(self) -> Result<()> {
        self.tx.commit().context("Failed to commit transaction")
    }

    // ==================== Lookups ====================

    pub fn country_exists(&self, code: &str) -> Result<bool> {
        let count: i64 = self.tx.query_row(
            "SELECT COUNT(*) FROM countries WHERE code = ?1",
            [code],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn venue_exists(&self, code: &str) -> Result<bool> {
        let count: i64 = self.tx.query_row(
            "SELECT COUNT(*) FROM venues WHERE code = ?1",
            [code],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn meeting_exists(&self, date: NaiveDate, official_number: u32) -> Result<bool> {
        let count: i64 = self.tx.query_row(
            "SELECT COUNT(*) FROM meetings WHERE meeting_date = ?1 AND official_number = ?2",
            params![format_date(date), official_number],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Find a race id by natural key
    pub fn find_race_id(
        &self,
        date: NaiveDate,
        meeting_number: u32,
        order_number: u32,
    ) -> Result<Option<i64>> {
        let id = self
            .tx
            .query_row(
                "SELECT id FROM races
                 WHERE meeting_date = ?1 AND meeting_number = ?2 AND order_number = ?3",
                params![format_date(date), meeting_number, order_number],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Find a participant id by natural key
    pub fn find_participant_id(&self, race_id: i64, program_number: u32) -> Result<Option<i64>> {
        let id = self
            .tx
            .query_row(
                "SELECT id FROM participants WHERE race_id = ?1 AND program_number = ?2",
                params![race_id, program_number],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    // ==================== Inserts ====================

    pub fn insert_country(&self, country: &CountryRow) -> Result<()> {
        self.tx.execute(
            &insert_sql("countries", COUNTRY_COLUMNS),
            params![country.code, country.name],
        )?;
        Ok(())
    }

    pub fn insert_venue(&self, venue: &VenueRow) -> Result<()> {
        self.tx.execute(
            &insert_sql("venues", VENUE_COLUMNS),
            params![
                venue.code,
                venue.short_name,
                venue.long_name,
                venue.country_code,
            ],
        )?;
        Ok(())
    }

    pub fn insert_meeting(&self, meeting: &MeetingRow) -> Result<()> {
        self.tx.execute(
            &insert_sql("meetings", MEETING_COLUMNS),
            params![
                format_date(meeting.meeting_date),
                meeting.official_number,
                meeting.external_number,
                meeting.nature,
                meeting.venue_code,
                meeting.country_code,
            ],
        )?;
        Ok(())
    }

    /// Insert a race and return its id
    pub fn insert_race(&self, race: &NewRace) -> Result<i64> {
        self.tx.execute(
            &insert_sql("races", RACE_COLUMNS),
            params![
                format_date(race.meeting_date),
                race.meeting_number,
                race.order_number,
                race.name,
                format_timestamp(race.start_time),
                race.distance,
                race.discipline,
                race.specialty,
                race.track_bias,
                race.prize_money,
                race.declared_runners,
                race.venue_code,
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    /// Insert a participant and return its id
    pub fn insert_participant(&self, participant: &NewParticipant) -> Result<i64> {
        self.tx.execute(
            &insert_sql("participants", PARTICIPANT_COLUMNS),
            params![
                participant.race_id,
                participant.program_number,
                participant.name,
                participant.age,
                participant.sex,
                participant.form,
                participant.odds,
                participant.commentary,
                participant.finishing_order,
                participant.driver,
                participant.trainer,
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    /// Fill result columns that are still NULL. Returns true when a column changed.
    pub fn fill_participant_results(
        &self,
        participant_id: i64,
        finishing_order: Option<u32>,
        odds: Option<f64>,
        commentary: Option<&str>,
    ) -> Result<bool> {
        let changed = self.tx.execute(
            r#"
            UPDATE participants SET
                finishing_order = COALESCE(finishing_order, ?2),
                odds = COALESCE(odds, ?3),
                commentary = COALESCE(commentary, ?4)
            WHERE id = ?1 AND (
                (finishing_order IS NULL AND ?2 IS NOT NULL) OR
                (odds IS NULL AND ?3 IS NOT NULL) OR
                (commentary IS NULL AND ?4 IS NOT NULL)
            )
            "#,
            params![participant_id, finishing_order, odds, commentary],
        )?;
        Ok(changed > 0)
    }
}
