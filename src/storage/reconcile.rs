//! Idempotent reconciliation of upstream payloads against the store.
//!
//! Every entity is looked up by its natural key and inserted only when
//! absent; existing rows are never rewritten. The free functions take an
//! explicit [`UnitOfWork`] so callers control commit boundaries; the
//! [`Reconciler`] façade opens and commits one unit of work per call.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, error, info};

use super::repository::{
    CountryRow, Database, MeetingRow, NewParticipant, NewRace, UnitOfWork, VenueRow,
};
use crate::scraper::payload::{
    CountryPayload, MeetingPayload, ParticipantPayload, ParticipantsPayload, RacePayload,
    VenuePayload,
};
use crate::scraper::RaceIdentifier;

/// Outcome of reconciling one participant batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub inserted: usize,
    /// Existing participants whose missing result columns were filled in
    pub refreshed: usize,
    pub skipped: usize,
}

/// Convert an upstream start time in epoch milliseconds to a UTC timestamp.
///
/// Sub-second precision is dropped.
pub fn start_time_from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ms.div_euclid(1000), 0)
}

pub fn reconcile_country(uow: &UnitOfWork<'_>, payload: &CountryPayload) -> Result<bool> {
    if uow.country_exists(&payload.code)? {
        return Ok(false);
    }
    uow.insert_country(&CountryRow {
        code: payload.code.clone(),
        name: payload.name.clone(),
    })?;
    info!("Saving country {}", payload.code);
    Ok(true)
}

pub fn reconcile_venue(
    uow: &UnitOfWork<'_>,
    payload: &VenuePayload,
    country_code: Option<&str>,
) -> Result<bool> {
    if uow.venue_exists(&payload.code)? {
        return Ok(false);
    }
    uow.insert_venue(&VenueRow {
        code: payload.code.clone(),
        short_name: payload.short_name.clone(),
        long_name: payload.long_name.clone(),
        country_code: country_code.map(str::to_string),
    })?;
    info!("Saving venue {}", payload.code);
    Ok(true)
}

/// Insert the meeting row itself. Nested venue, country and races are not
/// part of it; only their codes are kept as foreign keys.
pub fn reconcile_meeting(
    uow: &UnitOfWork<'_>,
    date: NaiveDate,
    payload: &MeetingPayload,
) -> Result<bool> {
    if uow.meeting_exists(date, payload.official_number)? {
        return Ok(false);
    }
    uow.insert_meeting(&MeetingRow {
        meeting_date: date,
        official_number: payload.official_number,
        external_number: payload.external_number,
        nature: payload.nature.clone(),
        venue_code: payload.venue.code.clone(),
        country_code: payload.country.code.clone(),
    })?;
    info!("Saving meeting R{} on {}", payload.official_number, date);
    Ok(true)
}

pub fn reconcile_race(
    uow: &UnitOfWork<'_>,
    date: NaiveDate,
    payload: &RacePayload,
    fallback_venue: Option<&str>,
) -> Result<bool> {
    let start_time = start_time_from_millis(payload.start_time_ms).with_context(|| {
        format!(
            "Start time {} out of range for R{}C{}",
            payload.start_time_ms, payload.meeting_number, payload.order_number
        )
    })?;

    if uow
        .find_race_id(date, payload.meeting_number, payload.order_number)?
        .is_some()
    {
        return Ok(false);
    }

    // A race venue that was never stored would break the foreign key
    let venue_code = match payload.venue.as_ref().and_then(|v| v.code.as_deref()) {
        Some(code) if uow.venue_exists(code)? => Some(code.to_string()),
        Some(code) => {
            debug!(
                "Unknown venue {} on R{}C{}, using meeting venue",
                code, payload.meeting_number, payload.order_number
            );
            fallback_venue.map(str::to_string)
        }
        None => fallback_venue.map(str::to_string),
    };

    uow.insert_race(&NewRace {
        meeting_date: date,
        meeting_number: payload.meeting_number,
        order_number: payload.order_number,
        name: payload.name.clone(),
        start_time,
        distance: payload.distance,
        discipline: payload.discipline.clone(),
        specialty: payload.specialty.clone(),
        track_bias: payload.track_bias.clone(),
        prize_money: payload.prize_money,
        declared_runners: payload.declared_runners,
        venue_code,
    })?;
    info!(
        "Saving race R{}C{} on {}",
        payload.meeting_number, payload.order_number, date
    );
    Ok(true)
}

fn new_participant(race_id: i64, payload: &ParticipantPayload) -> NewParticipant {
    NewParticipant {
        race_id,
        program_number: payload.program_number,
        name: payload.name.clone(),
        age: payload.age,
        sex: payload.sex.clone(),
        form: payload.form.clone(),
        odds: payload.odds(),
        commentary: payload.commentary().map(str::to_string),
        finishing_order: payload.finishing_order,
        driver: payload.driver.clone(),
        trainer: payload.trainer.clone(),
    }
}

/// Reconcile a participant batch for the race named by `race_key`
/// (`<ddmmyyyy>R<meeting>C<race>`).
///
/// Returns `None` when the key is malformed or no such race is stored;
/// nothing is written then.
pub fn reconcile_participants(
    uow: &UnitOfWork<'_>,
    race_key: &str,
    payload: &ParticipantsPayload,
) -> Result<Option<BatchSummary>> {
    let identifier: RaceIdentifier = match race_key.parse() {
        Ok(identifier) => identifier,
        Err(err) => {
            error!("{}", err);
            return Ok(None);
        }
    };

    let race_id = match uow.find_race_id(identifier.date, identifier.meeting, identifier.race)? {
        Some(id) => id,
        None => {
            error!("Race {} not found in database", identifier);
            return Ok(None);
        }
    };

    let mut summary = BatchSummary::default();
    for participant in &payload.participants {
        match uow.find_participant_id(race_id, participant.program_number)? {
            None => {
                uow.insert_participant(&new_participant(race_id, participant))?;
                info!(
                    "Saving participant {} for race {}",
                    participant.name.as_deref().unwrap_or("?"),
                    identifier
                );
                summary.inserted += 1;
            }
            Some(existing) => {
                let refreshed = uow.fill_participant_results(
                    existing,
                    participant.finishing_order,
                    participant.odds(),
                    participant.commentary(),
                )?;
                if refreshed {
                    debug!(
                        "Filled results for participant {} of race {}",
                        participant.program_number, identifier
                    );
                    summary.refreshed += 1;
                } else {
                    summary.skipped += 1;
                }
            }
        }
    }
    Ok(Some(summary))
}

/// Per-call unit-of-work façade over the reconciliation functions
pub struct Reconciler<'db> {
    db: &'db mut Database,
}

impl<'db> Reconciler<'db> {
    pub fn new(db: &'db mut Database) -> Self {
        Self { db }
    }

    pub fn save_country(&mut self, payload: &CountryPayload) -> Result<bool> {
        let uow = self.db.begin()?;
        let inserted = reconcile_country(&uow, payload)?;
        uow.commit()?;
        Ok(inserted)
    }

    pub fn save_venue(
        &mut self,
        payload: &VenuePayload,
        country_code: Option<&str>,
    ) -> Result<bool> {
        let uow = self.db.begin()?;
        let inserted = reconcile_venue(&uow, payload, country_code)?;
        uow.commit()?;
        Ok(inserted)
    }

    pub fn save_meeting(&mut self, date: NaiveDate, payload: &MeetingPayload) -> Result<bool> {
        let uow = self.db.begin()?;
        let inserted = reconcile_meeting(&uow, date, payload)?;
        uow.commit()?;
        Ok(inserted)
    }

    /// Save races one commit at a time. Returns how many were inserted.
    pub fn save_races(
        &mut self,
        date: NaiveDate,
        races: &[RacePayload],
        fallback_venue: Option<&str>,
    ) -> Result<usize> {
        let mut inserted = 0;
        for race in races {
            let uow = self.db.begin()?;
            if reconcile_race(&uow, date, race, fallback_venue)? {
                inserted += 1;
            }
            uow.commit()?;
        }
        Ok(inserted)
    }

    /// Save a full meeting programme: country, venue, meeting, then races
    pub fn save_programme(&mut self, date: NaiveDate, payload: &MeetingPayload) -> Result<usize> {
        self.save_country(&payload.country)?;
        self.save_venue(&payload.venue, Some(&payload.country.code))?;
        self.save_meeting(date, payload)?;
        self.save_races(date, &payload.races, Some(&payload.venue.code))
    }

    /// Save a participant batch in a single unit of work
    pub fn save_participants(
        &mut self,
        race_key: &str,
        payload: &ParticipantsPayload,
    ) -> Result<Option<BatchSummary>> {
        let uow = self.db.begin()?;
        let summary = reconcile_participants(&uow, race_key, payload)?;
        if summary.is_some() {
            uow.commit()?;
        }
        Ok(summary)
    }
}
