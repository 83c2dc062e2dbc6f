//! Date range fetch driver.
//!
//! For every date, meetings are requested from R1 upwards until the API
//! answers 204. Each meeting is reconciled, then every race's participant
//! list is fetched and reconciled. Transport errors propagate; unexpected
//! status codes are logged and skipped.

use anyhow::{bail, Result};
use chrono::NaiveDate;
use tracing::{debug, error, info};

use super::client::{FetchOutcome, ProgrammeSource};
use super::RaceIdentifier;
use crate::storage::{Database, Reconciler};

/// Counters for one scrape run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrapeSummary {
    pub dates: usize,
    pub meetings: usize,
    pub races_inserted: usize,
    pub participants_inserted: usize,
    pub participants_refreshed: usize,
    pub skipped_meetings: usize,
    pub skipped_races: usize,
}

/// Scrape every date in `[start, end]` into the database
pub fn scrape_range<S: ProgrammeSource>(
    source: &S,
    db: &mut Database,
    start: NaiveDate,
    end: NaiveDate,
    max_meetings_per_day: u32,
) -> Result<ScrapeSummary> {
    if start > end {
        bail!("Start date {} is after end date {}", start, end);
    }

    let mut summary = ScrapeSummary::default();
    let mut reconciler = Reconciler::new(db);

    for date in start.iter_days().take_while(|d| *d <= end) {
        summary.dates += 1;
        scrape_date(source, &mut reconciler, date, max_meetings_per_day, &mut summary)?;
    }

    info!(
        "Scrape finished: {} dates, {} meetings, {} new races, {} new participants",
        summary.dates, summary.meetings, summary.races_inserted, summary.participants_inserted
    );
    Ok(summary)
}

fn scrape_date<S: ProgrammeSource>(
    source: &S,
    reconciler: &mut Reconciler<'_>,
    date: NaiveDate,
    max_meetings_per_day: u32,
    summary: &mut ScrapeSummary,
) -> Result<()> {
    for meeting_number in 1..=max_meetings_per_day {
        debug!("Requesting meeting R{} on {}", meeting_number, date);

        match source.fetch_meeting(date, meeting_number)? {
            FetchOutcome::NoContent => {
                info!("No more meetings on {} (R{}: 204)", date, meeting_number);
                return Ok(());
            }
            FetchOutcome::Unexpected(status) => {
                error!(
                    "API request failed. Status code: {}, date: {}, meeting: R{}",
                    status, date, meeting_number
                );
                summary.skipped_meetings += 1;
            }
            FetchOutcome::Content(meeting) => {
                summary.meetings += 1;
                summary.races_inserted += reconciler.save_programme(date, &meeting)?;

                for race in &meeting.races {
                    let identifier = RaceIdentifier {
                        date,
                        meeting: meeting_number,
                        race: race.order_number,
                    };
                    scrape_participants(source, reconciler, &identifier, summary)?;
                }
            }
        }
    }

    info!(
        "Stopped at R{} on {} without a 204",
        max_meetings_per_day, date
    );
    Ok(())
}

fn scrape_participants<S: ProgrammeSource>(
    source: &S,
    reconciler: &mut Reconciler<'_>,
    identifier: &RaceIdentifier,
    summary: &mut ScrapeSummary,
) -> Result<()> {
    debug!("Fetching participants for {}", identifier);

    match source.fetch_participants(identifier.date, identifier.meeting, identifier.race)? {
        FetchOutcome::Content(participants) => {
            let race_key = identifier.to_string();
            match reconciler.save_participants(&race_key, &participants)? {
                Some(batch) => {
                    summary.participants_inserted += batch.inserted;
                    summary.participants_refreshed += batch.refreshed;
                }
                None => summary.skipped_races += 1,
            }
        }
        FetchOutcome::NoContent => {
            error!("Failed to fetch participants for {}. Status code: 204", identifier);
            summary.skipped_races += 1;
        }
        FetchOutcome::Unexpected(status) => {
            error!(
                "Failed to fetch participants for {}. Status code: {}",
                identifier, status
            );
            summary.skipped_races += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{derive_labels, FeatureBuilder};
    use crate::scraper::client::ScraperError;
    use crate::scraper::payload::{MeetingPayload, ParticipantsPayload};
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Scripted programme source; anything unscripted answers 204
    #[derive(Default)]
    struct ScriptedSource {
        meetings: HashMap<(NaiveDate, u32), FetchOutcome<MeetingPayload>>,
        participants: HashMap<(NaiveDate, u32, u32), FetchOutcome<ParticipantsPayload>>,
        requests: RefCell<Vec<String>>,
    }

    impl ProgrammeSource for ScriptedSource {
        fn fetch_meeting(
            &self,
            date: NaiveDate,
            meeting: u32,
        ) -> Result<FetchOutcome<MeetingPayload>, ScraperError> {
            self.requests
                .borrow_mut()
                .push(format!("{}R{}", date.format("%d%m%Y"), meeting));
            Ok(self
                .meetings
                .get(&(date, meeting))
                .cloned()
                .unwrap_or(FetchOutcome::NoContent))
        }

        fn fetch_participants(
            &self,
            date: NaiveDate,
            meeting: u32,
            race: u32,
        ) -> Result<FetchOutcome<ParticipantsPayload>, ScraperError> {
            self.requests
                .borrow_mut()
                .push(format!("{}R{}C{}", date.format("%d%m%Y"), meeting, race));
            Ok(self
                .participants
                .get(&(date, meeting, race))
                .cloned()
                .unwrap_or(FetchOutcome::NoContent))
        }
    }

    fn jan_1() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn meeting_json(official: u32, race_meeting_number: u32) -> MeetingPayload {
        serde_json::from_str(&format!(
            r#"{{
                "numOfficiel": {official},
                "hippodrome": {{"code": "VIN", "libelleCourt": "VINCENNES"}},
                "pays": {{"code": "FRA", "libelle": "FRANCE"}},
                "courses": [{{
                    "numReunion": {race_meeting_number},
                    "numOrdre": 1,
                    "heureDepart": 1704115200000,
                    "distance": 2700,
                    "discipline": "ATTELE",
                    "specialite": "TROT_ATTELE",
                    "corde": "CORDE_GAUCHE",
                    "hippodrome": {{"codeHippodrome": "VIN"}}
                }}]
            }}"#
        ))
        .unwrap()
    }

    fn participants_json() -> ParticipantsPayload {
        serde_json::from_str(
            r#"{"participants": [
                {"numPmu": 5, "nom": "BOLD EAGLE", "age": 6, "sexe": "MALES",
                 "musique": "1a 1a 2a", "ordreArrivee": 1,
                 "dernierRapportDirect": {"rapport": 2.1}},
                {"numPmu": 7, "nom": "FACE TIME BOURBON", "age": 7, "sexe": "MALES",
                 "musique": "3a Da", "ordreArrivee": 4}
            ]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_end_to_end_winner_labels() {
        let mut source = ScriptedSource::default();
        source
            .meetings
            .insert((jan_1(), 1), FetchOutcome::Content(meeting_json(1, 1)));
        source.participants.insert(
            (jan_1(), 1, 1),
            FetchOutcome::Content(participants_json()),
        );

        let mut db = Database::in_memory().unwrap();
        let summary = scrape_range(&source, &mut db, jan_1(), jan_1(), 30).unwrap();
        assert_eq!(summary.meetings, 1);
        assert_eq!(summary.races_inserted, 1);
        assert_eq!(summary.participants_inserted, 2);

        let race = db.get_race(1).unwrap().unwrap();
        let participants = db.get_participants(race.id).unwrap();
        let winner = participants
            .iter()
            .find(|p| p.program_number == 5)
            .unwrap();

        let labels = derive_labels(winner.finishing_order).unwrap();
        assert_eq!(labels.won, 1.0);
        assert_eq!(labels.placed, 1.0);

        let features = FeatureBuilder::derive(winner, &race).unwrap();
        assert_eq!(features.form_length, 3.0);
        assert_eq!(features.sex_code, 1.0);
    }

    #[test]
    fn test_meeting_loop_stops_at_no_content() {
        let mut source = ScriptedSource::default();
        source
            .meetings
            .insert((jan_1(), 1), FetchOutcome::Content(meeting_json(1, 1)));

        let mut db = Database::in_memory().unwrap();
        scrape_range(&source, &mut db, jan_1(), jan_1(), 30).unwrap();

        let requests = source.requests.borrow();
        assert_eq!(
            *requests,
            vec!["01012024R1", "01012024R1C1", "01012024R2"]
        );
    }

    #[test]
    fn test_unexpected_status_skips_meeting_only() {
        let mut source = ScriptedSource::default();
        source
            .meetings
            .insert((jan_1(), 1), FetchOutcome::Unexpected(500));
        source
            .meetings
            .insert((jan_1(), 2), FetchOutcome::Content(meeting_json(2, 2)));

        let mut db = Database::in_memory().unwrap();
        let summary = scrape_range(&source, &mut db, jan_1(), jan_1(), 30).unwrap();
        assert_eq!(summary.skipped_meetings, 1);
        assert_eq!(summary.meetings, 1);
        assert_eq!(db.count("races").unwrap(), 1);
        assert!(source
            .requests
            .borrow()
            .contains(&"01012024R3".to_string()));
    }

    #[test]
    fn test_unknown_race_persists_no_participants() {
        // The race claims meeting R2 while it was served as R1, so the
        // participant identifier 01012024R1C1 matches nothing.
        let mut source = ScriptedSource::default();
        source
            .meetings
            .insert((jan_1(), 1), FetchOutcome::Content(meeting_json(1, 2)));
        source.participants.insert(
            (jan_1(), 1, 1),
            FetchOutcome::Content(participants_json()),
        );

        let mut db = Database::in_memory().unwrap();
        let summary = scrape_range(&source, &mut db, jan_1(), jan_1(), 30).unwrap();
        assert_eq!(summary.skipped_races, 1);
        assert_eq!(db.count("participants").unwrap(), 0);
    }

    #[test]
    fn test_every_date_in_range_is_visited() {
        let source = ScriptedSource::default();
        let mut db = Database::in_memory().unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();

        let summary = scrape_range(&source, &mut db, jan_1(), end, 30).unwrap();
        assert_eq!(summary.dates, 3);
        assert_eq!(
            *source.requests.borrow(),
            vec!["01012024R1", "02012024R1", "03012024R1"]
        );
    }

    #[test]
    fn test_meeting_ceiling_bounds_loop() {
        let mut source = ScriptedSource::default();
        for n in 1..=10 {
            source
                .meetings
                .insert((jan_1(), n), FetchOutcome::Unexpected(503));
        }
        let mut db = Database::in_memory().unwrap();
        let summary = scrape_range(&source, &mut db, jan_1(), jan_1(), 4).unwrap();
        assert_eq!(summary.skipped_meetings, 4);
        assert_eq!(source.requests.borrow().len(), 4);
    }

    #[test]
    fn test_reversed_range_rejected() {
        let source = ScriptedSource::default();
        let mut db = Database::in_memory().unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert!(scrape_range(&source, &mut db, start, jan_1(), 30).is_err());
        assert!(source.requests.borrow().is_empty());
    }
}
