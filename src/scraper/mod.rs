//! Scraper module for the PMU programme API
//!
//! Provides the blocking HTTP client, payload types and the date/meeting
//! fetch driver.

pub mod client;
pub mod driver;
pub mod payload;

pub use client::{FetchOutcome, PmuClient, ProgrammeSource, ScraperError};
pub use driver::{scrape_range, ScrapeSummary};

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Date format used in upstream URLs and race identifiers
pub const URL_DATE_FORMAT: &str = "%d%m%Y";

/// Build meeting programme URL
pub fn programme_url(base_url: &str, date: NaiveDate, meeting: u32) -> String {
    format!(
        "{}/programme/{}/R{}?specialisation=INTERNET",
        base_url.trim_end_matches('/'),
        date.format(URL_DATE_FORMAT),
        meeting
    )
}

/// Build participants URL for one race
pub fn participants_url(base_url: &str, date: NaiveDate, meeting: u32, race: u32) -> String {
    format!(
        "{}/programme/{}/R{}/C{}/participants?specialisation=INTERNET",
        base_url.trim_end_matches('/'),
        date.format(URL_DATE_FORMAT),
        meeting,
        race
    )
}

#[derive(Debug, Error, PartialEq)]
pub enum RaceIdError {
    #[error("Malformed race identifier: {0}")]
    Malformed(String),

    #[error("Invalid date in race identifier: {0}")]
    InvalidDate(String),
}

static RACE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{8})R(\d+)C(\d+)$").expect("race identifier regex"));

/// Composite race identifier `<ddmmyyyy>R<meeting>C<race>`, e.g. `01012024R1C3`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RaceIdentifier {
    pub date: NaiveDate,
    pub meeting: u32,
    pub race: u32,
}

impl fmt::Display for RaceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}R{}C{}",
            self.date.format(URL_DATE_FORMAT),
            self.meeting,
            self.race
        )
    }
}

impl FromStr for RaceIdentifier {
    type Err = RaceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = RACE_ID_RE
            .captures(s)
            .ok_or_else(|| RaceIdError::Malformed(s.to_string()))?;

        let date = NaiveDate::parse_from_str(&caps[1], URL_DATE_FORMAT)
            .map_err(|_| RaceIdError::InvalidDate(s.to_string()))?;
        let meeting = caps[2]
            .parse()
            .map_err(|_| RaceIdError::Malformed(s.to_string()))?;
        let race = caps[3]
            .parse()
            .map_err(|_| RaceIdError::Malformed(s.to_string()))?;

        Ok(Self {
            date,
            meeting,
            race,
        })
    }
}
