//! Query identity, search parameters and lifecycle state.
//!
//! A query is one client-initiated search. Its identifier is derived from the
//! search parameters plus a uniqueness source, so two identical requests still
//! receive distinct identities.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Length of a query identifier in hex characters (SHA-256).
pub const QUERY_ID_LEN: usize = 64;

/// Maximum passenger count accepted for a single search.
pub const MAX_PAX: u32 = 9;

/// Error returned when parsing an externally supplied query identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid query ID: {0}")]
pub struct ParseQueryIdError(String);

/// Opaque, fixed-length identifier of a query.
///
/// # Validation
///
/// - `FromStr::from_str()`: validates length and hex alphabet (use for client input)
/// - [`QueryId::generate`]: derives a fresh identifier from search parameters
///
/// # Examples
///
/// ```
/// use querycast_core::query::QueryId;
///
/// let raw = "a".repeat(64);
/// let id: QueryId = raw.parse().unwrap();
/// assert_eq!(id.as_str(), raw);
///
/// assert!("not-a-query".parse::<QueryId>().is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueryId(String);

impl QueryId {
    /// Derive a new identifier from search parameters.
    ///
    /// The digest input mixes the parameters with a nanosecond timestamp and a
    /// random UUID, so repeated identical searches never collide.
    #[must_use]
    pub fn generate(params: &SearchParams) -> Self {
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        let input = format!(
            "{}:{}:{}:{}:{}:{}:{}:{}",
            params.origin,
            params.destination,
            params.trip_type,
            params.departure_date,
            params
                .return_date
                .map(|d| d.to_string())
                .unwrap_or_default(),
            params.pax,
            nanos,
            Uuid::new_v4(),
        );
        Self(hex::encode(Sha256::digest(input.as_bytes())))
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix used in log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for QueryId {
    type Err = ParseQueryIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != QUERY_ID_LEN {
            return Err(ParseQueryIdError(format!(
                "expected {QUERY_ID_LEN} hex characters, got {}",
                s.len()
            )));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseQueryIdError("non-hex character".to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }
}

impl TryFrom<String> for QueryId {
    type Error = ParseQueryIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<QueryId> for String {
    fn from(id: QueryId) -> Self {
        id.0
    }
}

impl AsRef<str> for QueryId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle of a query.
///
/// Transitions only go `Running → Cancelled` or `Running → Completed`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    /// Producers are still emitting results.
    Running,
    /// Cancelled by a client or by shutdown.
    Cancelled,
    /// Every expected result was emitted.
    Completed,
}

impl QueryState {
    /// Whether this state can no longer change.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }

    /// Whether the transition `self → next` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Running, Self::Cancelled | Self::Completed)
        )
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// One-way or round-trip search.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TripType {
    /// Outbound flight only.
    #[serde(rename = "one-way")]
    OneWay,
    /// Outbound and return flights.
    #[serde(rename = "round-trip")]
    RoundTrip,
}

impl fmt::Display for TripType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneWay => write!(f, "one-way"),
            Self::RoundTrip => write!(f, "round-trip"),
        }
    }
}

impl FromStr for TripType {
    type Err = ParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "one-way" | "oneway" | "one_way" => Ok(Self::OneWay),
            "round-trip" | "roundtrip" | "round_trip" => Ok(Self::RoundTrip),
            other => Err(ParamsError::TripType(other.to_string())),
        }
    }
}

/// Malformed search parameters. Rejected before any query identity exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamsError {
    /// A required field was empty or missing.
    #[error("Missing required parameter: {0}")]
    Missing(&'static str),

    /// Airport code is not three ASCII letters.
    #[error("Invalid airport code for {field}: {value}")]
    AirportCode {
        /// Which field carried the bad code.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// Origin and destination are the same airport.
    #[error("Origin and destination must differ (both {0})")]
    SameAirport(String),

    /// Unknown trip type.
    #[error("Invalid trip type: {0}")]
    TripType(String),

    /// Date did not parse as `YYYY-MM-DD`.
    #[error("Invalid date for {field}: {value}")]
    Date {
        /// Which field carried the bad date.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// Return date precedes departure date.
    #[error("Return date {return_date} is before departure date {departure_date}")]
    ReturnBeforeDeparture {
        /// Departure date.
        departure_date: NaiveDate,
        /// Return date.
        return_date: NaiveDate,
    },

    /// Passenger count out of range.
    #[error("Passenger count must be between 1 and {MAX_PAX}, got {0}")]
    Pax(i64),
}

/// Raw, unvalidated search request as it arrives from a client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Origin airport code.
    #[serde(default)]
    pub from: String,
    /// Destination airport code.
    #[serde(default)]
    pub to: String,
    /// `one-way` or `round-trip`.
    #[serde(default)]
    pub trip_type: String,
    /// Departure date, `YYYY-MM-DD`.
    #[serde(default)]
    pub departure_date: String,
    /// Return date, `YYYY-MM-DD` (round trips only).
    #[serde(default)]
    pub return_date: Option<String>,
    /// Passenger count, defaults to 1.
    #[serde(default)]
    pub pax: Option<i64>,
}

/// Validated search parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Origin airport code (upper-case).
    pub origin: String,
    /// Destination airport code (upper-case).
    pub destination: String,
    /// Trip type.
    pub trip_type: TripType,
    /// Departure date.
    pub departure_date: NaiveDate,
    /// Return date, present only for round trips.
    pub return_date: Option<NaiveDate>,
    /// Passenger count.
    pub pax: u32,
}

impl SearchParams {
    /// Validate a raw request.
    ///
    /// # Errors
    ///
    /// Returns [`ParamsError`] describing the first invalid field.
    pub fn parse(request: &SearchRequest) -> Result<Self, ParamsError> {
        let origin = airport_code("from", &request.from)?;
        let destination = airport_code("to", &request.to)?;
        if origin == destination {
            return Err(ParamsError::SameAirport(origin));
        }

        if request.trip_type.trim().is_empty() {
            return Err(ParamsError::Missing("trip_type"));
        }
        let trip_type: TripType = request.trip_type.parse()?;

        let departure_date = date("departure_date", &request.departure_date)?;

        let return_date = match trip_type {
            TripType::OneWay => None,
            TripType::RoundTrip => {
                let raw = request
                    .return_date
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .ok_or(ParamsError::Missing("return_date"))?;
                let return_date = date("return_date", raw)?;
                if return_date < departure_date {
                    return Err(ParamsError::ReturnBeforeDeparture {
                        departure_date,
                        return_date,
                    });
                }
                Some(return_date)
            }
        };

        let pax = request.pax.unwrap_or(1);
        let pax = u32::try_from(pax)
            .ok()
            .filter(|p| (1..=MAX_PAX).contains(p))
            .ok_or(ParamsError::Pax(pax))?;

        Ok(Self {
            origin,
            destination,
            trip_type,
            departure_date,
            return_date,
            pax,
        })
    }
}

fn airport_code(field: &'static str, raw: &str) -> Result<String, ParamsError> {
    let code = raw.trim();
    if code.is_empty() {
        return Err(ParamsError::Missing(field));
    }
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err(ParamsError::AirportCode {
            field,
            value: code.to_string(),
        });
    }
    Ok(code.to_ascii_uppercase())
}

fn date(field: &'static str, raw: &str) -> Result<NaiveDate, ParamsError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ParamsError::Missing(field));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| ParamsError::Date {
        field,
        value: raw.to_string(),
    })
}
