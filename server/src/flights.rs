//! Mock flight sources.
//!
//! Stand-ins for the upstream aggregators: every fetch invents one flight
//! offer for the searched route. About 30% of the first offers of each source
//! are "common" flights that several sources sell at slightly different prices.

use querycast_core::query::SearchParams;
use querycast_runtime::producer::{ResultSource, SourceFuture};
use rand::Rng;
use rand::seq::SliceRandom;
use serde_json::{Value, json};
use std::sync::Arc;

const DEPARTURE_TIMES: &[&str] = &[
    "06:00", "08:30", "10:15", "12:00", "14:30", "16:45", "18:20", "20:00", "22:30",
];

const SEAT_CLASSES: &[&str] = &["Economy", "Business", "Premium Economy"];

/// Lowest fare per passenger, IDR.
const MIN_FARE: u64 = 500_000;

/// A flight several sources sell.
struct CommonFlight {
    airline: &'static str,
    flight_number: &'static str,
    departure_time: &'static str,
    base_fare: u64,
}

const COMMON_FLIGHTS: &[CommonFlight] = &[
    CommonFlight {
        airline: "AirAsia",
        flight_number: "AK123",
        departure_time: "10:15",
        base_fare: 750_000,
    },
    CommonFlight {
        airline: "Garuda",
        flight_number: "GA456",
        departure_time: "14:30",
        base_fare: 1_200_000,
    },
    CommonFlight {
        airline: "Lion Air",
        flight_number: "JT789",
        departure_time: "08:30",
        base_fare: 650_000,
    },
];

/// One mock aggregator.
#[derive(Debug, Clone)]
pub struct MockFlightSource {
    name: &'static str,
    airlines: &'static [&'static str],
    common_ratio: f64,
}

impl MockFlightSource {
    /// Source named `name` selling flights of `airlines`.
    #[must_use]
    pub const fn new(name: &'static str, airlines: &'static [&'static str]) -> Self {
        Self {
            name,
            airlines,
            common_ratio: 0.3,
        }
    }

    /// Chance that a result with a low index is a common flight.
    #[must_use]
    pub const fn with_common_ratio(mut self, ratio: f64) -> Self {
        self.common_ratio = ratio;
        self
    }

    fn offer(&self, params: &SearchParams, index: u64) -> Value {
        let mut rng = rand::thread_rng();
        let common = usize::try_from(index)
            .ok()
            .and_then(|i| COMMON_FLIGHTS.get(i))
            .filter(|_| rng.gen_bool(self.common_ratio.clamp(0.0, 1.0)));

        let (airline, flight_number, departure_time, fare) = match common {
            Some(flight) => {
                let varied = (flight.base_fare + rng.gen_range(0..100_000)).saturating_sub(50_000);
                (
                    flight.airline.to_string(),
                    flight.flight_number.to_string(),
                    flight.departure_time,
                    varied.max(MIN_FARE),
                )
            }
            None => {
                let prefix: String = self.name.chars().take(2).collect::<String>().to_uppercase();
                (
                    self.airlines
                        .choose(&mut rng)
                        .copied()
                        .unwrap_or("Unknown")
                        .to_string(),
                    format!("{prefix}{}", rng.gen_range(100..1000)),
                    DEPARTURE_TIMES
                        .choose(&mut rng)
                        .copied()
                        .unwrap_or("12:00"),
                    MIN_FARE + rng.gen_range(0..2_000_000),
                )
            }
        };

        let pax = u64::from(params.pax);
        let price = fare * pax;
        let departure_date = params.departure_date.to_string();
        let return_date = params
            .return_date
            .map(|d| d.to_string())
            .unwrap_or_default();
        let (from, to, name) = (&params.origin, &params.destination, self.name);

        json!({
            "source": name,
            "airline": airline,
            "flight_number": flight_number,
            "departure_time": departure_time,
            "price": price,
            "from": from,
            "to": to,
            "departure_date": departure_date,
            "return_date": return_date,
            "trip_type": params.trip_type.to_string(),
            "pax": pax,
            "timestamp": chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            "seat_class": SEAT_CLASSES.choose(&mut rng).copied().unwrap_or("Economy"),
            "affiliate_link": format!(
                "https://{name}.com/affiliate?source=flight_search&from={from}&to={to}&flight={flight_number}&price={price}&pax={pax}"
            ),
            "booking_url": format!(
                "https://{name}.com/flights/{from}-{to}/{flight_number}?departure_date={departure_date}&pax={pax}"
            ),
            "is_common": common.is_some(),
        })
    }
}

impl ResultSource for MockFlightSource {
    fn name(&self) -> &str {
        self.name
    }

    fn fetch<'a>(&'a self, params: &'a SearchParams, index: u64) -> SourceFuture<'a> {
        let offer = self.offer(params, index);
        Box::pin(async move { Ok(offer) })
    }
}

/// The three default aggregators.
#[must_use]
pub fn default_sources() -> Vec<Arc<dyn ResultSource>> {
    vec![
        Arc::new(MockFlightSource::new(
            "kiwi",
            &["Lion Air", "Garuda", "AirAsia", "Batik Air", "Citilink"],
        )),
        Arc::new(MockFlightSource::new(
            "trip",
            &[
                "Singapore Airlines",
                "Malaysia Airlines",
                "Thai Airways",
                "Vietnam Airlines",
                "Philippine Airlines",
            ],
        )),
        Arc::new(MockFlightSource::new(
            "12go",
            &["Cebu Pacific", "Jetstar", "Tiger Air", "Scoot", "AirAsia"],
        )),
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use querycast_core::query::SearchRequest;

    fn params(pax: i64) -> SearchParams {
        SearchParams::parse(&SearchRequest {
            from: "CGK".to_string(),
            to: "DPS".to_string(),
            trip_type: "round-trip".to_string(),
            departure_date: "2025-08-17".to_string(),
            return_date: Some("2025-08-24".to_string()),
            pax: Some(pax),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn offer_carries_route_and_links() {
        let source = MockFlightSource::new("kiwi", &["Garuda"]).with_common_ratio(0.0);
        let offer = source.fetch(&params(2), 0).await.unwrap();

        assert_eq!(offer["source"], "kiwi");
        assert_eq!(offer["airline"], "Garuda");
        assert_eq!(offer["from"], "CGK");
        assert_eq!(offer["to"], "DPS");
        assert_eq!(offer["return_date"], "2025-08-24");
        assert_eq!(offer["trip_type"], "round-trip");
        assert_eq!(offer["is_common"], false);
        assert!(offer["flight_number"].as_str().unwrap().starts_with("KI"));

        let price = offer["price"].as_u64().unwrap();
        assert_eq!(price % 2, 0);
        assert!(price >= 2 * MIN_FARE);
        assert!(offer["booking_url"].as_str().unwrap().starts_with("https://kiwi.com/flights/CGK-DPS/"));
    }

    #[tokio::test]
    async fn common_flights_only_for_low_indexes() {
        let source = MockFlightSource::new("trip", &["Thai Airways"]).with_common_ratio(1.0);

        let first = source.fetch(&params(1), 1).await.unwrap();
        assert_eq!(first["is_common"], true);
        assert_eq!(first["flight_number"], "GA456");
        assert!(first["price"].as_u64().unwrap() >= MIN_FARE);

        let later = source.fetch(&params(1), 7).await.unwrap();
        assert_eq!(later["is_common"], false);
    }

    #[test]
    fn three_default_sources() {
        let names: Vec<String> = default_sources().iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, ["kiwi", "trip", "12go"]);
    }
}
