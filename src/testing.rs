//! In-memory stand-in for the OSRM service, shared by the unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use geo::Coord;
use reqwest::StatusCode;

use crate::osrm::{GeometryService, ServiceError};

pub(crate) fn c(x: f64, y: f64) -> Coord<f64> {
    Coord { x, y }
}

pub(crate) enum MatchBehaviour {
    /// One matching that is exactly the submitted trace.
    EchoTrace,
    Fixed(Vec<Vec<Coord<f64>>>),
    Fail(StatusCode),
}

pub(crate) enum RouteBehaviour {
    /// `[from, midpoint, to]`
    Straight,
    Fail(StatusCode),
}

pub(crate) struct MockService {
    pub match_behaviour: MatchBehaviour,
    pub route_behaviour: RouteBehaviour,
    pub delay: Option<Duration>,
    pub match_calls: Mutex<Vec<Vec<Coord<f64>>>>,
    pub route_calls: Mutex<Vec<(Coord<f64>, Coord<f64>)>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockService {
    pub fn new(match_behaviour: MatchBehaviour, route_behaviour: RouteBehaviour) -> Self {
        Self {
            match_behaviour,
            route_behaviour,
            delay: None,
            match_calls: Mutex::new(Vec::new()),
            route_calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn route_calls(&self) -> Vec<(Coord<f64>, Coord<f64>)> {
        self.route_calls.lock().unwrap().clone()
    }

    pub fn match_call_count(&self) -> usize {
        self.match_calls.lock().unwrap().len()
    }

    async fn simulate_latency(&self, seed: Coord<f64>) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            // vary per request so completions interleave
            let jitter = (seed.x.abs() * 1000.0) as u64 % 7;
            tokio::time::sleep(delay + Duration::from_millis(jitter)).await;
        } else {
            tokio::task::yield_now().await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl GeometryService for MockService {
    async fn match_trace(
        &self,
        trace: &[Coord<f64>],
    ) -> Result<Vec<Vec<Coord<f64>>>, ServiceError> {
        self.match_calls.lock().unwrap().push(trace.to_vec());
        self.simulate_latency(trace[0]).await;

        match &self.match_behaviour {
            MatchBehaviour::EchoTrace => Ok(vec![trace.to_vec()]),
            MatchBehaviour::Fixed(matchings) => Ok(matchings.clone()),
            MatchBehaviour::Fail(status) => Err(ServiceError::Status(*status)),
        }
    }

    async fn route_between(
        &self,
        from: Coord<f64>,
        to: Coord<f64>,
    ) -> Result<Vec<Coord<f64>>, ServiceError> {
        self.route_calls.lock().unwrap().push((from, to));
        self.simulate_latency(from).await;

        match &self.route_behaviour {
            RouteBehaviour::Straight => {
                let mid = c((from.x + to.x) / 2.0, (from.y + to.y) / 2.0);
                Ok(vec![from, mid, to])
            }
            RouteBehaviour::Fail(status) => Err(ServiceError::Status(*status)),
        }
    }
}
