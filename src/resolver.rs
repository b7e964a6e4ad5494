//! Turns one trip's stop sequence into a track-following polyline.
//!
//! The matching service is asked for the whole trace first. OSRM frequently
//! splits a trace into several matchings (tunnels, missing track, stops far
//! from the rails), and the matchings rarely start and end exactly at the
//! first and last stop. Every such gap is closed with a single `route` call.
//! When matching fails outright, one route between the terminal stops is used
//! instead.

use geo::Coord;
use tracing::{debug, warn};

use crate::coordinates::CoordinateIndex;
use crate::osrm::GeometryService;
use crate::tasks::ShapeTask;

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedShape {
    pub trip_id: String,
    /// `(lon, lat)` points, already decimated.
    pub points: Vec<Coord<f64>>,
}

/// Terminal state of resolving one trip.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(ResolvedShape),
    /// A stop of the trip has no position, nothing was requested.
    NoCoordinates { trip_id: String, stop_id: String },
    /// Matching, bridging and the fallback route left nothing to keep.
    NoResult { trip_id: String },
}

impl Resolution {
    pub fn trip_id(&self) -> &str {
        match self {
            Resolution::Resolved(shape) => &shape.trip_id,
            Resolution::NoCoordinates { trip_id, .. } | Resolution::NoResult { trip_id } => {
                trip_id
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GapPosition {
    Leading,
    Between,
    Trailing,
}

pub struct ShapeResolver<'a, S> {
    index: &'a CoordinateIndex,
    service: &'a S,
    decimation_stride: usize,
}

impl<'a, S: GeometryService> ShapeResolver<'a, S> {
    pub fn new(index: &'a CoordinateIndex, service: &'a S, decimation_stride: usize) -> Self {
        Self {
            index,
            service,
            decimation_stride,
        }
    }

    pub async fn resolve(&self, task: &ShapeTask) -> Resolution {
        let trip_id = task.trip_id.as_str();

        let stops = match self.index.lookup_all(&task.stop_ids) {
            Ok(stops) => stops,
            Err(missing) => {
                debug!(trip_id, stop_id = %missing.0, "skipping trip, stop has no coordinates");
                return Resolution::NoCoordinates {
                    trip_id: task.trip_id.clone(),
                    stop_id: missing.0,
                };
            }
        };

        let (Some(&first_stop), Some(&last_stop)) = (stops.first(), stops.last()) else {
            return Resolution::NoResult {
                trip_id: task.trip_id.clone(),
            };
        };

        let path = match self.service.match_trace(&stops).await {
            Ok(matchings) => {
                self.stitch_matchings(trip_id, matchings, first_stop, last_stop)
                    .await
            }
            Err(e) => {
                warn!(
                    trip_id,
                    kind = e.kind(),
                    error = %e,
                    "matching failed, falling back to a single route"
                );

                if stops.len() >= 2 {
                    match self.service.route_between(first_stop, last_stop).await {
                        Ok(route) => route,
                        Err(e) => {
                            warn!(trip_id, kind = e.kind(), error = %e, "fallback route failed");
                            Vec::new()
                        }
                    }
                } else {
                    Vec::new()
                }
            }
        };

        if path.is_empty() {
            debug!(trip_id, "no geometry left for trip");
            return Resolution::NoResult {
                trip_id: task.trip_id.clone(),
            };
        }

        let points = decimate(&path, self.decimation_stride);
        debug!(trip_id, raw = path.len(), kept = points.len(), "resolved shape");

        Resolution::Resolved(ResolvedShape {
            trip_id: task.trip_id.clone(),
            points,
        })
    }

    /// Concatenates matchings in order, routing across every discontinuity
    /// including the stretch from the first stop and to the last stop.
    ///
    /// Points are compared exactly as the service returned them.
    async fn stitch_matchings(
        &self,
        trip_id: &str,
        matchings: Vec<Vec<Coord<f64>>>,
        first_stop: Coord<f64>,
        last_stop: Coord<f64>,
    ) -> Vec<Coord<f64>> {
        let mut path: Vec<Coord<f64>> = Vec::new();
        let mut previous_end: Option<Coord<f64>> = None;

        for matching in matchings {
            let (Some(&start), Some(&end)) = (matching.first(), matching.last()) else {
                continue;
            };

            let (gap_start, position) = match previous_end {
                Some(previous_end) => (previous_end, GapPosition::Between),
                None => (first_stop, GapPosition::Leading),
            };

            if gap_start != start {
                path.extend(self.bridge(trip_id, gap_start, start, position).await);
            }

            path.extend(matching);
            previous_end = Some(end);
        }

        if let Some(previous_end) = previous_end {
            if previous_end != last_stop {
                path.extend(
                    self.bridge(trip_id, previous_end, last_stop, GapPosition::Trailing)
                        .await,
                );
            }
        }

        path
    }

    /// A failed bridge leaves the gap open.
    async fn bridge(
        &self,
        trip_id: &str,
        from: Coord<f64>,
        to: Coord<f64>,
        position: GapPosition,
    ) -> Vec<Coord<f64>> {
        match self.service.route_between(from, to).await {
            Ok(route) => route,
            Err(e) => {
                warn!(
                    trip_id,
                    gap = ?position,
                    kind = e.kind(),
                    error = %e,
                    "could not bridge gap between matchings"
                );
                Vec::new()
            }
        }
    }
}

/// Keeps the first point, every `stride`-th interior point counted from the
/// second point, and the last point.
///
/// A single point is repeated so the result is always a drawable line.
pub fn decimate(points: &[Coord<f64>], stride: usize) -> Vec<Coord<f64>> {
    let (Some(&first), Some(&last)) = (points.first(), points.last()) else {
        return Vec::new();
    };

    let interior = if points.len() > 2 {
        &points[1..points.len() - 1]
    } else {
        &[]
    };

    std::iter::once(first)
        .chain(interior.iter().step_by(stride.max(1)).copied())
        .chain(std::iter::once(last))
        .collect()
}
