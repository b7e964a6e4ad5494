use ahash::AHashSet;
use futures::StreamExt;
use gtfs_structures::Gtfs;
use tracing::{debug, info};

use crate::assembler::{AssembledShapes, ShapeAssembler};
use crate::config::{MIN_TRIP_STOPS, ShapeConfig};
use crate::coordinates::CoordinateIndex;
use crate::osrm::GeometryService;
use crate::resolver::{Resolution, ShapeResolver};
use crate::route_filter::stop_visits_for_route_types;
use crate::scheduler::resolve_all;
use crate::tasks::{ShapeTask, build_tasks};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub tasks: usize,
    pub resolved: usize,
    pub missing_coordinates: usize,
    pub no_result: usize,
    pub points_written: usize,
}

#[derive(Debug, Clone)]
pub struct ShapeEnrichment {
    pub shapes: AssembledShapes,
    pub summary: RunSummary,
}

/// Selects the configured route types from the feed and resolves a shape for
/// every eligible trip.
pub async fn enrich_feed<S: GeometryService>(
    gtfs: &Gtfs,
    service: &S,
    config: &ShapeConfig,
) -> ShapeEnrichment {
    let index = CoordinateIndex::from_gtfs(gtfs);
    let visits = stop_visits_for_route_types(gtfs, &config.route_types);
    let tasks = build_tasks(visits, config.min_stops.max(MIN_TRIP_STOPS));
    let taken_shape_ids = existing_shape_ids(gtfs);

    info!(
        stops = index.len(),
        tasks = tasks.len(),
        existing_shapes = taken_shape_ids.len(),
        route_types = ?config.route_types,
        "built shape tasks"
    );

    enrich_tasks(&tasks, &index, service, config, taken_shape_ids).await
}

/// Shape ids defined in shapes.txt or referenced from trips.txt.
pub fn existing_shape_ids(gtfs: &Gtfs) -> AHashSet<String> {
    gtfs.shapes
        .keys()
        .cloned()
        .chain(gtfs.trips.values().filter_map(|trip| trip.shape_id.clone()))
        .collect()
}

/// Runs every task through the resolver and hands each resolved shape to a
/// single assembler owned by this loop. New shape ids never reuse one of
/// `taken_shape_ids`.
pub async fn enrich_tasks<S: GeometryService>(
    tasks: &[ShapeTask],
    index: &CoordinateIndex,
    service: &S,
    config: &ShapeConfig,
    taken_shape_ids: AHashSet<String>,
) -> ShapeEnrichment {
    let resolver = ShapeResolver::new(index, service, config.decimation_stride);
    let mut assembler =
        ShapeAssembler::with_taken_ids(config.shape_id_prefix.as_str(), taken_shape_ids);
    let mut summary = RunSummary {
        tasks: tasks.len(),
        ..RunSummary::default()
    };

    let mut results = std::pin::pin!(resolve_all(tasks, &resolver, config.concurrency));

    while let Some(resolution) = results.next().await {
        match resolution {
            Resolution::Resolved(shape) => {
                summary.resolved += 1;
                summary.points_written += shape.points.len();

                let trip_id = shape.trip_id.clone();
                let shape_id = assembler.accept(shape);
                debug!(trip_id = %trip_id, shape_id = %shape_id, "assigned shape");
            }
            Resolution::NoCoordinates { .. } => summary.missing_coordinates += 1,
            Resolution::NoResult { .. } => summary.no_result += 1,
        }

        let done = summary.resolved + summary.missing_coordinates + summary.no_result;
        if done % 100 == 0 {
            info!(done, total = summary.tasks, "shape progress");
        }
    }

    ShapeEnrichment {
        shapes: assembler.finish(),
        summary,
    }
}
