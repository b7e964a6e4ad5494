use std::collections::BTreeSet;

use gtfs_structures::{Gtfs, RouteType};

use crate::tasks::StopVisit;

pub fn route_type_to_int(input: &RouteType) -> i16 {
    match input {
        RouteType::Tramway => 0,
        RouteType::Subway => 1,
        RouteType::Rail => 2,
        RouteType::Bus => 3,
        RouteType::Ferry => 4,
        RouteType::CableCar => 5,
        RouteType::Gondola => 6,
        RouteType::Funicular => 7,
        RouteType::Coach => 200,
        RouteType::Air => 1100,
        RouteType::Taxi => 1500,
        RouteType::Other(i) => *i,
    }
}

/// Route ids whose numeric route type is one of `route_types`.
pub fn route_ids_with_types(gtfs: &Gtfs, route_types: &[i16]) -> BTreeSet<String> {
    gtfs.routes
        .iter()
        .filter(|(_, route)| route_types.contains(&route_type_to_int(&route.route_type)))
        .map(|(route_id, _)| route_id.clone())
        .collect()
}

/// Flattens the stop times of every trip on a matching route.
pub fn stop_visits_for_route_types(gtfs: &Gtfs, route_types: &[i16]) -> Vec<StopVisit> {
    let route_ids_to_keep = route_ids_with_types(gtfs, route_types);

    gtfs.trips
        .values()
        .filter(|trip| route_ids_to_keep.contains(&trip.route_id))
        .flat_map(|trip| {
            trip.stop_times.iter().map(|stop_time| StopVisit {
                trip_id: trip.id.clone(),
                stop_id: stop_time.stop.id.clone(),
                stop_sequence: stop_time.stop_sequence,
            })
        })
        .collect()
}
