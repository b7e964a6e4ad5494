use itertools::Itertools;

/// One stop_times.txt row, reduced to what shape resolution needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopVisit {
    pub trip_id: String,
    pub stop_id: String,
    pub stop_sequence: u32,
}

/// Unit of work for the scheduler: a trip and its stops in travel order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeTask {
    pub trip_id: String,
    pub stop_ids: Vec<String>,
}

/// Groups stop visits per trip, orders each trip by stop_sequence and drops
/// trips with fewer than `min_stops` visits.
///
/// Tasks come out sorted by trip id so that repeated runs dispatch work in the
/// same order.
pub fn build_tasks<I>(visits: I, min_stops: usize) -> Vec<ShapeTask>
where
    I: IntoIterator<Item = StopVisit>,
{
    visits
        .into_iter()
        .into_group_map_by(|visit| visit.trip_id.clone())
        .into_iter()
        .filter(|(_, group)| group.len() >= min_stops)
        .map(|(trip_id, mut group)| {
            group.sort_by_key(|visit| visit.stop_sequence);

            ShapeTask {
                trip_id,
                stop_ids: group.into_iter().map(|visit| visit.stop_id).collect(),
            }
        })
        .sorted_by(|a, b| a.trip_id.cmp(&b.trip_id))
        .collect()
}
