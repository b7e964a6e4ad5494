use ahash::AHashMap;
use geo::Coord;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("stop '{0}' has no known coordinates")]
pub struct MissingCoordinate(pub String);

/// Stop id to position lookup, built once per feed and only read afterwards.
///
/// Positions are stored as `Coord { x: lon, y: lat }`, which is the order the
/// OSRM api expects and returns.
#[derive(Debug, Clone, Default)]
pub struct CoordinateIndex {
    positions: AHashMap<String, Coord<f64>>,
}

impl CoordinateIndex {
    /// Builds the index from `(stop_id, lat, lon)` rows.
    ///
    /// Stops missing either half of their position are left out, so looking
    /// them up later reports `MissingCoordinate`.
    pub fn from_rows<I, S>(rows: I) -> Self
    where
        I: IntoIterator<Item = (S, Option<f64>, Option<f64>)>,
        S: Into<String>,
    {
        let positions = rows
            .into_iter()
            .filter_map(|(stop_id, lat, lon)| match (lat, lon) {
                (Some(lat), Some(lon)) => Some((stop_id.into(), Coord { x: lon, y: lat })),
                _ => None,
            })
            .collect();

        Self { positions }
    }

    pub fn from_gtfs(gtfs: &gtfs_structures::Gtfs) -> Self {
        Self::from_rows(
            gtfs.stops
                .values()
                .map(|stop| (stop.id.as_str(), stop.latitude, stop.longitude)),
        )
    }

    pub fn lookup(&self, stop_id: &str) -> Result<Coord<f64>, MissingCoordinate> {
        self.positions
            .get(stop_id)
            .copied()
            .ok_or_else(|| MissingCoordinate(stop_id.to_string()))
    }

    /// Resolves a whole stop sequence, failing on the first unknown stop.
    pub fn lookup_all<S: AsRef<str>>(
        &self,
        stop_ids: &[S],
    ) -> Result<Vec<Coord<f64>>, MissingCoordinate> {
        stop_ids.iter().map(|id| self.lookup(id.as_ref())).collect()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
