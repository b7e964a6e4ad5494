use std::time::Duration;

/// GTFS route_type for heavy / intercity rail.
pub const RAIL_ROUTE_TYPE: i16 = 2;

/// Fewest stop visits a trip needs before it is worth map matching.
pub const MIN_TRIP_STOPS: usize = 3;

/// Every knob of a shape enrichment run.
///
/// The binary fills this from command line arguments and environment variables;
/// library callers usually start from `ShapeConfig::default()`.
#[derive(Debug, Clone)]
pub struct ShapeConfig {
    /// Base url of the OSRM-compatible service, without a trailing slash.
    pub osrm_url: String,
    /// Routing profile segment of the request path.
    pub profile: String,
    /// Hard limit for a single match or route request.
    pub request_timeout: Duration,
    /// How many trips are resolved at the same time.
    pub concurrency: usize,
    /// Keep every n-th interior point of a resolved polyline.
    pub decimation_stride: usize,
    /// Trips with fewer stop visits than this are skipped. Never below
    /// `MIN_TRIP_STOPS`.
    pub min_stops: usize,
    /// Numeric GTFS route types whose trips get new shapes.
    pub route_types: Vec<i16>,
    /// Prepended to the running shape number.
    pub shape_id_prefix: String,
    /// Prefix for the name of the written archive.
    pub output_prefix: String,
}

impl Default for ShapeConfig {
    fn default() -> Self {
        Self {
            osrm_url: String::from("http://localhost:5000"),
            profile: String::from("train"),
            request_timeout: Duration::from_secs(5),
            concurrency: 10,
            decimation_stride: 3,
            min_stops: MIN_TRIP_STOPS,
            route_types: vec![RAIL_ROUTE_TYPE],
            shape_id_prefix: String::from("sh_"),
            output_prefix: String::from("shaped-"),
        }
    }
}
