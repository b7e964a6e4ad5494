// Copyright: ivy contributors
// Removal of the attribution is not allowed, as covered under the AGPL license

#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::arc_with_non_send_sync,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::bytes_nth,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::cmp_null,
    clippy::op_ref
)]

//! Generates track-following shapes for rail trips of a GTFS feed by asking an
//! OSRM-compatible map matching service, then writes the feed back out with
//! the new shapes.

pub mod assembler;
pub mod config;
pub mod coordinates;
pub mod feed_archive;
pub mod osrm;
pub mod pipeline;
pub mod resolver;
pub mod route_filter;
pub mod scheduler;
pub mod tasks;

#[cfg(test)]
mod testing;

pub use config::ShapeConfig;
pub use osrm::{GeometryService, OsrmClient};
pub use pipeline::{RunSummary, ShapeEnrichment, enrich_feed};
