use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};

use crate::resolver::ResolvedShape;

/// One shapes.txt row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapePointRecord {
    pub shape_id: String,
    pub shape_pt_lat: f64,
    pub shape_pt_lon: f64,
    pub shape_pt_sequence: u32,
    pub shape_dist_traveled: Option<f64>,
}

/// Output of a finished run: the new shapes.txt rows and which trip uses which
/// shape.
#[derive(Debug, Clone, Default)]
pub struct AssembledShapes {
    pub points: Vec<ShapePointRecord>,
    pub assignments: AHashMap<String, String>,
}

impl AssembledShapes {
    pub fn shape_count(&self) -> usize {
        self.assignments.len()
    }
}

/// Sole owner of the shape id counter and the output tables.
///
/// Ids are handed out in the order shapes are accepted, starting at zero, so
/// they stay contiguous no matter which trips resolved. Numbers whose id the
/// feed already uses are skipped.
#[derive(Debug)]
pub struct ShapeAssembler {
    prefix: String,
    next_id: u64,
    taken: AHashSet<String>,
    points: Vec<ShapePointRecord>,
    assignments: AHashMap<String, String>,
}

impl ShapeAssembler {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_taken_ids(prefix, AHashSet::new())
    }

    /// `taken` holds shape ids already present in the feed; they are never
    /// handed out again.
    pub fn with_taken_ids(prefix: impl Into<String>, taken: AHashSet<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next_id: 0,
            taken,
            points: Vec::new(),
            assignments: AHashMap::new(),
        }
    }

    fn next_free_id(&mut self) -> String {
        loop {
            let shape_id = format!("{}{}", self.prefix, self.next_id);
            self.next_id += 1;

            if !self.taken.contains(&shape_id) {
                return shape_id;
            }
        }
    }

    /// Returns the shape id assigned to the trip.
    pub fn accept(&mut self, shape: ResolvedShape) -> String {
        let shape_id = self.next_free_id();

        let rows = shape
            .points
            .iter()
            .zip(0u32..)
            .map(|(point, sequence)| ShapePointRecord {
                shape_id: shape_id.clone(),
                shape_pt_lat: point.y,
                shape_pt_lon: point.x,
                shape_pt_sequence: sequence,
                shape_dist_traveled: None,
            });
        self.points.extend(rows);

        self.assignments.insert(shape.trip_id, shape_id.clone());

        shape_id
    }

    pub fn finish(self) -> AssembledShapes {
        AssembledShapes {
            points: self.points,
            assignments: self.assignments,
        }
    }
}
