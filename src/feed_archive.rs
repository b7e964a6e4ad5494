//! Writes a copy of the input feed with the new shapes spliced in.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use csv::StringRecord;
use thiserror::Error;
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::assembler::{AssembledShapes, ShapePointRecord};

const TRIPS_FILE: &str = "trips.txt";
const SHAPES_FILE: &str = "shapes.txt";
const SHAPES_HEADER: [&str; 5] = [
    "shape_id",
    "shape_pt_lat",
    "shape_pt_lon",
    "shape_pt_sequence",
    "shape_dist_traveled",
];

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("could not parse {file}: {source}")]
    Csv {
        file: &'static str,
        #[source]
        source: csv::Error,
    },
    #[error("feed has no {0}")]
    MissingFile(&'static str),
    #[error("{file} has no {column} column")]
    MissingColumn {
        file: &'static str,
        column: &'static str,
    },
    #[error("cannot derive an output name from {0}")]
    NoFileName(PathBuf),
}

fn csv_error(file: &'static str) -> impl Fn(csv::Error) -> ArchiveError {
    move |source| ArchiveError::Csv { file, source }
}

/// One file of the feed, by its path inside the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub name: String,
    pub contents: Vec<u8>,
}

impl FeedEntry {
    fn is(&self, file_name: &str) -> bool {
        Path::new(&self.name)
            .file_name()
            .is_some_and(|name| name == file_name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub entries: usize,
    pub trips_with_shapes: usize,
    pub retained_shape_rows: usize,
    pub new_shape_rows: usize,
}

/// `feed.zip` becomes `<prefix>feed.zip` next to it, a directory `feed/`
/// becomes `<prefix>feed.zip` next to the directory.
pub fn output_path(input: &Path, prefix: &str) -> Result<PathBuf, ArchiveError> {
    let file_name = input
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| ArchiveError::NoFileName(input.to_path_buf()))?;

    let output_name = if input.is_dir() {
        format!("{}{}.zip", prefix, file_name)
    } else {
        format!("{}{}", prefix, file_name)
    };

    Ok(input.with_file_name(output_name))
}

/// Reads every file of a zipped or unpacked feed.
///
/// Directory feeds are read one level deep and sorted by name.
pub fn read_entries(input: &Path) -> Result<Vec<FeedEntry>, ArchiveError> {
    if input.is_dir() {
        let mut entries = Vec::new();
        for dir_entry in std::fs::read_dir(input)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_file() {
                continue;
            }

            entries.push(FeedEntry {
                name: dir_entry.file_name().to_string_lossy().into_owned(),
                contents: std::fs::read(dir_entry.path())?,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        return Ok(entries);
    }

    let mut archive = ZipArchive::new(File::open(input)?)?;
    let mut entries = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }

        let mut contents = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut contents)?;
        entries.push(FeedEntry {
            name: file.name().to_string(),
            contents,
        });
    }

    Ok(entries)
}

fn column_position(headers: &StringRecord, column: &str) -> Option<usize> {
    headers
        .iter()
        .position(|header| header.trim_start_matches('\u{feff}').trim() == column)
}

/// Sets `shape_id` on every trip with an assignment, adding the column when the
/// feed has none. Everything else is copied field by field.
///
/// Also returns every shape id referenced by a trip afterwards.
pub fn patch_trip_shape_ids(
    trips_csv: &[u8],
    assignments: &AHashMap<String, String>,
) -> Result<(Vec<u8>, BTreeSet<String>), ArchiveError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(trips_csv);
    let mut headers = reader.headers().map_err(csv_error(TRIPS_FILE))?.clone();

    let trip_id_col =
        column_position(&headers, "trip_id").ok_or(ArchiveError::MissingColumn {
            file: TRIPS_FILE,
            column: "trip_id",
        })?;
    let shape_id_col = match column_position(&headers, "shape_id") {
        Some(col) => col,
        None => {
            headers.push_field("shape_id");
            headers.len() - 1
        }
    };

    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::with_capacity(trips_csv.len()));
    writer
        .write_record(&headers)
        .map_err(csv_error(TRIPS_FILE))?;

    let mut referenced = BTreeSet::new();

    for record in reader.records() {
        let record = record.map_err(csv_error(TRIPS_FILE))?;
        let trip_id = record.get(trip_id_col).unwrap_or_default();

        let shape_id = match assignments.get(trip_id) {
            Some(shape_id) => shape_id.as_str(),
            None => record.get(shape_id_col).unwrap_or_default(),
        };
        if !shape_id.is_empty() {
            referenced.insert(shape_id.to_string());
        }

        let width = record.len().max(shape_id_col + 1);
        let patched: StringRecord = (0..width)
            .map(|col| {
                if col == shape_id_col {
                    shape_id
                } else {
                    record.get(col).unwrap_or_default()
                }
            })
            .collect();

        writer
            .write_record(&patched)
            .map_err(csv_error(TRIPS_FILE))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ArchiveError::Io(e.into_error()))?;

    Ok((bytes, referenced))
}

/// Builds the new shapes.txt and reports how many old rows survived.
///
/// Old rows are kept when their shape is still used by a trip and the id was
/// not handed out again to a new shape.
pub fn merge_shapes_table(
    existing: Option<&[u8]>,
    referenced: &BTreeSet<String>,
    new_points: &[ShapePointRecord],
) -> Result<(Vec<u8>, usize), ArchiveError> {
    let new_ids: BTreeSet<&str> = new_points.iter().map(|p| p.shape_id.as_str()).collect();

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer
        .write_record(SHAPES_HEADER)
        .map_err(csv_error(SHAPES_FILE))?;

    let mut retained = 0;
    let mut replaced = 0;

    if let Some(existing) = existing {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(existing);

        for row in reader.deserialize::<ShapePointRecord>() {
            let row = row.map_err(csv_error(SHAPES_FILE))?;

            if !referenced.contains(&row.shape_id) {
                continue;
            }
            if new_ids.contains(row.shape_id.as_str()) {
                replaced += 1;
                continue;
            }

            writer.serialize(&row).map_err(csv_error(SHAPES_FILE))?;
            retained += 1;
        }
    }

    if replaced > 0 {
        warn!(
            replaced,
            "existing shape rows were overwritten by new shapes with the same id"
        );
    }

    for point in new_points {
        writer.serialize(point).map_err(csv_error(SHAPES_FILE))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ArchiveError::Io(e.into_error()))?;

    Ok((bytes, retained))
}

/// Copies the feed at `input` into a deflate zip at `output`, replacing
/// trips.txt and shapes.txt with their enriched versions.
pub fn write_enriched_archive(
    input: &Path,
    output: &Path,
    shapes: &AssembledShapes,
) -> Result<ArchiveStats, ArchiveError> {
    let mut entries = read_entries(input)?;

    let trips_index = entries
        .iter()
        .position(|entry| entry.is(TRIPS_FILE))
        .ok_or(ArchiveError::MissingFile(TRIPS_FILE))?;
    let shapes_index = entries.iter().position(|entry| entry.is(SHAPES_FILE));

    let (trips_csv, referenced) =
        patch_trip_shape_ids(&entries[trips_index].contents, &shapes.assignments)?;
    let (shapes_csv, retained_shape_rows) = merge_shapes_table(
        shapes_index.map(|i| entries[i].contents.as_slice()),
        &referenced,
        &shapes.points,
    )?;

    entries[trips_index].contents = trips_csv;
    match shapes_index {
        Some(i) => entries[i].contents = shapes_csv,
        None => {
            // sit next to trips.txt in case the feed lives in a subfolder
            let name = Path::new(&entries[trips_index].name)
                .with_file_name(SHAPES_FILE)
                .to_string_lossy()
                .into_owned();
            entries.push(FeedEntry {
                name,
                contents: shapes_csv,
            });
        }
    }

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(File::create(output)?);
    for entry in &entries {
        zip.start_file(entry.name.as_str(), options)?;
        zip.write_all(&entry.contents)?;
    }
    zip.finish()?;

    let stats = ArchiveStats {
        entries: entries.len(),
        trips_with_shapes: shapes.assignments.len(),
        retained_shape_rows,
        new_shape_rows: shapes.points.len(),
    };

    info!(
        output = %output.display(),
        entries = stats.entries,
        retained_shape_rows = stats.retained_shape_rows,
        new_shape_rows = stats.new_shape_rows,
        "wrote enriched feed"
    );

    Ok(stats)
}
