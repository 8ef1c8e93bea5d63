use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "shp", "kml", "kmz", "gpkg", "geojson", "json", "gdb", "zip",
];
pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;
pub const DRAWN_FILENAME: &str = "drawn_area.geojson";
const DRAWN_LABEL: &str = "Drawn area";
const MILES_PER_DEGREE: f64 = 69.0;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("unsupported file type for {name}; supported: {}", SUPPORTED_EXTENSIONS.join(", "))]
    UnsupportedExtension { name: String },
    #[error("file is empty")]
    Empty,
    #[error("file too large ({size} bytes, maximum {max})")]
    TooLarge { size: usize, max: usize },
    #[error("no geometry drawn")]
    NoFeatures,
    #[error("invalid geojson: {0}")]
    InvalidGeoJson(String),
}

/// A file the user picked, held in memory until submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn validate(&self) -> Result<(), InputError> {
        let extension = Path::new(&self.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        if !SUPPORTED_EXTENSIONS
            .iter()
            .any(|supported| supported.eq_ignore_ascii_case(extension))
        {
            return Err(InputError::UnsupportedExtension {
                name: self.name.clone(),
            });
        }
        if self.bytes.is_empty() {
            return Err(InputError::Empty);
        }
        if self.bytes.len() > MAX_UPLOAD_BYTES {
            return Err(InputError::TooLarge {
                size: self.bytes.len(),
                max: MAX_UPLOAD_BYTES,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryKind {
    Point,
    LineString,
    Polygon,
}

/// A single drawn shape in lon/lat. Polygons hold their exterior ring.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawnFeature {
    pub kind: GeometryKind,
    pub coordinates: Vec<[f64; 2]>,
}

impl DrawnFeature {
    pub fn point(lon: f64, lat: f64) -> Self {
        Self {
            kind: GeometryKind::Point,
            coordinates: vec![[lon, lat]],
        }
    }

    pub fn line(coordinates: Vec<[f64; 2]>) -> Self {
        Self {
            kind: GeometryKind::LineString,
            coordinates,
        }
    }

    /// Builds a polygon, closing the ring if the caller left it open.
    pub fn polygon(mut ring: Vec<[f64; 2]>) -> Self {
        if let (Some(first), Some(last)) = (ring.first().copied(), ring.last().copied()) {
            if ring.len() > 1 && first != last {
                ring.push(first);
            }
        }
        Self {
            kind: GeometryKind::Polygon,
            coordinates: ring,
        }
    }

    fn area_sq_miles(&self) -> f64 {
        if self.kind != GeometryKind::Polygon || self.coordinates.len() < 3 {
            return 0.0;
        }
        let ring = &self.coordinates;
        let mean_lat = ring.iter().map(|p| p[1]).sum::<f64>() / ring.len() as f64;
        let x_scale = MILES_PER_DEGREE * mean_lat.to_radians().cos();
        let twice_area: f64 = ring
            .iter()
            .zip(ring.iter().cycle().skip(1))
            .map(|(a, b)| {
                (a[0] * x_scale) * (b[1] * MILES_PER_DEGREE)
                    - (b[0] * x_scale) * (a[1] * MILES_PER_DEGREE)
            })
            .sum();
        (twice_area / 2.0).abs()
    }
}

/// Geometry authored in the draw screen.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DrawnGeometry {
    pub features: Vec<DrawnFeature>,
}

impl DrawnGeometry {
    pub fn new(features: Vec<DrawnFeature>) -> Self {
        Self { features }
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn summary(&self) -> GeometrySummary {
        let mut kinds = Vec::new();
        for feature in &self.features {
            if !kinds.contains(&feature.kind) {
                kinds.push(feature.kind);
            }
        }
        let bounds = self
            .features
            .iter()
            .flat_map(|feature| feature.coordinates.iter())
            .fold(None, |acc: Option<[f64; 4]>, p| {
                Some(match acc {
                    None => [p[0], p[1], p[0], p[1]],
                    Some([min_x, min_y, max_x, max_y]) => [
                        min_x.min(p[0]),
                        min_y.min(p[1]),
                        max_x.max(p[0]),
                        max_y.max(p[1]),
                    ],
                })
            });
        let area_sq_miles = kinds.contains(&GeometryKind::Polygon).then(|| {
            self.features
                .iter()
                .map(DrawnFeature::area_sq_miles)
                .sum::<f64>()
        });
        GeometrySummary {
            feature_count: self.features.len(),
            kinds,
            bounds,
            area_sq_miles,
        }
    }

    /// Encodes the geometry as a GeoJSON `FeatureCollection`.
    pub fn to_geojson(&self) -> String {
        let doc = geojson::FeatureCollection {
            kind: "FeatureCollection".to_string(),
            features: self
                .features
                .iter()
                .map(|feature| geojson::Feature {
                    kind: "Feature".to_string(),
                    properties: serde_json::Map::new(),
                    geometry: match feature.kind {
                        GeometryKind::Point => geojson::Geometry::Point {
                            coordinates: feature.coordinates.first().copied().unwrap_or_default(),
                        },
                        GeometryKind::LineString => geojson::Geometry::LineString {
                            coordinates: feature.coordinates.clone(),
                        },
                        GeometryKind::Polygon => geojson::Geometry::Polygon {
                            coordinates: vec![feature.coordinates.clone()],
                        },
                    },
                })
                .collect(),
        };
        // Plain structs of strings and floats always serialize.
        serde_json::to_string(&doc).unwrap_or_default()
    }

    pub fn from_geojson(text: &str) -> Result<Self, InputError> {
        let doc: geojson::FeatureCollection = serde_json::from_str(text)
            .map_err(|err| InputError::InvalidGeoJson(err.to_string()))?;
        let features = doc
            .features
            .into_iter()
            .map(|feature| match feature.geometry {
                geojson::Geometry::Point { coordinates } => DrawnFeature::point(coordinates[0], coordinates[1]),
                geojson::Geometry::LineString { coordinates } => DrawnFeature::line(coordinates),
                geojson::Geometry::Polygon { coordinates } => DrawnFeature {
                    kind: GeometryKind::Polygon,
                    coordinates: coordinates.into_iter().next().unwrap_or_default(),
                },
            })
            .collect();
        Ok(Self { features })
    }

    pub fn to_upload(&self) -> UploadedFile {
        UploadedFile::new(DRAWN_FILENAME, self.to_geojson().into_bytes())
    }
}

mod geojson {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    pub(super) struct FeatureCollection {
        #[serde(rename = "type")]
        pub kind: String,
        pub features: Vec<Feature>,
    }

    #[derive(Serialize, Deserialize)]
    pub(super) struct Feature {
        #[serde(rename = "type")]
        pub kind: String,
        #[serde(default)]
        pub properties: serde_json::Map<String, serde_json::Value>,
        pub geometry: Geometry,
    }

    #[derive(Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub(super) enum Geometry {
        Point { coordinates: [f64; 2] },
        LineString { coordinates: Vec<[f64; 2]> },
        Polygon { coordinates: Vec<Vec<[f64; 2]>> },
    }
}

/// What the configure screen knows about the input's shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeometrySummary {
    pub feature_count: usize,
    pub kinds: Vec<GeometryKind>,
    /// `[min_lon, min_lat, max_lon, max_lat]`
    pub bounds: Option<[f64; 4]>,
    pub area_sq_miles: Option<f64>,
}

/// Where the geometry of a job came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometrySource {
    Uploaded,
    Drawn,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobInput {
    File(UploadedFile),
    Drawn(DrawnGeometry),
}

impl JobInput {
    pub fn label(&self) -> &str {
        match self {
            JobInput::File(file) => &file.name,
            JobInput::Drawn(_) => DRAWN_LABEL,
        }
    }

    pub fn source(&self) -> GeometrySource {
        match self {
            JobInput::File(_) => GeometrySource::Uploaded,
            JobInput::Drawn(_) => GeometrySource::Drawn,
        }
    }

    pub fn validate(&self) -> Result<(), InputError> {
        match self {
            JobInput::File(file) => file.validate(),
            JobInput::Drawn(geometry) if geometry.is_empty() => Err(InputError::NoFeatures),
            JobInput::Drawn(_) => Ok(()),
        }
    }

    /// The file actually sent to the backend.
    pub fn to_upload(&self) -> UploadedFile {
        match self {
            JobInput::File(file) => file.clone(),
            JobInput::Drawn(geometry) => geometry.to_upload(),
        }
    }
}

/// Buffer/clip parameters and report labels sent with a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub buffer_distance_feet: u32,
    pub clip_buffer_miles: f64,
    pub project_name: String,
    pub project_id: String,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            buffer_distance_feet: 500,
            clip_buffer_miles: 1.0,
            project_name: String::new(),
            project_id: String::new(),
        }
    }
}

/// Everything the engine needs to start one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub input: UploadedFile,
    pub config: JobConfig,
}
