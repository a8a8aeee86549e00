//! Store planning.
//!
//! Declares the logical schema of a store for one cycle: dimensions with
//! their static chunking, the 19 data arrays, the four coordinate arrays and
//! the root attributes (dataset identity, projection, cycle).

use chrono::{DateTime, Utc};
use projection::LambertConformal;
use serde_json::{json, Map, Value};
use zarr_store::{
    CoordinateSpec, CoordinateValues, DataArraySpec, Dimension, ElementType, StoreReader,
    StoreSchema,
};

use crate::config::{ChunkScheme, GridGeometry, PipelineConfig};
use crate::cycle::ForecastCycle;
use crate::error::{IngestError, Result};
use crate::source::SpatialCoords;
use crate::variables::{nbm_variables, EncodingPolicy};

/// Name of the grid-mapping attribute block referenced by data arrays.
pub const GRID_MAPPING: &str = "spatial_ref";

/// Dimension names in array order.
pub const DIMENSIONS: [&str; 4] = ["init_time", "lead_time", "y", "x"];

/// Dataset identity written into every store.
pub fn dataset_attributes(dataset_id: &str) -> Map<String, Value> {
    let mut attrs = Map::new();
    attrs.insert("id".into(), json!(dataset_id));
    attrs.insert(
        "title".into(),
        json!("NOAA National Blend of Models (NBM) CONUS Forecast"),
    );
    attrs.insert(
        "description".into(),
        json!(
            "Hourly forecast data from the National Blend of Models (NBM) for the \
             Continental United States (CONUS) on a 2.5 km Lambert Conformal grid"
        ),
    );
    attrs.insert("provider".into(), json!("NOAA/NWS/NCEP"));
    attrs.insert("model".into(), json!("NBM"));
    attrs.insert("variant".into(), json!("CONUS"));
    attrs.insert("version".into(), json!("4.3"));
    attrs
}

/// CF grid-mapping attributes of a Lambert Conformal projection.
pub fn projection_attributes(proj: &LambertConformal) -> Value {
    json!({
        "grid_mapping_name": "lambert_conformal_conic",
        "standard_parallel": [proj.latin1_deg, proj.latin2_deg],
        "longitude_of_central_meridian": proj.lon0_deg,
        "latitude_of_projection_origin": proj.lat0_deg,
        "false_easting": 0.0,
        "false_northing": 0.0,
        "earth_radius": proj.earth_radius,
        "proj4": proj.proj4(),
    })
}

/// Plans stores for a fixed geometry and chunk scheme.
#[derive(Debug, Clone)]
pub struct StorePlanner {
    dataset_id: String,
    geometry: GridGeometry,
    chunks: ChunkScheme,
    projection: LambertConformal,
}

impl StorePlanner {
    pub fn new(config: &PipelineConfig) -> Self {
        let mut projection = LambertConformal::nbm_conus();
        projection.nx = config.geometry.nx;
        projection.ny = config.geometry.ny;

        Self {
            dataset_id: config.dataset_id.clone(),
            geometry: config.geometry,
            chunks: config.chunks,
            projection,
        }
    }

    pub fn projection(&self) -> &LambertConformal {
        &self.projection
    }

    /// Declare the schema for `cycle`.
    pub fn plan(&self, cycle: &ForecastCycle) -> Result<StoreSchema> {
        let leads = cycle.horizon.len() as u64;

        let dimensions = vec![
            Dimension::new("init_time", 1, 1),
            Dimension::new(
                "lead_time",
                leads,
                self.chunks.lead_time_chunk(cycle.horizon).min(leads),
            ),
            Dimension::new("y", self.geometry.ny as u64, self.chunks.y),
            Dimension::new("x", self.geometry.nx as u64, self.chunks.x),
        ];

        let mut data_arrays = Vec::with_capacity(nbm_variables().len());
        for var in nbm_variables() {
            let encoding = EncodingPolicy::for_variable(var.id)?;
            let mut attrs = Map::new();
            attrs.insert("long_name".into(), json!(var.long_name));
            attrs.insert("units".into(), json!(var.units));
            attrs.insert("grid_mapping".into(), json!(GRID_MAPPING));
            data_arrays.push(DataArraySpec {
                name: var.id.to_string(),
                keepbits: Some(encoding.keepbits),
                codec: Some(encoding.codec),
                attributes: attrs,
            });
        }

        let coordinates = vec![
            coordinate(
                "init_time",
                ElementType::Int64,
                json!({
                    "long_name": "Forecast initialization time",
                    "standard_name": "forecast_reference_time",
                    "units": "seconds since 1970-01-01T00:00:00Z",
                    "calendar": "proleptic_gregorian",
                }),
            ),
            coordinate(
                "lead_time",
                ElementType::Int32,
                json!({
                    "long_name": "Forecast lead time",
                    "standard_name": "forecast_period",
                    "units": "hours",
                }),
            ),
            coordinate(
                "y",
                ElementType::Float64,
                json!({
                    "long_name": "y-coordinate in projection",
                    "standard_name": "projection_y_coordinate",
                    "units": "m",
                }),
            ),
            coordinate(
                "x",
                ElementType::Float64,
                json!({
                    "long_name": "x-coordinate in projection",
                    "standard_name": "projection_x_coordinate",
                    "units": "m",
                }),
            ),
        ];

        let (min_lon, min_lat, max_lon, max_lat) = self.projection.geographic_bounds();

        let mut attributes = dataset_attributes(&self.dataset_id);
        attributes.insert(GRID_MAPPING.into(), projection_attributes(&self.projection));
        attributes.insert(
            "geographic_bounds".into(),
            json!([min_lon, min_lat, max_lon, max_lat]),
        );
        attributes.insert("init_time".into(), json!(cycle.init_time.to_rfc3339()));
        attributes.insert("horizon".into(), json!(cycle.horizon.as_str()));

        let schema = StoreSchema {
            dimensions,
            data_arrays,
            coordinates,
            attributes,
        };
        schema
            .validate()
            .map_err(|e| IngestError::InvalidConfig(e.to_string()))?;
        Ok(schema)
    }

    pub fn geometry(&self) -> GridGeometry {
        self.geometry
    }
}

/// Coordinate values of a store for `cycle` on the given spatial axes.
pub fn coordinate_values(
    cycle: &ForecastCycle,
    coords: &SpatialCoords,
) -> Vec<(&'static str, CoordinateValues)> {
    vec![
        (
            "init_time",
            CoordinateValues::Int64(vec![cycle.init_time.timestamp()]),
        ),
        (
            "lead_time",
            CoordinateValues::Int32(cycle.lead_times().into_iter().map(|h| h as i32).collect()),
        ),
        ("y", CoordinateValues::Float64(coords.y.clone())),
        ("x", CoordinateValues::Float64(coords.x.clone())),
    ]
}

/// Attributes only known once writing completes.
pub fn generation_attributes(generated_at: DateTime<Utc>) -> Map<String, Value> {
    let mut attrs = Map::new();
    attrs.insert("generated_at".into(), json!(generated_at.to_rfc3339()));
    attrs
}

/// Differences between the planned dimensions and an existing store's.
///
/// Empty when every dimension has the same size.
pub fn dimension_differences(schema: &StoreSchema, reader: &StoreReader) -> Vec<String> {
    let mut diffs = Vec::new();
    for dim in &schema.dimensions {
        match reader.array_info(&dim.name) {
            Ok(info) if info.shape == vec![dim.size] => {}
            Ok(info) => diffs.push(format!(
                "{}: published {:?}, planned {}",
                dim.name, info.shape, dim.size
            )),
            Err(_) => diffs.push(format!("{}: missing from published store", dim.name)),
        }
    }
    diffs
}

fn coordinate(name: &str, element_type: ElementType, attrs: Value) -> CoordinateSpec {
    CoordinateSpec {
        name: name.to_string(),
        element_type,
        attributes: match attrs {
            Value::Object(map) => map,
            _ => Map::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cycle(hour: u32) -> ForecastCycle {
        ForecastCycle::resolve(Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap())
    }

    #[test]
    fn test_full_cycle_schema() {
        let planner = StorePlanner::new(&PipelineConfig::default());
        let schema = planner.plan(&cycle(12)).expect("plan");

        assert_eq!(schema.shape(), vec![1, 52, 1597, 2345]);
        assert_eq!(schema.chunk_shape(), vec![1, 52, 266, 391]);
        assert_eq!(schema.dimension("y").map(|d| d.num_chunks()), Some(7));
        assert_eq!(schema.data_arrays.len(), 19);
        assert_eq!(schema.coordinates.len(), 4);
        assert_eq!(schema.dimension_names(), DIMENSIONS.to_vec());
    }

    #[test]
    fn test_partial_cycle_schema() {
        let planner = StorePlanner::new(&PipelineConfig::default());
        let schema = planner.plan(&cycle(8)).expect("plan");
        assert_eq!(schema.shape()[1], 36);
        assert_eq!(schema.chunk_shape()[1], 36);
        assert_eq!(schema.attributes["horizon"], json!("partial"));
    }

    #[test]
    fn test_global_attributes() {
        let planner = StorePlanner::new(&PipelineConfig::default());
        let schema = planner.plan(&cycle(0)).expect("plan");
        let attrs = &schema.attributes;

        assert_eq!(attrs["id"], json!("noaa-nbm-conus-forecast"));
        assert_eq!(attrs["provider"], json!("NOAA/NWS/NCEP"));
        assert_eq!(attrs["init_time"], json!("2024-06-01T00:00:00+00:00"));

        let sr = &attrs[GRID_MAPPING];
        assert_eq!(sr["grid_mapping_name"], json!("lambert_conformal_conic"));
        assert_eq!(sr["standard_parallel"], json!([25.0, 25.0]));
        assert_eq!(sr["longitude_of_central_meridian"], json!(-95.0));
        assert_eq!(sr["earth_radius"], json!(6371200.0));
    }

    #[test]
    fn test_data_array_attributes() {
        let planner = StorePlanner::new(&PipelineConfig::default());
        let schema = planner.plan(&cycle(0)).expect("plan");

        let t2m = schema.data_array("t2m").expect("t2m declared");
        assert_eq!(t2m.keepbits, Some(12));
        assert_eq!(t2m.attributes["units"], json!("K"));
        assert_eq!(t2m.attributes["grid_mapping"], json!(GRID_MAPPING));

        let tcc = schema.data_array("tcc").expect("tcc declared");
        assert_eq!(tcc.keepbits, Some(8));
    }

    #[test]
    fn test_every_variable_pins_policy_codec() {
        let config = PipelineConfig {
            store: zarr_store::StoreConfig {
                compression: zarr_store::ZarrCompression::BloscLz4,
                compression_level: 9,
                shuffle: true,
            },
            ..PipelineConfig::default()
        };
        let schema = StorePlanner::new(&config).plan(&cycle(0)).expect("plan");
        for array in &schema.data_arrays {
            assert_eq!(array.codec, Some(crate::variables::VARIABLE_CODEC), "{}", array.name);
        }
    }

    #[test]
    fn test_coordinate_values() {
        let c = cycle(6);
        let coords = SpatialCoords {
            y: vec![0.0, 1.0],
            x: vec![5.0],
        };
        let values = coordinate_values(&c, &coords);
        assert_eq!(values[0].1, CoordinateValues::Int64(vec![c.init_time.timestamp()]));
        assert_eq!(values[1].1.len(), 52);
        assert!(values[1].1.is_strictly_increasing());
        assert_eq!(values[3].1, CoordinateValues::Float64(vec![5.0]));
    }
}
