//! Variable encoding policy.
//!
//! Fixed catalog of the 19 ingested variables with their units and the
//! number of mantissa bits kept by precision reduction. Codec and chunking
//! are uniform across variables; the codec is pinned on every data array so
//! store-wide compression settings only reach the coordinates.

use serde::Serialize;
use zarr_store::{ArrayCodec, ZarrCompression};

use crate::error::{IngestError, Result};

/// Compression level applied to every variable.
pub const COMPRESSION_LEVEL: u8 = 3;

/// Codec applied to every variable.
pub const VARIABLE_CODEC: ArrayCodec = ArrayCodec {
    compression: ZarrCompression::BloscZstd,
    level: COMPRESSION_LEVEL,
};

/// Broad class a variable's precision is chosen by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableClass {
    Temperature,
    Wind,
    Precipitation,
    CloudVisibility,
    Radiation,
    Pressure,
    Humidity,
}

/// Reference data for one variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VariableSpec {
    /// Short identifier, also the store array name.
    pub id: &'static str,
    pub long_name: &'static str,
    pub units: &'static str,
    pub class: VariableClass,
    /// Mantissa bits kept by precision reduction.
    pub keepbits: u32,
}

/// Encoding applied to one variable when written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableEncoding {
    pub keepbits: u32,
    pub codec: ArrayCodec,
}

/// Get the list of ingested variables, in store order.
pub fn nbm_variables() -> &'static [VariableSpec] {
    use VariableClass::*;

    const VARIABLES: [VariableSpec; 19] = [
        // Temperature
        VariableSpec { id: "t2m", long_name: "2-meter temperature", units: "K", class: Temperature, keepbits: 12 },
        VariableSpec { id: "dpt2m", long_name: "2-meter dewpoint temperature", units: "K", class: Temperature, keepbits: 12 },
        VariableSpec { id: "tmax", long_name: "Maximum temperature", units: "K", class: Temperature, keepbits: 12 },
        VariableSpec { id: "tmin", long_name: "Minimum temperature", units: "K", class: Temperature, keepbits: 12 },

        // Wind
        VariableSpec { id: "u10m", long_name: "10-meter u-component of wind", units: "m s-1", class: Wind, keepbits: 10 },
        VariableSpec { id: "v10m", long_name: "10-meter v-component of wind", units: "m s-1", class: Wind, keepbits: 10 },
        VariableSpec { id: "u80m", long_name: "80-meter u-component of wind", units: "m s-1", class: Wind, keepbits: 10 },
        VariableSpec { id: "v80m", long_name: "80-meter v-component of wind", units: "m s-1", class: Wind, keepbits: 10 },
        VariableSpec { id: "gust", long_name: "Wind gust", units: "m s-1", class: Wind, keepbits: 10 },

        // Precipitation
        VariableSpec { id: "tp", long_name: "Total precipitation", units: "kg m-2", class: Precipitation, keepbits: 14 },
        VariableSpec { id: "prate", long_name: "Precipitation rate", units: "kg m-2 s-1", class: Precipitation, keepbits: 12 },
        VariableSpec { id: "snow", long_name: "Snow accumulation", units: "kg m-2", class: Precipitation, keepbits: 14 },

        // Cloud / visibility
        VariableSpec { id: "tcc", long_name: "Total cloud cover", units: "%", class: CloudVisibility, keepbits: 8 },
        VariableSpec { id: "ceil", long_name: "Ceiling height", units: "m", class: CloudVisibility, keepbits: 10 },
        VariableSpec { id: "vis", long_name: "Visibility", units: "m", class: CloudVisibility, keepbits: 10 },

        // Radiation
        VariableSpec { id: "dswrf", long_name: "Downward shortwave radiation flux", units: "W m-2", class: Radiation, keepbits: 12 },
        VariableSpec { id: "dlwrf", long_name: "Downward longwave radiation flux", units: "W m-2", class: Radiation, keepbits: 12 },

        // Surface
        VariableSpec { id: "sp", long_name: "Surface pressure", units: "Pa", class: Pressure, keepbits: 12 },
        VariableSpec { id: "rh2m", long_name: "2-meter relative humidity", units: "%", class: Humidity, keepbits: 10 },
    ];

    &VARIABLES
}

/// Look up a variable by identifier.
pub fn variable_spec(id: &str) -> Result<&'static VariableSpec> {
    nbm_variables()
        .iter()
        .find(|v| v.id == id)
        .ok_or_else(|| IngestError::UnknownVariable(id.to_string()))
}

/// Pure lookup from variable identifier to encoding.
pub struct EncodingPolicy;

impl EncodingPolicy {
    /// Encoding for `id`, or `UnknownVariable`.
    pub fn for_variable(id: &str) -> Result<VariableEncoding> {
        let spec = variable_spec(id)?;
        Ok(VariableEncoding {
            keepbits: spec.keepbits,
            codec: VARIABLE_CODEC,
        })
    }
}
