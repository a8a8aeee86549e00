//! Codec settings applied to every array of a store.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Blosc settings for a store. The NBM default is Zstd level 3 with byte
/// shuffle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub compression: ZarrCompression,

    /// Blosc level, 1-9.
    pub compression_level: u8,

    /// Byte shuffle before compression.
    pub shuffle: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            compression: ZarrCompression::BloscZstd,
            compression_level: 3,
            shuffle: true,
        }
    }
}

impl StoreConfig {
    /// Defaults overridden by `ZARR_COMPRESSION`, `ZARR_COMPRESSION_LEVEL`
    /// and `ZARR_SHUFFLE`. Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ZARR_COMPRESSION") {
            match val.parse() {
                Ok(compression) => config.compression = compression,
                Err(e) => warn!(value = %val, error = %e, "Ignoring ZARR_COMPRESSION"),
            }
        }

        if let Ok(val) = std::env::var("ZARR_COMPRESSION_LEVEL") {
            match val.parse() {
                Ok(level) => config.compression_level = level,
                Err(e) => warn!(value = %val, error = %e, "Ignoring ZARR_COMPRESSION_LEVEL"),
            }
        }

        if let Ok(val) = std::env::var("ZARR_SHUFFLE") {
            config.shuffle = matches!(val.to_ascii_lowercase().as_str(), "true" | "1" | "yes");
        }

        config
    }

    /// Codec applied to arrays that do not pin their own.
    pub fn codec(&self) -> ArrayCodec {
        ArrayCodec {
            compression: self.compression,
            level: self.compression_level,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.codec().validate()
    }
}

/// Compressor and level of one array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayCodec {
    pub compression: ZarrCompression,
    pub level: u8,
}

impl ArrayCodec {
    pub fn validate(&self) -> Result<(), String> {
        if self.compression != ZarrCompression::None && !(1..=9).contains(&self.level) {
            return Err(format!("compression level must be 1-9, got {}", self.level));
        }
        Ok(())
    }
}

/// Blosc compressor for data and coordinate arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZarrCompression {
    None,
    BloscLz4,
    #[default]
    BloscZstd,
}

impl ZarrCompression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::BloscLz4 => "blosc_lz4",
            Self::BloscZstd => "blosc_zstd",
        }
    }
}

impl FromStr for ZarrCompression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "lz4" | "blosc_lz4" => Ok(Self::BloscLz4),
            "zstd" | "blosc_zstd" => Ok(Self::BloscZstd),
            other => Err(format!("unknown compression '{}'", other)),
        }
    }
}

impl std::fmt::Display for ZarrCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
