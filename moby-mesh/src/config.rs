//! Codec configuration
//!
//! The scalar parameters a class is encoded/decoded with. They normally come
//! from the surrounding asset container, but can also be kept in a TOML file
//! next to extracted assets so a rebuild uses the same values.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::decode::{DecodedClass, decode};
use crate::encode::{EncodedClass, encode};
use crate::error::ClassError;
use crate::model::SubMesh;

/// On-disk layout variant of the vertex table header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MobyFormat {
    /// 32-byte header whose last field points at trailing opaque data
    Rac1,
    /// 16-byte compact header
    #[default]
    Rac2,
    /// 16-byte compact header (later games)
    Rac3Dl,
}

impl MobyFormat {
    #[inline]
    pub fn has_compact_header(self) -> bool {
        !matches!(self, Self::Rac1)
    }
}

/// Codec parameters for one moby class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Position scale: one packed unit is `scale / 1024` console units (default: 1.0)
    #[serde(default = "default_scale")]
    pub scale: f32,
    /// Number of joints in the class's skeleton (default: 0)
    #[serde(default)]
    pub joint_count: u32,
    /// Vertex table header layout (default: rac2)
    #[serde(default)]
    pub format: MobyFormat,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            scale: default_scale(),
            joint_count: 0,
            format: MobyFormat::default(),
        }
    }
}

fn default_scale() -> f32 {
    1.0
}

/// Errors from loading or saving a config file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl CodecConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No codec config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml_string()?)?;
        tracing::debug!("Saved codec config to {}", path.display());
        Ok(())
    }

    /// Decode `count` submeshes whose table starts at `table_offset`
    pub fn decode(
        &self,
        bytes: &[u8],
        table_offset: usize,
        count: usize,
    ) -> Result<DecodedClass, ClassError> {
        decode(
            bytes,
            table_offset,
            count,
            self.scale,
            self.joint_count,
            self.format,
        )
    }

    pub fn encode(&self, submeshes: &[SubMesh]) -> Result<EncodedClass, ClassError> {
        encode(submeshes, self.scale, self.format)
    }
}
