//! On-disk model artifacts, one JSON file per trained version.
//!
//! Layout: `{root}/{asset_id}/{FAMILY}_{YYYYMMDD}.json`. Writes go to a
//! `.tmp` sibling first and are renamed into place.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use coincast_core::domain::{HorizonError, ModelVersion};
use coincast_core::features::MinMaxScaler;

use crate::model::{ForecastModel, ModelError, OutputKind};
use crate::ridge::{self, RidgeModel};

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed artifact {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("unsupported artifact schema version {found} (max supported: {max})")]
    UnsupportedSchema { found: u32, max: u32 },

    #[error("unknown model family '{0}'")]
    UnknownFamily(String),

    #[error("'{0}' cannot be used as an artifact path component")]
    InvalidPathComponent(String),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Everything needed to reproduce a forecast: the fitted parameters, the
/// scaler fitted at training time and how the output is to be read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub schema_version: u32,
    pub asset_id: String,
    pub version: String,
    pub family: String,
    pub output_kind: OutputKind,
    pub sequence_length: usize,
    pub horizons: Vec<u32>,
    pub scaler: MinMaxScaler,
    pub parameters: serde_json::Value,
    pub trained_at: NaiveDateTime,
    pub training_samples: usize,
    pub validation_loss: f64,
    pub validation: Vec<HorizonError>,
    /// BLAKE3 of the feature history the model was fitted on.
    pub history_hash: String,
}

impl ModelArtifact {
    /// Rebuild the model this artifact describes.
    pub fn load_model(&self) -> Result<Box<dyn ForecastModel>, ArtifactError> {
        match self.family.as_str() {
            ridge::FAMILY => Ok(Box::new(RidgeModel::from_parameters(self.parameters.clone())?)),
            other => Err(ArtifactError::UnknownFamily(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    root: PathBuf,
}

impl ModelRegistry {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn asset_dir(&self, asset_id: &str) -> Result<PathBuf, ArtifactError> {
        Ok(self.root.join(path_component(asset_id)?))
    }

    pub fn artifact_path(&self, asset_id: &str, version: &str) -> Result<PathBuf, ArtifactError> {
        Ok(self
            .asset_dir(asset_id)?
            .join(format!("{}.json", path_component(version)?)))
    }

    /// Persist an artifact, replacing any earlier one of the same version.
    pub fn save(&self, artifact: &ModelArtifact) -> Result<PathBuf, ArtifactError> {
        let dir = self.asset_dir(&artifact.asset_id)?;
        fs::create_dir_all(&dir).map_err(|source| ArtifactError::Io {
            path: dir.clone(),
            source,
        })?;

        let path = self.artifact_path(&artifact.asset_id, &artifact.version)?;
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(artifact).map_err(|source| ArtifactError::Parse {
            path: path.clone(),
            source,
        })?;
        fs::write(&tmp_path, json).map_err(|source| ArtifactError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &path).map_err(|source| {
            let _ = fs::remove_file(&tmp_path);
            ArtifactError::Io {
                path: path.clone(),
                source,
            }
        })?;
        Ok(path)
    }

    pub fn load(&self, asset_id: &str, version: &str) -> Result<ModelArtifact, ArtifactError> {
        read_artifact(&self.artifact_path(asset_id, version)?)
    }

    /// Versions stored for an asset, ascending.
    pub fn versions(&self, asset_id: &str) -> Result<Vec<String>, ArtifactError> {
        let dir = self.asset_dir(asset_id)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(ArtifactError::Io { path: dir, source }),
        };

        let mut versions: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|s| s.to_str()) == Some("json"))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(String::from))
            .filter(|stem| stem.parse::<ModelVersion>().is_ok())
            .collect();
        versions.sort();
        Ok(versions)
    }

    /// The lexicographically greatest version, if any.
    pub fn latest(&self, asset_id: &str) -> Result<Option<ModelArtifact>, ArtifactError> {
        match self.versions(asset_id)?.pop() {
            Some(version) => self.load(asset_id, &version).map(Some),
            None => Ok(None),
        }
    }
}

/// Ids and versions become single directory or file names under the root.
fn path_component(name: &str) -> Result<&str, ArtifactError> {
    let reserved = name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains(['/', '\\', ':'])
        || Path::new(name).is_absolute();
    if reserved {
        return Err(ArtifactError::InvalidPathComponent(name.to_string()));
    }
    Ok(name)
}

fn read_artifact(path: &Path) -> Result<ModelArtifact, ArtifactError> {
    let json = fs::read_to_string(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let artifact: ModelArtifact = serde_json::from_str(&json).map_err(|source| ArtifactError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if artifact.schema_version > SCHEMA_VERSION {
        return Err(ArtifactError::UnsupportedSchema {
            found: artifact.schema_version,
            max: SCHEMA_VERSION,
        });
    }
    Ok(artifact)
}
