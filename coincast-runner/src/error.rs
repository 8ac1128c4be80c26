use thiserror::Error;

use coincast_core::data::UpstreamError;
use coincast_core::features::DataError;
use coincast_core::store::PersistenceError;

use crate::config::ConfigError;
use crate::model::ModelError;
use crate::postprocess::PostProcessError;
use crate::registry::ArtifactError;

/// Per-asset or per-stage failure inside a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("store error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("data error: {0}")]
    Data(#[from] DataError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("post-processing error: {0}")]
    PostProcess(#[from] PostProcessError),

    #[error("no trained model for '{0}'")]
    NoModel(String),

    #[error("no market data for '{0}'")]
    NoMarketData(String),
}
