//! External job descriptors.
//!
//! Training and evaluation run in an external job service. The
//! orchestrator submits a [`JobRequest`], receives a [`JobHandle`], and
//! polls for a [`JobState`] until the job reaches a terminal state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::EvaluationMetrics;

/// Dataset a family trains and evaluates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Root of the image data.
    #[serde(default, alias = "dataPath")]
    pub data_path: String,

    /// Dataset definition file handed to the trainer.
    #[serde(default, alias = "configPath")]
    pub config_path: String,

    #[serde(default = "default_dataset_version")]
    pub version: String,

    #[serde(default)]
    pub classes: Vec<String>,

    #[serde(default, alias = "trainImages")]
    pub train_images: u64,

    #[serde(default, alias = "valImages")]
    pub val_images: u64,

    #[serde(default, alias = "testImages")]
    pub test_images: u64,
}

fn default_dataset_version() -> String {
    "1.0".into()
}

impl Default for Dataset {
    fn default() -> Self {
        Self {
            data_path: String::new(),
            config_path: String::new(),
            version: default_dataset_version(),
            classes: Vec::new(),
            train_images: 0,
            val_images: 0,
            test_images: 0,
        }
    }
}

impl Dataset {
    pub fn total_images(&self) -> u64 {
        self.train_images + self.val_images + self.test_images
    }

    /// Reject descriptors the trainer could not possibly use.
    pub fn validate(&self) -> Result<(), String> {
        if self.data_path.trim().is_empty() {
            return Err("dataset data_path is empty".into());
        }
        if self.classes.is_empty() {
            return Err("dataset declares no classes".into());
        }
        if self.classes.iter().any(|c| c.trim().is_empty()) {
            return Err("dataset class names must be non-empty".into());
        }
        if self.train_images == 0 {
            return Err("dataset has no training images".into());
        }
        if self.val_images == 0 {
            return Err("dataset has no validation images".into());
        }
        Ok(())
    }
}

/// Training hyperparameters forwarded to the trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    #[serde(default = "default_model_size", alias = "modelSize")]
    pub model_size: String,

    #[serde(default = "default_epochs")]
    pub epochs: u32,

    #[serde(default = "default_batch_size", alias = "batchSize")]
    pub batch_size: u32,

    #[serde(default = "default_image_size", alias = "imageSize")]
    pub image_size: u32,

    #[serde(default = "default_learning_rate", alias = "learningRate")]
    pub learning_rate: f64,

    #[serde(default = "default_optimizer")]
    pub optimizer: String,

    #[serde(default = "default_device")]
    pub device: String,

    /// Checkpoint every N epochs.
    #[serde(default = "default_save_period", alias = "savePeriod")]
    pub save_period: u32,

    /// Trainer-specific extras passed through untouched.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_model_size() -> String {
    "yolov8n".into()
}
fn default_epochs() -> u32 {
    50
}
fn default_batch_size() -> u32 {
    16
}
fn default_image_size() -> u32 {
    640
}
fn default_learning_rate() -> f64 {
    0.01
}
fn default_optimizer() -> String {
    "SGD".into()
}
fn default_device() -> String {
    "cpu".into()
}
fn default_save_period() -> u32 {
    10
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            model_size: default_model_size(),
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            image_size: default_image_size(),
            learning_rate: default_learning_rate(),
            optimizer: default_optimizer(),
            device: default_device(),
            save_period: default_save_period(),
            extra: BTreeMap::new(),
        }
    }
}

impl Hyperparameters {
    pub fn validate(&self) -> Result<(), String> {
        if self.epochs == 0 {
            return Err("epochs must be positive".into());
        }
        if self.batch_size == 0 {
            return Err("batch_size must be positive".into());
        }
        if self.image_size == 0 {
            return Err("image_size must be positive".into());
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        Ok(())
    }
}

/// Job submitted for the Training stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingJob {
    pub run_id: String,
    pub family: String,
    pub dataset: Dataset,
    pub hyperparameters: Hyperparameters,
}

/// Job submitted for the Evaluation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationJob {
    pub run_id: String,
    pub family: String,
    pub artifact_ref: String,
    pub dataset: Dataset,
}

/// Anything the external job service can run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobRequest {
    Train(TrainingJob),
    Evaluate(EvaluationJob),
}

impl JobRequest {
    pub fn run_id(&self) -> &str {
        match self {
            Self::Train(job) => &job.run_id,
            Self::Evaluate(job) => &job.run_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Train(_) => "train",
            Self::Evaluate(_) => "evaluate",
        }
    }
}

/// Reference to a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: String,
}

/// Observed state of an external job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running {
        /// Fraction complete in `[0, 1]`, when the job reports one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<f64>,
    },
    Succeeded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artifact_ref: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metrics: Option<EvaluationMetrics>,
    },
    Failed {
        #[serde(default)]
        message: String,
    },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }
}

/// Result of a successfully completed job.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobOutput {
    pub artifact_ref: Option<String>,
    pub metrics: Option<EvaluationMetrics>,
}
