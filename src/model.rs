use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array4;
use serde::{Deserialize, Serialize};
use tensorflow::{
    Graph, ImportGraphDefOptions, SavedModelBundle, Session, SessionOptions, SessionRunArgs,
    Tensor, DEFAULT_SERVING_SIGNATURE_DEF_KEY,
};
use thiserror::Error;
use tracing::info;

use crate::error::ServiceError;

/// Output ordering of the trained network. Index `i` of the model output is `CLASS_NAMES[i]`.
pub const CLASS_NAMES: [&str; 10] = [
    "homer_simpson",
    "ned_flanders",
    "moe_szyslak",
    "lisa_simpson",
    "bart_simpson",
    "marge_simpson",
    "krusty_the_clown",
    "principal_skinner",
    "charles_montgomery_burns",
    "milhouse_van_houten",
];

const SERVE_TAG: &str = "serve";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub character: String,
    pub confidence: f32,
}

/// A loaded, read-only classifier shared by every request.
pub trait Classifier: Send + Sync {
    fn labels(&self) -> &[String];

    /// Scores for a `(1, height, width, 1)` input, one per label.
    fn probabilities(&self, input: &Array4<f32>) -> Result<Vec<f32>, ServiceError>;

    fn predict(&self, input: &Array4<f32>) -> Result<Prediction, ServiceError> {
        let probabilities = self.probabilities(input)?;
        top_prediction(&probabilities, self.labels())
    }
}

/// Picks the highest scoring label. Ties resolve to the lowest index.
pub fn top_prediction(probabilities: &[f32], labels: &[String]) -> Result<Prediction, ServiceError> {
    if probabilities.is_empty() {
        return Err(ServiceError::EmptyOutput);
    }
    if probabilities.len() != labels.len() {
        return Err(ServiceError::LabelMismatch {
            labels: labels.len(),
            outputs: probabilities.len(),
        });
    }
    if let Some(p) = probabilities.iter().find(|p| !(0.0..=1.0).contains(*p)) {
        return Err(ServiceError::Inference(format!(
            "model output {} is not a probability; set MODEL_OUTPUT_SOFTMAX for logit outputs",
            p
        )));
    }

    let mut best = 0;
    for (i, &p) in probabilities.iter().enumerate().skip(1) {
        if p > probabilities[best] {
            best = i;
        }
    }

    Ok(Prediction {
        character: labels[best].clone(),
        confidence: probabilities[best],
    })
}

pub fn softmax(scores: &mut [f32]) {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for s in scores.iter_mut() {
        *s = (*s - max).exp();
        sum += *s;
    }
    for s in scores.iter_mut() {
        *s /= sum;
    }
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("TensorFlow error: {0}")]
    Tensorflow(String),
    #[error("Signature `{0}` has no {1} tensors")]
    EmptySignature(String, &'static str),
    #[error("Class list {0} contains no labels")]
    NoLabels(PathBuf),
}

impl From<tensorflow::Status> for LoadError {
    fn from(status: tensorflow::Status) -> Self {
        LoadError::Tensorflow(status.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// A frozen graph file, or a SavedModel export directory.
    pub path: PathBuf,
    pub input_op: String,
    pub output_op: String,
    pub apply_softmax: bool,
}

#[derive(Debug, Clone)]
struct Endpoint {
    op: String,
    index: i32,
}

enum Backend {
    Frozen(Session),
    Saved(SavedModelBundle),
}

/// TensorFlow backed classifier.
pub struct Model {
    backend: Backend,
    graph: Graph,
    input: Endpoint,
    output: Endpoint,
    labels: Vec<String>,
    apply_softmax: bool,
}

impl Model {
    pub fn load(settings: &ModelSettings, labels: Vec<String>) -> Result<Self, LoadError> {
        let mut graph = Graph::new();

        let (backend, input, output) = if settings.path.is_dir() {
            let bundle = SavedModelBundle::load(
                &SessionOptions::new(),
                [SERVE_TAG],
                &mut graph,
                &settings.path,
            )?;
            let signature = bundle
                .meta_graph_def()
                .get_signature(DEFAULT_SERVING_SIGNATURE_DEF_KEY)?;

            let input = signature
                .inputs()
                .values()
                .next()
                .ok_or_else(|| {
                    LoadError::EmptySignature(DEFAULT_SERVING_SIGNATURE_DEF_KEY.into(), "input")
                })?
                .name();
            let output = signature
                .outputs()
                .values()
                .next()
                .ok_or_else(|| {
                    LoadError::EmptySignature(DEFAULT_SERVING_SIGNATURE_DEF_KEY.into(), "output")
                })?
                .name();

            let input = Endpoint {
                op: input.name.clone(),
                index: input.index,
            };
            let output = Endpoint {
                op: output.name.clone(),
                index: output.index,
            };
            (Backend::Saved(bundle), input, output)
        } else {
            let model_bytes = fs::read(&settings.path).map_err(|source| LoadError::Io {
                path: settings.path.clone(),
                source,
            })?;
            graph.import_graph_def(&model_bytes, &ImportGraphDefOptions::new())?;
            let session = Session::new(&SessionOptions::new(), &graph)?;

            let input = Endpoint {
                op: settings.input_op.clone(),
                index: 0,
            };
            let output = Endpoint {
                op: settings.output_op.clone(),
                index: 0,
            };
            (Backend::Frozen(session), input, output)
        };

        // Fail at startup rather than on the first request.
        graph.operation_by_name_required(&input.op)?;
        graph.operation_by_name_required(&output.op)?;

        info!(
            path = %settings.path.display(),
            input = %input.op,
            output = %output.op,
            labels = labels.len(),
            "model loaded"
        );

        Ok(Model {
            backend,
            graph,
            input,
            output,
            labels,
            apply_softmax: settings.apply_softmax,
        })
    }

    fn session(&self) -> &Session {
        match &self.backend {
            Backend::Frozen(session) => session,
            Backend::Saved(bundle) => &bundle.session,
        }
    }

    fn input_tensor(input: &Array4<f32>) -> Result<Tensor<f32>, ServiceError> {
        let dims: Vec<u64> = input.shape().iter().map(|&d| d as u64).collect();
        let values: Vec<f32> = input.iter().copied().collect();
        Ok(Tensor::new(&dims).with_values(&values)?)
    }
}

impl Classifier for Model {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn probabilities(&self, input: &Array4<f32>) -> Result<Vec<f32>, ServiceError> {
        let input_tensor = Self::input_tensor(input)?;

        let input_operation = self.graph.operation_by_name_required(&self.input.op)?;
        let output_operation = self.graph.operation_by_name_required(&self.output.op)?;

        let mut args = SessionRunArgs::new();
        args.add_feed(&input_operation, self.input.index, &input_tensor);
        let output_token = args.request_fetch(&output_operation, self.output.index);
        self.session().run(&mut args)?;

        let output_tensor: Tensor<f32> = args.fetch(output_token)?;
        let mut scores = output_tensor.to_vec();
        if self.apply_softmax {
            softmax(&mut scores);
        }

        Ok(scores)
    }
}

/// Reads a newline separated class list, or falls back to [`CLASS_NAMES`].
pub fn load_labels(path: Option<&Path>) -> Result<Vec<String>, LoadError> {
    let Some(path) = path else {
        return Ok(CLASS_NAMES.iter().map(|s| s.to_string()).collect());
    };

    let labels: Vec<String> = fs::read_to_string(path)
        .map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();

    if labels.is_empty() {
        return Err(LoadError::NoLabels(path.to_path_buf()));
    }

    Ok(labels)
}
