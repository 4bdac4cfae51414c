//! Machine-learning classification from payload 2-grams.
//!
//! The first client payload of a flow is turned into byte-pair counts and
//! scored by a linear model in liblinear's text format, with one model for
//! TCP flows and one for UDP flows.

use crate::config::MlConfig;
use crate::error::{ModelError, ModuleError};
use crate::flow::Flow;
use crate::module::Module;
use crate::packet::{Packet, TransportKind};
use crate::protocol::{ClassificationResult, ClassificationSource, Protocol};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::str::FromStr;
use std::sync::Arc;
use strum_macros::{Display, EnumString};
use tracing::{debug, info};

pub const ML_SOURCE: ClassificationSource = ClassificationSource::from_static("flowdpi-ml");

/// Protocol for each model label, indexed by label value.
pub const ML_PROTOCOLS: [Protocol; 10] = [
    Protocol::Http,
    Protocol::Dns,
    Protocol::Ssh,
    Protocol::Rpc,
    Protocol::Smtp,
    Protocol::Rdp,
    Protocol::Smb,
    Protocol::Ftp,
    Protocol::Ssl,
    Protocol::NetBios,
];

// 2-gram models use 65536 features; anything far beyond is a corrupt header.
const MAX_NR_FEATURE: usize = 1 << 24;
const MAX_NR_CLASS: usize = 1 << 10;

/// Sparse feature vector: 1-based feature index to value.
pub type Features = BTreeMap<u32, f32>;

/// Counts every pair of adjacent bytes. The pair `(a, b)` has index
/// `a * 256 + b + 1`.
pub fn make_features_from_payload(payload: &[u8]) -> Features {
    let mut features = Features::new();
    for pair in payload.windows(2) {
        let index = u32::from(pair[0]) * 256 + u32::from(pair[1]) + 1;
        *features.entry(index).or_insert(0.0) += 1.0;
    }
    features
}

/// The payload the models were trained on, and the transport it came from.
///
/// For TCP the flow must start with a connection request and hold at least
/// four packets; the payload is the first non-empty one sent from the client
/// port after the handshake. For UDP it is the first non-empty payload.
pub fn first_client_payload(packets: &[Arc<Packet>]) -> Option<(&[u8], TransportKind)> {
    let first = packets.first()?.transport.as_ref()?;
    match first.kind {
        TransportKind::Tcp => {
            if !first.flags.is_connection_request() || packets.len() < 4 {
                return None;
            }
            let client_port = first.src_port;
            packets[3..]
                .iter()
                .filter_map(|p| p.transport_of(TransportKind::Tcp))
                .find(|t| t.src_port == client_port && !t.payload.is_empty())
                .map(|t| (t.payload.as_slice(), TransportKind::Tcp))
        }
        TransportKind::Udp => packets
            .iter()
            .filter_map(|p| p.transport_of(TransportKind::Udp))
            .find(|t| !t.payload.is_empty())
            .map(|t| (t.payload.as_slice(), TransportKind::Udp)),
    }
}

/// Classification solvers a model file may name. Regression and one-class
/// solvers do not produce labels and are refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum Solver {
    #[strum(serialize = "L2R_LR")]
    L2rLr,
    #[strum(serialize = "L2R_L2LOSS_SVC_DUAL")]
    L2rL2LossSvcDual,
    #[strum(serialize = "L2R_L2LOSS_SVC")]
    L2rL2LossSvc,
    #[strum(serialize = "L2R_L1LOSS_SVC_DUAL")]
    L2rL1LossSvcDual,
    #[strum(serialize = "MCSVM_CS")]
    McsvmCs,
    #[strum(serialize = "L1R_L2LOSS_SVC")]
    L1rL2LossSvc,
    #[strum(serialize = "L1R_LR")]
    L1rLr,
    #[strum(serialize = "L2R_LR_DUAL")]
    L2rLrDual,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: i32,
    pub confidence: f64,
}

/// A trained linear classifier.
#[derive(Debug, Clone)]
pub struct LinearModel {
    solver: Solver,
    labels: Vec<i32>,
    nr_feature: usize,
    bias: f64,
    /// Row-major: `nr_w` weights per feature.
    weights: Vec<f64>,
}

fn header_error(line: usize, reason: impl Into<String>) -> ModelError {
    ModelError::Header {
        line,
        reason: reason.into(),
    }
}

fn parse_value<T: FromStr>(line: usize, key: &str, value: Option<&str>) -> Result<T, ModelError> {
    value
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| header_error(line, format!("invalid {}", key)))
}

impl LinearModel {
    /// Reads a model from a local path or an `http(s)://` URL.
    ///
    /// # Panics
    ///
    /// Fetching a URL panics when called on an async executor thread.
    pub fn load(source: &str) -> Result<Self, ModelError> {
        if source.is_empty() {
            return Err(ModelError::MissingSource);
        }
        let text = if source.starts_with("http://") || source.starts_with("https://") {
            reqwest::blocking::get(source)?
                .error_for_status()?
                .text()?
        } else {
            fs::read_to_string(source)?
        };
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ModelError> {
        let mut solver = None;
        let mut nr_class: Option<usize> = None;
        let mut labels = None;
        let mut nr_feature = None;
        let mut bias = None;
        let mut weights_start = None;

        let mut lines = text.lines().enumerate();
        for (i, line) in lines.by_ref() {
            let line_no = i + 1;
            let mut fields = line.split_whitespace();
            let Some(key) = fields.next() else {
                continue;
            };
            match key {
                "solver_type" => {
                    let name = fields.next().unwrap_or_default();
                    solver = Some(Solver::from_str(name).map_err(|_| {
                        header_error(line_no, format!("unsupported solver {:?}", name))
                    })?);
                }
                "nr_class" => nr_class = Some(parse_value(line_no, key, fields.next())?),
                "label" => {
                    let parsed: Result<Vec<i32>, _> = fields.map(str::parse).collect();
                    labels = Some(parsed.map_err(|_| header_error(line_no, "invalid label"))?);
                }
                "nr_feature" => nr_feature = Some(parse_value(line_no, key, fields.next())?),
                "bias" => bias = Some(parse_value(line_no, key, fields.next())?),
                // one-class offset, unused for classification
                "rho" => {}
                "w" => {
                    weights_start = Some(line_no);
                    break;
                }
                other => return Err(header_error(line_no, format!("unknown key {:?}", other))),
            }
        }

        let end = weights_start.ok_or_else(|| header_error(0, "missing weights"))?;
        let solver = solver.ok_or_else(|| header_error(end, "missing solver_type"))?;
        let nr_class = nr_class.ok_or_else(|| header_error(end, "missing nr_class"))?;
        let labels = labels.ok_or_else(|| header_error(end, "missing label"))?;
        let nr_feature = nr_feature.ok_or_else(|| header_error(end, "missing nr_feature"))?;
        let bias = bias.ok_or_else(|| header_error(end, "missing bias"))?;
        if nr_class == 0 || labels.len() != nr_class {
            return Err(header_error(end, "label count does not match nr_class"));
        }
        if nr_class > MAX_NR_CLASS {
            return Err(header_error(end, format!("nr_class above {}", MAX_NR_CLASS)));
        }
        if nr_feature > MAX_NR_FEATURE {
            return Err(header_error(end, format!("nr_feature above {}", MAX_NR_FEATURE)));
        }

        let weights = lines
            .flat_map(|(_, line)| line.split_whitespace())
            .map(|token| token.parse().map_err(|_| ModelError::Weight(token.to_string())))
            .collect::<Result<Vec<f64>, _>>()?;

        let model = Self {
            solver,
            labels,
            nr_feature,
            bias,
            weights,
        };
        let expected = model
            .feature_count()
            .checked_mul(model.nr_w())
            .ok_or_else(|| header_error(end, "weight matrix too large"))?;
        if model.weights.len() != expected {
            return Err(ModelError::WeightCount {
                expected,
                found: model.weights.len(),
            });
        }
        Ok(model)
    }

    pub fn solver(&self) -> Solver {
        self.solver
    }

    pub fn labels(&self) -> &[i32] {
        &self.labels
    }

    fn nr_class(&self) -> usize {
        self.labels.len()
    }

    /// Weight columns per feature.
    fn nr_w(&self) -> usize {
        if self.nr_class() == 2 && self.solver != Solver::McsvmCs {
            1
        } else {
            self.nr_class()
        }
    }

    /// Features including the bias feature, if any.
    fn feature_count(&self) -> usize {
        if self.bias >= 0.0 {
            self.nr_feature + 1
        } else {
            self.nr_feature
        }
    }

    fn decision_values(&self, features: &Features) -> Vec<f64> {
        let n = self.feature_count();
        let nr_w = self.nr_w();
        let mut dec = vec![0.0; nr_w];
        let mut add = |index: usize, value: f64| {
            let row = &self.weights[(index - 1) * nr_w..index * nr_w];
            for (d, w) in dec.iter_mut().zip(row) {
                *d += w * value;
            }
        };

        for (&index, &value) in features {
            let index = index as usize;
            if index >= 1 && index <= n {
                add(index, f64::from(value));
            }
        }
        if self.bias >= 0.0 {
            add(n, self.bias);
        }
        dec
    }

    /// Predicts a label and the confidence in it. Decision values go through
    /// a logistic function and are normalized across classes.
    pub fn predict(&self, features: &Features) -> Prediction {
        let dec = self.decision_values(features);
        let sigmoid = |v: f64| 1.0 / (1.0 + (-v).exp());

        let (best, probabilities) = if self.nr_class() == 2 {
            let best = if dec[0] > 0.0 { 0 } else { 1 };
            let p = sigmoid(dec[0]);
            (best, vec![p, 1.0 - p])
        } else {
            let mut best = 0;
            for (i, v) in dec.iter().enumerate() {
                if *v > dec[best] {
                    best = i;
                }
            }
            let raw: Vec<f64> = dec.iter().map(|v| sigmoid(*v)).collect();
            let sum: f64 = raw.iter().sum();
            (best, raw.into_iter().map(|p| p / sum).collect())
        };

        Prediction {
            label: self.labels[best],
            confidence: probabilities[best],
        }
    }
}

struct Models {
    tcp: LinearModel,
    udp: LinearModel,
}

/// Module scoring first client payloads with the TCP or UDP model.
pub struct LinearSvcModule {
    config: RwLock<MlConfig>,
    models: RwLock<Option<Models>>,
}

impl Default for LinearSvcModule {
    fn default() -> Self {
        Self::new(MlConfig::default())
    }
}

impl LinearSvcModule {
    pub fn new(config: MlConfig) -> Self {
        Self {
            config: RwLock::new(config),
            models: RwLock::new(None),
        }
    }

    /// Replaces model sources and threshold. New sources are loaded at the
    /// next `initialize`; the threshold applies immediately.
    pub fn configure(&self, config: MlConfig) {
        *self.config.write() = config;
    }

    pub fn threshold(&self) -> f32 {
        self.config.read().threshold
    }

    pub fn is_loaded(&self) -> bool {
        self.models.read().is_some()
    }

    fn load(path: &str) -> Result<LinearModel, ModuleError> {
        let model = LinearModel::load(path).map_err(|source| ModuleError::ModelLoad {
            path: path.to_string(),
            source,
        })?;
        info!(path, solver = %model.solver(), "Loaded model");
        Ok(model)
    }
}

impl Module for LinearSvcModule {
    fn name(&self) -> ClassificationSource {
        ML_SOURCE
    }

    fn initialize(&self) -> Result<(), ModuleError> {
        let config = self.config.read().clone();
        let tcp = Self::load(&config.tcp_model_path)?;
        let udp = Self::load(&config.udp_model_path)?;
        *self.models.write() = Some(Models { tcp, udp });
        Ok(())
    }

    fn destroy(&self) -> Result<(), ModuleError> {
        self.models.write().take();
        Ok(())
    }

    fn classify(&self, flow: &Flow) -> ClassificationResult {
        let packets = flow.packets();
        let Some((payload, kind)) = first_client_payload(&packets) else {
            return ClassificationResult::unknown();
        };
        let features = make_features_from_payload(payload);

        let prediction = {
            let models = self.models.read();
            let Some(models) = models.as_ref() else {
                return ClassificationResult::unknown();
            };
            match kind {
                TransportKind::Tcp => models.tcp.predict(&features),
                TransportKind::Udp => models.udp.predict(&features),
            }
        };

        let threshold = f64::from(self.threshold());
        let protocol = usize::try_from(prediction.label)
            .ok()
            .and_then(|label| ML_PROTOCOLS.get(label).copied());
        match protocol {
            Some(protocol) if prediction.confidence >= threshold => {
                debug!(%protocol, confidence = prediction.confidence, "Model match");
                flow.set_classification_result(protocol, ML_SOURCE);
                ClassificationResult::new(protocol, ML_SOURCE)
            }
            _ => ClassificationResult::unknown(),
        }
    }
}
