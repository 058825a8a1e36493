//! ---
//! rp_section: "03-logging"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Narrow gauge sink used by pipeline runs."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
//! Topic-addressed metric emitters.
//!
//! Topics are dotted names such as `backend.cluster.installtime`. The
//! Prometheus implementation maps each topic onto a gauge family whose label
//! set is fixed by the first emission.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use prometheus::{Gauge, GaugeVec, IntGauge, IntGaugeVec, Opts};
use tracing::warn;

use crate::SharedRegistry;

/// Sink for point-in-time measurements.
pub trait MetricsEmitter: Send + Sync {
    fn emit_gauge(&self, topic: &str, value: i64, dimensions: &HashMap<String, String>);
    fn emit_float(&self, topic: &str, value: f64, dimensions: &HashMap<String, String>);
}

/// Replace every character Prometheus rejects in a metric or label name.
pub fn sanitize_name(raw: &str) -> String {
    let mut name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

enum Family {
    Int(IntGaugeVec),
    Float(GaugeVec),
}

struct RegisteredTopic {
    labels: Vec<String>,
    family: Family,
}

/// [`MetricsEmitter`] backed by a Prometheus registry.
pub struct PrometheusEmitter {
    registry: SharedRegistry,
    topics: Mutex<HashMap<String, RegisteredTopic>>,
}

impl PrometheusEmitter {
    pub fn new(registry: SharedRegistry) -> Self {
        Self {
            registry,
            topics: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    fn emit(&self, topic: &str, value: Value, dimensions: &HashMap<String, String>) {
        let sorted: BTreeMap<String, &str> = dimensions
            .iter()
            .map(|(k, v)| (sanitize_name(k), v.as_str()))
            .collect();
        let labels: Vec<String> = sorted.keys().cloned().collect();
        let values: Vec<&str> = sorted.values().copied().collect();
        let name = sanitize_name(topic);

        let mut topics = self.topics.lock();
        if !topics.contains_key(&name) {
            match self.register(&name, topic, &labels, &value) {
                Ok(family) => {
                    topics.insert(
                        name.clone(),
                        RegisteredTopic {
                            labels: labels.clone(),
                            family,
                        },
                    );
                }
                Err(err) => {
                    warn!(topic, error = %err, "failed to register metric topic");
                    return;
                }
            }
        }
        let Some(registered) = topics.get(&name) else {
            return;
        };
        if registered.labels != labels {
            warn!(
                topic,
                expected = ?registered.labels,
                got = ?labels,
                "dropping metric with mismatched dimensions"
            );
            return;
        }
        match (&registered.family, value) {
            (Family::Int(family), Value::Int(v)) => family.with_label_values(&values).set(v),
            (Family::Float(family), Value::Float(v)) => family.with_label_values(&values).set(v),
            (Family::Int(family), Value::Float(v)) => {
                family.with_label_values(&values).set(v.round() as i64)
            }
            (Family::Float(family), Value::Int(v)) => family.with_label_values(&values).set(v as f64),
        }
    }

    fn register(
        &self,
        name: &str,
        topic: &str,
        labels: &[String],
        value: &Value,
    ) -> prometheus::Result<Family> {
        let opts = Opts::new(name, format!("Emitted topic {topic}"));
        let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
        let family = match value {
            Value::Int(_) => {
                let vec = IntGaugeVec::new(opts, &label_refs)?;
                self.registry.register(Box::new(vec.clone()))?;
                Family::Int(vec)
            }
            Value::Float(_) => {
                let vec = GaugeVec::new(opts, &label_refs)?;
                self.registry.register(Box::new(vec.clone()))?;
                Family::Float(vec)
            }
        };
        Ok(family)
    }

    /// Current value of an integer topic, if it was ever emitted with these dimensions.
    pub fn gauge(&self, topic: &str, dimensions: &HashMap<String, String>) -> Option<IntGauge> {
        let topics = self.topics.lock();
        let registered = topics.get(&sanitize_name(topic))?;
        let Family::Int(family) = &registered.family else {
            return None;
        };
        let sorted: BTreeMap<String, &str> = dimensions
            .iter()
            .map(|(k, v)| (sanitize_name(k), v.as_str()))
            .collect();
        let values: Vec<&str> = sorted.values().copied().collect();
        family.get_metric_with_label_values(&values).ok()
    }

    /// Current value of a float topic, if it was ever emitted with these dimensions.
    pub fn float_gauge(&self, topic: &str, dimensions: &HashMap<String, String>) -> Option<Gauge> {
        let topics = self.topics.lock();
        let registered = topics.get(&sanitize_name(topic))?;
        let Family::Float(family) = &registered.family else {
            return None;
        };
        let sorted: BTreeMap<String, &str> = dimensions
            .iter()
            .map(|(k, v)| (sanitize_name(k), v.as_str()))
            .collect();
        let values: Vec<&str> = sorted.values().copied().collect();
        family.get_metric_with_label_values(&values).ok()
    }
}

enum Value {
    Int(i64),
    Float(f64),
}

impl MetricsEmitter for PrometheusEmitter {
    fn emit_gauge(&self, topic: &str, value: i64, dimensions: &HashMap<String, String>) {
        self.emit(topic, Value::Int(value), dimensions);
    }

    fn emit_float(&self, topic: &str, value: f64, dimensions: &HashMap<String, String>) {
        self.emit(topic, Value::Float(value), dimensions);
    }
}

/// Value carried by an [`EmittedMetric`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(i64),
    Float(f64),
}

/// One call recorded by [`RecordingEmitter`].
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedMetric {
    pub topic: String,
    pub value: MetricValue,
    pub dimensions: HashMap<String, String>,
}

/// In-memory emitter that keeps every call, for tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingEmitter {
    records: Mutex<Vec<EmittedMetric>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EmittedMetric> {
        self.records.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    fn push(&self, topic: &str, value: MetricValue, dimensions: &HashMap<String, String>) {
        self.records.lock().push(EmittedMetric {
            topic: topic.to_string(),
            value,
            dimensions: dimensions.clone(),
        });
    }
}

impl MetricsEmitter for RecordingEmitter {
    fn emit_gauge(&self, topic: &str, value: i64, dimensions: &HashMap<String, String>) {
        self.push(topic, MetricValue::Gauge(value), dimensions);
    }

    fn emit_float(&self, topic: &str, value: f64, dimensions: &HashMap<String, String>) {
        self.push(topic, MetricValue::Float(value), dimensions);
    }
}
