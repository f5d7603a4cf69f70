//! Plan data model (spec.md §3).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A primitive or small structured argument value passed to a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    String(String),
    Number(f64),
    Bool(bool),
    List(Vec<ArgValue>),
}

/// One tool invocation within a plan. `tool_name` names a member of the
/// closed set exposed by the `ActionExecutor` capability; the executor
/// is free to reject a call whose shape it does not recognize
/// (`ExecutionError::Fatal`, not retried).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub arguments: BTreeMap<String, ArgValue>,
    pub description: String,
    /// Element locator for element-based identification strategies
    /// (e.g. accessibility id, text match). See spec §4.4 "Strategy
    /// selection".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_locator: Option<String>,
    /// Explicit screen coordinates, used as a fallback strategy when an
    /// element locator is absent or fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<(f64, f64)>,
    /// Whether this call actually drives the desktop (vs. a purely
    /// observational call, e.g. a screenshot read). Gates the
    /// `WindowHint(Compact)` emission in spec §4.4 Phase 2.
    #[serde(default = "default_true")]
    pub drives_desktop: bool,
}

fn default_true() -> bool {
    true
}

impl ToolCall {
    /// The identification strategy to try first for this call, per the
    /// pinned policy in spec §9: element-first, coordinate-fallback.
    pub fn primary_strategy(&self) -> Option<Strategy> {
        if self.element_locator.is_some() {
            Some(Strategy::Element)
        } else if self.coordinates.is_some() {
            Some(Strategy::Coordinate)
        } else {
            None
        }
    }

    /// The fallback strategy, if the primary one fails and a fallback
    /// exists. Only meaningful when both an element locator and
    /// coordinates are present.
    pub fn fallback_strategy(&self) -> Option<Strategy> {
        if self.element_locator.is_some() && self.coordinates.is_some() {
            Some(Strategy::Coordinate)
        } else {
            None
        }
    }

    /// A copy of this call carrying only the identification data for one
    /// strategy, so the executor is never handed an ambiguous call when
    /// the runner falls back from element to coordinate (spec §4.4
    /// "Strategy selection").
    pub fn with_strategy(&self, strategy: Strategy) -> ToolCall {
        let mut call = self.clone();
        match strategy {
            Strategy::Element => call.coordinates = None,
            Strategy::Coordinate => call.element_locator = None,
        }
        call
    }
}

/// Element-identification strategy for a tool call that targets a
/// desktop UI element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    Element,
    Coordinate,
}

/// What the runner does when a subtask exhausts its retries (spec §4.4
/// step 5). Named in the original spec's prose but never added to the
/// data model; closed here per SPEC_FULL.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    FailFast,
    ContinueOnError,
}

/// An ordered, finite, non-empty, immutable sequence of tool calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<ToolCall>,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Plan {
    /// Construct a plan. Returns `None` for an empty step list — plans
    /// are non-empty by invariant (spec §3).
    pub fn new(steps: Vec<ToolCall>, failure_policy: FailurePolicy) -> Option<Self> {
        if steps.is_empty() {
            None
        } else {
            Some(Self { steps, failure_policy })
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// An opaque fixed-dimensional embedding vector, as produced by the
/// `Embedder` capability. Cosine similarity between two embeddings
/// drives the plan cache's semantic-hit lookup (spec §4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    /// Cosine similarity against another embedding of equal
    /// dimensionality. Embeddings of mismatched dimensionality are
    /// defined to have zero similarity rather than panicking — a
    /// mismatch only arises if the `Embedder` is swapped mid-run, which
    /// the cache treats as "no match" rather than a crash.
    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        if self.0.len() != other.0.len() || self.0.is_empty() {
            return 0.0;
        }
        let dot: f32 = self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum();
        let norm_a: f32 = self.0.iter().map(|v| v * v).sum::<f32>().sqrt();
        let norm_b: f32 = other.0.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot / (norm_a * norm_b)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str) -> ToolCall {
        ToolCall {
            tool_name: name.to_string(),
            arguments: BTreeMap::new(),
            description: String::new(),
            element_locator: None,
            coordinates: None,
            drives_desktop: true,
        }
    }

    #[test]
    fn plan_rejects_empty_steps() {
        assert!(Plan::new(vec![], FailurePolicy::FailFast).is_none());
    }

    #[test]
    fn identical_vectors_have_similarity_one() {
        let e = Embedding(vec![1.0, 2.0, 3.0]);
        assert!((e.cosine_similarity(&e) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_zero_similarity() {
        let a = Embedding(vec![1.0, 0.0]);
        let b = Embedding(vec![0.0, 1.0]);
        assert!(a.cosine_similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn element_first_coordinate_fallback_policy() {
        let mut c = call("click");
        c.element_locator = Some("ok-button".into());
        c.coordinates = Some((10.0, 20.0));
        assert_eq!(c.primary_strategy(), Some(Strategy::Element));
        assert_eq!(c.fallback_strategy(), Some(Strategy::Coordinate));

        let mut coord_only = call("click");
        coord_only.coordinates = Some((1.0, 1.0));
        assert_eq!(coord_only.primary_strategy(), Some(Strategy::Coordinate));
        assert_eq!(coord_only.fallback_strategy(), None);
    }
}
