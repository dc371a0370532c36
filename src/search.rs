use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A free-text search term together with the stages that implement it.
///
/// The stages are produced ahead of time (usually by [`SearchPipeline::compile`])
/// and spliced into list and count pipelines by the builder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchPipeline {
    #[serde(default)]
    pub search: String,
    #[serde(default, rename = "searchPipeline")]
    pub stages: Vec<Value>,
}

impl SearchPipeline {
    pub fn new(search: impl Into<String>, stages: Vec<Value>) -> Self {
        Self {
            search: search.into(),
            stages,
        }
    }

    /// Case-insensitive substring match of `term` over any of `fields`.
    /// The term is matched literally; regex metacharacters are escaped.
    pub fn compile(term: &str, fields: &[&str]) -> Self {
        let term = term.trim();
        if term.is_empty() || fields.is_empty() {
            return Self::new(term, Vec::new());
        }
        let pattern = regex::escape(term);
        let any: Vec<Value> = fields
            .iter()
            .map(|f| json!({ *f: { "$regex": pattern, "$options": "i" } }))
            .collect();
        Self::new(term, vec![json!({ "$match": { "$or": any } })])
    }

    /// Whether the stages should be injected: a non-empty term and at
    /// least one stage.
    pub fn is_active(&self) -> bool {
        !self.search.is_empty() && !self.stages.is_empty()
    }
}
