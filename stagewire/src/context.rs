//! Diagnostic context shared by every stage of one pipeline.

use uuid::Uuid;

/// Describes the pipeline a workpiece is travelling through.
///
/// Handed to catching stages and used in log spans and contract-violation
/// messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineContext {
    name: String,
    structure: String,
    instance_id: Uuid,
}

impl PipelineContext {
    /// Creates a context from the pipeline name and its operator names in wiring order.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, operator_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let structure = operator_names
            .into_iter()
            .map(|op| format!("operator: {}", op.as_ref()))
            .collect::<Vec<_>>()
            .join(", ");

        Self {
            name: name.into(),
            structure,
            instance_id: Uuid::now_v7(),
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the rendered pipeline structure.
    #[must_use]
    pub fn structure(&self) -> &str {
        &self.structure
    }

    /// Returns the id of this pipeline instance.
    #[must_use]
    pub const fn instance_id(&self) -> Uuid {
        self.instance_id
    }
}
