//! Message identifier generation.

use uuid::Uuid;

pub trait IdentifierGenerator: Send + Sync {
    /// New globally unique ebMS message id
    fn generate(&self) -> String;
}

/// `{uuid}@{suffix}` identifiers, the form ebMS message ids usually take
#[derive(Debug, Clone)]
pub struct UuidIdentifierGenerator {
    suffix: String,
}

impl UuidIdentifierGenerator {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }
}

impl Default for UuidIdentifierGenerator {
    fn default() -> Self {
        Self::new("as4.core")
    }
}

impl IdentifierGenerator for UuidIdentifierGenerator {
    fn generate(&self) -> String {
        format!("{}@{}", Uuid::new_v4(), self.suffix)
    }
}
