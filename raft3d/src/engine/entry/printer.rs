use serde::{Deserialize, Serialize};

use crate::engine::command::EntityKind;
use crate::engine::error::ValidationError;

/// A 3D printer known to the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Printer {
    pub id: String,
    pub company: String,
    pub model: String,
}

impl Printer {
    pub fn new(
        id: impl Into<String>,
        company: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            company: company.into(),
            model: model.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let required = [
            ("id", &self.id),
            ("company", &self.company),
            ("model", &self.model),
        ];
        for (field, value) in required {
            if value.is_empty() {
                return Err(ValidationError::EmptyField {
                    kind: EntityKind::Printer,
                    field,
                });
            }
        }
        Ok(())
    }
}
