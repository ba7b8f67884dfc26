//! Filament spools and their weight accounting.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::command::EntityKind;
use crate::engine::error::ValidationError;

/// Material of a filament spool
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FilamentType {
    #[default]
    PLA,
    PETG,
    ABS,
    TPU,
}

impl fmt::Display for FilamentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilamentType::PLA => "PLA",
            FilamentType::PETG => "PETG",
            FilamentType::ABS => "ABS",
            FilamentType::TPU => "TPU",
        };
        f.write_str(name)
    }
}

/// A filament spool
///
/// `remaining_weight_grams` stays within `0..=total_weight_grams` for every
/// spool held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Filament {
    pub id: String,
    #[serde(rename = "type")]
    pub filament_type: FilamentType,
    pub color: String,
    pub total_weight_grams: i64,
    pub remaining_weight_grams: i64,
}

impl Filament {
    pub fn new(
        id: impl Into<String>,
        filament_type: FilamentType,
        color: impl Into<String>,
        total_weight_grams: i64,
        remaining_weight_grams: i64,
    ) -> Self {
        Self {
            id: id.into(),
            filament_type,
            color: color.into(),
            total_weight_grams,
            remaining_weight_grams,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyField {
                kind: EntityKind::Filament,
                field: "id",
            });
        }
        if self.color.is_empty() {
            return Err(ValidationError::EmptyField {
                kind: EntityKind::Filament,
                field: "color",
            });
        }
        if self.total_weight_grams <= 0 {
            return Err(ValidationError::NotPositive {
                kind: EntityKind::Filament,
                field: "total_weight_grams",
                value: self.total_weight_grams,
            });
        }
        if self.remaining_weight_grams < 0 || self.remaining_weight_grams > self.total_weight_grams
        {
            return Err(ValidationError::RemainingOutOfRange {
                remaining: self.remaining_weight_grams,
                total: self.total_weight_grams,
            });
        }
        Ok(())
    }

    /// Deducts a finished print from the spool, flooring at zero.
    pub fn consume(&mut self, grams: i64) {
        self.remaining_weight_grams = self.remaining_weight_grams.saturating_sub(grams).max(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pla(total: i64, remaining: i64) -> Filament {
        Filament::new("f1", FilamentType::PLA, "Red", total, remaining)
    }

    #[test]
    fn test_filament_validate() {
        assert!(pla(1000, 1000).validate().is_ok());
        assert!(pla(1000, 0).validate().is_ok());

        assert!(matches!(
            pla(0, 0).validate(),
            Err(ValidationError::NotPositive { .. })
        ));
        assert!(matches!(
            pla(1000, 1001).validate(),
            Err(ValidationError::RemainingOutOfRange { .. })
        ));
        assert!(matches!(
            pla(1000, -1).validate(),
            Err(ValidationError::RemainingOutOfRange { .. })
        ));

        let mut no_color = pla(1000, 1000);
        no_color.color.clear();
        assert!(no_color.validate().is_err());
    }

    #[test]
    fn test_filament_consume_floors_at_zero() {
        let mut filament = pla(1000, 50);
        filament.consume(100);
        assert_eq!(filament.remaining_weight_grams, 0);

        let mut filament = pla(1000, 1000);
        filament.consume(400);
        assert_eq!(filament.remaining_weight_grams, 600);
    }

    #[test]
    fn test_filament_type_json_names() {
        let json = serde_json::to_string(&pla(10, 10)).unwrap();
        assert!(json.contains("\"type\":\"PLA\""));

        let parsed: Result<Filament, _> = serde_json::from_str(
            r#"{"id":"f2","type":"NYLON","color":"Black","total_weight_grams":1,"remaining_weight_grams":1}"#,
        );
        assert!(parsed.is_err());
    }
}
