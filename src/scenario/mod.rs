//! Scenario Modeler -- applies parameter perturbations to a trade-cost
//! snapshot and projects the change in landed cost.

pub mod engine;
pub mod templates;

pub use self::engine::model_scenarios;
pub use self::templates::TemplateKey;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A perturbable field of [`BaseData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    UnitPrice,
    TariffRate,
    FxRate,
    FreightCost,
    Volume,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::UnitPrice => "unit_price",
            Field::TariffRate => "tariff_rate",
            Field::FxRate => "fx_rate",
            Field::FreightCost => "freight_cost",
            Field::Volume => "volume",
        }
    }

    /// Whether `value` is admissible for this field.
    fn admits(&self, value: f64) -> bool {
        value.is_finite()
            && match self {
                Field::FxRate => value > 0.0,
                _ => value >= 0.0,
            }
    }
}

/// A change to one field. The kind is always explicit on the wire:
/// `{"kind": "percent", "value": 10}` or `{"kind": "absolute", "value": 0.05}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Delta {
    Percent(f64),
    Absolute(f64),
}

impl Delta {
    pub fn apply(&self, base: f64) -> f64 {
        match *self {
            Delta::Percent(p) => base * (1.0 + p / 100.0),
            Delta::Absolute(a) => base + a,
        }
    }

    fn value(&self) -> f64 {
        match *self {
            Delta::Percent(v) | Delta::Absolute(v) => v,
        }
    }
}

/// Snapshot of trade-cost inputs. `unit_price` is required; the rest default
/// to a zero tariff, parity FX and free freight. `tariff_rate` is a fraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BaseData {
    pub unit_price: f64,
    #[serde(default)]
    pub tariff_rate: f64,
    #[serde(default = "default_fx_rate")]
    pub fx_rate: f64,
    #[serde(default)]
    pub freight_cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

fn default_fx_rate() -> f64 {
    1.0
}

impl BaseData {
    pub fn get(&self, field: Field) -> Option<f64> {
        match field {
            Field::UnitPrice => Some(self.unit_price),
            Field::TariffRate => Some(self.tariff_rate),
            Field::FxRate => Some(self.fx_rate),
            Field::FreightCost => Some(self.freight_cost),
            Field::Volume => self.volume,
        }
    }

    fn set(&mut self, field: Field, value: f64) {
        match field {
            Field::UnitPrice => self.unit_price = value,
            Field::TariffRate => self.tariff_rate = value,
            Field::FxRate => self.fx_rate = value,
            Field::FreightCost => self.freight_cost = value,
            Field::Volume => self.volume = Some(value),
        }
    }

    /// Check every present field against its domain.
    pub fn validate(&self) -> Result<(), CoreError> {
        self.check().map_err(CoreError::Validation)
    }

    fn check(&self) -> Result<(), String> {
        for field in [
            Field::UnitPrice,
            Field::TariffRate,
            Field::FxRate,
            Field::FreightCost,
            Field::Volume,
        ] {
            if let Some(v) = self.get(field) {
                if !field.admits(v) {
                    return Err(format!("{} has inadmissible value {v}", field.as_str()));
                }
            }
        }
        Ok(())
    }

    /// `unit_price × (1 + tariff_rate) × fx_rate + freight_cost`
    pub fn landed_cost(&self) -> f64 {
        self.unit_price * (1.0 + self.tariff_rate) * self.fx_rate + self.freight_cost
    }

    pub fn metrics(&self) -> DerivedMetrics {
        let landed_cost = self.landed_cost();
        DerivedMetrics {
            landed_cost,
            tariff_amount: self.unit_price * self.tariff_rate * self.fx_rate,
            total_landed_cost: self.volume.map(|v| landed_cost * v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DerivedMetrics {
    pub landed_cost: f64,
    pub tariff_amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_landed_cost: Option<f64>,
}

/// A named perturbation of base fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub deltas: BTreeMap<Field, Delta>,
}

impl ScenarioDefinition {
    pub fn new(name: &str, description: &str, deltas: &[(Field, Delta)]) -> Self {
        Self {
            name: name.to_string(),
            description: Some(description.to_string()),
            deltas: deltas.iter().copied().collect(),
        }
    }

    fn validate(&self, base: &BaseData) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::validation("scenario name must not be empty"));
        }
        for (field, delta) in &self.deltas {
            if !delta.value().is_finite() {
                return Err(CoreError::validation(format!(
                    "scenario '{}': delta for {} is not finite",
                    self.name,
                    field.as_str()
                )));
            }
            if base.get(*field).is_none() {
                return Err(CoreError::validation(format!(
                    "scenario '{}' changes {} which the base data does not supply",
                    self.name,
                    field.as_str()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    Negligible,
    Moderate,
    High,
    Severe,
}

impl ImpactLevel {
    pub fn from_delta_percent(delta_percent: f64) -> Self {
        let d = delta_percent.abs();
        if d < 5.0 {
            ImpactLevel::Negligible
        } else if d < 15.0 {
            ImpactLevel::Moderate
        } else if d <= 30.0 {
            ImpactLevel::High
        } else {
            ImpactLevel::Severe
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioResult {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub projected_values: BaseData,
    pub metrics: DerivedMetrics,
    pub delta_absolute: f64,
    pub delta_percent: f64,
    pub impact_level: ImpactLevel,
}

/// A scenario that could not be computed; the rest of the request stands.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioFailure {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Baseline {
    pub values: BaseData,
    pub metrics: DerivedMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioOutput {
    pub baseline: Baseline,
    pub results: Vec<ScenarioResult>,
    pub failures: Vec<ScenarioFailure>,
    pub partial: bool,
}

/// Request body: base data plus either explicit scenarios or a template key.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioRequest {
    pub base_data: BaseData,
    #[serde(default)]
    pub scenarios: Option<Vec<ScenarioDefinition>>,
    #[serde(default)]
    pub template: Option<String>,
}

impl ScenarioRequest {
    pub fn run(&self) -> Result<ScenarioOutput, CoreError> {
        match (&self.scenarios, &self.template) {
            (Some(scenarios), None) => model_scenarios(&self.base_data, scenarios),
            (None, Some(key)) => {
                let key: TemplateKey = key.parse()?;
                model_scenarios(&self.base_data, key.scenarios())
            }
            (Some(_), Some(_)) => Err(CoreError::validation(
                "supply either scenarios or template, not both",
            )),
            (None, None) => Err(CoreError::validation("one of scenarios or template is required")),
        }
    }
}
