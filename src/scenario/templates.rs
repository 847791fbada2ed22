use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::Serialize;

use crate::error::CoreError;
use crate::scenario::{Delta, Field, ScenarioDefinition};

/// Known scenario templates. Lookup is an exact match over this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKey {
    FxShock,
    TariffIncrease,
    SupplyDisruption,
    TradeWar,
    CostRelief,
}

impl TemplateKey {
    pub const ALL: [TemplateKey; 5] = [
        TemplateKey::FxShock,
        TemplateKey::TariffIncrease,
        TemplateKey::SupplyDisruption,
        TemplateKey::TradeWar,
        TemplateKey::CostRelief,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKey::FxShock => "fx_shock",
            TemplateKey::TariffIncrease => "tariff_increase",
            TemplateKey::SupplyDisruption => "supply_disruption",
            TemplateKey::TradeWar => "trade_war",
            TemplateKey::CostRelief => "cost_relief",
        }
    }

    pub fn scenarios(&self) -> &'static [ScenarioDefinition] {
        registry().get(self).map(Vec::as_slice).unwrap_or(&[])
    }

    fn build(&self) -> Vec<ScenarioDefinition> {
        use Delta::{Absolute, Percent};
        use Field::{FreightCost, FxRate, TariffRate, UnitPrice};

        match self {
            TemplateKey::FxShock => vec![
                ScenarioDefinition::new(
                    "fx_depreciation_10",
                    "Importing currency weakens 10%",
                    &[(FxRate, Percent(10.0))],
                ),
                ScenarioDefinition::new(
                    "fx_depreciation_20",
                    "Importing currency weakens 20%",
                    &[(FxRate, Percent(20.0))],
                ),
                ScenarioDefinition::new(
                    "fx_appreciation_10",
                    "Importing currency strengthens 10%",
                    &[(FxRate, Percent(-10.0))],
                ),
            ],
            TemplateKey::TariffIncrease => vec![
                ScenarioDefinition::new(
                    "tariff_plus_5pts",
                    "Tariff rate up 5 percentage points",
                    &[(TariffRate, Absolute(0.05))],
                ),
                ScenarioDefinition::new(
                    "tariff_plus_10pts",
                    "Tariff rate up 10 percentage points",
                    &[(TariffRate, Absolute(0.10))],
                ),
                ScenarioDefinition::new(
                    "tariff_plus_25pts",
                    "Punitive tariff, up 25 percentage points",
                    &[(TariffRate, Absolute(0.25))],
                ),
            ],
            TemplateKey::SupplyDisruption => vec![
                ScenarioDefinition::new(
                    "freight_plus_50",
                    "Freight costs up 50%",
                    &[(FreightCost, Percent(50.0))],
                ),
                ScenarioDefinition::new(
                    "freight_doubling",
                    "Freight costs double",
                    &[(FreightCost, Percent(100.0))],
                ),
                ScenarioDefinition::new(
                    "port_closure",
                    "Rerouted shipping with supplier price pass-through",
                    &[(FreightCost, Percent(150.0)), (UnitPrice, Percent(10.0))],
                ),
            ],
            TemplateKey::TradeWar => vec![
                ScenarioDefinition::new(
                    "escalation",
                    "Tariffs, currency and freight move against the importer",
                    &[
                        (TariffRate, Absolute(0.25)),
                        (FxRate, Percent(5.0)),
                        (FreightCost, Percent(20.0)),
                    ],
                ),
                ScenarioDefinition::new(
                    "retaliation",
                    "Moderate tariff response with supplier price rises",
                    &[(TariffRate, Absolute(0.15)), (UnitPrice, Percent(5.0))],
                ),
            ],
            TemplateKey::CostRelief => vec![
                ScenarioDefinition::new(
                    "tariff_removal",
                    "Tariff eliminated",
                    &[(TariffRate, Percent(-100.0))],
                ),
                ScenarioDefinition::new(
                    "freight_normalization",
                    "Freight costs fall 30%",
                    &[(FreightCost, Percent(-30.0))],
                ),
                ScenarioDefinition::new(
                    "stronger_currency",
                    "Importing currency strengthens 8%",
                    &[(FxRate, Percent(-8.0))],
                ),
            ],
        }
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TemplateKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CoreError::not_found("scenario template", s))
    }
}

static REGISTRY: OnceLock<BTreeMap<TemplateKey, Vec<ScenarioDefinition>>> = OnceLock::new();

/// The template registry. Built on first use and read-only afterwards.
pub fn registry() -> &'static BTreeMap<TemplateKey, Vec<ScenarioDefinition>> {
    REGISTRY.get_or_init(|| TemplateKey::ALL.into_iter().map(|k| (k, k.build())).collect())
}
