use std::collections::HashSet;

use tracing::warn;

use crate::error::CoreError;
use crate::scenario::{
    BaseData, Baseline, ImpactLevel, ScenarioDefinition, ScenarioFailure, ScenarioOutput,
    ScenarioResult,
};

/// Upper bound on scenarios per request.
pub const MAX_SCENARIOS: usize = 100;

fn validate(base: &BaseData, scenarios: &[ScenarioDefinition]) -> Result<(), CoreError> {
    base.validate()?;
    if scenarios.is_empty() {
        return Err(CoreError::validation("at least one scenario is required"));
    }
    if scenarios.len() > MAX_SCENARIOS {
        return Err(CoreError::validation(format!(
            "at most {MAX_SCENARIOS} scenarios per request, got {}",
            scenarios.len()
        )));
    }
    let mut names = HashSet::new();
    for s in scenarios {
        s.validate(base)?;
        if !names.insert(s.name.as_str()) {
            return Err(CoreError::validation(format!("duplicate scenario name '{}'", s.name)));
        }
    }
    Ok(())
}

fn apply(base: &BaseData, scenario: &ScenarioDefinition) -> Result<ScenarioResult, CoreError> {
    let baseline = base.landed_cost();
    if baseline == 0.0 {
        return Err(CoreError::Computation(
            "baseline landed cost is zero, percentage change is undefined".to_string(),
        ));
    }

    let mut projected = *base;
    for (field, delta) in &scenario.deltas {
        // Every delta applies to the base value, never to another delta's output.
        let Some(original) = base.get(*field) else {
            continue;
        };
        projected.set(*field, delta.apply(original));
    }
    projected.check().map_err(|e| CoreError::Computation(format!("projected {e}")))?;

    let metrics = projected.metrics();
    let delta_absolute = metrics.landed_cost - baseline;
    let delta_percent = delta_absolute / baseline * 100.0;
    if !delta_percent.is_finite() {
        return Err(CoreError::Computation("landed cost change is not finite".to_string()));
    }

    Ok(ScenarioResult {
        name: scenario.name.clone(),
        description: scenario.description.clone(),
        projected_values: projected,
        metrics,
        delta_absolute,
        delta_percent,
        impact_level: ImpactLevel::from_delta_percent(delta_percent),
    })
}

/// Apply each scenario independently to a copy of `base` and report the
/// change in landed cost. Malformed input fails the whole call; a scenario
/// that cannot be computed is reported in `failures` and the rest proceed.
///
/// Pure: no clock, randomness or shared state is consulted.
pub fn model_scenarios(
    base: &BaseData,
    scenarios: &[ScenarioDefinition],
) -> Result<ScenarioOutput, CoreError> {
    validate(base, scenarios)?;

    let mut results = Vec::with_capacity(scenarios.len());
    let mut failures = Vec::new();
    for scenario in scenarios {
        match apply(base, scenario) {
            Ok(result) => results.push(result),
            Err(e) => {
                warn!(scenario = %scenario.name, error = %e, "scenario failed");
                failures.push(ScenarioFailure {
                    name: scenario.name.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    Ok(ScenarioOutput {
        baseline: Baseline {
            values: *base,
            metrics: base.metrics(),
        },
        partial: !failures.is_empty(),
        results,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{Delta, Field, TemplateKey};
    use proptest::prelude::*;

    fn base() -> BaseData {
        BaseData {
            unit_price: 100.0,
            tariff_rate: 0.10,
            fx_rate: 1.0,
            freight_cost: 5.0,
            volume: None,
        }
    }

    #[test]
    fn test_tariff_bump_example() {
        let scenario = ScenarioDefinition::new(
            "tariff_plus_5",
            "five points",
            &[(Field::TariffRate, Delta::Absolute(0.05))],
        );
        let out = model_scenarios(&base(), &[scenario]).unwrap();

        assert!((out.baseline.metrics.landed_cost - 115.0).abs() < 1e-9);
        let r = &out.results[0];
        assert!((r.metrics.landed_cost - 120.0).abs() < 1e-9);
        assert!((r.delta_absolute - 5.0).abs() < 1e-9);
        assert!((r.delta_percent - 4.3478).abs() < 1e-3);
        assert_eq!(r.impact_level, ImpactLevel::Negligible);
        assert!(!out.partial);
    }

    #[test]
    fn test_deltas_do_not_compound_or_mutate_base() {
        let b = base();
        let fx = ScenarioDefinition::new("fx", "", &[(Field::FxRate, Delta::Percent(10.0))]);
        let freight = ScenarioDefinition::new("freight", "", &[(Field::FreightCost, Delta::Absolute(10.0))]);
        let out = model_scenarios(&b, &[fx, freight]).unwrap();

        assert_eq!(b, base());
        // The freight scenario sees the original fx rate.
        assert_eq!(out.results[1].projected_values.fx_rate, 1.0);
        assert!((out.results[1].delta_absolute - 10.0).abs() < 1e-9);
        assert!((out.results[0].delta_percent - 110.0 * 0.1 / 115.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_baseline_fails_per_scenario() {
        let zero = BaseData {
            unit_price: 0.0,
            tariff_rate: 0.0,
            fx_rate: 1.0,
            freight_cost: 0.0,
            volume: None,
        };
        let s = ScenarioDefinition::new("any", "", &[(Field::UnitPrice, Delta::Absolute(1.0))]);
        let out = model_scenarios(&zero, &[s]).unwrap();
        assert!(out.results.is_empty());
        assert_eq!(out.failures.len(), 1);
        assert!(out.partial);
    }

    #[test]
    fn test_inadmissible_projection_fails_only_that_scenario() {
        let crash = ScenarioDefinition::new("fx_collapse", "", &[(Field::FxRate, Delta::Percent(-100.0))]);
        let fine = ScenarioDefinition::new("fine", "", &[(Field::FxRate, Delta::Percent(-10.0))]);
        let out = model_scenarios(&base(), &[crash, fine]).unwrap();
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].name, "fx_collapse");
        assert_eq!(out.results.len(), 1);
    }

    #[test]
    fn test_malformed_requests_are_rejected() {
        let s = ScenarioDefinition::new("vol", "", &[(Field::Volume, Delta::Percent(5.0))]);
        assert!(matches!(model_scenarios(&base(), &[s]), Err(CoreError::Validation(_))));
        assert!(matches!(model_scenarios(&base(), &[]), Err(CoreError::Validation(_))));

        let a = ScenarioDefinition::new("same", "", &[]);
        let b = ScenarioDefinition::new("same", "", &[]);
        assert!(model_scenarios(&base(), &[a, b]).is_err());

        let nan = ScenarioDefinition::new("nan", "", &[(Field::UnitPrice, Delta::Percent(f64::NAN))]);
        assert!(model_scenarios(&base(), &[nan]).is_err());
    }

    #[test]
    fn test_volume_scales_total_landed_cost() {
        let mut b = base();
        b.volume = Some(1000.0);
        let s = ScenarioDefinition::new("demand", "", &[(Field::Volume, Delta::Percent(-20.0))]);
        let out = model_scenarios(&b, &[s]).unwrap();
        let r = &out.results[0];
        assert!((r.metrics.total_landed_cost.unwrap() - 115.0 * 800.0).abs() < 1e-6);
        // Volume does not move unit landed cost.
        assert_eq!(r.delta_absolute, 0.0);
        assert_eq!(r.impact_level, ImpactLevel::Negligible);
    }

    #[test]
    fn test_every_template_runs_on_a_typical_base() {
        for key in TemplateKey::ALL {
            let out = model_scenarios(&base(), key.scenarios()).unwrap();
            assert!(out.failures.is_empty(), "{key:?} produced failures");
            assert!(!out.results.is_empty());
        }
    }

    fn arb_base() -> impl Strategy<Value = BaseData> {
        (0.01f64..1.0e4, 0.0f64..2.0, 0.01f64..10.0, 0.0f64..1.0e3).prop_map(|(p, t, fx, f)| BaseData {
            unit_price: p,
            tariff_rate: t,
            fx_rate: fx,
            freight_cost: f,
            volume: None,
        })
    }

    proptest! {
        #[test]
        fn zero_deltas_reproduce_baseline(b in arb_base()) {
            let s = ScenarioDefinition::new("noop", "", &[
                (Field::UnitPrice, Delta::Percent(0.0)),
                (Field::TariffRate, Delta::Absolute(0.0)),
                (Field::FxRate, Delta::Percent(0.0)),
                (Field::FreightCost, Delta::Absolute(0.0)),
            ]);
            let out = model_scenarios(&b, &[s]).unwrap();
            let r = &out.results[0];
            prop_assert_eq!(r.projected_values, b);
            prop_assert_eq!(r.metrics, out.baseline.metrics);
            prop_assert_eq!(r.delta_absolute, 0.0);
            prop_assert_eq!(r.impact_level, ImpactLevel::Negligible);
        }

        #[test]
        fn modelling_is_pure(b in arb_base(), pct in -50.0f64..50.0) {
            let scenarios = vec![
                ScenarioDefinition::new("price", "", &[(Field::UnitPrice, Delta::Percent(pct))]),
                ScenarioDefinition::new("fx", "", &[(Field::FxRate, Delta::Percent(pct / 2.0))]),
            ];
            let first = serde_json::to_string(&model_scenarios(&b, &scenarios).unwrap()).unwrap();
            let second = serde_json::to_string(&model_scenarios(&b, &scenarios).unwrap()).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
