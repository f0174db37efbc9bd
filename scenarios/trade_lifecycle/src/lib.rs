pub mod api;
pub mod behaviour;

use anyhow::Context;
use gale_http_runner::prelude::*;
use std::time::Duration;

/// The run used when `--config` isn't given.
pub const DEFAULT_RUN: &str = include_str!("../run.yaml");

/// How long to wait for the backend to match bids to items, and how often to ask.
pub const SETTLE_POLICY: PollPolicy = PollPolicy {
    interval: Duration::from_secs(5),
    timeout: Duration::from_secs(65),
};

#[derive(Default, Debug)]
pub struct TraderValues {}

impl UserValuesConstraint for TraderValues {}

pub type TradeContext = VuContext<HttpRunnerContext, TraderValues>;
pub type TradeDefinition = ScenarioDefinitionBuilder<HttpRunnerContext, TraderValues>;

fn setup(ctx: &mut RunnerContext<HttpRunnerContext>) -> HookResult {
    configure_http_client(ctx)?;
    Ok(())
}

/// Register the trade behaviours on `builder` and give it the bundled run.
pub fn define(builder: TradeDefinition) -> GaleResult<TradeDefinition> {
    let descriptor =
        RunDescriptor::from_yaml_str(DEFAULT_RUN).context("The bundled run.yaml is invalid")?;

    Ok(builder
        .with_default_descriptor(descriptor)
        .use_setup(setup)
        .use_named_behaviour(
            "full_trade_lifecycle",
            behaviour::full_trade_lifecycle::entry,
        )
        .use_named_behaviour("update_prices", behaviour::update_prices::entry)
        .use_named_behaviour("error_conditions", behaviour::error_conditions::entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn bundled_run_is_valid() {
        let descriptor = RunDescriptor::from_yaml_str(DEFAULT_RUN).unwrap();
        let thresholds = descriptor
            .validate(["full_trade_lifecycle", "update_prices", "error_conditions"])
            .unwrap();

        assert_eq!(3, descriptor.scenarios.len());
        assert_eq!(2, thresholds.len());

        let lifecycle = &descriptor.scenarios["full_trade_lifecycle"];
        assert_eq!(20, lifecycle.executor.max_vus());
        assert_eq!(Some(Duration::from_secs(100)), lifecycle.planned_duration());

        let update_prices = &descriptor.scenarios["update_prices"];
        assert_eq!(Duration::from_secs(30), update_prices.start_time);
        assert_eq!(Some(Duration::from_secs(90)), update_prices.planned_duration());

        assert_eq!(
            Duration::from_secs(40),
            descriptor.scenarios["error_conditions"].start_time
        );
    }
}
