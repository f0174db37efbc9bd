use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use futures::future::BoxFuture;
use gale_instruments::Threshold;

use crate::cli::GaleScenarioCli;
use crate::config::RunDescriptor;
use crate::context::{RunnerContext, UserValuesConstraint, VuContext};
use crate::init::init;

pub type HookResult = anyhow::Result<()>;

pub type GlobalHookMut<RV> = fn(&mut RunnerContext<RV>) -> HookResult;
pub type GlobalHook<RV> = fn(Arc<RunnerContext<RV>>) -> HookResult;
/// An entry function, run once per iteration of a virtual user.
pub type EntryFn<RV, V> = for<'a> fn(&'a mut VuContext<RV, V>) -> BoxFuture<'a, HookResult>;

/// The builder for a scenario definition.
///
/// This must be used at the start of a scenario binary to define the entry functions that the
/// run descriptor can refer to.
pub struct ScenarioDefinitionBuilder<RV: UserValuesConstraint, V: UserValuesConstraint> {
    /// The name of the run, used to name output files and in the run summary.
    ///
    /// Recommended value is `env!("CARGO_PKG_NAME")`.
    name: String,
    /// This value is initialised for you and you cannot change it.
    #[doc(hidden)]
    cli: GaleScenarioCli,
    /// The descriptor to use when none is given with `--config`.
    default_descriptor: Option<RunDescriptor>,
    /// Global setup hook for this run. It will be run once, before any virtual users are started.
    setup_fn: Option<GlobalHookMut<RV>>,
    /// Entry functions by name. Each scenario in the run descriptor names the one it runs with
    /// `exec`.
    entry_fns: HashMap<String, EntryFn<RV, V>>,
    /// Global teardown hook for this run. It will be run once, after every virtual user has
    /// stopped. Failures are logged and don't affect the run outcome.
    teardown_fn: Option<GlobalHook<RV>>,
}

pub(crate) struct ScenarioDefinition<RV: UserValuesConstraint, V: UserValuesConstraint> {
    pub name: String,
    pub cli: GaleScenarioCli,
    pub descriptor: RunDescriptor,
    pub thresholds: Vec<Threshold>,
    pub setup_fn: Option<GlobalHookMut<RV>>,
    pub entry_fns: HashMap<String, EntryFn<RV, V>>,
    pub teardown_fn: Option<GlobalHook<RV>>,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> ScenarioDefinitionBuilder<RV, V> {
    /// Initialise a new scenario definition from the run name and command line arguments.
    /// See the [ScenarioDefinitionBuilder::name] for more information about the name.
    pub fn new(name: &str, cli: GaleScenarioCli) -> Self {
        Self {
            name: name.to_string(),
            cli,
            default_descriptor: None,
            setup_fn: None,
            entry_fns: HashMap::new(),
            teardown_fn: None,
        }
    }

    /// Initialise logging and parse the command line, then create the definition.
    pub fn new_with_init(name: &str) -> Self {
        Self::new(name, init())
    }

    /// Set the run descriptor to use when one isn't provided on the command line.
    pub fn with_default_descriptor(mut self, descriptor: RunDescriptor) -> Self {
        self.default_descriptor = Some(descriptor);
        self
    }

    /// Set the global setup hook [ScenarioDefinitionBuilder::setup_fn] for this run.
    pub fn use_setup(mut self, setup_fn: GlobalHookMut<RV>) -> Self {
        self.setup_fn = Some(setup_fn);
        self
    }

    /// Register an entry function that scenarios can refer to by `name`.
    pub fn use_named_behaviour(mut self, name: &str, behaviour: EntryFn<RV, V>) -> Self {
        let previous = self.entry_fns.insert(name.to_string(), behaviour);

        if previous.is_some() {
            panic!("Behaviour [{}] is already defined", name);
        }

        self
    }

    /// Set the global teardown hook [ScenarioDefinitionBuilder::teardown_fn] for this run.
    pub fn use_teardown(mut self, teardown_fn: GlobalHook<RV>) -> Self {
        self.teardown_fn = Some(teardown_fn);
        self
    }

    /// Resolve the run descriptor and check that it can be scheduled.
    pub(crate) fn build(self) -> anyhow::Result<ScenarioDefinition<RV, V>> {
        let descriptor = match &self.cli.config {
            Some(path) => RunDescriptor::load(path)?,
            None => self.default_descriptor.ok_or_else(|| {
                anyhow::anyhow!(
                    "No run descriptor for [{}], provide one with --config",
                    self.name
                )
            })?,
        };

        let thresholds = descriptor
            .validate(self.entry_fns.keys().map(String::as_str))
            .context("Invalid run descriptor")?;

        Ok(ScenarioDefinition {
            name: self.name,
            cli: self.cli,
            descriptor,
            thresholds,
            setup_fn: self.setup_fn,
            entry_fns: self.entry_fns,
            teardown_fn: self.teardown_fn,
        })
    }
}
