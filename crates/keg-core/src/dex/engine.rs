//! Dependency-ordered execution of index plugins.
//!
//! Every pass computes a topological order of the registered plugins
//! (Kahn's algorithm, ties broken by name) and runs them sequentially:
//!
//! - a cycle aborts the pass before any plugin runs
//! - a failed plugin doesn't stop its siblings
//! - a plugin whose dependency failed or was skipped in the same pass is skipped
//! - a failed plugin runs again on the next pass

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use indexmap::IndexMap;

use crate::dex::{
    ChangesPlugin, IndexConfigError, IndexPlugin, NodesPlugin, PluginError, TagsPlugin,
    UpdateStatus,
};
use crate::keg::Keg;

/// Convert Duration to milliseconds as f64.
fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Lifecycle state of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    /// Registered, not yet activated.
    Registered,
    /// Activated, no successful update yet.
    Activated,
    /// An update is running.
    Updating,
    /// The last update succeeded.
    Updated,
    /// Resources released.
    Deactivated,
}

/// Execution order of the registered plugins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginOrder {
    /// Dependencies come before dependents.
    Ordered(Vec<String>),
    /// The plugins that could not be ordered, sorted by name.
    Cyclic(Vec<String>),
}

/// What happened to one plugin in a pass.
#[derive(Debug)]
pub enum PluginOutcome {
    /// The update ran.
    Completed(UpdateStatus),
    /// Not run because a dependency failed or was skipped.
    Skipped {
        /// The unavailable dependency.
        dependency: String,
    },
    /// Activation or update failed.
    Failed(PluginError),
}

/// Outcomes of one pass, in execution order.
#[derive(Debug, Default)]
pub struct UpdateReport {
    outcomes: Vec<(String, PluginOutcome)>,
}

impl UpdateReport {
    /// Outcome of `plugin`, if it took part in the pass.
    #[must_use]
    pub fn get(&self, plugin: &str) -> Option<&PluginOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == plugin)
            .map(|(_, outcome)| outcome)
    }

    /// Every outcome in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PluginOutcome)> {
        self.outcomes
            .iter()
            .map(|(name, outcome)| (name.as_str(), outcome))
    }

    /// Names of the plugins that ran, in execution order.
    #[must_use]
    pub fn plugins(&self) -> Vec<&str> {
        self.outcomes.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Plugin failures of the pass.
    pub fn failures(&self) -> impl Iterator<Item = &PluginError> {
        self.outcomes.iter().filter_map(|(_, outcome)| match outcome {
            PluginOutcome::Failed(e) => Some(e),
            _ => None,
        })
    }

    /// Whether every plugin completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|(_, outcome)| matches!(outcome, PluginOutcome::Completed(_)))
    }

    /// Number of plugins in the pass.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether no plugin took part.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

struct Slot {
    plugin: Box<dyn IndexPlugin>,
    state: PluginState,
}

/// Registry and scheduler of index plugins.
#[derive(Default)]
pub struct IndexEngine {
    plugins: IndexMap<String, Slot>,
}

impl std::fmt::Debug for IndexEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.plugins.iter().map(|(name, slot)| (name, slot.state)))
            .finish()
    }
}

impl IndexEngine {
    /// Engine without plugins.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine with the `nodes`, `changes` and `tags` plugins.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut engine = Self::new();
        engine.register(NodesPlugin);
        engine.register(ChangesPlugin);
        engine.register(TagsPlugin);
        engine
    }

    /// Register `plugin`, replacing any plugin with the same name.
    pub fn register(&mut self, plugin: impl IndexPlugin + 'static) -> &mut Self {
        let name = plugin.name().to_owned();
        let slot = Slot {
            plugin: Box::new(plugin),
            state: PluginState::Registered,
        };
        if let Some(mut previous) = self.plugins.insert(name.clone(), slot) {
            if is_active(previous.state) {
                previous.plugin.deactivate();
            }
            tracing::debug!(plugin = %name, "Replaced plugin");
        }
        self
    }

    /// State of `plugin`, if registered.
    #[must_use]
    pub fn state(&self, plugin: &str) -> Option<PluginState> {
        self.plugins.get(plugin).map(|slot| slot.state)
    }

    /// Names of the registered plugins, in registration order.
    pub fn plugins(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    /// Order the registered plugins by their dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`IndexConfigError::UnknownDependency`] if a plugin depends on
    /// a plugin that isn't registered.
    pub fn plan(&self) -> Result<PluginOrder, IndexConfigError> {
        let dependencies: BTreeMap<&str, BTreeSet<String>> = self
            .plugins
            .iter()
            .map(|(name, slot)| {
                (
                    name.as_str(),
                    slot.plugin.dependencies().into_iter().collect(),
                )
            })
            .collect();

        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (&name, deps) in &dependencies {
            in_degree.insert(name, deps.len());
            for dep in deps {
                let Some((&dep, _)) = dependencies.get_key_value(dep.as_str()) else {
                    return Err(IndexConfigError::UnknownDependency {
                        plugin: name.to_owned(),
                        dependency: dep.clone(),
                    });
                };
                dependents.entry(dep).or_default().push(name);
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&name, _)| name)
            .collect();
        let mut order = Vec::with_capacity(in_degree.len());

        while let Some(name) = ready.pop_first() {
            order.push(name.to_owned());
            for &dependent in dependents.get(name).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if order.len() == in_degree.len() {
            return Ok(PluginOrder::Ordered(order));
        }
        let cyclic = in_degree
            .into_iter()
            .filter(|&(_, degree)| degree > 0)
            .map(|(name, _)| name.to_owned())
            .collect();
        Ok(PluginOrder::Cyclic(cyclic))
    }

    fn ordered(&self) -> Result<Vec<String>, IndexConfigError> {
        match self.plan()? {
            PluginOrder::Ordered(order) => Ok(order),
            PluginOrder::Cyclic(names) => Err(IndexConfigError::Cycle { names }),
        }
    }

    /// Activate every plugin that isn't active yet, in dependency order.
    ///
    /// Returns the activation failures. Failed plugins stay inactive and are
    /// activated again by the next update.
    ///
    /// # Errors
    ///
    /// Returns [`IndexConfigError`] if the plugins can't be ordered.
    pub fn activate(&mut self, keg: &Keg) -> Result<Vec<PluginError>, IndexConfigError> {
        let order = self.ordered()?;
        let mut failures = Vec::new();
        for name in &order {
            if let Some(slot) = self.plugins.get_mut(name)
                && let Err(e) = activate_slot(name, slot, keg)
            {
                failures.push(e);
            }
        }
        Ok(failures)
    }

    /// Release every active plugin.
    pub fn deactivate(&mut self) {
        for (name, slot) in &mut self.plugins {
            if is_active(slot.state) {
                slot.plugin.deactivate();
                slot.state = PluginState::Deactivated;
                tracing::debug!(plugin = %name, "Plugin deactivated");
            }
        }
    }

    /// Run every plugin once against `keg`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexConfigError`] before running anything if the plugins
    /// can't be ordered. Plugin failures are reported in the [`UpdateReport`].
    pub fn update(&mut self, keg: &Keg) -> Result<UpdateReport, IndexConfigError> {
        self.run(keg, None)
    }

    /// Run the plugins whose index entry lists `hook`.
    ///
    /// Plugins without an index entry never match. Ordering and failure rules
    /// are the same as for [`IndexEngine::update`].
    ///
    /// # Errors
    ///
    /// Returns [`IndexConfigError`] if the plugins can't be ordered.
    pub fn update_hook(&mut self, keg: &Keg, hook: &str) -> Result<UpdateReport, IndexConfigError> {
        self.run(keg, Some(hook))
    }

    fn run(&mut self, keg: &Keg, hook: Option<&str>) -> Result<UpdateReport, IndexConfigError> {
        let order = self.ordered()?;
        let start = Instant::now();
        let mut report = UpdateReport::default();
        let mut unavailable: BTreeSet<String> = BTreeSet::new();

        for name in order {
            if let Some(hook) = hook
                && !keg.dex().get(&name).is_some_and(|entry| entry.has_hook(hook))
            {
                continue;
            }
            let Some(slot) = self.plugins.get_mut(&name) else {
                continue;
            };

            let blocked_by = slot
                .plugin
                .dependencies()
                .into_iter()
                .find(|dep| unavailable.contains(dep));
            let outcome = match blocked_by {
                Some(dependency) => {
                    tracing::debug!(plugin = %name, %dependency, "Plugin skipped");
                    PluginOutcome::Skipped { dependency }
                }
                None => run_slot(&name, slot, keg),
            };

            if !matches!(outcome, PluginOutcome::Completed(_)) {
                unavailable.insert(name.clone());
            }
            report.outcomes.push((name, outcome));
        }

        tracing::info!(
            keg = %keg.keg_file().title,
            hook = hook.unwrap_or("*"),
            plugins = report.len(),
            failed = report.failures().count(),
            elapsed_ms = elapsed_ms(start),
            "Index pass completed"
        );
        Ok(report)
    }
}

fn is_active(state: PluginState) -> bool {
    matches!(
        state,
        PluginState::Activated | PluginState::Updating | PluginState::Updated
    )
}

fn activate_slot(name: &str, slot: &mut Slot, keg: &Keg) -> Result<(), PluginError> {
    if is_active(slot.state) {
        return Ok(());
    }
    match slot.plugin.activate(keg) {
        Ok(()) => {
            slot.state = PluginState::Activated;
            tracing::debug!(plugin = %name, "Plugin activated");
            Ok(())
        }
        Err(e) => {
            tracing::warn!(plugin = %name, error = %e, "Plugin activation failed");
            Err(e)
        }
    }
}

fn run_slot(name: &str, slot: &mut Slot, keg: &Keg) -> PluginOutcome {
    if let Err(e) = activate_slot(name, slot, keg) {
        return PluginOutcome::Failed(e);
    }

    let start = Instant::now();
    slot.state = PluginState::Updating;
    match slot.plugin.update(keg) {
        Ok(status) => {
            slot.state = PluginState::Updated;
            tracing::debug!(
                plugin = %name,
                status = ?status,
                elapsed_ms = elapsed_ms(start),
                "Plugin updated"
            );
            PluginOutcome::Completed(status)
        }
        Err(e) => {
            slot.state = PluginState::Activated;
            tracing::warn!(plugin = %name, error = %e, "Plugin update failed");
            PluginOutcome::Failed(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::dex::PluginErrorKind;
    use crate::dex::test_support::{keg_with, unconfigured_keg};

    type Log = Arc<Mutex<Vec<String>>>;

    /// Records its calls. Fails the first `failures` updates.
    struct Probe {
        name: &'static str,
        deps: &'static [&'static str],
        failures: usize,
        log: Log,
    }

    impl Probe {
        fn new(name: &'static str, deps: &'static [&'static str], log: &Log) -> Self {
            Self {
                name,
                deps,
                failures: 0,
                log: Arc::clone(log),
            }
        }

        fn failing(mut self, times: usize) -> Self {
            self.failures = times;
            self
        }

        fn record(&self, event: &str) {
            self.log.lock().unwrap().push(format!("{}:{event}", self.name));
        }
    }

    impl IndexPlugin for Probe {
        fn name(&self) -> &str {
            self.name
        }

        fn dependencies(&self) -> Vec<String> {
            self.deps.iter().map(|&d| d.to_owned()).collect()
        }

        fn activate(&mut self, _keg: &Keg) -> Result<(), PluginError> {
            self.record("activate");
            Ok(())
        }

        fn update(&mut self, _keg: &Keg) -> Result<UpdateStatus, PluginError> {
            self.record("update");
            if self.failures > 0 {
                self.failures -= 1;
                return Err(PluginError::new(
                    self.name,
                    PluginErrorKind::Derive("boom".to_owned()),
                ));
            }
            Ok(UpdateStatus::NotConfigured)
        }

        fn deactivate(&mut self) {
            self.record("deactivate");
        }
    }

    fn updates(log: &Log) -> Vec<String> {
        log.lock()
            .unwrap()
            .iter()
            .filter_map(|entry| entry.strip_suffix(":update").map(str::to_owned))
            .collect()
    }

    #[test]
    fn test_plan_orders_dependencies_then_names() {
        let log = Log::default();
        let mut engine = IndexEngine::new();
        engine
            .register(Probe::new("tags", &["nodes"], &log))
            .register(Probe::new("nodes", &[], &log))
            .register(Probe::new("changes", &[], &log))
            .register(Probe::new("backlinks", &["tags", "changes"], &log));

        let order = engine.plan().unwrap();

        assert_eq!(
            order,
            PluginOrder::Ordered(
                ["changes", "nodes", "tags", "backlinks"]
                    .map(str::to_owned)
                    .to_vec()
            )
        );
    }

    #[test]
    fn test_plan_reports_cycle() {
        let log = Log::default();
        let mut engine = IndexEngine::new();
        engine
            .register(Probe::new("a", &["b"], &log))
            .register(Probe::new("b", &["a"], &log))
            .register(Probe::new("c", &["b"], &log))
            .register(Probe::new("d", &[], &log));

        let order = engine.plan().unwrap();

        assert_eq!(
            order,
            PluginOrder::Cyclic(["a", "b", "c"].map(str::to_owned).to_vec())
        );
    }

    #[test]
    fn test_plan_unknown_dependency() {
        let log = Log::default();
        let mut engine = IndexEngine::new();
        engine.register(Probe::new("a", &["missing"], &log));

        let err = engine.plan().unwrap_err();

        assert_eq!(
            err,
            IndexConfigError::UnknownDependency {
                plugin: "a".to_owned(),
                dependency: "missing".to_owned(),
            }
        );
    }

    #[test]
    fn test_cycle_aborts_before_any_plugin_runs() {
        let log = Log::default();
        let mut engine = IndexEngine::new();
        engine
            .register(Probe::new("a", &["a"], &log))
            .register(Probe::new("b", &[], &log));

        let err = engine.update(&unconfigured_keg()).unwrap_err();

        assert_eq!(err, IndexConfigError::Cycle { names: vec!["a".to_owned()] });
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(engine.state("b"), Some(PluginState::Registered));
    }

    #[test]
    fn test_failure_skips_dependents_not_siblings() {
        let log = Log::default();
        let mut engine = IndexEngine::new();
        engine
            .register(Probe::new("a", &[], &log).failing(1))
            .register(Probe::new("b", &["a"], &log))
            .register(Probe::new("c", &["b"], &log))
            .register(Probe::new("d", &[], &log));

        let report = engine.update(&unconfigured_keg()).unwrap();

        assert!(matches!(report.get("a"), Some(PluginOutcome::Failed(e)) if e.plugin == "a"));
        assert!(matches!(
            report.get("b"),
            Some(PluginOutcome::Skipped { dependency }) if dependency == "a"
        ));
        assert!(matches!(
            report.get("c"),
            Some(PluginOutcome::Skipped { dependency }) if dependency == "b"
        ));
        assert!(matches!(report.get("d"), Some(PluginOutcome::Completed(_))));
        assert_eq!(updates(&log), vec!["a", "d"]);
        assert!(!report.is_success());
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn test_failed_plugin_retried_next_pass() {
        let log = Log::default();
        let mut engine = IndexEngine::new();
        engine
            .register(Probe::new("a", &[], &log).failing(1))
            .register(Probe::new("b", &["a"], &log));
        let keg = unconfigured_keg();

        engine.update(&keg).unwrap();
        assert_eq!(engine.state("a"), Some(PluginState::Activated));
        let report = engine.update(&keg).unwrap();

        assert!(report.is_success());
        assert_eq!(updates(&log), vec!["a", "a", "b"]);
        assert_eq!(engine.state("b"), Some(PluginState::Updated));
    }

    #[test]
    fn test_lifecycle_states() {
        let log = Log::default();
        let mut engine = IndexEngine::new();
        engine.register(Probe::new("a", &[], &log));
        let keg = unconfigured_keg();

        assert_eq!(engine.state("a"), Some(PluginState::Registered));
        assert!(engine.activate(&keg).unwrap().is_empty());
        assert_eq!(engine.state("a"), Some(PluginState::Activated));
        engine.update(&keg).unwrap();
        engine.update(&keg).unwrap();
        assert_eq!(engine.state("a"), Some(PluginState::Updated));
        engine.deactivate();
        assert_eq!(engine.state("a"), Some(PluginState::Deactivated));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:activate", "a:update", "a:update", "a:deactivate"]
        );
        assert_eq!(engine.state("missing"), None);
    }

    #[test]
    fn test_update_hook_runs_matching_plugins_only() {
        let keg = keg_with(&[(1, "One", 1, &["x"])]);
        let mut engine = IndexEngine::with_builtin();

        let report = engine.update_hook(&keg, "on-write").unwrap();

        assert_eq!(report.plugins(), vec!["changes"]);
        assert!(keg.read_index("changes").unwrap().is_some());
        assert_eq!(keg.read_index("tags").unwrap(), None);
        assert_eq!(engine.state("tags"), Some(PluginState::Registered));
    }

    #[test]
    fn test_builtin_pass_is_idempotent() {
        let keg = keg_with(&[(1, "One", 1, &["x"]), (2, "Two", 2, &["x", "y"])]);
        let mut engine = IndexEngine::with_builtin();

        let first = engine.update(&keg).unwrap();
        let artifacts: Vec<_> = ["nodes", "changes", "tags"]
            .map(|name| keg.read_index(name).unwrap())
            .to_vec();
        let second = engine.update(&keg).unwrap();

        assert!(first
            .iter()
            .all(|(_, outcome)| matches!(outcome, PluginOutcome::Completed(UpdateStatus::Written { .. }))));
        assert!(second
            .iter()
            .all(|(_, outcome)| matches!(outcome, PluginOutcome::Completed(UpdateStatus::Unchanged { .. }))));
        assert_eq!(
            ["nodes", "changes", "tags"]
                .map(|name| keg.read_index(name).unwrap())
                .to_vec(),
            artifacts
        );
    }

    #[test]
    fn test_register_replaces_same_name() {
        let log = Log::default();
        let mut engine = IndexEngine::new();
        engine.register(Probe::new("a", &[], &log));
        engine.activate(&unconfigured_keg()).unwrap();

        engine.register(Probe::new("a", &[], &log));

        assert_eq!(engine.plugins().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(engine.state("a"), Some(PluginState::Registered));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:activate", "a:deactivate"]
        );
    }
}
