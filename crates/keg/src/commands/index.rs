//! `keg index` command implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Args;
use keg_core::Keg;
use keg_core::dex::{IndexEngine, PluginOutcome, UpdateReport, UpdateStatus};
use keg_storage::{Received, StorageEventReceiver};

use crate::context::Context;
use crate::error::CliError;
use crate::output::Output;

/// How long the watch loop waits for a change before checking for Ctrl-C.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Arguments for the index command.
#[derive(Args)]
pub(crate) struct IndexArgs {
    /// Keg alias (default: the configured default keg).
    #[arg(short = 'k', long = "keg", value_name = "ALIAS")]
    keg: Option<String>,

    /// Only rebuild indexes triggered by this hook.
    #[arg(long, value_name = "NAME")]
    hook: Option<String>,

    /// Keep running and rebuild whenever a node changes.
    #[arg(short, long)]
    watch: bool,
}

impl IndexArgs {
    /// Execute the index command.
    ///
    /// # Errors
    ///
    /// Returns an error if the keg can't be loaded, the plugins can't be
    /// ordered, or every plugin failed.
    pub(crate) fn execute(self, ctx: &mut Context, output: &Output) -> Result<(), CliError> {
        let alias = ctx.alias(self.keg.clone())?;
        let keg = ctx.backend.load_keg(&alias, &ctx.config)?;
        let mut engine = IndexEngine::with_builtin();

        if self.watch {
            return self.watch(&alias, &mut engine, &keg, output);
        }

        let report = self.pass(&mut engine, &keg)?;
        print_report(output, &report);
        if report.is_empty() {
            if let Some(hook) = &self.hook {
                output.muted(&format!("No index is triggered by {hook}"));
            }
            return Ok(());
        }
        if report.failures().count() == report.len() {
            return Err(CliError::IndexFailed(report.len()));
        }
        Ok(())
    }

    fn pass(&self, engine: &mut IndexEngine, keg: &Keg) -> Result<UpdateReport, CliError> {
        let report = match &self.hook {
            Some(hook) => engine.update_hook(keg, hook)?,
            None => engine.update(keg)?,
        };
        Ok(report)
    }

    /// Run a pass now and again after every node change until interrupted.
    fn watch(
        &self,
        alias: &str,
        engine: &mut IndexEngine,
        keg: &Keg,
        output: &Output,
    ) -> Result<(), CliError> {
        for failure in engine.activate(keg)? {
            output.warning(&format!("Warning: {failure}"));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;

        let (events, handle) = keg.storage().watch()?;
        output.info(&format!("Watching {alias} for changes (Ctrl-C to stop)"));

        let result = self.watch_loop(engine, keg, &events, &stop, output);

        handle.stop();
        engine.deactivate();
        output.info("Stopped watching");
        result
    }

    fn watch_loop(
        &self,
        engine: &mut IndexEngine,
        keg: &Keg,
        events: &StorageEventReceiver,
        stop: &AtomicBool,
        output: &Output,
    ) -> Result<(), CliError> {
        print_report(output, &self.pass(engine, keg)?);

        while !stop.load(Ordering::SeqCst) {
            match events.poll(POLL_INTERVAL) {
                Received::Event(event) => {
                    let Some(id) = event.node_id() else {
                        continue;
                    };
                    // A pass covers every pending change.
                    while events.try_recv().is_some() {}
                    tracing::info!(node = %id, path = %event.path, "Node changed");
                    print_report(output, &self.pass(engine, keg)?);
                }
                Received::Timeout => {}
                Received::Closed => {
                    output.warning("Storage does not report changes");
                    break;
                }
            }
        }
        Ok(())
    }
}

fn print_report(output: &Output, report: &UpdateReport) {
    for (name, outcome) in report.iter() {
        match outcome {
            PluginOutcome::Completed(UpdateStatus::Written { path }) => {
                output.success(&format!("  {name}: wrote {path}"));
            }
            PluginOutcome::Completed(UpdateStatus::Unchanged { path }) => {
                output.muted(&format!("  {name}: {path} unchanged"));
            }
            PluginOutcome::Completed(UpdateStatus::NotConfigured) => {
                output.muted(&format!("  {name}: not configured"));
            }
            PluginOutcome::Skipped { dependency } => {
                output.warning(&format!("  {name}: skipped, {dependency} unavailable"));
            }
            PluginOutcome::Failed(e) => output.error(&format!("  {e}")),
        }
    }
}
