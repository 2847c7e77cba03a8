use crate::events::{CheckPhase, Event, EventSink};
use crate::tracker::{RunSummary, Tracker};
use crate::ResolveError;
use devstate_runtime::{
    ActionExecutor, AliasTable, PollFailure, ProbeResult, ReadinessProber,
};
use devstate_schema::{ProbeTarget, StateConfig, StateDeclaration, StateName};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info};

/// Mutable state of one run: what is done, what is in progress, and results.
#[derive(Debug, Default)]
pub struct RunContext {
    processed: HashSet<StateName>,
    resolving: Vec<StateName>,
    tracker: Tracker,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_processed(&self, name: &str) -> bool {
        self.processed.contains(name)
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }
}

/// Outcome of [`Orchestrator::run`].
#[derive(Debug)]
pub struct RunReport {
    pub target: StateName,
    pub error: Option<ResolveError>,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

/// Walks the state graph depth-first, bringing each state to readiness.
///
/// Dependencies are resolved strictly in declared order before the state's
/// own pre-check, actions, and poll. Every step is reported to the sink.
pub struct Orchestrator<'a> {
    config: &'a StateConfig,
    executor: ActionExecutor,
    prober: ReadinessProber,
    sink: &'a dyn EventSink,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a StateConfig, sink: &'a dyn EventSink) -> Self {
        let aliases = AliasTable::with_overrides(&config.aliases);
        Self {
            executor: ActionExecutor::new(aliases.clone(), &config.base_dir),
            prober: ReadinessProber::new(aliases, &config.base_dir),
            config,
            sink,
        }
    }

    /// Resolve `target` in a fresh run and summarize the result.
    pub fn run(&self, target: &str) -> RunReport {
        info!("bringing '{target}' to readiness");
        let started = Instant::now();
        let mut ctx = RunContext::new();
        let result = self.resolve(target, &mut ctx);
        let error_text = result.as_ref().err().map(ResolveError::report);
        let summary = ctx.tracker.summary(target, error_text, started.elapsed());
        self.sink.emit(&Event::RunSummary(summary.clone()));
        RunReport {
            target: StateName::from(target),
            error: result.err(),
            summary,
        }
    }

    /// Bring `target` and its dependency closure to readiness.
    pub fn resolve(&self, target: &str, ctx: &mut RunContext) -> Result<(), ResolveError> {
        if ctx.processed.contains(target) {
            debug!("state '{target}' already processed in this run");
            return Ok(());
        }
        if let Some(pos) = ctx.resolving.iter().position(|s| *s == target) {
            let mut path = ctx.resolving[pos..].to_vec();
            path.push(StateName::from(target));
            return Err(ResolveError::CycleDetected { path });
        }

        let decl = self.declaration(target)?;

        ctx.resolving.push(decl.name.clone());
        let result = self.process(decl, ctx);
        ctx.resolving.pop();
        result
    }

    /// Dependency-first execution order for `target`, without running anything.
    pub fn plan(&self, target: &str) -> Result<Vec<StateName>, ResolveError> {
        let mut order = Vec::new();
        let mut visiting = Vec::new();
        self.plan_into(target, &mut visiting, &mut order)?;
        Ok(order)
    }

    /// Run only the pre-check of `state`. `None` when it declares none.
    pub fn check(&self, state: &str) -> Result<Option<ProbeResult>, ResolveError> {
        let decl = self.declaration(state)?;
        Ok(decl
            .pre_check()
            .map(|probe| self.pre_check(&decl.name, &probe)))
    }

    fn declaration(&self, name: &str) -> Result<&'a StateDeclaration, ResolveError> {
        let decl = self
            .config
            .get(name)
            .ok_or_else(|| ResolveError::UnknownState(StateName::from(name)))?;
        decl.validate()
            .map_err(|e| ResolveError::invalid(&decl.name, e))?;
        Ok(decl)
    }

    fn plan_into(
        &self,
        target: &str,
        visiting: &mut Vec<StateName>,
        order: &mut Vec<StateName>,
    ) -> Result<(), ResolveError> {
        if order.iter().any(|s| *s == target) {
            return Ok(());
        }
        if let Some(pos) = visiting.iter().position(|s| *s == target) {
            let mut path = visiting[pos..].to_vec();
            path.push(StateName::from(target));
            return Err(ResolveError::CycleDetected { path });
        }
        let decl = self.declaration(target)?;
        visiting.push(decl.name.clone());
        for dep in &decl.needs {
            self.plan_into(dep, visiting, order)?;
        }
        visiting.pop();
        order.push(decl.name.clone());
        Ok(())
    }

    fn process(&self, decl: &StateDeclaration, ctx: &mut RunContext) -> Result<(), ResolveError> {
        let name = &decl.name;
        info!("processing state '{name}'");
        ctx.tracker.begin_state(name, &decl.needs);
        self.sink.emit(&Event::StateStarted {
            state: name.clone(),
            needs: decl.needs.clone(),
        });

        for dep in &decl.needs {
            if let Err(source) = self.resolve(dep, ctx) {
                let err = ResolveError::DependencyFailed {
                    state: name.clone(),
                    dependency: dep.clone(),
                    source: Box::new(source),
                };
                return Err(self.fail(name, ctx, err));
            }
        }

        if let Some(probe) = decl.pre_check() {
            let result = self.pre_check(name, &probe);
            if result.ready {
                info!("state '{name}' already ready, skipping actions");
                self.complete(name, ctx, true);
                return Ok(());
            }
            if decl.actions.is_empty() && decl.wait_probe().is_none() {
                let err = ResolveError::InvalidStateConfig {
                    state: name.clone(),
                    reason: format!(
                        "not ready ({}) and declares no actions or wait probe",
                        result.detail
                    ),
                };
                return Err(self.fail(name, ctx, err));
            }
        }

        self.run_actions(decl, ctx)?;

        if let Some(probe) = decl.wait_probe() {
            self.wait(decl, &probe, ctx)?;
        }

        self.complete(name, ctx, false);
        Ok(())
    }

    fn pre_check(&self, name: &StateName, probe: &ProbeTarget) -> ProbeResult {
        self.sink.emit(&Event::CheckPerformed {
            state: name.clone(),
            phase: CheckPhase::PreCheck,
            kind: probe.kind().to_owned(),
            detail: probe.detail().to_owned(),
        });
        let result = self.prober.check_now(probe);
        debug!("pre-check for '{name}': ready={} ({})", result.ready, result.detail);
        self.sink.emit(&Event::CheckResult {
            state: name.clone(),
            phase: CheckPhase::PreCheck,
            ready: result.ready,
            detail: result.detail.clone(),
        });
        result
    }

    fn run_actions(&self, decl: &StateDeclaration, ctx: &mut RunContext) -> Result<(), ResolveError> {
        if decl.actions.is_empty() {
            return Ok(());
        }
        let name = &decl.name;
        self.sink.emit(&Event::ActionsStarted {
            state: name.clone(),
            count: decl.actions.len(),
        });

        for (i, action) in decl.actions.iter().enumerate() {
            let index = i + 1;
            ctx.tracker.begin_action(name, index, action);
            self.sink.emit(&Event::ActionStarted {
                state: name.clone(),
                index,
                kind: action.kind,
                command: action.command.clone(),
                description: action.description.clone(),
            });

            let outcome = self.executor.run(action, name);
            let error = outcome.failure.as_ref().map(ToString::to_string);
            ctx.tracker
                .finish_action(name, index, outcome.duration, error.clone());
            self.sink.emit(&Event::ActionCompleted {
                state: name.clone(),
                index,
                success: outcome.success(),
                duration_secs: outcome.duration.as_secs_f64(),
                error,
            });

            if let Some(failure) = outcome.failure {
                if !outcome.output.trim().is_empty() {
                    debug!("output of failed action {index} in '{name}':\n{}", outcome.output);
                }
                let err = ResolveError::ActionFailed {
                    state: name.clone(),
                    index,
                    label: action.label().to_owned(),
                    failure,
                };
                return Err(self.fail(name, ctx, err));
            }
        }
        Ok(())
    }

    fn wait(
        &self,
        decl: &StateDeclaration,
        probe: &ProbeTarget,
        ctx: &mut RunContext,
    ) -> Result<(), ResolveError> {
        let name = &decl.name;
        let policy = decl.poll_policy();
        self.sink.emit(&Event::CheckPerformed {
            state: name.clone(),
            phase: CheckPhase::Wait,
            kind: probe.kind().to_owned(),
            detail: probe.detail().to_owned(),
        });

        let outcome = self.prober.wait_until_ready(probe, &policy, |attempt| {
            self.sink.emit(&Event::PollAttempt {
                state: name.clone(),
                attempt: attempt.attempt,
                ready: attempt.ready,
                streak: attempt.streak,
                detail: attempt.detail.clone(),
            });
        });

        self.sink.emit(&Event::CheckResult {
            state: name.clone(),
            phase: CheckPhase::Wait,
            ready: outcome.ready(),
            detail: outcome.last_detail.clone(),
        });

        let err = match outcome.failure {
            None => return Ok(()),
            Some(PollFailure::Timeout {
                attempts,
                elapsed_secs,
            }) => ResolveError::ReadinessTimeout {
                state: name.clone(),
                probe: probe.to_string(),
                attempts,
                elapsed_secs,
            },
            Some(PollFailure::RetriesExhausted { attempts }) => {
                ResolveError::ReadinessRetriesExhausted {
                    state: name.clone(),
                    probe: probe.to_string(),
                    attempts,
                }
            }
        };
        Err(self.fail(name, ctx, err))
    }

    fn complete(&self, name: &StateName, ctx: &mut RunContext, already_ready: bool) {
        ctx.tracker.complete_state(name, already_ready);
        ctx.processed.insert(name.clone());
        let duration_secs = ctx
            .tracker
            .get(name)
            .and_then(|s| s.duration_secs)
            .unwrap_or_default();
        self.sink.emit(&Event::StateCompleted {
            state: name.clone(),
            success: true,
            already_ready,
            duration_secs,
            error: None,
        });
    }

    fn fail(&self, name: &StateName, ctx: &mut RunContext, err: ResolveError) -> ResolveError {
        let message = err.to_string();
        ctx.tracker.fail_state(name, &message);
        let duration_secs = ctx
            .tracker
            .get(name)
            .and_then(|s| s.duration_secs)
            .unwrap_or_default();
        self.sink.emit(&Event::StateCompleted {
            state: name.clone(),
            success: false,
            already_ready: false,
            duration_secs,
            error: Some(message),
        });
        err
    }
}
