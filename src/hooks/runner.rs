//! Hook task runner
//!
//! Runs registered hooks at the two extension points of a run. Each hook
//! spawns one task per resource it applies to; all tasks of a phase run
//! concurrently and each carries a child of the runner's root cancellation
//! token.

use dashmap::DashMap;
use futures::FutureExt;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::{HookContext, HookPhase, HookTaskReport, HookTaskState, LifecycleHook};
use crate::config::OrchestratorConfig;
use crate::error::{panic_message, OrchestraError};
use crate::graph::ResourceGraph;
use crate::notification::{LifecycleState, ResourceNotificationService, StateStyle};

/// State text of a resource whose `before_start` task was cancelled.
pub const CANCELLED_BEFORE_START: &str = "before-start hook cancelled";

#[derive(Debug, Clone, PartialEq, Eq)]
enum TaskOutcome {
    Succeeded,
    Failed(String),
    Cancelled,
}

/// Owns every hook task of one orchestration run
pub struct LifecycleHookRunner {
    hooks: Vec<Arc<dyn LifecycleHook>>,
    notifications: ResourceNotificationService,
    config: OrchestratorConfig,
    root: CancellationToken,
    tokens: Arc<DashMap<Uuid, CancellationToken>>,
    reports: Arc<Mutex<Vec<HookTaskReport>>>,
    background: tokio::sync::Mutex<JoinSet<()>>,
}

impl LifecycleHookRunner {
    pub fn new(notifications: ResourceNotificationService, config: OrchestratorConfig) -> Self {
        Self {
            hooks: Vec::new(),
            notifications,
            config,
            root: CancellationToken::new(),
            tokens: Arc::new(DashMap::new()),
            reports: Arc::new(Mutex::new(Vec::new())),
            background: tokio::sync::Mutex::new(JoinSet::new()),
        }
    }

    /// Register a hook. Hooks run in no particular order relative to each other.
    pub fn register<H: LifecycleHook>(&mut self, hook: H) {
        self.register_arc(Arc::new(hook));
    }

    pub fn register_arc(&mut self, hook: Arc<dyn LifecycleHook>) {
        tracing::debug!(hook = %hook.name(), "Registered lifecycle hook");
        self.hooks.push(hook);
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// Root token; every hook task observes a child of it.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.root
    }

    /// Run every `before_start` task and wait for all of them.
    ///
    /// Returns the resources that must not start: those with a failed or
    /// cancelled task. Both end up `FailedToStart`, except when the whole run
    /// was cancelled.
    pub async fn run_before_start(&self, graph: &ResourceGraph) -> BTreeSet<String> {
        let mut excluded = BTreeSet::new();
        if self.config.is_publish_mode() {
            tracing::debug!("Publish mode, skipping before-start hooks");
            return excluded;
        }

        let mut tasks = JoinSet::new();
        let spawned = self.spawn_phase(graph, HookPhase::BeforeStart, &mut tasks);
        tracing::info!(tasks = spawned, "Running before-start hooks");

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((resource, TaskOutcome::Succeeded)) => {
                    tracing::trace!(resource = %resource, "Before-start task finished");
                }
                Ok((resource, TaskOutcome::Cancelled)) => {
                    if !self.root.is_cancelled() {
                        self.fail_cancelled(&resource);
                    }
                    excluded.insert(resource);
                }
                Ok((resource, TaskOutcome::Failed(_))) => {
                    excluded.insert(resource);
                }
                Err(e) => tracing::error!(error = %e, "Before-start task aborted"),
            }
        }

        tracing::info!(excluded = excluded.len(), "Before-start hooks complete");
        excluded
    }

    /// Setup was cut short, so the resource can never start.
    fn fail_cancelled(&self, resource: &str) {
        if let Err(e) = self.notifications.update_state_with_text(
            resource,
            LifecycleState::FailedToStart,
            CANCELLED_BEFORE_START,
            StateStyle::Error,
        ) {
            // Another hook already failed it.
            tracing::debug!(resource = %resource, error = %e, "Resource already settled");
        }
    }

    /// Start every `after_resources_created` task in the background.
    ///
    /// Returns the number of tasks started.
    pub async fn start_after_resources_created(&self, graph: &ResourceGraph) -> usize {
        if self.config.is_publish_mode() {
            tracing::debug!("Publish mode, skipping after-resources-created hooks");
            return 0;
        }

        let mut phase_tasks = JoinSet::new();
        let spawned = self.spawn_phase(graph, HookPhase::AfterResourcesCreated, &mut phase_tasks);

        let mut background = self.background.lock().await;
        background.spawn(async move {
            while let Some(joined) = phase_tasks.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "After-resources-created task aborted");
                }
            }
        });
        tracing::info!(tasks = spawned, "Started after-resources-created hooks");
        spawned
    }

    /// Wait until every background task has finished on its own.
    pub async fn wait_background(&self) {
        let mut background = self.background.lock().await;
        while background.join_next().await.is_some() {}
    }

    fn spawn_phase(
        &self,
        graph: &ResourceGraph,
        phase: HookPhase,
        tasks: &mut JoinSet<(String, TaskOutcome)>,
    ) -> usize {
        let mut spawned = 0;
        for resource in graph.resources() {
            for hook in self.hooks.iter().filter(|h| h.applies_to(resource)) {
                let report = HookTaskReport::pending(hook.name(), resource.name(), phase);
                let id = report.id;
                self.with_reports(|reports| reports.push(report));

                let token = self.root.child_token();
                self.tokens.insert(id, token.clone());
                let ctx = HookContext::new(
                    hook.name(),
                    Arc::clone(resource),
                    token,
                    self.notifications.clone(),
                );

                let span = tracing::info_span!(
                    "hook_task",
                    hook = %hook.name(),
                    resource = %resource.name(),
                    %phase,
                );
                let task = HookTask {
                    id,
                    hook: Arc::clone(hook),
                    phase,
                    notifications: self.notifications.clone(),
                    tokens: Arc::clone(&self.tokens),
                    reports: Arc::clone(&self.reports),
                };
                tasks.spawn(task.run(ctx).instrument(span));
                spawned += 1;
            }
        }
        spawned
    }

    /// Cancel one task. Returns `false` if it is unknown or already finished.
    pub fn cancel_task(&self, id: Uuid) -> bool {
        match self.tokens.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every running task of `resource`. Returns how many were cancelled.
    pub fn cancel_resource(&self, resource: &str) -> usize {
        let ids: Vec<Uuid> = self.with_reports(|reports| {
            reports
                .iter()
                .filter(|r| r.resource == resource && !r.state.is_finished())
                .map(|r| r.id)
                .collect()
        });
        ids.into_iter().filter(|id| self.cancel_task(*id)).count()
    }

    /// Every task report in spawn order.
    pub fn reports(&self) -> Vec<HookTaskReport> {
        self.with_reports(|reports| reports.clone())
    }

    pub fn reports_for(&self, resource: &str) -> Vec<HookTaskReport> {
        self.with_reports(|reports| {
            reports
                .iter()
                .filter(|r| r.resource == resource)
                .cloned()
                .collect()
        })
    }

    pub fn report(&self, id: Uuid) -> Option<HookTaskReport> {
        self.with_reports(|reports| reports.iter().find(|r| r.id == id).cloned())
    }

    /// Cancel every task and wait for them, bounded by the shutdown timeout.
    ///
    /// Tasks still running when the timeout expires are aborted and reported
    /// as cancelled.
    pub async fn shutdown(&self) {
        tracing::info!("Cancelling hook tasks");
        self.root.cancel();

        let mut background = self.background.lock().await;
        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            while background.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                timeout = ?self.config.shutdown_timeout,
                "Hook tasks did not stop in time, aborting"
            );
            background.abort_all();
            while background.join_next().await.is_some() {}
            self.with_reports(|reports| {
                for report in reports.iter_mut().filter(|r| !r.state.is_finished()) {
                    report.finish(HookTaskState::Cancelled, Some("aborted at shutdown".into()));
                }
            });
        }
        self.tokens.clear();
        tracing::info!("Hook tasks stopped");
    }

    fn with_reports<R>(&self, f: impl FnOnce(&mut Vec<HookTaskReport>) -> R) -> R {
        f(&mut self.reports.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// One hook running for one resource
struct HookTask {
    id: Uuid,
    hook: Arc<dyn LifecycleHook>,
    phase: HookPhase,
    notifications: ResourceNotificationService,
    tokens: Arc<DashMap<Uuid, CancellationToken>>,
    reports: Arc<Mutex<Vec<HookTaskReport>>>,
}

impl HookTask {
    async fn run(self, ctx: HookContext) -> (String, TaskOutcome) {
        let resource = ctx.resource().name().to_string();
        let cancel = ctx.cancellation().clone();
        self.update_report(|r| r.start());
        tracing::debug!("Hook task started");

        let work = match self.phase {
            HookPhase::BeforeStart => self.hook.before_start(ctx),
            HookPhase::AfterResourcesCreated => self.hook.after_resources_created(ctx),
        };
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => TaskOutcome::Cancelled,
            result = AssertUnwindSafe(work).catch_unwind() => match result {
                Ok(Ok(())) => TaskOutcome::Succeeded,
                Ok(Err(e)) => TaskOutcome::Failed(format!("{e:#}")),
                Err(panic) => TaskOutcome::Failed(format!("hook panicked: {}", panic_message(panic.as_ref()))),
            },
        };
        self.tokens.remove(&self.id);

        match &outcome {
            TaskOutcome::Succeeded => {
                tracing::debug!("Hook task succeeded");
                self.update_report(|r| r.finish(HookTaskState::Succeeded, None));
            }
            TaskOutcome::Cancelled => {
                tracing::info!("Hook task cancelled");
                self.update_report(|r| r.finish(HookTaskState::Cancelled, Some("cancelled".into())));
            }
            TaskOutcome::Failed(message) => {
                tracing::error!(error = %message, "Hook task failed");
                self.update_report(|r| r.finish(HookTaskState::Failed, Some(message.clone())));
                self.record_failure(&resource, message);
            }
        }
        (resource, outcome)
    }

    fn record_failure(&self, resource: &str, message: &str) {
        let text = OrchestraError::hook_failed(self.hook.name(), resource, message).to_string();
        let recorded = match self.phase {
            HookPhase::BeforeStart => self.notifications.update_state_with_text(
                resource,
                LifecycleState::FailedToStart,
                text,
                StateStyle::Error,
            ),
            // Leave the state alone; the resource may already be running.
            HookPhase::AfterResourcesCreated => self.notifications.publish_update(resource, |s| {
                s.state_text = Some(text);
                s.style = StateStyle::Error;
            }),
        };
        if let Err(e) = recorded {
            tracing::warn!(error = %e, "Could not record hook failure on resource");
        }
    }

    fn update_report(&self, f: impl FnOnce(&mut HookTaskReport)) {
        let mut reports = self.reports.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(report) = reports.iter_mut().find(|r| r.id == self.id) {
            f(report);
        }
    }
}
