//! Dependency-aware plugin execution.
//!
//! The plugin list is filtered for the app's platform, stably sorted by
//! resolved order and validated up front: duplicate names, dependencies on
//! unregistered plugins and dependency cycles are fatal startup errors.
//!
//! Execution then follows these rules:
//!
//! - Parallel plugins whose dependencies are met start right away and run in
//!   the background. Their failures are collected, not raised.
//! - Sequential plugins run one at a time in list order, each only once its
//!   own dependencies have completed. Before each one starts, finished
//!   background plugins are collected; if any of them failed, no further
//!   plugin starts and the first collected error is returned once the
//!   background work has settled.
//! - A plugin with unmet dependencies is deferred. When a named plugin
//!   completes, deferred plugins waiting on it are re-checked and released in
//!   list order, running alongside the plugin that released them.
//! - Every setup runs inside the app's context, and provided values are
//!   injected as soon as the setup returns.

use std::collections::{HashMap, HashSet};

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, warn};

use crate::app::App;
use crate::error::{AppError, InitError, Result};
use crate::plugin::{sort_plugins, Plugin};

type PluginRun = BoxFuture<'static, (usize, Result<()>)>;

/// Run `plugins` against `app`.
pub async fn apply_plugins(app: &App, plugins: Vec<Plugin>) -> Result<()> {
    let mut plugins: Vec<Plugin> = plugins.into_iter().filter(|p| p.applies_to(app)).collect();
    sort_plugins(&mut plugins);
    validate(&plugins)?;

    for plugin in &plugins {
        for (name, callback) in &plugin.hooks {
            app.hooks().hook_boxed(name, callback.clone());
        }
    }

    debug!(app_id = %app.id(), count = plugins.len(), "applying plugins");
    Runner::new(app, plugins).run().await
}

/// Check names, dependencies and cycles without running anything.
pub fn validate(plugins: &[Plugin]) -> std::result::Result<(), InitError> {
    let mut by_name: HashMap<&str, usize> = HashMap::new();
    for (idx, plugin) in plugins.iter().enumerate() {
        if let Some(name) = plugin.name() {
            if by_name.insert(name, idx).is_some() {
                return Err(InitError::DuplicateName {
                    name: name.to_string(),
                });
            }
        }
    }

    let mut edges: Vec<Vec<usize>> = Vec::with_capacity(plugins.len());
    for plugin in plugins {
        let mut deps = Vec::new();
        for dependency in plugin.dependencies() {
            match by_name.get(dependency.as_str()) {
                Some(idx) => deps.push(*idx),
                None => {
                    return Err(InitError::UnknownDependency {
                        plugin: plugin.label().to_string(),
                        dependency: dependency.clone(),
                    })
                }
            }
        }
        edges.push(deps);
    }

    let mut marks = vec![Mark::Unvisited; plugins.len()];
    let mut path = Vec::new();
    for idx in 0..plugins.len() {
        if let Some(cycle) = find_cycle(idx, &edges, &mut marks, &mut path) {
            return Err(InitError::Cycle {
                plugins: cycle
                    .into_iter()
                    .map(|i| plugins[i].label().to_string())
                    .collect(),
            });
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

fn find_cycle(
    idx: usize,
    edges: &[Vec<usize>],
    marks: &mut [Mark],
    path: &mut Vec<usize>,
) -> Option<Vec<usize>> {
    match marks[idx] {
        Mark::Done => return None,
        Mark::InProgress => {
            let start = path.iter().position(|i| *i == idx).unwrap_or(0);
            let mut cycle = path[start..].to_vec();
            cycle.push(idx);
            return Some(cycle);
        }
        Mark::Unvisited => {}
    }
    marks[idx] = Mark::InProgress;
    path.push(idx);
    for dep in &edges[idx] {
        if let Some(cycle) = find_cycle(*dep, edges, marks, path) {
            return Some(cycle);
        }
    }
    path.pop();
    marks[idx] = Mark::Done;
    None
}

struct Runner<'a> {
    app: &'a App,
    plugins: Vec<Plugin>,
    resolved: HashSet<String>,
    deferred: Vec<(usize, HashSet<String>)>,
    background: FuturesUnordered<PluginRun>,
    errors: Vec<AppError>,
    halted: bool,
}

impl<'a> Runner<'a> {
    fn new(app: &'a App, plugins: Vec<Plugin>) -> Self {
        Self {
            app,
            plugins,
            resolved: HashSet::new(),
            deferred: Vec::new(),
            background: FuturesUnordered::new(),
            errors: Vec::new(),
            halted: false,
        }
    }

    async fn run(mut self) -> Result<()> {
        for idx in 0..self.plugins.len() {
            if self.plugins[idx].is_parallel() {
                self.schedule(idx);
            }
        }

        for idx in 0..self.plugins.len() {
            if self.plugins[idx].is_parallel() {
                continue;
            }
            self.collect_finished();
            if !self.errors.is_empty() {
                self.halted = true;
                break;
            }
            let unmet = self.unmet(idx);
            if unmet.is_empty() {
                self.run_sequential(idx).await?;
            } else {
                self.deferred.push((idx, unmet));
            }
        }

        self.finish().await
    }

    /// Start a parallel plugin in the background or defer it.
    fn schedule(&mut self, idx: usize) {
        let unmet = self.unmet(idx);
        if unmet.is_empty() {
            let run = self.start(idx);
            self.background.push(run);
        } else {
            self.deferred.push((idx, unmet));
        }
    }

    fn unmet(&self, idx: usize) -> HashSet<String> {
        self.plugins[idx]
            .dependencies()
            .iter()
            .filter(|dep| !self.resolved.contains(*dep))
            .cloned()
            .collect()
    }

    fn start(&self, idx: usize) -> PluginRun {
        let plugin = &self.plugins[idx];
        let app = self.app.clone();
        let setup = plugin.setup.clone();
        let label = plugin.label().to_string();
        async move {
            debug!(app_id = %app.id(), plugin = %label, "plugin setup");
            let result = match app.run_with_context(setup(app.clone())).await {
                Ok(provides) => {
                    for (name, value) in provides.into_values() {
                        app.provide_arc(name, value);
                    }
                    Ok(())
                }
                Err(error) => Err(AppError::Plugin {
                    plugin: label,
                    source: Box::new(error),
                }),
            };
            (idx, result)
        }
        .boxed()
    }

    /// Mark `idx` complete and return the deferred plugins it released, in
    /// list order.
    fn complete(&mut self, idx: usize) -> Vec<usize> {
        let Some(name) = self.plugins[idx].name().map(str::to_string) else {
            return Vec::new();
        };
        self.resolved.insert(name.clone());

        let mut released = Vec::new();
        self.deferred.retain_mut(|(waiting, unmet)| {
            unmet.remove(&name);
            if unmet.is_empty() {
                released.push(*waiting);
                false
            } else {
                true
            }
        });
        released.sort_unstable();
        released
    }

    fn background_done(&mut self, idx: usize, result: Result<()>) {
        match result {
            Ok(()) => {
                for next in self.complete(idx) {
                    if self.halted {
                        break;
                    }
                    let run = self.start(next);
                    self.background.push(run);
                }
            }
            Err(error) => {
                warn!(app_id = %self.app.id(), %error, "parallel plugin failed");
                self.errors.push(error);
            }
        }
    }

    /// Collect background plugins that already finished, without waiting.
    fn collect_finished(&mut self) {
        loop {
            let next = self.background.next().now_or_never();
            match next {
                Some(Some((idx, result))) => self.background_done(idx, result),
                _ => break,
            }
        }
    }

    /// Run one sequential plugin, plus the sequential plugins its completion
    /// releases, while background plugins keep making progress.
    async fn run_sequential(&mut self, idx: usize) -> Result<()> {
        let mut barrier: FuturesUnordered<PluginRun> = FuturesUnordered::new();
        barrier.push(self.start(idx));

        while !barrier.is_empty() {
            let has_background = !self.background.is_empty();
            tokio::select! {
                Some((done, result)) = barrier.next() => {
                    result?;
                    for next in self.complete(done) {
                        let run = self.start(next);
                        if self.plugins[next].is_parallel() {
                            self.background.push(run);
                        } else {
                            barrier.push(run);
                        }
                    }
                }
                Some((done, result)) = self.background.next(), if has_background => {
                    self.background_done(done, result);
                }
                else => break,
            }
        }
        Ok(())
    }

    async fn finish(mut self) -> Result<()> {
        while let Some((idx, result)) = self.background.next().await {
            self.background_done(idx, result);
        }

        if !self.errors.is_empty() {
            return Err(self.errors.remove(0));
        }
        if !self.deferred.is_empty() {
            let plugins = self
                .deferred
                .iter()
                .map(|(idx, _)| self.plugins[*idx].label().to_string())
                .collect();
            return Err(InitError::Unresolved { plugins }.into());
        }
        Ok(())
    }
}
