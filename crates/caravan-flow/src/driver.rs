//! The workflow driver: lint, connect, and the three drive modes
//!
//! Each stage runs as its own worker. Ownership makes the coordination
//! simple: stages move into their workers, while the values map, the
//! renderer and the dependency graph are shared behind `Arc`. A drop
//! guard signals every completion a worker owes, on success, skip,
//! error and panic alike.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tokio::task::JoinSet;

use caravan_core::Values;

use crate::error::{FlowError, Result};
use crate::graph::Depends;
use crate::hooks;
use crate::render::Renderer;
use crate::schema::{Backends, Stage, Stages};

/// Lint every stage in document order.
///
/// Validates the dependency keys, lets each resource cascade-fill its
/// required fields, and thereby writes all resolved `key.field` entries
/// into the shared values before any worker starts. The first error
/// aborts.
pub fn lint(stages: &mut Stages, values: &mut Values) -> Result<()> {
    let keys: HashSet<String> = stages.keys().cloned().collect();

    for (key, stage) in stages.iter_mut() {
        for dep in &stage.depends {
            if !keys.contains(dep) {
                return Err(FlowError::UnknownDependency {
                    key: key.clone(),
                    depends: dep.clone(),
                });
            }
        }
        stage.resource.lint(key, values)?;
    }

    Ok(())
}

/// Attach backend clients and pre-render every stage's input against
/// the global values. Workers render again with their own overlay at
/// act time; that render wins.
pub fn connect(
    stages: &mut Stages,
    backends: &Backends,
    renderer: &Renderer,
    values: &Values,
) -> Result<()> {
    for (_, stage) in stages.iter_mut() {
        stage.resource.connect(backends)?;
        let input = render_input(stage, renderer, values)?;
        stage.resource.set_input(input);
    }
    Ok(())
}

/// Drive every stage forward, honoring dependencies.
///
/// Refuses to run a cyclic graph before any resource is touched.
pub async fn forward(
    stages: Stages,
    values: Arc<Values>,
    renderer: Arc<Renderer>,
    force: bool,
) -> Result<()> {
    let graph = Arc::new(Depends::forward(&stages));
    if graph.is_cyclic() {
        return Err(FlowError::Cycle);
    }

    tracing::info!("starting workflow");
    let mut workers = JoinSet::new();

    for (key, stage) in stages {
        let graph = graph.clone();
        let values = values.clone();
        let renderer = renderer.clone();

        workers.spawn(async move {
            let _done = CompleteGuard::new(graph.clone(), vec![key.clone()]);
            let result = run_forward(stage, &key, &values, &renderer, &graph, force).await;
            (key, result)
        });
    }

    join(workers).await
}

/// Drive every stage in reverse: a stage is deleted only after every
/// stage that depends on it has finished deleting.
pub async fn reverse(
    stages: Stages,
    values: Arc<Values>,
    renderer: Arc<Renderer>,
    force: bool,
) -> Result<()> {
    let graph = Arc::new(Depends::reverse(&stages));

    tracing::info!("reversing workflow");
    let mut workers = JoinSet::new();

    for (key, stage) in stages {
        let graph = graph.clone();
        let values = values.clone();
        let renderer = renderer.clone();

        workers.spawn(async move {
            // signal each predecessor whatever happens to this stage
            let _done = CompleteGuard::new(graph.clone(), stage.depends.clone());
            let result = run_reverse(stage, &key, &values, &renderer, &graph, force).await;
            (key, result)
        });
    }

    join(workers).await
}

/// Drive only the target stage and its transitive dependencies
pub async fn until(
    stages: Stages,
    values: Arc<Values>,
    renderer: Arc<Renderer>,
    force: bool,
    target: &str,
) -> Result<()> {
    if !stages.contains_key(target) {
        return Err(FlowError::UnknownStage {
            key: target.to_string(),
        });
    }

    let mut wanted: HashSet<String> = HashSet::new();
    let mut pending = vec![target.to_string()];
    while let Some(key) = pending.pop() {
        let stage = stages.get(&key).ok_or_else(|| FlowError::UnknownStage {
            key: key.clone(),
        })?;
        if wanted.insert(key) {
            pending.extend(stage.depends.iter().cloned());
        }
    }

    let subset: Stages = stages
        .into_iter()
        .filter(|(key, _)| wanted.contains(key))
        .collect();

    forward(subset, values, renderer, force).await
}

/// One forward worker
async fn run_forward(
    mut stage: Stage,
    key: &str,
    global: &Values,
    renderer: &Renderer,
    graph: &Depends,
    force: bool,
) -> Result<()> {
    if stage.forget && !force && stage.resource.status().await? {
        tracing::info!(stage = %key, kind = %stage.kind, "already installed, skipping");
        return Ok(());
    }

    // the overlay is local to this stage; the shared map stays untouched
    let mut local = global.clone();
    local.append(&stage.values);

    if let Some(requirement) = unmet_requirement(&local, &stage.requires) {
        tracing::info!(stage = %key, requirement = %requirement, "requirement not met, skipping");
        return Ok(());
    }

    graph.wait(stage.depends.iter().map(String::as_str)).await;

    let env = local.to_slice();
    hooks::run(&env, &stage.jobs.before).await?;

    let acted = act_forward(&mut stage, &local, renderer).await;
    // post hooks run once the pre-hook phase is passed, even after an
    // action error
    let post = hooks::run(&env, &stage.jobs.after).await;

    acted.and(post)
}

async fn act_forward(stage: &mut Stage, local: &Values, renderer: &Renderer) -> Result<()> {
    let input = render_input(stage, renderer, local)?;
    stage.resource.set_input(input);
    stage.resource.install_or_upgrade().await
}

/// One reverse worker
async fn run_reverse(
    mut stage: Stage,
    key: &str,
    global: &Values,
    renderer: &Renderer,
    graph: &Depends,
    force: bool,
) -> Result<()> {
    let mut local = global.clone();
    local.append(&stage.values);

    if let Some(requirement) = unmet_requirement(&local, &stage.requires) {
        tracing::info!(stage = %key, requirement = %requirement, "requirement not met, skipping");
        return Ok(());
    }

    if stage.forget && !force {
        tracing::info!(stage = %key, "install only, refusing to delete");
        return Ok(());
    }

    // wait for everything that depends on this stage to delete first
    graph.wait([key]).await;

    if !stage.template.is_empty() {
        let input = render_input(&stage, renderer, &local)?;
        stage.resource.set_input(input);
    }

    tracing::info!(stage = %key, kind = %stage.kind, "deleting");
    stage.resource.delete().await
}

/// Render a stage's template and append its own values block
fn render_input(stage: &Stage, renderer: &Renderer, values: &Values) -> Result<Vec<u8>> {
    let mut input = renderer.render_file(Path::new(&stage.template), values)?;
    if !stage.values.is_empty() {
        input.extend_from_slice(serde_yaml::to_string(&stage.values.0)?.as_bytes());
    }
    Ok(input)
}

/// The first unmet precondition, if any.
///
/// A key must be present; a non-empty expectation must also match.
fn unmet_requirement(values: &Values, requires: &IndexMap<String, String>) -> Option<String> {
    for (key, expected) in requires {
        let Some(found) = values.get(key) else {
            return Some(key.clone());
        };
        if expected.is_empty() {
            continue;
        }

        let found = match found {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        };
        if &found != expected {
            return Some(format!("{}={}", key, expected));
        }
    }
    None
}

/// Join all workers, recording failed stages without stopping the rest
async fn join(mut workers: JoinSet<(String, Result<()>)>) -> Result<()> {
    let mut failed = Vec::new();

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((key, Err(err))) => {
                tracing::error!(stage = %key, error = %err, "stage failed");
                failed.push(key);
            }
            Err(err) => {
                tracing::error!(error = %err, "worker panicked");
                failed.push("<panicked>".to_string());
            }
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        failed.sort();
        Err(FlowError::StagesFailed { stages: failed })
    }
}

/// Signals a worker's owed completions exactly once, on every exit path
struct CompleteGuard {
    graph: Arc<Depends>,
    keys: Vec<String>,
}

impl CompleteGuard {
    fn new(graph: Arc<Depends>, keys: Vec<String>) -> Self {
        Self { graph, keys }
    }
}

impl Drop for CompleteGuard {
    fn drop(&mut self) {
        self.graph.complete(self.keys.iter().map(String::as_str));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Resource;
    use caravan_release::{Chart, FakeReleaseClient, ReleaseStatus};

    struct Fixture {
        client: Arc<FakeReleaseClient>,
        chart_dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                client: Arc::new(FakeReleaseClient::new()),
                chart_dir: tempfile::tempdir().unwrap(),
            }
        }

        /// A connected helm stage whose release name is its key
        fn stage(&self, key: &str, depends: &[&str]) -> Stage {
            let mut chart = Chart::default();
            chart.name = self.chart_dir.path().display().to_string();
            chart.release = key.to_string();
            chart.namespace = "test".to_string();
            chart.timeout = 300;
            chart.connect(self.client.clone());

            let mut stage = Stage::for_tests();
            stage.depends = depends.iter().map(|d| d.to_string()).collect();
            stage.resource = Resource::Chart(chart);
            stage
        }

        fn installs(&self) -> Vec<String> {
            self.client
                .operations()
                .into_iter()
                .filter(|(op, _)| op == "install")
                .map(|(_, release)| release)
                .collect()
        }

        fn deletes(&self) -> Vec<String> {
            self.client
                .operations()
                .into_iter()
                .filter(|(op, _)| op == "delete")
                .map(|(_, release)| release)
                .collect()
        }
    }

    fn run_args() -> (Arc<Values>, Arc<Renderer>) {
        (Arc::new(Values::new()), Arc::new(Renderer::new(None)))
    }

    #[tokio::test]
    async fn test_linear_chain_orders_installs_and_deletes() {
        let fixture = Fixture::new();
        let mut stages = Stages::new();
        stages.insert("a".to_string(), fixture.stage("a", &[]));
        stages.insert("b".to_string(), fixture.stage("b", &["a"]));
        stages.insert("c".to_string(), fixture.stage("c", &["b"]));

        let (values, renderer) = run_args();
        forward(stages.clone(), values.clone(), renderer.clone(), false)
            .await
            .unwrap();
        assert_eq!(fixture.installs(), vec!["a", "b", "c"]);

        reverse(stages, values, renderer, false).await.unwrap();
        assert_eq!(fixture.deletes(), vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_diamond_ordering() {
        let fixture = Fixture::new();
        let mut stages = Stages::new();
        stages.insert("root".to_string(), fixture.stage("root", &[]));
        stages.insert("a".to_string(), fixture.stage("a", &["root"]));
        stages.insert("b".to_string(), fixture.stage("b", &["root"]));
        stages.insert("tail".to_string(), fixture.stage("tail", &["a", "b"]));

        let (values, renderer) = run_args();
        forward(stages, values, renderer, false).await.unwrap();

        let installs = fixture.installs();
        assert_eq!(installs.len(), 4);
        assert_eq!(installs.first().unwrap(), "root");
        assert_eq!(installs.last().unwrap(), "tail");
    }

    #[tokio::test]
    async fn test_cycle_is_rejected_before_any_action() {
        let fixture = Fixture::new();
        let mut stages = Stages::new();
        stages.insert("t1".to_string(), fixture.stage("t1", &["t3"]));
        stages.insert("t2".to_string(), fixture.stage("t2", &["t1"]));
        stages.insert("t3".to_string(), fixture.stage("t3", &["t2"]));

        let (values, renderer) = run_args();
        let err = forward(stages, values, renderer, false).await.unwrap_err();

        assert!(err.to_string().contains("cycle"));
        assert!(fixture.client.operations().is_empty());
    }

    #[tokio::test]
    async fn test_unmet_requires_skips_but_unblocks_dependents() {
        let fixture = Fixture::new();
        let mut gated = fixture.stage("gated", &[]);
        gated
            .requires
            .insert("region".to_string(), "us-east".to_string());

        let mut stages = Stages::new();
        stages.insert("gated".to_string(), gated);
        stages.insert("after".to_string(), fixture.stage("after", &["gated"]));

        let (values, renderer) = run_args();
        forward(stages, values, renderer, false).await.unwrap();

        // the gated stage never acted, its dependent still ran
        assert_eq!(fixture.installs(), vec!["after"]);
    }

    #[tokio::test]
    async fn test_requires_value_mismatch_skips() {
        let fixture = Fixture::new();
        let mut gated = fixture.stage("gated", &[]);
        gated
            .requires
            .insert("region".to_string(), "us-east".to_string());

        let mut stages = Stages::new();
        stages.insert("gated".to_string(), gated);

        let values = Arc::new(Values::from_yaml("region: eu-west").unwrap());
        let renderer = Arc::new(Renderer::new(None));
        forward(stages, values, renderer, false).await.unwrap();

        assert!(fixture.installs().is_empty());
    }

    #[tokio::test]
    async fn test_requires_presence_only() {
        let fixture = Fixture::new();
        let mut gated = fixture.stage("gated", &[]);
        gated.requires.insert("region".to_string(), String::new());

        let mut stages = Stages::new();
        stages.insert("gated".to_string(), gated);

        let values = Arc::new(Values::from_yaml("region: anywhere").unwrap());
        let renderer = Arc::new(Renderer::new(None));
        forward(stages, values, renderer, false).await.unwrap();

        assert_eq!(fixture.installs(), vec!["gated"]);
    }

    #[tokio::test]
    async fn test_until_runs_only_transitive_dependencies() {
        let fixture = Fixture::new();
        let mut stages = Stages::new();
        stages.insert("a".to_string(), fixture.stage("a", &[]));
        stages.insert("b".to_string(), fixture.stage("b", &["a"]));
        stages.insert("c".to_string(), fixture.stage("c", &["b"]));
        stages.insert("d".to_string(), fixture.stage("d", &["c"]));

        let (values, renderer) = run_args();
        until(stages, values, renderer, false, "b").await.unwrap();

        assert_eq!(fixture.installs(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_until_unknown_target() {
        let fixture = Fixture::new();
        let mut stages = Stages::new();
        stages.insert("a".to_string(), fixture.stage("a", &[]));

        let (values, renderer) = run_args();
        let err = until(stages, values, renderer, false, "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::UnknownStage { .. }));
    }

    #[tokio::test]
    async fn test_forget_skips_installed_stage() {
        let fixture = Fixture::new();
        fixture.client.seed("kept", ReleaseStatus::Deployed, 2);

        let mut kept = fixture.stage("kept", &[]);
        kept.forget = true;

        let mut stages = Stages::new();
        stages.insert("kept".to_string(), kept.clone());

        let (values, renderer) = run_args();
        forward(stages, values.clone(), renderer.clone(), false)
            .await
            .unwrap();
        assert!(fixture.installs().is_empty());

        // forced runs act anyway
        let mut stages = Stages::new();
        stages.insert("kept".to_string(), kept);
        forward(stages, values, renderer, true).await.unwrap();
        assert_eq!(fixture.client.operations().len(), 1);
    }

    #[tokio::test]
    async fn test_forget_refuses_reverse_delete() {
        let fixture = Fixture::new();
        fixture.client.seed("kept", ReleaseStatus::Deployed, 1);

        let mut kept = fixture.stage("kept", &[]);
        kept.forget = true;

        let mut stages = Stages::new();
        stages.insert("kept".to_string(), kept);

        let (values, renderer) = run_args();
        reverse(stages, values, renderer, false).await.unwrap();
        assert!(fixture.deletes().is_empty());
    }

    #[tokio::test]
    async fn test_failed_stage_does_not_block_siblings() {
        let fixture = Fixture::new();
        let mut broken = fixture.stage("broken", &[]);
        // a chart that is neither a directory nor repo/app fails to act
        if let Resource::Chart(chart) = &mut broken.resource {
            chart.name = "not-a-chart".to_string();
        }

        let mut stages = Stages::new();
        stages.insert("broken".to_string(), broken);
        stages.insert("after".to_string(), fixture.stage("after", &["broken"]));

        let (values, renderer) = run_args();
        let err = forward(stages, values, renderer, false).await.unwrap_err();

        match err {
            FlowError::StagesFailed { stages } => assert_eq!(stages, vec!["broken"]),
            other => panic!("unexpected error: {}", other),
        }
        // the dependent still completed
        assert_eq!(fixture.installs(), vec!["after"]);
    }

    #[tokio::test]
    async fn test_lint_cascades_namespace_per_stage() {
        let fixture = Fixture::new();
        let mut stage1 = fixture.stage("stage1", &[]);
        if let Resource::Chart(chart) = &mut stage1.resource {
            chart.namespace = String::new();
        }
        let mut stage2 = fixture.stage("stage2", &[]);
        if let Resource::Chart(chart) = &mut stage2.resource {
            chart.namespace = String::new();
        }

        let mut stages = Stages::new();
        stages.insert("stage1".to_string(), stage1);
        stages.insert("stage2".to_string(), stage2);

        let mut values =
            Values::from_yaml("stage1:\n  namespace: ns1\nnamespace: default").unwrap();
        lint(&mut stages, &mut values).unwrap();

        match &stages["stage1"].resource {
            Resource::Chart(chart) => assert_eq!(chart.namespace, "ns1"),
            _ => unreachable!(),
        }
        match &stages["stage2"].resource {
            Resource::Chart(chart) => assert_eq!(chart.namespace, "default"),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_lint_rejects_unknown_dependency() {
        let fixture = Fixture::new();
        let mut stages = Stages::new();
        stages.insert("a".to_string(), fixture.stage("a", &["ghost"]));

        let mut values = Values::new();
        let err = lint(&mut stages, &mut values).unwrap_err();
        assert!(matches!(err, FlowError::UnknownDependency { .. }));
    }

    #[tokio::test]
    async fn test_hooks_run_around_action() {
        let fixture = Fixture::new();
        let marker = fixture.chart_dir.path().join("hook-ran");
        let mut staged = fixture.stage("hooked", &[]);
        staged.jobs.before = vec![format!("touch {}", marker.display())];

        let mut stages = Stages::new();
        stages.insert("hooked".to_string(), staged);

        let (values, renderer) = run_args();
        forward(stages, values, renderer, false).await.unwrap();

        assert!(marker.exists());
        assert_eq!(fixture.installs(), vec!["hooked"]);
    }

    #[tokio::test]
    async fn test_post_hooks_run_after_failed_action() {
        let fixture = Fixture::new();
        let marker = fixture.chart_dir.path().join("post-ran");
        let mut broken = fixture.stage("broken", &[]);
        if let Resource::Chart(chart) = &mut broken.resource {
            chart.name = "not-a-chart".to_string();
        }
        broken.jobs.after = vec![format!("touch {}", marker.display())];

        let mut stages = Stages::new();
        stages.insert("broken".to_string(), broken);

        let (values, renderer) = run_args();
        let err = forward(stages, values, renderer, false).await.unwrap_err();
        assert!(matches!(err, FlowError::StagesFailed { .. }));
        // past the pre-hook phase, the post hook still ran
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_reverse_skips_unmet_requires() {
        let fixture = Fixture::new();
        fixture.client.seed("gated", ReleaseStatus::Deployed, 1);

        let mut gated = fixture.stage("gated", &[]);
        gated
            .requires
            .insert("region".to_string(), "us-east".to_string());

        let mut stages = Stages::new();
        stages.insert("gated".to_string(), gated);

        let (values, renderer) = run_args();
        reverse(stages, values, renderer, false).await.unwrap();
        assert!(fixture.deletes().is_empty());
    }

    #[tokio::test]
    async fn test_failing_pre_hook_aborts_stage() {
        let fixture = Fixture::new();
        let mut staged = fixture.stage("hooked", &[]);
        staged.jobs.before = vec!["false".to_string()];

        let mut stages = Stages::new();
        stages.insert("hooked".to_string(), staged);

        let (values, renderer) = run_args();
        let err = forward(stages, values, renderer, false).await.unwrap_err();
        assert!(matches!(err, FlowError::StagesFailed { .. }));
        assert!(fixture.installs().is_empty());
    }
}
