//! Study construction, setup, and staging.
//!
//! A [`Study`] owns the abstract workflow of a campaign: the DAG of
//! [`StudyStep`] templates, the shared [`StudyEnvironment`], and the
//! [`ParameterSet`]. It is built once, set up once, and staged into a
//! concrete [`ExecutionGraph`] ready for an execution runtime.
//!
//! Staging expands the abstract graph into the minimal set of concrete
//! nodes: each step gets one node per distinct projection of the parameter
//! combinations onto the parameters the step actually uses (its own plus
//! everything inherited from its ancestors). Combinations that differ only
//! in parameters a step never sees collapse into a single node, so a
//! no-parameter step yields exactly one node no matter how many
//! combinations the study declares.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;

use chrono::Local;
use tracing::{debug, info};

use crate::environment::{StudyEnvironment, Variable};
use crate::error::{CairnError, Result};
use crate::execution::ExecutionGraph;
use crate::graph::Dag;
use crate::parameters::{ParameterSet, ReducedKey};
use crate::step::StudyStep;
use crate::template;

/// Name of the synthetic root node every study contains.
pub const SOURCE: &str = "_source";

/// Environment variable holding the study's output root.
pub const OUTPUT_PATH: &str = "OUTPUT_PATH";

/// One concrete node of an expanded step, held until workspace references
/// are resolved and the node enters the plan.
#[derive(Debug, Clone)]
struct ConcreteInstance {
    key: ReducedKey,
    node_name: String,
    workspace: PathBuf,
    step: StudyStep,
}

/// The abstract workflow of one simulation campaign.
#[derive(Debug, Clone)]
pub struct Study {
    name: String,
    description: String,
    environment: StudyEnvironment,
    parameters: ParameterSet,
    flow: Dag<Option<StudyStep>>,
    is_set_up: bool,
    submission_attempts: usize,
    restart_limit: usize,
}

impl Study {
    /// Create a study, taking ownership of its environment and parameters
    /// so later caller-side changes cannot affect it.
    ///
    /// The environment's `OUTPUT_PATH` variable becomes the study's output
    /// root: normalized to an absolute path if present, defaulted to the
    /// absolute current working directory if absent.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        mut environment: StudyEnvironment,
        parameters: ParameterSet,
    ) -> Result<Self> {
        match environment.find(OUTPUT_PATH) {
            Some(output) => {
                let absolute = std::path::absolute(&output.value)?;
                environment.set(OUTPUT_PATH, absolute.display().to_string());
            }
            None => {
                let cwd = std::env::current_dir()?;
                environment.add_variable(Variable::new(OUTPUT_PATH, cwd.display().to_string()));
            }
        }

        let mut flow = Dag::new();
        flow.add_node(SOURCE, None)?;

        Ok(Self {
            name: name.into(),
            description: description.into(),
            environment,
            parameters,
            flow,
            is_set_up: false,
            submission_attempts: 0,
            restart_limit: 0,
        })
    }

    /// Study name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Study description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The study's output root, from the `OUTPUT_PATH` variable.
    pub fn output_path(&self) -> PathBuf {
        self.environment
            .find(OUTPUT_PATH)
            .map(|var| PathBuf::from(&var.value))
            .unwrap_or_default()
    }

    /// Look up a step template by name.
    pub fn step(&self, name: &str) -> Option<&StudyStep> {
        self.flow.get(name).and_then(Option::as_ref)
    }

    /// Add a step to the workflow.
    ///
    /// An edge is created from every step named in `run.depends`; a step
    /// without dependencies is edged from the `SOURCE` root instead, so
    /// every node stays reachable. Steps are best added in dependency
    /// order; out-of-order graphs can be completed with [`Study::add_edge`].
    pub fn add_step(&mut self, step: StudyStep) -> Result<()> {
        let name = step.name.clone();

        // Validate before inserting so a failure leaves no dangling node.
        for dependency in &step.run.depends {
            if !self.flow.contains(dependency) {
                return Err(CairnError::UnknownDependency {
                    step: name,
                    dependency: dependency.clone(),
                });
            }
        }

        let depends = step.run.depends.clone();
        self.flow.add_node(name.as_str(), Some(step))?;

        if depends.is_empty() {
            debug!(step = %name, "no dependencies, edging from source");
            self.flow.add_edge(SOURCE, &name)?;
        } else {
            for dependency in &depends {
                info!(step = %name, dependency = %dependency, "creating dependency edge");
                self.flow.add_edge(dependency, &name)?;
            }
        }

        Ok(())
    }

    /// Manually wire an edge between two steps.
    pub fn add_edge(&mut self, src: &str, dst: &str) -> Result<()> {
        self.flow.add_edge(src, dst)
    }

    /// Walk the study from `SOURCE`, yielding `(parent, name, step)` triples
    /// with every parent emitted before its children. `SOURCE` itself is
    /// yielded first with no parent and no step value.
    pub fn walk(&self) -> Result<Vec<(Option<String>, String, Option<&StudyStep>)>> {
        let sequence = self.flow.spanning_traversal(SOURCE)?;
        Ok(sequence
            .into_iter()
            .map(|(parent, name, value)| (parent, name, value.as_ref()))
            .collect())
    }

    /// Set up the study: record budgets, resolve the environment, create the
    /// timestamped output directory, and substitute the environment into
    /// every step template.
    ///
    /// Idempotent: a second call after success returns immediately. On
    /// failure no directory path is recorded and no template is modified, so
    /// the caller may correct the problem and retry.
    pub fn setup(&mut self, submission_attempts: usize, restart_limit: usize) -> Result<()> {
        if self.is_set_up {
            info!(study = %self.name, "study is already set up, returning");
            return Ok(());
        }

        self.submission_attempts = submission_attempts;
        self.restart_limit = restart_limit;

        let out_name = format!(
            "{}_{}",
            self.name.replace(' ', "_"),
            Local::now().format("%Y%m%d-%H%M%S")
        );
        let output = self.output_path().join(out_name);

        if !self.environment.is_resolved() {
            info!(study = %self.name, "resolving environment");
            self.environment.resolve()?;
        }

        if let Err(err) = fs::create_dir_all(&output) {
            return Err(CairnError::WorkspaceCreation {
                path: output,
                message: err.to_string(),
            });
        }

        self.environment.set(OUTPUT_PATH, output.display().to_string());

        // Apply the environment to every stored template, in place. These
        // are the study's own copies; substitution elsewhere is pure.
        let names: Vec<String> = self.flow.values().keys().cloned().collect();
        for name in names {
            let substituted = match self.flow.get(&name) {
                Some(Some(step)) => {
                    debug!(step = %name, "applying environment to step");
                    Some(step.map_fields(|field| self.environment.substitute(field)))
                }
                _ => None,
            };
            if let Some(step) = substituted {
                if let Some(slot) = self.flow.get_mut(&name) {
                    *slot = Some(step);
                }
            }
        }

        self.is_set_up = true;
        info!(study = %self.name, output = %output.display(), "study set up");
        Ok(())
    }

    /// Expand the abstract workflow into a concrete execution plan.
    ///
    /// Fails if called before [`Study::setup`] completes. Staging is
    /// all-or-nothing: any configuration error aborts the pass and no plan
    /// is returned. Returns the global workspace path and the plan.
    pub fn stage(&self) -> Result<(PathBuf, ExecutionGraph)> {
        if !self.is_set_up {
            return Err(CairnError::StudyNotSetUp {
                study: self.name.clone(),
            });
        }

        if self.parameters.is_empty() {
            self.stage_linear()
        } else {
            self.stage_parameterized()
        }
    }

    /// Stage a workflow with no parameters: one concrete node per step and
    /// a 1:1 mirror of the abstract edges.
    fn stage_linear(&self) -> Result<(PathBuf, ExecutionGraph)> {
        let output = self.output_path();
        let mut plan = ExecutionGraph::new();
        plan.add_description(&self.name, &self.description);
        plan.set_submission_attempts(self.submission_attempts);

        info!(study = %self.name, "constructing linear study");

        for (_parent, name, value) in self.walk()? {
            let Some(step) = value else {
                plan.add_node(name)?;
                continue;
            };

            let references: BTreeSet<String> = step
                .templated_fields()
                .flat_map(template::workspace_references)
                .collect();

            let mut concrete = step.clone();
            for reference in &references {
                if !self.flow.contains(reference) {
                    return Err(CairnError::UnknownWorkspace {
                        step: name.clone(),
                        reference: reference.clone(),
                    });
                }
                let workspace = output.join(reference).display().to_string();
                concrete = substitute_workspace(&concrete, reference, &workspace);
            }

            let restart_limit = self.restart_limit_for(&concrete);
            plan.add_step(name.as_str(), concrete, output.join(&name), restart_limit)?;

            for parent in self.flow.parents_of(&name) {
                plan.add_edge(parent, &name)?;
            }
        }

        Ok((output, plan))
    }

    /// Stage a parameterized workflow.
    ///
    /// Two passes over the walk order. The first expands every step: its
    /// used-parameter set is its own referenced parameters unioned with
    /// those of all abstract parents (already expanded thanks to the
    /// traversal order); every combination is projected onto that set and
    /// distinct projections become concrete instances. The second pass
    /// resolves workspace references, which may point at steps expanded
    /// later in the walk, then adds the nodes and mirrors each abstract
    /// edge by restricting the child's key to the parent's used set, which
    /// fans one parent node out to every child node sharing its key.
    fn stage_parameterized(&self) -> Result<(PathBuf, ExecutionGraph)> {
        let output = self.output_path();
        let mut plan = ExecutionGraph::new();
        plan.add_description(&self.name, &self.description);
        plan.set_submission_attempts(self.submission_attempts);

        info!(study = %self.name, "constructing parameterized study");

        let combinations = self.parameters.combinations();
        if combinations.is_empty() {
            // A non-empty parameter set with no combinations would expand
            // every step to zero nodes and silently drop required runs.
            let parameter = self.parameters.empty_parameter().unwrap_or_default();
            return Err(CairnError::EmptyParameterValues {
                parameter: parameter.to_string(),
            });
        }

        let walk = self.walk()?;
        let mut used_params: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut references_of: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut expanded: BTreeMap<String, Vec<ConcreteInstance>> = BTreeMap::new();

        for (_parent, name, value) in &walk {
            let Some(step) = value else {
                continue;
            };

            // The parameters this step's result can vary over: its own plus
            // everything inherited from its parents.
            let mut used = self.parameters.used_parameters(step);
            for parent in self.flow.parents_of(name) {
                if let Some(parent_used) = used_params.get(parent) {
                    used.extend(parent_used.iter().cloned());
                }
            }

            let references: BTreeSet<String> = step
                .templated_fields()
                .flat_map(template::workspace_references)
                .collect();

            debug!(
                step = %name,
                used = ?used,
                references = ?references,
                "expanding step"
            );

            let mut instances: Vec<ConcreteInstance> = Vec::new();
            let mut seen: BTreeSet<ReducedKey> = BTreeSet::new();
            for combo in &combinations {
                let key = combo.project(name, &used)?;
                if !seen.insert(key.clone()) {
                    continue;
                }

                let (_, concrete) = step.apply_parameters(combo);
                let encoding = key.encode();
                let (node_name, workspace) = if key.is_empty() {
                    (name.clone(), output.join(name))
                } else {
                    (format!("{}_{}", name, encoding), output.join(name).join(&encoding))
                };

                instances.push(ConcreteInstance {
                    key,
                    node_name,
                    workspace,
                    step: concrete,
                });
            }

            info!(step = %name, nodes = instances.len(), "expanded step");

            used_params.insert(name.clone(), used);
            references_of.insert(name.clone(), references);
            expanded.insert(name.clone(), instances);
        }

        for (_parent, name, value) in &walk {
            if value.is_none() {
                plan.add_node(name.as_str())?;
                continue;
            }

            let instances = expanded.get(name).ok_or_else(|| CairnError::UnknownNode {
                name: name.clone(),
            })?;
            let used = used_params.get(name).ok_or_else(|| CairnError::UnknownNode {
                name: name.clone(),
            })?;
            let references = references_of.get(name).ok_or_else(|| CairnError::UnknownNode {
                name: name.clone(),
            })?;

            for instance in instances {
                let mut concrete = instance.step.clone();
                for reference in references {
                    let target = self.resolve_workspace(
                        name,
                        reference,
                        &instance.key,
                        used,
                        &used_params,
                        &expanded,
                    )?;
                    concrete =
                        substitute_workspace(&concrete, reference, &target.display().to_string());
                }

                let restart_limit = self.restart_limit_for(&concrete);
                plan.add_step(
                    instance.node_name.as_str(),
                    concrete,
                    instance.workspace.clone(),
                    restart_limit,
                )?;
            }

            for parent in self.flow.parents_of(name) {
                if parent == SOURCE {
                    for instance in instances {
                        plan.add_edge(SOURCE, &instance.node_name)?;
                    }
                    continue;
                }

                // Every step was expanded in the first pass, and the
                // child's used set contains the parent's, so restricting
                // the child key always matches exactly one parent node.
                let parent_used =
                    used_params.get(parent).ok_or_else(|| CairnError::UnknownNode {
                        name: parent.clone(),
                    })?;
                let parent_instances =
                    expanded.get(parent).ok_or_else(|| CairnError::UnknownNode {
                        name: parent.clone(),
                    })?;
                for instance in instances {
                    let parent_key = instance.key.restrict(parent_used);
                    let parent_node = parent_instances
                        .iter()
                        .find(|candidate| candidate.key == parent_key)
                        .ok_or_else(|| CairnError::UnknownNode {
                            name: parent.clone(),
                        })?;
                    plan.add_edge(&parent_node.node_name, &instance.node_name)?;
                }
            }
        }

        Ok((output, plan))
    }

    /// Locate the workspace of a referenced step for one concrete node.
    ///
    /// Called after every step has been expanded, so a miss means the
    /// reference names something that is not a step. The target is unique
    /// iff the referenced step's used-parameter set is contained in the
    /// referencing step's (an empty set always is); anything else would
    /// leave several equally valid candidates and is a configuration error.
    fn resolve_workspace(
        &self,
        step: &str,
        reference: &str,
        key: &ReducedKey,
        used: &BTreeSet<String>,
        used_params: &BTreeMap<String, BTreeSet<String>>,
        expanded: &BTreeMap<String, Vec<ConcreteInstance>>,
    ) -> Result<PathBuf> {
        let instances = expanded
            .get(reference)
            .ok_or_else(|| CairnError::UnknownWorkspace {
                step: step.to_string(),
                reference: reference.to_string(),
            })?;
        let reference_used =
            used_params
                .get(reference)
                .ok_or_else(|| CairnError::UnknownWorkspace {
                    step: step.to_string(),
                    reference: reference.to_string(),
                })?;

        if !reference_used.is_subset(used) {
            return Err(CairnError::AmbiguousWorkspace {
                step: step.to_string(),
                reference: reference.to_string(),
            });
        }

        let target_key = key.restrict(reference_used);
        instances
            .iter()
            .find(|instance| instance.key == target_key)
            .map(|instance| instance.workspace.clone())
            .ok_or_else(|| CairnError::UnknownWorkspace {
                step: step.to_string(),
                reference: reference.to_string(),
            })
    }

    /// The restart budget for a concrete node: the configured limit when the
    /// step declares a restart command, zero otherwise.
    fn restart_limit_for(&self, step: &StudyStep) -> usize {
        if step.run.restart.is_empty() {
            0
        } else {
            self.restart_limit
        }
    }
}

/// Replace `$(reference.workspace)` tokens in every templated field.
fn substitute_workspace(step: &StudyStep, reference: &str, workspace: &str) -> StudyStep {
    let token = format!("{}{}", reference, template::WORKSPACE_SUFFIX);
    step.map_fields(|field| {
        template::substitute(field, |name| (name == token).then(|| workspace.to_string()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn step(name: &str, cmd: &str, depends: &[&str]) -> StudyStep {
        let mut step = StudyStep::new(name, format!("step {}", name));
        step.run.cmd = cmd.to_string();
        step.run.depends = depends.iter().map(|d| d.to_string()).collect();
        step
    }

    fn study_in(temp: &TempDir) -> Study {
        let mut env = StudyEnvironment::new();
        env.add_variable(Variable::new(OUTPUT_PATH, temp.path().display().to_string()));
        Study::new("test study", "a test study", env, ParameterSet::new()).unwrap()
    }

    fn parameterized_study_in(temp: &TempDir, parameters: ParameterSet) -> Study {
        let mut env = StudyEnvironment::new();
        env.add_variable(Variable::new(OUTPUT_PATH, temp.path().display().to_string()));
        Study::new("test study", "a test study", env, parameters).unwrap()
    }

    #[test]
    fn source_node_exists_on_construction() {
        let temp = TempDir::new().unwrap();
        let study = study_in(&temp);
        let walk = study.walk().unwrap();

        assert_eq!(walk.len(), 1);
        assert_eq!(walk[0].1, SOURCE);
        assert!(walk[0].0.is_none());
    }

    #[test]
    fn missing_output_path_defaults_to_cwd() {
        let study = Study::new(
            "demo",
            "",
            StudyEnvironment::new(),
            ParameterSet::new(),
        )
        .unwrap();

        assert_eq!(study.output_path(), std::env::current_dir().unwrap());
    }

    #[test]
    fn relative_output_path_is_absolutized() {
        let mut env = StudyEnvironment::new();
        env.add_variable(Variable::new(OUTPUT_PATH, "relative/out"));
        let study = Study::new("demo", "", env, ParameterSet::new()).unwrap();

        assert!(study.output_path().is_absolute());
    }

    #[test]
    fn step_without_dependency_edges_from_source() {
        let temp = TempDir::new().unwrap();
        let mut study = study_in(&temp);
        study.add_step(step("first", "echo first", &[])).unwrap();

        let walk = study.walk().unwrap();
        let entry = walk.iter().find(|(_, n, _)| n == "first").unwrap();
        assert_eq!(entry.0.as_deref(), Some(SOURCE));
    }

    #[test]
    fn step_with_dependency_edges_from_it() {
        let temp = TempDir::new().unwrap();
        let mut study = study_in(&temp);
        study.add_step(step("first", "echo first", &[])).unwrap();
        study.add_step(step("second", "echo second", &["first"])).unwrap();

        let walk = study.walk().unwrap();
        let entry = walk.iter().find(|(_, n, _)| n == "second").unwrap();
        assert_eq!(entry.0.as_deref(), Some("first"));
    }

    #[test]
    fn unknown_dependency_fails_without_dangling_node() {
        let temp = TempDir::new().unwrap();
        let mut study = study_in(&temp);

        let result = study.add_step(step("late", "echo late", &["missing"]));

        assert!(matches!(result, Err(CairnError::UnknownDependency { .. })));
        assert!(study.step("late").is_none());
        assert_eq!(study.walk().unwrap().len(), 1);
    }

    #[test]
    fn duplicate_step_name_is_rejected() {
        let temp = TempDir::new().unwrap();
        let mut study = study_in(&temp);
        study.add_step(step("dup", "echo", &[])).unwrap();

        let result = study.add_step(step("dup", "echo again", &[]));
        assert!(matches!(result, Err(CairnError::DuplicateStep { .. })));
    }

    #[test]
    fn manual_edge_wiring_rejects_cycles() {
        let temp = TempDir::new().unwrap();
        let mut study = study_in(&temp);
        study.add_step(step("a", "echo a", &[])).unwrap();
        study.add_step(step("b", "echo b", &["a"])).unwrap();

        let result = study.add_edge("b", "a");
        assert!(matches!(result, Err(CairnError::CircularDependency { .. })));
    }

    #[test]
    fn walk_emits_parents_before_children() {
        let temp = TempDir::new().unwrap();
        let mut study = study_in(&temp);
        study.add_step(step("a", "echo a", &[])).unwrap();
        study.add_step(step("b", "echo b", &[])).unwrap();
        study.add_step(step("c", "echo c", &["a", "b"])).unwrap();

        let walk = study.walk().unwrap();
        let pos = |name: &str| walk.iter().position(|(_, n, _)| n == name).unwrap();

        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("c"));
    }

    #[test]
    fn setup_appends_timestamped_directory() {
        let temp = TempDir::new().unwrap();
        let mut study = study_in(&temp);
        study.setup(1, 1).unwrap();

        let output = study.output_path();
        assert!(output.starts_with(temp.path()));
        assert!(output
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("test_study_"));
        assert!(output.is_dir());
    }

    #[test]
    fn setup_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let mut study = study_in(&temp);
        study.setup(2, 3).unwrap();
        let first_output = study.output_path();

        study.setup(9, 9).unwrap();

        assert_eq!(study.output_path(), first_output);
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn setup_substitutes_environment_into_steps() {
        let temp = TempDir::new().unwrap();
        let mut env = StudyEnvironment::new();
        env.add_variable(Variable::new(OUTPUT_PATH, temp.path().display().to_string()));
        env.add_variable(Variable::new("SPEC_ROOT", "/data/spec"));
        let mut study = Study::new("demo", "", env, ParameterSet::new()).unwrap();
        study
            .add_step(step("sim", "sim -in $(SPEC_ROOT)/a.dat -x $(X)", &[]))
            .unwrap();

        study.setup(1, 1).unwrap();

        let substituted = study.step("sim").unwrap();
        assert_eq!(substituted.run.cmd, "sim -in /data/spec/a.dat -x $(X)");
    }

    #[test]
    fn setup_fails_when_output_cannot_be_created() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();

        let mut env = StudyEnvironment::new();
        env.add_variable(Variable::new(OUTPUT_PATH, blocker.display().to_string()));
        let mut study = Study::new("demo", "", env, ParameterSet::new()).unwrap();

        let result = study.setup(1, 1);
        assert!(matches!(result, Err(CairnError::WorkspaceCreation { .. })));
    }

    #[test]
    fn setup_fails_when_environment_cannot_resolve() {
        let temp = TempDir::new().unwrap();
        let mut env = StudyEnvironment::new();
        env.add_variable(Variable::new(OUTPUT_PATH, temp.path().display().to_string()));
        env.add_dependency(crate::environment::Dependency::new(
            "DATA",
            "/no/such/artifact",
        ));
        let mut study = Study::new("demo", "", env, ParameterSet::new()).unwrap();

        let result = study.setup(1, 1);
        assert!(matches!(
            result,
            Err(CairnError::EnvironmentResolution { .. })
        ));
    }

    #[test]
    fn stage_before_setup_is_a_usage_error() {
        let temp = TempDir::new().unwrap();
        let study = study_in(&temp);

        let result = study.stage();
        assert!(matches!(result, Err(CairnError::StudyNotSetUp { .. })));
    }

    #[test]
    fn linear_stage_mirrors_steps_and_edges() {
        let temp = TempDir::new().unwrap();
        let mut study = study_in(&temp);
        study.add_step(step("a", "echo a", &[])).unwrap();
        study.add_step(step("b", "echo b", &["a"])).unwrap();
        study.add_step(step("c", "echo c", &["a", "b"])).unwrap();
        study.setup(1, 1).unwrap();

        let (workspace, plan) = study.stage().unwrap();

        assert_eq!(workspace, study.output_path());
        assert_eq!(plan.len(), 4); // root + three steps
        let edges = plan.edges();
        assert_eq!(edges.len(), 4);
        assert!(edges.contains(&(SOURCE.to_string(), "a".to_string())));
        assert!(edges.contains(&("a".to_string(), "b".to_string())));
        assert!(edges.contains(&("a".to_string(), "c".to_string())));
        assert!(edges.contains(&("b".to_string(), "c".to_string())));
    }

    #[test]
    fn linear_stage_assigns_restart_budget_only_with_restart_cmd() {
        let temp = TempDir::new().unwrap();
        let mut study = study_in(&temp);
        let mut restartable = step("restartable", "run", &[]);
        restartable.run.restart = "run --resume".to_string();
        study.add_step(restartable).unwrap();
        study.add_step(step("plain", "run once", &[])).unwrap();
        study.setup(1, 5).unwrap();

        let (_, plan) = study.stage().unwrap();

        assert_eq!(plan.step_node("restartable").unwrap().restart_limit, 5);
        assert_eq!(plan.step_node("plain").unwrap().restart_limit, 0);
    }

    #[test]
    fn linear_stage_resolves_workspace_references() {
        let temp = TempDir::new().unwrap();
        let mut study = study_in(&temp);
        study.add_step(step("mesh", "gen-mesh", &[])).unwrap();
        study
            .add_step(step("sim", "sim -mesh $(mesh.workspace)/grid.dat", &["mesh"]))
            .unwrap();
        study.setup(1, 1).unwrap();

        let (workspace, plan) = study.stage().unwrap();

        let expected = workspace.join("mesh").display().to_string();
        let cmd = &plan.step_node("sim").unwrap().step.run.cmd;
        assert_eq!(cmd, &format!("sim -mesh {}/grid.dat", expected));
    }

    #[test]
    fn linear_stage_rejects_unknown_workspace_reference() {
        let temp = TempDir::new().unwrap();
        let mut study = study_in(&temp);
        study
            .add_step(step("sim", "sim $(ghost.workspace)", &[]))
            .unwrap();
        study.setup(1, 1).unwrap();

        let result = study.stage();
        assert!(matches!(result, Err(CairnError::UnknownWorkspace { .. })));
    }

    #[test]
    fn parameterless_step_expands_to_single_node() {
        let temp = TempDir::new().unwrap();
        let mut params = ParameterSet::new();
        params.add_parameter("X", ["1", "2", "3"]);
        let mut study = parameterized_study_in(&temp, params);
        study.add_step(step("fixed", "echo fixed", &[])).unwrap();
        study.setup(1, 1).unwrap();

        let (workspace, plan) = study.stage().unwrap();

        assert_eq!(plan.len(), 2); // root + one node
        let node = plan.step_node("fixed").unwrap();
        assert_eq!(node.workspace, workspace.join("fixed"));
    }

    #[test]
    fn parameterized_step_expands_per_used_subset_only() {
        let temp = TempDir::new().unwrap();
        let mut params = ParameterSet::new();
        params.add_parameter("X", ["1", "2"]);
        params.add_parameter("Y", ["a", "b", "c"]);
        let mut study = parameterized_study_in(&temp, params);
        study.add_step(step("vary-x", "run -x $(X)", &[])).unwrap();
        study.setup(1, 1).unwrap();

        let (_, plan) = study.stage().unwrap();

        // Two distinct X values, never the 6-combination cross product.
        assert_eq!(plan.len(), 3);
        assert!(plan.contains("vary-x_X.1"));
        assert!(plan.contains("vary-x_X.2"));
    }

    #[test]
    fn expanded_nodes_have_substituted_commands_and_workspaces() {
        let temp = TempDir::new().unwrap();
        let mut params = ParameterSet::new();
        params.add_parameter("X", ["1", "2"]);
        let mut study = parameterized_study_in(&temp, params);
        study.add_step(step("sim", "sim -x $(X)", &[])).unwrap();
        study.setup(1, 1).unwrap();

        let (workspace, plan) = study.stage().unwrap();

        let node = plan.step_node("sim_X.1").unwrap();
        assert_eq!(node.step.run.cmd, "sim -x 1");
        assert_eq!(node.workspace, workspace.join("sim").join("X.1"));
    }

    #[test]
    fn source_feeds_each_reduced_key_once() {
        let temp = TempDir::new().unwrap();
        let mut params = ParameterSet::new();
        params.add_parameter("X", ["1", "2"]);
        let mut study = parameterized_study_in(&temp, params);
        study.add_step(step("sim", "sim -x $(X)", &[])).unwrap();
        study.setup(1, 1).unwrap();

        let (_, plan) = study.stage().unwrap();

        let children = plan.children_of(SOURCE);
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn child_inherits_parent_parameters() {
        let temp = TempDir::new().unwrap();
        let mut params = ParameterSet::new();
        params.add_parameter("X", ["1", "2"]);
        let mut study = parameterized_study_in(&temp, params);
        study.add_step(step("vary", "run -x $(X)", &[])).unwrap();
        study.add_step(step("collect", "gather results", &["vary"])).unwrap();
        study.setup(1, 1).unwrap();

        let (_, plan) = study.stage().unwrap();

        // collect uses no parameters itself but varies with its parent.
        assert!(plan.contains("collect_X.1"));
        assert!(plan.contains("collect_X.2"));
        assert_eq!(plan.parents_of("collect_X.1"), ["vary_X.1"]);
        assert_eq!(plan.parents_of("collect_X.2"), ["vary_X.2"]);
    }

    #[test]
    fn explicit_combination_sequence_limits_expansion() {
        let temp = TempDir::new().unwrap();
        let mut params = ParameterSet::new();
        params.add_combination(crate::parameters::Combination::new().with("X", "1").with("Y", "a"));
        params.add_combination(crate::parameters::Combination::new().with("X", "2").with("Y", "b"));
        let mut study = parameterized_study_in(&temp, params);
        study.add_step(step("sim", "sim -x $(X) -y $(Y)", &[])).unwrap();
        study.setup(1, 1).unwrap();

        let (_, plan) = study.stage().unwrap();

        // Only the two declared pairs, not the 2x2 product.
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn under_covering_combination_is_a_configuration_error() {
        let temp = TempDir::new().unwrap();
        let mut params = ParameterSet::new();
        params.add_combination(crate::parameters::Combination::new().with("X", "1"));
        let mut study = parameterized_study_in(&temp, params);
        study.add_step(step("sim", "sim -x $(X) -y $(Y)", &[])).unwrap();
        study.setup(1, 1).unwrap();

        // Y is referenced but the explicit combination never assigns it...
        // except Y is not declared either, so the reference is not a
        // parameter reference at all and passes through.
        let (_, plan) = study.stage().unwrap();
        assert!(plan.contains("sim_X.1"));

        // Declare Y via a second explicit combination and the first one
        // under-covers it.
        let mut params = ParameterSet::new();
        params.add_combination(crate::parameters::Combination::new().with("X", "1"));
        params.add_combination(
            crate::parameters::Combination::new().with("X", "2").with("Y", "b"),
        );
        let mut study = parameterized_study_in(&temp, params);
        study.add_step(step("sim", "sim -x $(X) -y $(Y)", &[])).unwrap();
        study.setup(1, 1).unwrap();

        let result = study.stage();
        assert!(matches!(
            result,
            Err(CairnError::UndeclaredParameter { .. })
        ));
    }

    #[test]
    fn ambiguous_workspace_reference_aborts_staging() {
        let temp = TempDir::new().unwrap();
        let mut params = ParameterSet::new();
        params.add_parameter("X", ["1", "2"]);
        params.add_parameter("Y", ["a", "b"]);
        let mut study = parameterized_study_in(&temp, params);
        // vary-y does not depend on vary-x, so it never inherits X, yet it
        // asks for vary-x's workspace which is split by X.
        study.add_step(step("vary-x", "run -x $(X)", &[])).unwrap();
        study
            .add_step(step("vary-y", "run -y $(Y) -in $(vary-x.workspace)", &[]))
            .unwrap();
        study.setup(1, 1).unwrap();

        let result = study.stage();
        assert!(matches!(
            result,
            Err(CairnError::AmbiguousWorkspace { .. })
        ));
    }

    #[test]
    fn disjoint_reference_to_parameterless_step_resolves() {
        let temp = TempDir::new().unwrap();
        let mut params = ParameterSet::new();
        params.add_parameter("Y", ["a", "b"]);
        let mut study = parameterized_study_in(&temp, params);
        study.add_step(step("prep", "prepare inputs", &[])).unwrap();
        study
            .add_step(step("sim", "run -y $(Y) -in $(prep.workspace)", &[]))
            .unwrap();
        study.setup(1, 1).unwrap();

        let (workspace, plan) = study.stage().unwrap();

        let expected = workspace.join("prep").display().to_string();
        let cmd = &plan.step_node("sim_Y.a").unwrap().step.run.cmd;
        assert!(cmd.contains(&expected));
    }

    #[test]
    fn workspace_reference_resolves_before_target_is_added() {
        let temp = TempDir::new().unwrap();
        let mut params = ParameterSet::new();
        params.add_parameter("X", ["1", "2"]);
        let mut study = parameterized_study_in(&temp, params);
        // sim references prep's workspace but is added first; staging must
        // not depend on insertion order.
        study
            .add_step(step("sim", "run -x $(X) -in $(prep.workspace)", &[]))
            .unwrap();
        study.add_step(step("prep", "prepare inputs", &[])).unwrap();
        study.setup(1, 1).unwrap();

        let (workspace, plan) = study.stage().unwrap();

        let expected = workspace.join("prep").display().to_string();
        let cmd = &plan.step_node("sim_X.1").unwrap().step.run.cmd;
        assert!(cmd.contains(&expected));
    }

    #[test]
    fn empty_parameter_value_list_aborts_staging() {
        let temp = TempDir::new().unwrap();
        let mut params = ParameterSet::new();
        params.add_parameter("X", Vec::<String>::new());
        let mut study = parameterized_study_in(&temp, params);
        study.add_step(step("fixed", "echo fixed", &[])).unwrap();
        study.setup(1, 1).unwrap();

        let result = study.stage();
        assert!(matches!(
            result,
            Err(CairnError::EmptyParameterValues { .. })
        ));
    }

    #[test]
    fn repeated_stage_produces_equal_plans() {
        let temp = TempDir::new().unwrap();
        let mut params = ParameterSet::new();
        params.add_parameter("X", ["1", "2"]);
        let mut study = parameterized_study_in(&temp, params);
        study.add_step(step("sim", "sim -x $(X)", &[])).unwrap();
        study.setup(1, 1).unwrap();

        let (_, first) = study.stage().unwrap();
        let (_, second) = study.stage().unwrap();

        assert_eq!(first, second);
    }
}
