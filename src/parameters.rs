//! Study parameters and their combinations.
//!
//! A [`ParameterSet`] declares the parameters a campaign varies over and
//! enumerates [`Combination`]s of their values, either as the cross product
//! of every declared value list or as an explicit user-declared sequence.
//! Staging projects each combination onto the subset of parameters a step
//! actually uses, producing a [`ReducedKey`] that identifies one concrete
//! execution node and encodes its workspace directory.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{CairnError, Result};
use crate::step::StudyStep;
use crate::template;

/// Placeholder in a parameter label that is replaced by the value.
pub const LABEL_PLACEHOLDER: &str = "%%";

/// A declared parameter: a name, its value list, and a label pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    /// Parameter name, referenced as `$(name)` in step fields.
    pub name: String,
    /// Values the parameter takes, one per combination axis position.
    pub values: Vec<String>,
    /// Directory-encoding pattern; `%%` is replaced by the value.
    pub label: String,
}

impl Parameter {
    /// Render the label for a concrete value.
    pub fn render_label(&self, value: &str) -> String {
        self.label.replace(LABEL_PLACEHOLDER, value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Assignment {
    value: String,
    label: String,
}

/// One assignment of values to some or all declared parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Combination {
    entries: BTreeMap<String, Assignment>,
}

impl Combination {
    /// Create an empty combination.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a value with the default `name.value` label.
    pub fn with(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        let label = format!("{}.{}", name, value);
        self.with_labeled(name, value, label)
    }

    /// Assign a value with an explicit rendered label.
    pub fn with_labeled(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        self.entries.insert(
            name.into(),
            Assignment {
                value: value.into(),
                label: label.into(),
            },
        );
        self
    }

    /// Get the value assigned to a parameter.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|a| a.value.as_str())
    }

    /// Names this combination assigns, in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Check if the combination assigns nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Substitute `$(name)` tokens in a field with assigned values.
    ///
    /// Tokens naming unassigned parameters are preserved.
    pub fn apply(&self, field: &str) -> String {
        template::substitute(field, |name| {
            self.entries.get(name).map(|a| a.value.clone())
        })
    }

    /// Project this combination onto a step's used-parameter set.
    ///
    /// Fails if the set names a parameter this combination does not assign,
    /// which happens when an explicit combination sequence under-covers the
    /// parameters a step references.
    pub fn project(&self, step: &str, used: &BTreeSet<String>) -> Result<ReducedKey> {
        let mut entries = BTreeMap::new();
        for name in used {
            let assignment =
                self.entries
                    .get(name)
                    .ok_or_else(|| CairnError::UndeclaredParameter {
                        step: step.to_string(),
                        parameter: name.clone(),
                    })?;
            entries.insert(name.clone(), assignment.clone());
        }
        Ok(ReducedKey { entries })
    }
}

/// A combination projected onto a step's used-parameter set.
///
/// Concrete node identity is (step name, reduced key): combinations that
/// agree on the used subset collapse to the same key and therefore the same
/// node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ReducedKey {
    entries: BTreeMap<String, Assignment>,
}

impl ReducedKey {
    /// Check if the key assigns no parameters.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the value assigned to a parameter.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|a| a.value.as_str())
    }

    /// Project this key onto a subset of its parameters.
    ///
    /// Used when wiring a child node to its parent: the parent's key is the
    /// child's key restricted to the parent's used-parameter set.
    pub fn restrict(&self, used: &BTreeSet<String>) -> ReducedKey {
        ReducedKey {
            entries: self
                .entries
                .iter()
                .filter(|(name, _)| used.contains(*name))
                .map(|(name, a)| (name.clone(), a.clone()))
                .collect(),
        }
    }

    /// Deterministic directory encoding: rendered labels joined with `.` in
    /// parameter-name order.
    pub fn encode(&self) -> String {
        self.entries
            .values()
            .map(|a| a.label.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// The declared parameters of a study and their combination source.
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    parameters: BTreeMap<String, Parameter>,
    explicit: Vec<Combination>,
}

impl ParameterSet {
    /// Create an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a parameter with the default `name.%%` label pattern.
    pub fn add_parameter<I, S>(&mut self, name: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let label = format!("{}.{}", name, LABEL_PLACEHOLDER);
        self.add_parameter_labeled(name, values, label);
    }

    /// Declare a parameter with an explicit label pattern.
    pub fn add_parameter_labeled<I, S>(
        &mut self,
        name: impl Into<String>,
        values: I,
        label: impl Into<String>,
    ) where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        self.parameters.insert(
            name.clone(),
            Parameter {
                name,
                values: values.into_iter().map(Into::into).collect(),
                label: label.into(),
            },
        );
    }

    /// Append an explicit combination.
    ///
    /// When any explicit combinations are present they replace the cross
    /// product as the study's combination sequence.
    pub fn add_combination(&mut self, combo: Combination) {
        self.explicit.push(combo);
    }

    /// Check whether the set declares nothing; an empty set selects linear
    /// staging.
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty() && self.explicit.is_empty()
    }

    /// All declared parameter names, including names assigned only by
    /// explicit combinations.
    pub fn declared_names(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self.parameters.keys().cloned().collect();
        for combo in &self.explicit {
            names.extend(combo.names().map(str::to_string));
        }
        names
    }

    /// Enumerate the study's combinations.
    ///
    /// The explicit sequence wins when present; otherwise the cross product
    /// of every declared value list, in name-sorted odometer order.
    pub fn combinations(&self) -> Vec<Combination> {
        if !self.explicit.is_empty() {
            return self.explicit.clone();
        }

        let params: Vec<&Parameter> = self.parameters.values().collect();
        if params.is_empty() || params.iter().any(|p| p.values.is_empty()) {
            return Vec::new();
        }

        let mut combos = Vec::new();
        let mut indices = vec![0usize; params.len()];
        'outer: loop {
            let mut combo = Combination::new();
            for (param, &i) in params.iter().zip(&indices) {
                combo = combo.with_labeled(
                    param.name.as_str(),
                    param.values[i].as_str(),
                    param.render_label(&param.values[i]),
                );
            }
            combos.push(combo);

            // Advance the odometer, rightmost position fastest.
            let mut pos = params.len() - 1;
            loop {
                indices[pos] += 1;
                if indices[pos] < params[pos].values.len() {
                    break;
                }
                indices[pos] = 0;
                if pos == 0 {
                    break 'outer;
                }
                pos -= 1;
            }
        }

        combos
    }

    /// Name of a declared parameter whose value list is empty, if any.
    ///
    /// Such a parameter makes the cross product empty, which would expand
    /// every step to zero nodes; staging rejects it.
    pub fn empty_parameter(&self) -> Option<&str> {
        self.parameters
            .values()
            .find(|p| p.values.is_empty())
            .map(|p| p.name.as_str())
    }

    /// The declared parameters a step's templated fields reference.
    pub fn used_parameters(&self, step: &StudyStep) -> BTreeSet<String> {
        let declared = self.declared_names();
        step.templated_fields()
            .flat_map(template::referenced_names)
            .filter(|name| declared.contains(name))
            .collect()
    }
}
