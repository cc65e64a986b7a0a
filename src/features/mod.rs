//! Loading feature files into runnable scenarios.
//!
//! Feature files are discovered recursively, parsed with the `gherkin` crate
//! and flattened into [`PlannedScenario`] values: background steps are
//! prepended, tags are inherited from the feature, rule and examples blocks,
//! and scenario outlines are expanded once per examples row.

// FIXME(rust-lang/rust#130021): drop once derive expansion stops tripping
// `unused_assignments`.
#![allow(
    clippy::allow_attributes,
    clippy::allow_attributes_without_reason,
    unused_assignments
)]

pub mod tags;

pub use tags::TagExpression;

use crate::registry::DataTable;
use gherkin::{Background, Examples, Feature, GherkinEnv, Scenario, Step};
use miette::Diagnostic;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Errors raised while loading features.
#[derive(Debug, Error, Diagnostic)]
pub enum FeatureError {
    /// A feature root could not be walked.
    #[error("cannot read feature directory {path}: {message}")]
    #[diagnostic(code(campus_bdd::features::walk))]
    Walk {
        /// Root or entry that failed.
        path: PathBuf,
        /// Underlying failure.
        message: String,
    },
    /// A feature file could not be read.
    #[error("cannot read feature file {path}")]
    #[diagnostic(code(campus_bdd::features::read))]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A feature file is not valid Gherkin.
    #[error("invalid Gherkin in {path}: {message}")]
    #[diagnostic(code(campus_bdd::features::parse))]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
    /// An examples row does not line up with its header.
    #[error("{path}:{line}: examples row has {found} cells but the header has {expected}")]
    #[diagnostic(code(campus_bdd::features::examples))]
    ExamplesRow {
        /// File containing the outline.
        path: PathBuf,
        /// Line of the examples block.
        line: usize,
        /// Header width.
        expected: usize,
        /// Row width.
        found: usize,
    },
}

/// One step ready to dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    /// Gherkin keyword as written, such as `Given`.
    pub keyword: String,
    /// Step text without the keyword.
    pub text: String,
    /// Attached data table.
    pub table: Option<DataTable>,
    /// Attached doc string.
    pub doc_string: Option<String>,
    /// Line in the feature file.
    pub line: usize,
}

/// One scenario ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedScenario {
    /// Name of the enclosing feature.
    pub feature: String,
    /// Scenario name, with outline placeholders substituted.
    pub name: String,
    /// Feature file.
    pub path: PathBuf,
    /// Line of the scenario, or of the examples row for outlines.
    pub line: usize,
    /// Effective tags, without the leading `@`.
    pub tags: Vec<String>,
    /// Background steps followed by the scenario's own steps.
    pub steps: Vec<PlannedStep>,
}

impl PlannedScenario {
    /// `path:line` label used in reports.
    #[must_use]
    pub fn location(&self) -> String {
        format!("{}:{}", self.path.display(), self.line)
    }

    /// Return `true` when the scenario carries `tag` (with or without `@`).
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        let wanted = normalise_tag(tag);
        self.tags.iter().any(|t| *t == wanted)
    }
}

/// Strip the leading `@` from a tag.
#[must_use]
pub fn normalise_tag(tag: &str) -> String {
    tag.trim().trim_start_matches('@').to_owned()
}

/// List every `*.feature` file under `roots`, sorted for a stable run order.
///
/// A root that is itself a file is taken as is.
///
/// # Errors
///
/// Returns [`FeatureError::Walk`] when a root is missing or unreadable.
pub fn discover(roots: &[PathBuf]) -> Result<Vec<PathBuf>, FeatureError> {
    let mut files = Vec::new();
    for root in roots {
        if root.is_file() {
            files.push(root.clone());
            continue;
        }
        if !root.exists() {
            return Err(FeatureError::Walk {
                path: root.clone(),
                message: "no such file or directory".to_owned(),
            });
        }
        for entry in WalkDir::new(root).follow_links(true) {
            let entry = entry.map_err(|err| FeatureError::Walk {
                path: err.path().map_or_else(|| root.clone(), Path::to_path_buf),
                message: err.to_string(),
            })?;
            if entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "feature")
            {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// Discover, parse and filter every scenario under `roots`.
///
/// # Errors
///
/// Propagates discovery, read and parse failures.
pub fn load(roots: &[PathBuf], filter: &TagExpression) -> Result<Vec<PlannedScenario>, FeatureError> {
    let mut scenarios = Vec::new();
    for path in discover(roots)? {
        let source = fs::read_to_string(&path).map_err(|source| FeatureError::Read {
            path: path.clone(),
            source,
        })?;
        let parsed = parse_feature(&path, &source)?;
        scenarios.extend(parsed.into_iter().filter(|s| filter.matches(&s.tags)));
    }
    tracing::debug!(scenarios = scenarios.len(), "features loaded");
    Ok(scenarios)
}

/// Parse one feature file's `source` into scenarios.
///
/// # Errors
///
/// Returns [`FeatureError::Parse`] for invalid Gherkin and
/// [`FeatureError::ExamplesRow`] for ragged examples tables.
pub fn parse_feature(path: &Path, source: &str) -> Result<Vec<PlannedScenario>, FeatureError> {
    let feature = Feature::parse(source, GherkinEnv::default()).map_err(|err| FeatureError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    let planner = Planner {
        path,
        feature: &feature,
    };
    let feature_tags = normalise_all(&feature.tags);
    let mut out = Vec::new();
    for scenario in &feature.scenarios {
        planner.plan(scenario, feature.background.as_ref(), None, &feature_tags, &mut out)?;
    }
    for rule in &feature.rules {
        let mut rule_tags = feature_tags.clone();
        rule_tags.extend(normalise_all(&rule.tags));
        for scenario in &rule.scenarios {
            planner.plan(
                scenario,
                feature.background.as_ref(),
                rule.background.as_ref(),
                &rule_tags,
                &mut out,
            )?;
        }
    }
    Ok(out)
}

fn normalise_all(tags: &[String]) -> Vec<String> {
    tags.iter().map(|tag| normalise_tag(tag)).collect()
}

struct Planner<'a> {
    path: &'a Path,
    feature: &'a Feature,
}

impl Planner<'_> {
    fn plan(
        &self,
        scenario: &Scenario,
        feature_background: Option<&Background>,
        rule_background: Option<&Background>,
        inherited: &[String],
        out: &mut Vec<PlannedScenario>,
    ) -> Result<(), FeatureError> {
        let mut tags = inherited.to_vec();
        tags.extend(normalise_all(&scenario.tags));
        let background: Vec<&Step> = feature_background
            .into_iter()
            .chain(rule_background)
            .flat_map(|b| b.steps.iter())
            .collect();

        let outlined: Vec<&Examples> = scenario
            .examples
            .iter()
            .filter(|e| e.table.is_some())
            .collect();
        if outlined.is_empty() {
            out.push(PlannedScenario {
                feature: self.feature.name.clone(),
                name: scenario.name.clone(),
                path: self.path.to_path_buf(),
                line: scenario.position.line,
                tags,
                steps: background
                    .iter()
                    .copied()
                    .chain(&scenario.steps)
                    .map(|step| plan_step(step, &[]))
                    .collect(),
            });
            return Ok(());
        }

        for examples in outlined {
            let Some(table) = &examples.table else {
                continue;
            };
            let Some((header, rows)) = table.rows.split_first() else {
                continue;
            };
            let mut example_tags = tags.clone();
            example_tags.extend(normalise_all(&examples.tags));
            for (offset, row) in rows.iter().enumerate() {
                if row.len() != header.len() {
                    return Err(FeatureError::ExamplesRow {
                        path: self.path.to_path_buf(),
                        line: examples.position.line,
                        expected: header.len(),
                        found: row.len(),
                    });
                }
                let bindings: Vec<(&str, &str)> = header
                    .iter()
                    .map(String::as_str)
                    .zip(row.iter().map(String::as_str))
                    .collect();
                out.push(PlannedScenario {
                    feature: self.feature.name.clone(),
                    name: substitute(&scenario.name, &bindings),
                    path: self.path.to_path_buf(),
                    line: table.position.line + offset + 1,
                    tags: example_tags.clone(),
                    steps: background
                        .iter()
                        .map(|step| plan_step(step, &[]))
                        .chain(scenario.steps.iter().map(|step| plan_step(step, &bindings)))
                        .collect(),
                });
            }
        }
        Ok(())
    }
}

fn plan_step(step: &Step, bindings: &[(&str, &str)]) -> PlannedStep {
    PlannedStep {
        keyword: step.keyword.trim().to_owned(),
        text: substitute(&step.value, bindings),
        table: step.table.as_ref().map(|table| {
            DataTable::new(
                table
                    .rows
                    .iter()
                    .map(|row| row.iter().map(|cell| substitute(cell, bindings)).collect())
                    .collect(),
            )
        }),
        doc_string: step
            .docstring
            .as_ref()
            .map(|doc| substitute(doc, bindings)),
        line: step.position.line,
    }
}

/// Replace every `<name>` placeholder with its bound value.
///
/// Unbound placeholders are left as written.
#[must_use]
pub fn substitute(text: &str, bindings: &[(&str, &str)]) -> String {
    bindings
        .iter()
        .fold(text.to_owned(), |acc, (name, value)| {
            acc.replace(&format!("<{name}>"), value)
        })
}

#[cfg(test)]
#[path = "features_tests.rs"]
mod tests;
