//! JUnit XML report writer
//!
//! One document per module at `<root>/<group...>/<prefix><name>.xml`. The
//! output depends only on the results tree, so writing the same tree twice
//! yields identical files.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::config::OutputFolder;
use crate::error::ReportError;
use crate::results::{ModuleResult, Outcome, ResultsTree};

/// Writes JUnit XML files under an output root
#[derive(Debug, Clone)]
pub struct JunitWriter {
    root: PathBuf,
}

impl JunitWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Destination of a module's report; group folders mirror the source tree
    pub fn report_path(&self, module: &ModuleResult) -> PathBuf {
        let mut path = self.root.clone();
        for group in &module.descriptor.group_path {
            path.push(group);
        }
        path.push(format!("{}{}.xml", module.report_prefix, module.name()));
        path
    }

    /// Write one file per module and return the written paths in module order
    pub async fn write(&self, results: &ResultsTree) -> Result<Vec<PathBuf>, ReportError> {
        let mut written = Vec::with_capacity(results.len());

        for module in results.modules() {
            let path = self.report_path(module);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| ReportError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }

            tokio::fs::write(&path, render_module(module))
                .await
                .map_err(|source| ReportError::Io {
                    path: path.clone(),
                    source,
                })?;
            tracing::debug!("wrote {}", path.display());
            written.push(path);
        }

        Ok(written)
    }
}

/// Write JUnit reports for `results`, or nothing when output is disabled
pub async fn write(results: &ResultsTree, output: &OutputFolder) -> Result<(), ReportError> {
    match output.path() {
        Some(root) => {
            JunitWriter::new(root).write(results).await?;
            Ok(())
        }
        None => Ok(()),
    }
}

/// Render the XML document of one module
pub fn render_module(module: &ModuleResult) -> String {
    let class_name = escape_xml(&module.descriptor.class_name());
    let failures = module.count(Outcome::Failed);
    // Hook and session errors belong to no testcase but still fail the suite.
    let errors = module.count(Outcome::Errored) + module.errors.len();
    let skipped = module.count(Outcome::Skipped);
    let tests = module.tests();

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\" ?>\n");
    let _ = writeln!(
        out,
        "<testsuites errors=\"{}\" failures=\"{}\" tests=\"{}\">",
        errors, failures, tests
    );
    let _ = writeln!(
        out,
        "  <testsuite name=\"{}\" errors=\"{}\" failures=\"{}\" hostname=\"\" id=\"\" package=\"{}\" skipped=\"{}\" tests=\"{}\" time=\"{:.4}\">",
        class_name,
        errors,
        failures,
        escape_xml(module.name()),
        skipped,
        tests,
        module.elapsed.as_secs_f64()
    );

    for testcase in &module.testcases {
        let _ = writeln!(
            out,
            "    <testcase name=\"{}\" classname=\"{}\" time=\"{:.4}\" assertions=\"{}\">",
            escape_xml(&testcase.name),
            class_name,
            testcase.elapsed.as_secs_f64(),
            testcase.assertions.len()
        );

        match testcase.outcome {
            Outcome::Passed => {}
            Outcome::Failed => {
                for message in testcase.failure_messages() {
                    let message = escape_xml(message);
                    let _ = writeln!(out, "      <failure message=\"{}\">{}</failure>", message, message);
                }
            }
            Outcome::Errored => {
                // Assertions that failed before the error are still failures.
                for message in testcase.failure_messages() {
                    let message = escape_xml(message);
                    let _ = writeln!(out, "      <failure message=\"{}\">{}</failure>", message, message);
                }
                if let Some(err) = &testcase.error {
                    let message = escape_xml(&err.to_string());
                    let _ = writeln!(
                        out,
                        "      <error message=\"{}\" type=\"{}\">{}</error>",
                        message,
                        err.classification(),
                        message
                    );
                }
            }
            Outcome::Skipped => {
                let reason = escape_xml(testcase.skip_reason.as_deref().unwrap_or_default());
                let _ = writeln!(out, "      <skipped message=\"{}\" />", reason);
            }
        }

        out.push_str("    </testcase>\n");
    }

    if !module.errors.is_empty() {
        out.push_str("    <system-err>");
        for err in &module.errors {
            let _ = write!(out, "\n{}: {}", escape_xml(&err.origin), escape_xml(&err.error.to_string()));
        }
        out.push_str("\n    </system-err>\n");
    }

    out.push_str("  </testsuite>\n");
    out.push_str("</testsuites>\n");
    out
}

/// Escape XML special characters
pub fn escape_xml(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
