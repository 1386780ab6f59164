//! Test source discovery
//!
//! Walks one or more roots and turns every module file into a [`Module`]
//! before anything executes. Discovery order is the lexicographic order of
//! root-relative paths, with roots kept in the order they were given, so
//! report ordering is reproducible across runs.

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use crate::config::Settings;
use crate::error::RunnerError;
use crate::module::Module;
use crate::script::{ModuleLoader, ScriptLoader};

/// Identity of a discovered module
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleDescriptor {
    /// Root the module was discovered under
    pub root: PathBuf,
    /// Module file
    pub path: PathBuf,
    /// Directory components between the root and the file
    pub group_path: Vec<String>,
    /// File stem
    pub name: String,
    /// `group/…/name`, the key results are addressed by
    pub key: String,
}

impl ModuleDescriptor {
    pub fn new(
        root: impl Into<PathBuf>,
        path: impl Into<PathBuf>,
        group_path: &[String],
        name: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let key = group_path
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(name.as_str()))
            .collect::<Vec<_>>()
            .join("/");
        Self {
            root: root.into(),
            path: path.into(),
            group_path: group_path.to_vec(),
            name,
            key,
        }
    }

    /// Build the descriptor of `path` relative to `root`
    pub fn from_path(root: &Path, path: &Path) -> Option<Self> {
        let relative = path.strip_prefix(root).ok()?;
        let name = relative.file_stem()?.to_string_lossy().to_string();
        let group_path: Vec<String> = relative
            .parent()
            .map(|parent| {
                parent
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();
        Some(Self::new(root, path, &group_path, name))
    }

    /// Dotted `group.name`, used as JUnit suite name and classname
    pub fn class_name(&self) -> String {
        if self.group_path.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.group_path.join("."), self.name)
        }
    }
}

/// Discovery roots as given by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePaths(Vec<PathBuf>);

impl SourcePaths {
    /// No explicit source; `src_folders` from settings is used instead
    pub fn none() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.0
    }
}

impl From<PathBuf> for SourcePaths {
    fn from(path: PathBuf) -> Self {
        Self(vec![path])
    }
}

impl From<&Path> for SourcePaths {
    fn from(path: &Path) -> Self {
        Self(vec![path.to_path_buf()])
    }
}

impl From<&str> for SourcePaths {
    fn from(path: &str) -> Self {
        Self(vec![PathBuf::from(path)])
    }
}

impl From<Vec<PathBuf>> for SourcePaths {
    fn from(paths: Vec<PathBuf>) -> Self {
        Self(paths)
    }
}

impl From<&[PathBuf]> for SourcePaths {
    fn from(paths: &[PathBuf]) -> Self {
        Self(paths.to_vec())
    }
}

impl From<Option<PathBuf>> for SourcePaths {
    fn from(path: Option<PathBuf>) -> Self {
        Self(path.into_iter().collect())
    }
}

/// Ordered modules ready to run
#[derive(Debug, Clone)]
pub struct TestSource {
    roots: Vec<PathBuf>,
    modules: Vec<Module>,
}

impl TestSource {
    pub fn new(roots: Vec<PathBuf>, modules: Vec<Module>) -> Self {
        Self { roots, modules }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn into_modules(self) -> Vec<Module> {
        self.modules
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Roots as shown in error messages
    pub fn display_path(&self) -> String {
        self.roots
            .iter()
            .map(|root| root.display().to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Discovery over a fixed set of roots
pub struct SourceLoader {
    roots: Vec<PathBuf>,
    settings: Settings,
    loader: Arc<dyn ModuleLoader>,
}

impl SourceLoader {
    /// Resolve the roots to walk.
    ///
    /// Fails before any I/O when neither `paths` nor `settings.src_folders`
    /// names a source.
    pub fn new(paths: impl Into<SourcePaths>, settings: &Settings) -> Result<Self, RunnerError> {
        let paths = paths.into();
        let roots = if paths.is_empty() {
            settings.src_folders.clone()
        } else {
            paths.0
        };

        if roots.is_empty() {
            return Err(RunnerError::NoTestSource);
        }

        Ok(Self {
            roots,
            settings: settings.clone(),
            loader: Arc::new(ScriptLoader::new()),
        })
    }

    /// Use a different module loader (default: YAML scripts)
    pub fn with_loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// List module files without loading them
    pub fn list(&self) -> Result<Vec<ModuleDescriptor>, RunnerError> {
        collect_descriptors(&self.roots, &self.settings)
    }

    /// Walk the roots and load every module.
    ///
    /// An empty result is not an error here; the runner refuses to run it.
    pub async fn load(self) -> Result<TestSource, RunnerError> {
        let SourceLoader {
            roots,
            settings,
            loader,
        } = self;

        tokio::task::spawn_blocking(move || {
            let descriptors = collect_descriptors(&roots, &settings)?;
            let mut modules = Vec::with_capacity(descriptors.len());
            for descriptor in descriptors {
                match loader.load(&descriptor)? {
                    Some(module) => modules.push(module),
                    None => tracing::debug!("module {} is disabled", descriptor.key),
                }
            }
            tracing::debug!("discovered {} modules", modules.len());
            Ok(TestSource::new(roots, modules))
        })
        .await
        .map_err(|e| RunnerError::Internal(format!("discovery task failed: {}", e)))?
    }
}

/// Discover and load test modules.
///
/// The outer `Result` is the synchronous configuration check; the returned
/// future performs the filesystem work.
pub fn read_test_source(
    paths: impl Into<SourcePaths>,
    settings: &Settings,
) -> Result<impl Future<Output = Result<TestSource, RunnerError>> + Send + 'static, RunnerError> {
    let loader = SourceLoader::new(paths, settings)?;
    Ok(loader.load())
}

/// Collect descriptors for every root, in discovery order
fn collect_descriptors(roots: &[PathBuf], settings: &Settings) -> Result<Vec<ModuleDescriptor>, RunnerError> {
    let mut seen = HashSet::new();
    let mut all = Vec::new();

    for root in roots {
        for descriptor in collect_root(root, settings)? {
            if !seen.insert(descriptor.key.clone()) {
                return Err(RunnerError::DuplicateModule {
                    key: descriptor.key,
                });
            }
            all.push(descriptor);
        }
    }

    Ok(all)
}

/// Collect module files from a single root
fn collect_root(root: &Path, settings: &Settings) -> Result<Vec<ModuleDescriptor>, RunnerError> {
    if !root.exists() {
        return Err(RunnerError::SourceNotFound {
            path: root.to_path_buf(),
        });
    }

    // A single file is its own module, with an empty group path.
    if root.is_file() {
        let parent = root.parent().unwrap_or(Path::new(""));
        return Ok(Some(root)
            .filter(|path| has_module_extension(path, settings))
            .and_then(|path| ModuleDescriptor::from_path(parent, path))
            .filter(|d| is_selected(d, settings))
            .into_iter()
            .collect());
    }

    let mut descriptors: Vec<ModuleDescriptor> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!("skipping unreadable entry: {}", err);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter(|e| has_module_extension(e.path(), settings))
        .filter_map(|e| ModuleDescriptor::from_path(root, e.path()))
        .filter(|d| is_selected(d, settings))
        .collect();

    descriptors.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(descriptors)
}

fn has_module_extension(path: &Path, settings: &Settings) -> bool {
    path.extension()
        .is_some_and(|ext| settings.is_module_extension(&ext.to_string_lossy()))
}

/// Exclude patterns and the name filter, applied to the module key
fn is_selected(descriptor: &ModuleDescriptor, settings: &Settings) -> bool {
    !settings.is_excluded(&descriptor.key) && settings.matches_filter(&descriptor.key)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
}
