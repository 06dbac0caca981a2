//! Expansion of a trigger into individual file copies.

use std::fs;
use std::path::{Component, Path, PathBuf};

use ferry_transfer_core::{NodeRef, TransferTrigger};
use walkdir::WalkDir;

use crate::error::LocalEngineError;

const CONTENT_URI_PREFIX: &str = "content://";

/// A single source file and the path it is copied to.
#[derive(Debug)]
pub struct PlannedCopy {
    /// Local file read by the copy.
    pub source: PathBuf,
    /// Final location of the copy.
    pub target: PathBuf,
    /// Size of the source at enumeration time.
    pub expected_bytes: u64,
    /// Set when the entry cannot be copied at all.
    pub problem: Option<LocalEngineError>,
}

impl PlannedCopy {
    fn broken(source: PathBuf, target: PathBuf, problem: LocalEngineError) -> Self {
        Self {
            source,
            target,
            expected_bytes: 0,
            problem: Some(problem),
        }
    }
}

/// Where a node lives under the engine's source root.
///
/// # Errors
///
/// Returns [`LocalEngineError::UnsafeName`] when the node name is empty,
/// absolute, `.`, `..` or holds a separator.
pub fn node_source(source_root: &Path, node: &NodeRef) -> Result<PathBuf, LocalEngineError> {
    plain_name(&node.name)?;
    let mut path = source_root.to_path_buf();
    path.extend(node.parent_components());
    path.push(&node.name);
    Ok(path)
}

fn plain_name(name: &str) -> Result<(), LocalEngineError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains('/') => Ok(()),
        _ => Err(LocalEngineError::UnsafeName {
            name: name.to_string(),
        }),
    }
}

/// Enumerate every file the trigger moves into `target_dir`.
///
/// Folders expand recursively and keep their structure under a directory
/// named after the folder. Missing or unsupported sources still yield an
/// entry so each one is reported as a failed transfer.
#[must_use]
pub fn plan(source_root: &Path, target_dir: &Path, trigger: &TransferTrigger) -> Vec<PlannedCopy> {
    match trigger {
        TransferTrigger::UploadChatAttachment { sources, .. } => sources
            .iter()
            .map(|raw| plan_upload(target_dir, raw))
            .collect(),
        _ => trigger
            .nodes()
            .iter()
            .flat_map(|node| plan_node(source_root, target_dir, node))
            .collect(),
    }
}

fn plan_node(source_root: &Path, target_dir: &Path, node: &NodeRef) -> Vec<PlannedCopy> {
    let source = match node_source(source_root, node) {
        Ok(source) => source,
        Err(problem) => {
            return vec![PlannedCopy::broken(
                source_root.to_path_buf(),
                target_dir.to_path_buf(),
                problem,
            )];
        }
    };
    let target = target_dir.join(&node.name);
    if !source.exists() {
        let problem = LocalEngineError::SourceMissing {
            path: source.clone(),
        };
        return vec![PlannedCopy::broken(source, target, problem)];
    }
    if !node.is_folder {
        return vec![plan_file(source, target)];
    }

    let mut copies = Vec::new();
    for entry in WalkDir::new(&source).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map_or_else(|| source.clone(), Path::to_path_buf);
                let problem = LocalEngineError::Io {
                    operation: "plan.walk",
                    path: path.clone(),
                    source: err.into(),
                };
                copies.push(PlannedCopy::broken(path, target.clone(), problem));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(&source) else {
            continue;
        };
        copies.push(plan_file(entry.path().to_path_buf(), target.join(relative)));
    }
    copies
}

fn plan_upload(target_dir: &Path, raw: &str) -> PlannedCopy {
    let source = PathBuf::from(raw);
    let name = source
        .file_name()
        .map_or_else(|| PathBuf::from(raw), PathBuf::from);
    let target = target_dir.join(name);
    if raw.starts_with(CONTENT_URI_PREFIX) {
        let problem = LocalEngineError::UnsupportedSource {
            source: raw.to_string(),
        };
        return PlannedCopy::broken(source, target, problem);
    }
    if !source.is_file() {
        let problem = LocalEngineError::SourceMissing {
            path: source.clone(),
        };
        return PlannedCopy::broken(source, target, problem);
    }
    plan_file(source, target)
}

fn plan_file(source: PathBuf, target: PathBuf) -> PlannedCopy {
    match fs::metadata(&source) {
        Ok(metadata) => PlannedCopy {
            source,
            target,
            expected_bytes: metadata.len(),
            problem: None,
        },
        Err(err) => {
            let problem = LocalEngineError::Io {
                operation: "plan.metadata",
                path: source.clone(),
                source: err,
            };
            PlannedCopy::broken(source, target, problem)
        }
    }
}
