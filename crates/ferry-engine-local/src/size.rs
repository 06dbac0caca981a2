//! Size calculation for large-download gating.

use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use ferry_transfer_core::{NodeRef, SizeCalculator};
use walkdir::WalkDir;

use crate::plan::node_source;

/// Sums node sizes from the local source tree.
#[derive(Debug, Clone)]
pub struct LocalSizeCalculator {
    source_root: PathBuf,
}

impl LocalSizeCalculator {
    /// Calculator reading nodes below `source_root`.
    #[must_use]
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
        }
    }
}

#[async_trait]
impl SizeCalculator for LocalSizeCalculator {
    async fn total_size(&self, nodes: &[NodeRef]) -> anyhow::Result<u64> {
        let paths = nodes
            .iter()
            .map(|node| node_source(&self.source_root, node))
            .collect::<Result<Vec<PathBuf>, _>>()?;
        tokio::task::spawn_blocking(move || {
            let mut total = 0_u64;
            for path in paths {
                for entry in WalkDir::new(&path) {
                    let entry =
                        entry.with_context(|| format!("failed to walk {}", path.display()))?;
                    if entry.file_type().is_file() {
                        let metadata = entry.metadata().with_context(|| {
                            format!("failed to read metadata of {}", entry.path().display())
                        })?;
                        total = total.saturating_add(metadata.len());
                    }
                }
            }
            Ok(total)
        })
        .await
        .context("size calculation task failed")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sums_files_and_folders() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let docs = root.path().join("docs");
        std::fs::create_dir_all(docs.join("inner"))?;
        std::fs::write(docs.join("inner").join("a.bin"), vec![0_u8; 10])?;
        std::fs::write(docs.join("b.bin"), vec![0_u8; 5])?;
        std::fs::write(root.path().join("c.bin"), vec![0_u8; 7])?;

        let calculator = LocalSizeCalculator::new(root.path());
        let nodes = vec![NodeRef::folder(1, "docs", "/"), NodeRef::file(2, "c.bin", "/")];
        assert_eq!(calculator.total_size(&nodes).await?, 22);
        Ok(())
    }

    #[tokio::test]
    async fn missing_nodes_are_errors() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let calculator = LocalSizeCalculator::new(root.path());
        let result = calculator
            .total_size(&[NodeRef::file(1, "ghost.bin", "/")])
            .await;
        assert!(result.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn names_outside_the_root_are_errors() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let calculator = LocalSizeCalculator::new(root.path().join("inner"));
        std::fs::write(root.path().join("outside.bin"), vec![0_u8; 3])?;
        let result = calculator
            .total_size(&[NodeRef::file(1, "../outside.bin", "/")])
            .await;
        assert!(result.is_err());
        Ok(())
    }
}
