//! Single-file model persistence: a fixed header followed by the bincode
//! encoded forest.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{
    dump::{decode, encode, read_file, write_file},
    error::RfError,
    forest::RandomForest,
};

const MODEL_VERSION: u32 = 1;

/// Decoded before the forest so a version mismatch is reported without
/// attempting to decode an incompatible body.
#[derive(Debug, Serialize, Deserialize)]
struct ModelHeader {
    version: u32,
    n_trees: u64,
    n_features: u64,
    n_classes: u64,
}

impl ModelHeader {
    fn of(forest: &RandomForest) -> Self {
        Self {
            version: MODEL_VERSION,
            n_trees: forest.trees.len() as u64,
            n_features: forest.n_features as u64,
            n_classes: forest.n_classes as u64,
        }
    }

    fn describes(&self, forest: &RandomForest) -> bool {
        self.n_trees == forest.trees.len() as u64
            && self.n_features == forest.n_features as u64
            && self.n_classes == forest.n_classes as u64
    }
}

impl RandomForest {
    /// Write the whole forest to `path`.
    ///
    /// Cached importances are left out and rebuilt on first use after
    /// [`RandomForest::load`].
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`RfError::SerializeModel`] | bincode encoding failed |
    /// | [`RfError::WriteModel`] | the file cannot be written |
    #[instrument(skip(self), fields(path = %path.as_ref().display()))]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), RfError> {
        let path = path.as_ref();
        write_file(path, |w| {
            encode(w, &ModelHeader::of(self))?;
            encode(w, self)
        })?;
        info!(n_trees = self.trees.len(), "model saved");
        Ok(())
    }

    /// Read a forest written by [`RandomForest::save`].
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`RfError::ReadModel`] | the file cannot be opened |
    /// | [`RfError::DeserializeModel`] | bincode decoding failed |
    /// | [`RfError::IncompatibleModelVersion`] | the header carries another version |
    /// | [`RfError::CorruptModel`] | header and body disagree, or a tree is malformed |
    #[instrument(fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RfError> {
        let path = path.as_ref();
        let (header, forest) = read_file(path, |r| {
            let header: ModelHeader = decode(r, path)?;
            if header.version != MODEL_VERSION {
                return Err(RfError::IncompatibleModelVersion {
                    expected: MODEL_VERSION,
                    found: header.version,
                    path: path.to_path_buf(),
                });
            }
            let forest: RandomForest = decode(r, path)?;
            Ok((header, forest))
        })?;

        if !header.describes(&forest) || forest.trees.is_empty() || forest.n_threads == 0 {
            return Err(RfError::CorruptModel {
                path: path.to_path_buf(),
                reason: format!(
                    "header declares {} trees, {} features, {} classes; body has {}, {}, {}",
                    header.n_trees,
                    header.n_features,
                    header.n_classes,
                    forest.trees.len(),
                    forest.n_features,
                    forest.n_classes
                ),
            });
        }
        for (i, tree) in forest.trees.iter().enumerate() {
            if tree.n_features != forest.n_features || tree.n_classes != forest.n_classes {
                return Err(RfError::CorruptModel {
                    path: path.to_path_buf(),
                    reason: format!("tree {i} disagrees with the forest shape"),
                });
            }
            tree.check_structure().map_err(|reason| RfError::CorruptModel {
                path: path.to_path_buf(),
                reason: format!("tree {i}: {reason}"),
            })?;
        }
        debug!(n_trees = forest.trees.len(), "model loaded");
        Ok(forest)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{
        config::RandomForestConfig,
        dataset::SparseColumnDataset,
        example::SparseExample,
        node::{FeatureIndex, Node, NodeIndex},
    };

    fn fitted() -> RandomForest {
        let examples: Vec<SparseExample> = [1.0, 2.0, 3.0, 10.0, 11.0, 12.0]
            .iter()
            .enumerate()
            .map(|(i, &v)| SparseExample::from_entries(Some(usize::from(i >= 3)), [(0, v)]))
            .collect();
        let ds = SparseColumnDataset::build(&examples, 2, 2, None).unwrap();
        RandomForestConfig::new(5).unwrap().with_seed(42).fit(&ds).unwrap()
    }

    #[test]
    fn saved_forest_predicts_the_same() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("forest.bin");
        let forest = fitted();
        forest.save(&path).unwrap();
        let loaded = RandomForest::load(&path).unwrap();

        let probe = vec![
            SparseExample::from_entries(None, [(0, 1.5)]),
            SparseExample::from_entries(None, [(0, 11.0)]),
            SparseExample::from_entries(None, [(1, 5.0)]),
        ];
        assert_eq!(
            forest.predict_proba(&probe).unwrap(),
            loaded.predict_proba(&probe).unwrap()
        );
        assert_eq!(loaded.n_trees(), 5);
        assert_eq!(loaded.feature_importances(), forest.feature_importances());
    }

    #[test]
    fn missing_file() {
        let dir = TempDir::new().unwrap();
        let err = RandomForest::load(dir.path().join("absent.bin")).unwrap_err();
        assert!(matches!(err, RfError::ReadModel { .. }));
    }

    #[test]
    fn truncated_body() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.bin");
        let mut bytes = Vec::new();
        encode(&mut bytes, &ModelHeader::of(&fitted())).unwrap();
        std::fs::write(&path, &bytes).unwrap();
        let err = RandomForest::load(&path).unwrap_err();
        assert!(matches!(err, RfError::DeserializeModel { .. }));
    }

    #[test]
    fn other_version_rejected_before_body() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v9.bin");
        let mut header = ModelHeader::of(&fitted());
        header.version = 9;
        let mut bytes = Vec::new();
        encode(&mut bytes, &header).unwrap();
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            RandomForest::load(&path),
            Err(RfError::IncompatibleModelVersion { expected: 1, found: 9, .. })
        ));
    }

    fn save_tampered(path: &Path, tamper: impl Fn(&mut Node)) {
        let mut forest = fitted();
        for tree in &mut forest.trees {
            tree.nodes.iter_mut().for_each(&tamper);
        }
        forest.save(path).unwrap();
    }

    #[test]
    fn dangling_child_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dangling.bin");
        save_tampered(&path, |node| {
            if let Node::Split { left, .. } = node {
                *left = NodeIndex::new(9999);
            }
        });
        assert!(matches!(
            RandomForest::load(&path),
            Err(RfError::CorruptModel { .. })
        ));
    }

    #[test]
    fn out_of_range_split_feature_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feature.bin");
        save_tampered(&path, |node| {
            if let Node::Split { feature, .. } = node {
                *feature = FeatureIndex::new(7);
            }
        });
        assert!(matches!(
            RandomForest::load(&path),
            Err(RfError::CorruptModel { .. })
        ));
    }

    #[test]
    fn short_leaf_distribution_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("leaf.bin");
        save_tampered(&path, |node| {
            if let Node::Leaf { distribution, .. } = node {
                distribution.pop();
            }
        });
        assert!(matches!(
            RandomForest::load(&path),
            Err(RfError::CorruptModel { .. })
        ));
    }

    #[test]
    fn header_mismatch_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mismatch.bin");
        let forest = fitted();
        let mut header = ModelHeader::of(&forest);
        header.n_trees = 4;
        let mut bytes = Vec::new();
        encode(&mut bytes, &header).unwrap();
        encode(&mut bytes, &forest).unwrap();
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            RandomForest::load(&path),
            Err(RfError::CorruptModel { .. })
        ));
    }
}
