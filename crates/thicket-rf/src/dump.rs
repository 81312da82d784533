//! Per-node binary dump: one header file plus one file per tree.
//!
//! `<base>0` holds the forest header, `<base>1 ..= <base>n` one tree each.
//! A tree file is a header followed by node records, parents before
//! children: the root, then for each internal node popped from a stack its
//! left and right records. Integers and floats use bincode's fixed-width
//! little-endian layout.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
    sync::OnceLock,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{
    error::RfError,
    forest::RandomForest,
    node::{FeatureIndex, Node, NodeIndex, normalize},
    tree::DecisionTree,
};

/// Leaf index stored for internal nodes.
const INTERNAL: i32 = -1;

#[derive(Debug, Serialize, Deserialize)]
struct ForestHeader {
    n_trees: u32,
    n_threads: u32,
    n_classes: u32,
    n_features: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct TreeHeader {
    n_classes: u32,
    n_features: u32,
    n_leaves: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct SplitRecord {
    categorical: bool,
    feature: u32,
    threshold: f64,
    gain: f64,
    n_classes: u32,
}

/// Path of part `index` of a dump rooted at `base`.
pub(crate) fn part_path(base: &Path, index: usize) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(index.to_string());
    PathBuf::from(name)
}

fn to_u32(value: usize, path: &Path, what: &str) -> Result<u32, RfError> {
    u32::try_from(value).map_err(|_| RfError::CorruptModel {
        path: path.to_path_buf(),
        reason: format!("{what} {value} does not fit the dump format"),
    })
}

impl RandomForest {
    /// Write the forest as `<base>0` (header) and `<base>1 ..= <base>n` (trees).
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`RfError::WriteModel`] | a file cannot be created or flushed |
    /// | [`RfError::SerializeModel`] | a record cannot be encoded |
    /// | [`RfError::CorruptModel`] | a count exceeds the format's `u32` range |
    #[instrument(skip(self), fields(base = %base.as_ref().display(), n_trees = self.trees.len()))]
    pub fn dump(&self, base: impl AsRef<Path>) -> Result<(), RfError> {
        let base = base.as_ref();
        let header_path = part_path(base, 0);
        let header = ForestHeader {
            n_trees: to_u32(self.trees.len(), &header_path, "tree count")?,
            n_threads: to_u32(self.n_threads, &header_path, "thread count")?,
            n_classes: to_u32(self.n_classes, &header_path, "class count")?,
            n_features: to_u32(self.n_features, &header_path, "feature count")?,
        };
        write_file(&header_path, |w| encode(w, &header))?;

        for (i, tree) in self.trees.iter().enumerate() {
            let path = part_path(base, i + 1);
            write_file(&path, |w| tree.write_records(w, &path))?;
        }

        info!(n_files = self.trees.len() + 1, "forest dumped");
        Ok(())
    }

    /// Rebuild a forest from files written by [`RandomForest::dump`].
    ///
    /// Internal nodes come back without their training frequency, and every
    /// node's sample count is 0.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`RfError::ReadModel`] | a file cannot be opened |
    /// | [`RfError::DeserializeModel`] | a record cannot be decoded |
    /// | [`RfError::CorruptModel`] | counts disagree or the node structure is invalid |
    #[instrument(fields(base = %base.as_ref().display()))]
    pub fn load_dump(base: impl AsRef<Path>) -> Result<Self, RfError> {
        let base = base.as_ref();
        let header_path = part_path(base, 0);
        let header: ForestHeader = read_file(&header_path, |r| decode(r, &header_path))?;
        if header.n_trees == 0 || header.n_threads == 0 || header.n_classes == 0 {
            return Err(RfError::CorruptModel {
                path: header_path,
                reason: format!("invalid forest header {header:?}"),
            });
        }

        let n_classes = header.n_classes as usize;
        let n_features = header.n_features as usize;
        let mut trees = Vec::with_capacity(header.n_trees as usize);
        for i in 1..=header.n_trees as usize {
            let path = part_path(base, i);
            let tree = read_file(&path, |r| DecisionTree::read_records(r, &path))?;
            if tree.n_classes != n_classes || tree.n_features != n_features {
                return Err(RfError::CorruptModel {
                    path,
                    reason: format!(
                        "tree declares {} classes and {} features, forest declares {} and {}",
                        tree.n_classes, tree.n_features, n_classes, n_features
                    ),
                });
            }
            trees.push(tree);
        }

        debug!(n_trees = trees.len(), n_classes, n_features, "forest dump loaded");
        Ok(RandomForest::from_trees(
            trees,
            header.n_threads as usize,
            n_features,
            n_classes,
        ))
    }
}

impl DecisionTree {
    fn write_records(&self, w: &mut impl Write, path: &Path) -> Result<(), RfError> {
        let header = TreeHeader {
            n_classes: to_u32(self.n_classes, path, "class count")?,
            n_features: to_u32(self.n_features, path, "feature count")?,
            n_leaves: to_u32(self.leaves.len(), path, "leaf count")?,
        };
        encode(w, &header)?;

        self.write_node(w, 0, path)?;
        let mut stack = Vec::new();
        if !self.nodes[0].is_leaf() {
            stack.push(0usize);
        }
        while let Some(idx) = stack.pop() {
            if let Node::Split { left, right, .. } = &self.nodes[idx] {
                self.write_node(w, left.index(), path)?;
                self.write_node(w, right.index(), path)?;
                if !self.nodes[right.index()].is_leaf() {
                    stack.push(right.index());
                }
                if !self.nodes[left.index()].is_leaf() {
                    stack.push(left.index());
                }
            }
        }
        Ok(())
    }

    fn write_node(&self, w: &mut impl Write, idx: usize, path: &Path) -> Result<(), RfError> {
        match &self.nodes[idx] {
            Node::Split {
                feature,
                categorical,
                threshold,
                gain,
                ..
            } => {
                encode(w, &INTERNAL)?;
                encode(
                    w,
                    &SplitRecord {
                        categorical: *categorical,
                        feature: to_u32(feature.index(), path, "feature id")?,
                        threshold: *threshold,
                        gain: *gain,
                        n_classes: to_u32(self.n_classes, path, "class count")?,
                    },
                )
            }
            Node::Leaf {
                leaf_index,
                frequency,
                ..
            } => {
                let leaf_index = i32::try_from(*leaf_index).map_err(|_| RfError::CorruptModel {
                    path: path.to_path_buf(),
                    reason: format!("leaf index {leaf_index} does not fit the dump format"),
                })?;
                encode(w, &leaf_index)?;
                encode(w, &to_u32(frequency.len(), path, "class count")?)?;
                for value in frequency {
                    encode(w, value)?;
                }
                Ok(())
            }
        }
    }

    fn read_records(r: &mut impl Read, path: &Path) -> Result<Self, RfError> {
        let header: TreeHeader = decode(r, path)?;
        let n_classes = header.n_classes as usize;
        let n_features = header.n_features as usize;
        let n_leaves = header.n_leaves as usize;
        let corrupt = |reason: String| RfError::CorruptModel {
            path: path.to_path_buf(),
            reason,
        };
        if n_classes == 0 || n_features == 0 || n_leaves == 0 {
            return Err(corrupt(format!("invalid tree header {header:?}")));
        }

        let mut reader = NodeReader {
            nodes: Vec::new(),
            leaves: vec![None; n_leaves],
            n_classes,
            n_features,
            path,
        };

        reader.read_node(r)?;
        let mut stack = Vec::new();
        if !reader.nodes[0].is_leaf() {
            stack.push(0usize);
        }
        while let Some(parent) = stack.pop() {
            let left = reader.read_node(r)?;
            let right = reader.read_node(r)?;
            if let Node::Split {
                left: l, right: rt, ..
            } = &mut reader.nodes[parent]
            {
                *l = NodeIndex::new(left);
                *rt = NodeIndex::new(right);
            }
            if !reader.nodes[right].is_leaf() {
                stack.push(right);
            }
            if !reader.nodes[left].is_leaf() {
                stack.push(left);
            }
        }

        let leaves = reader
            .leaves
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.ok_or_else(|| corrupt(format!("leaf {i} missing from node records")))
            })
            .collect::<Result<Vec<NodeIndex>, RfError>>()?;

        Ok(DecisionTree {
            nodes: reader.nodes,
            leaves,
            n_features,
            n_classes,
            max_features: n_features,
            importance: OnceLock::new(),
        })
    }
}

/// Arena under construction while node records are decoded.
struct NodeReader<'p> {
    nodes: Vec<Node>,
    leaves: Vec<Option<NodeIndex>>,
    n_classes: usize,
    n_features: usize,
    path: &'p Path,
}

impl NodeReader<'_> {
    /// Decode one record, append it to the arena, and return its index.
    fn read_node(&mut self, r: &mut impl Read) -> Result<usize, RfError> {
        let idx = self.nodes.len();
        let leaf_index: i32 = decode(r, self.path)?;
        let node = if leaf_index == INTERNAL {
            let record: SplitRecord = decode(r, self.path)?;
            if record.feature as usize >= self.n_features {
                return Err(self.corrupt(format!(
                    "split feature {} out of range for {} features",
                    record.feature, self.n_features
                )));
            }
            self.check_classes(record.n_classes)?;
            Node::Split {
                feature: FeatureIndex::new(record.feature as usize),
                categorical: record.categorical,
                threshold: record.threshold,
                gain: record.gain,
                left: NodeIndex::new(0),
                right: NodeIndex::new(0),
                frequency: Vec::new(),
                n_samples: 0,
            }
        } else {
            let slot = usize::try_from(leaf_index)
                .ok()
                .filter(|&i| i < self.leaves.len())
                .ok_or_else(|| self.corrupt(format!("leaf index {leaf_index} out of range")))?;
            if self.leaves[slot].is_some() {
                return Err(self.corrupt(format!("leaf index {slot} appears twice")));
            }
            let n_classes: u32 = decode(r, self.path)?;
            self.check_classes(n_classes)?;
            let frequency = (0..self.n_classes)
                .map(|_| decode::<f64>(r, self.path))
                .collect::<Result<Vec<f64>, RfError>>()?;
            self.leaves[slot] = Some(NodeIndex::new(idx));
            Node::Leaf {
                leaf_index: slot,
                distribution: normalize(&frequency),
                frequency,
                n_samples: 0,
            }
        };
        self.nodes.push(node);
        Ok(idx)
    }

    fn check_classes(&self, n_classes: u32) -> Result<(), RfError> {
        if n_classes as usize != self.n_classes {
            return Err(self.corrupt(format!(
                "node record declares {n_classes} classes, tree declares {}",
                self.n_classes
            )));
        }
        Ok(())
    }

    fn corrupt(&self, reason: String) -> RfError {
        RfError::CorruptModel {
            path: self.path.to_path_buf(),
            reason,
        }
    }
}

pub(crate) fn encode<T: Serialize>(w: &mut impl Write, value: &T) -> Result<(), RfError> {
    bincode::serialize_into(w, value).map_err(|source| RfError::SerializeModel { source })
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    r: &mut impl Read,
    path: &Path,
) -> Result<T, RfError> {
    bincode::deserialize_from(r).map_err(|source| RfError::DeserializeModel {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn write_file(
    path: &Path,
    body: impl FnOnce(&mut BufWriter<File>) -> Result<(), RfError>,
) -> Result<(), RfError> {
    let file = File::create(path).map_err(|source| RfError::WriteModel {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    body(&mut writer)?;
    writer.flush().map_err(|source| RfError::WriteModel {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn read_file<T>(
    path: &Path,
    body: impl FnOnce(&mut BufReader<File>) -> Result<T, RfError>,
) -> Result<T, RfError> {
    let file = File::open(path).map_err(|source| RfError::ReadModel {
        path: path.to_path_buf(),
        source,
    })?;
    body(&mut BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{
        config::RandomForestConfig,
        dataset::{DatasetBuilder, SparseColumnDataset},
        example::SparseExample,
    };

    fn examples() -> Vec<SparseExample> {
        (0..30)
            .map(|i| {
                let label = (i * 5 + i / 4) % 3;
                let mut ex = SparseExample::labeled(label);
                ex.push(0, (i % 7) as f64 - 3.0);
                ex.push(1, ((i * 3) % 5) as f64);
                if i % 2 == 0 {
                    ex.push(2, label as f64 + 1.0);
                }
                ex
            })
            .collect()
    }

    #[test]
    fn part_paths_append_index() {
        let base = Path::new("/tmp/model/forest_");
        assert_eq!(part_path(base, 0), PathBuf::from("/tmp/model/forest_0"));
        assert_eq!(part_path(base, 12), PathBuf::from("/tmp/model/forest_12"));
    }

    #[test]
    fn dump_round_trip_preserves_predictions() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("forest");
        let examples = examples();
        let ds = DatasetBuilder::new(3, 3)
            .with_categorical(vec![2])
            .build(&examples)
            .unwrap();
        let forest = RandomForestConfig::new(4)
            .unwrap()
            .with_n_threads(2)
            .fit(&ds)
            .unwrap();

        forest.dump(&base).unwrap();
        for i in 0..=4 {
            assert!(part_path(&base, i).exists());
        }

        let loaded = RandomForest::load_dump(&base).unwrap();
        assert_eq!(loaded.n_trees(), 4);
        assert_eq!(loaded.n_threads(), 2);
        assert_eq!(loaded.n_classes(), 3);
        assert_eq!(loaded.n_features(), 3);
        assert_eq!(
            forest.predict_proba(&examples).unwrap(),
            loaded.predict_proba(&examples).unwrap()
        );
        assert_eq!(forest.apply(&examples).unwrap(), loaded.apply(&examples).unwrap());
        for (a, b) in forest.trees().iter().zip(loaded.trees()) {
            assert_eq!(a.n_nodes(), b.n_nodes());
            assert_eq!(a.feature_importances(), b.feature_importances());
        }
    }

    #[test]
    fn header_layout_is_fixed_width() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("m");
        let examples = vec![
            SparseExample::from_entries(Some(0), [(0, 1.0)]),
            SparseExample::from_entries(Some(1), [(0, 2.0)]),
        ];
        let ds = SparseColumnDataset::build(&examples, 2, 1, None).unwrap();
        let forest = RandomForestConfig::new(1).unwrap().fit(&ds).unwrap();
        forest.dump(&base).unwrap();

        let header = std::fs::read(part_path(&base, 0)).unwrap();
        assert_eq!(header, [1, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 1, 0, 0, 0]);

        // header (12) + internal root (4 + 1 + 4 + 8 + 8 + 4) + two leaves (4 + 4 + 16 each)
        let tree = std::fs::read(part_path(&base, 1)).unwrap();
        assert_eq!(tree.len(), 12 + 29 + 2 * 24);
        assert_eq!(&tree[12..16], &(-1i32).to_le_bytes());
    }

    #[test]
    fn missing_tree_file_errors() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("f");
        let ds = SparseColumnDataset::build(&examples(), 3, 3, None).unwrap();
        let forest = RandomForestConfig::new(2).unwrap().fit(&ds).unwrap();
        forest.dump(&base).unwrap();
        std::fs::remove_file(part_path(&base, 2)).unwrap();
        assert!(matches!(
            RandomForest::load_dump(&base),
            Err(RfError::ReadModel { .. })
        ));
    }

    #[test]
    fn truncated_tree_file_errors() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("t");
        let ds = SparseColumnDataset::build(&examples(), 3, 3, None).unwrap();
        let forest = RandomForestConfig::new(1).unwrap().fit(&ds).unwrap();
        forest.dump(&base).unwrap();
        let path = part_path(&base, 1);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        assert!(matches!(
            RandomForest::load_dump(&base),
            Err(RfError::DeserializeModel { .. })
        ));
    }
}
