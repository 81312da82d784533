//! Graphviz export of fitted trees.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use tracing::{info, instrument};

use crate::{dump::part_path, error::RfError, forest::RandomForest, node::Node, tree::DecisionTree};

/// How a forest is laid out in dot files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DotMode {
    /// One `digraph` per tree, written to `<path>1 ..= <path>n`.
    SeparateTrees,
    /// All trees in a single `digraph` at `<path>`.
    WholeForest,
}

impl DecisionTree {
    /// Write this tree as a standalone `digraph`.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from `out`.
    pub fn write_dot(&self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "digraph Tree {{")?;
        self.write_dot_body(out, 0)?;
        writeln!(out, "}}")
    }

    /// Write node and edge lines, numbering nodes from `first_id`.
    /// Returns the next free id.
    fn write_dot_body(&self, out: &mut impl Write, first_id: usize) -> std::io::Result<usize> {
        let mut next_id = first_id;
        // (arena index, dot id)
        let mut stack = vec![(0usize, next_id)];
        next_id += 1;
        while let Some((idx, id)) = stack.pop() {
            match &self.nodes[idx] {
                Node::Split {
                    feature,
                    categorical,
                    threshold,
                    gain,
                    left,
                    right,
                    ..
                } => {
                    let op = if *categorical { "=" } else { "<=" };
                    writeln!(
                        out,
                        "{id} [label=\"X[{feature}] {op} {threshold:.3}\\ngain= {gain:.3}\"] ;"
                    )?;
                    let left_id = next_id;
                    let right_id = next_id + 1;
                    next_id += 2;
                    writeln!(out, "{id} -> {left_id} ;")?;
                    writeln!(out, "{id} -> {right_id} ;")?;
                    // right pushed first so the left subtree is written first
                    stack.push((right.index(), right_id));
                    stack.push((left.index(), left_id));
                }
                Node::Leaf { distribution, .. } => {
                    let probs: Vec<String> =
                        distribution.iter().map(|p| format!("{p:.3}")).collect();
                    writeln!(
                        out,
                        "{id} [label=\"predict proba = [ {} ]\", shape=\"box\"] ;",
                        probs.join(" ")
                    )?;
                }
            }
        }
        Ok(next_id)
    }
}

impl RandomForest {
    /// Export the forest in graphviz dot format.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::WriteModel`] if a file cannot be written.
    #[instrument(skip(self), fields(path = %path.as_ref().display()))]
    pub fn export_dot(&self, path: impl AsRef<Path>, mode: DotMode) -> Result<(), RfError> {
        let path = path.as_ref();
        match mode {
            DotMode::SeparateTrees => {
                for (i, tree) in self.trees.iter().enumerate() {
                    let tree_path = part_path(path, i + 1);
                    write_dot_file(&tree_path, |out| tree.write_dot(out))?;
                }
            }
            DotMode::WholeForest => {
                write_dot_file(path, |out| {
                    writeln!(out, "digraph Tree {{")?;
                    let mut next_id = 0;
                    for tree in &self.trees {
                        next_id = tree.write_dot_body(out, next_id)?;
                    }
                    writeln!(out, "}}")
                })?;
            }
        }
        info!(n_trees = self.trees.len(), ?mode, "dot export written");
        Ok(())
    }
}

fn write_dot_file(
    path: &Path,
    body: impl FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
) -> Result<(), RfError> {
    let to_error = |source| RfError::WriteModel {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(to_error)?;
    let mut out = BufWriter::new(file);
    body(&mut out).map_err(to_error)?;
    out.flush().map_err(to_error)
}
