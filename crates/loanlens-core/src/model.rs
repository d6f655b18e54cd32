//! # Model Module
//!
//! Tree-ensemble classifiers loaded from model bundles.
//!
//! Trees use the array layout that scikit-learn exports: node 0 is the root,
//! a split sends `x[feature] <= threshold` left and everything else
//! (including NaN) right. Every node records its `cover`, the training
//! weight that reached it; the explainers need it.

use serde::{Deserialize, Serialize};

/// Relative tolerance when checking that child covers sum to the parent's.
const COVER_TOLERANCE: f64 = 1e-6;

/// Leaf distributions summing to 1 within this tolerance count as normalized.
const NORMALIZED_TOLERANCE: f64 = 1e-9;

// =============================================================================
// CLASSIFIER TRAIT
// =============================================================================

/// Anything that maps an encoded feature vector to class probabilities.
pub trait Classifier {
    /// Length of the input vector.
    fn n_features(&self) -> usize;

    /// Length of the probability vector.
    fn n_classes(&self) -> usize;

    /// Class probabilities for one encoded row. Sums to 1.
    fn predict_proba(&self, x: &[f64]) -> Vec<f64>;
}

// =============================================================================
// DECISION TREE
// =============================================================================

/// One node of a decision tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        cover: f64,
    },
    Leaf {
        /// Class distribution at the leaf (normalized on validation).
        value: Vec<f64>,
        cover: f64,
    },
}

impl TreeNode {
    #[must_use]
    pub fn cover(&self) -> f64 {
        match self {
            TreeNode::Split { cover, .. } | TreeNode::Leaf { cover, .. } => *cover,
        }
    }
}

/// A binary decision tree stored as a flat node array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// Build and validate a tree. Leaf values are normalized to probabilities.
    pub fn new(nodes: Vec<TreeNode>, n_features: usize, n_classes: usize) -> Result<Self, String> {
        let mut tree = Self { nodes };
        tree.validate(n_features, n_classes)?;
        Ok(tree)
    }

    #[must_use]
    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    /// Check the structural invariants and normalize leaf distributions.
    ///
    /// A valid tree has children strictly after their parent, exactly one
    /// parent per non-root node, and child covers that sum to the parent's.
    pub fn validate(&mut self, n_features: usize, n_classes: usize) -> Result<(), String> {
        let len = self.nodes.len();
        if len == 0 {
            return Err("tree has no nodes".to_string());
        }

        let mut parents = vec![0usize; len];
        for (index, node) in self.nodes.iter().enumerate() {
            let cover = node.cover();
            if !cover.is_finite() || cover <= 0.0 {
                return Err(format!("node {index}: cover must be positive, got {cover}"));
            }
            let TreeNode::Split {
                feature,
                threshold,
                left,
                right,
                ..
            } = node
            else {
                continue;
            };

            if *feature >= n_features {
                return Err(format!(
                    "node {index}: split feature {feature} out of range (features: {n_features})"
                ));
            }
            if threshold.is_nan() {
                return Err(format!("node {index}: threshold is NaN"));
            }
            for child in [*left, *right] {
                if child <= index || child >= len {
                    return Err(format!("node {index}: child {child} must point forward"));
                }
                parents[child] += 1;
            }
            if left == right {
                return Err(format!("node {index}: both children are node {left}"));
            }

            let children = self.nodes[*left].cover() + self.nodes[*right].cover();
            if (children - cover).abs() > COVER_TOLERANCE * cover {
                return Err(format!(
                    "node {index}: child covers sum to {children}, node cover is {cover}"
                ));
            }
        }

        if let Some(orphan) = (1..len).find(|&i| parents[i] != 1) {
            return Err(format!(
                "node {orphan}: expected exactly one parent, found {}",
                parents[orphan]
            ));
        }

        for (index, node) in self.nodes.iter_mut().enumerate() {
            if let TreeNode::Leaf { value, .. } = node {
                if value.len() != n_classes {
                    return Err(format!(
                        "node {index}: leaf has {} class values, expected {n_classes}",
                        value.len()
                    ));
                }
                if value.iter().any(|v| !v.is_finite() || *v < 0.0) {
                    return Err(format!("node {index}: leaf values must be finite and >= 0"));
                }
                let total: f64 = value.iter().sum();
                if total <= 0.0 {
                    return Err(format!("node {index}: leaf values sum to zero"));
                }
                // Already-normalized leaves are left untouched so that
                // re-validating a bundle is idempotent.
                if (total - 1.0).abs() > NORMALIZED_TOLERANCE {
                    for v in value.iter_mut() {
                        *v /= total;
                    }
                }
            }
        }

        Ok(())
    }

    /// Index of the leaf that `x` lands in.
    #[must_use]
    pub fn leaf_index(&self, x: &[f64]) -> usize {
        let mut index = 0;
        while let Some(TreeNode::Split {
            feature,
            threshold,
            left,
            right,
            ..
        }) = self.nodes.get(index)
        {
            index = if goes_left(x, *feature, *threshold) {
                *left
            } else {
                *right
            };
        }
        index
    }

    /// Class distribution of the leaf that `x` lands in.
    #[must_use]
    pub fn leaf_value(&self, x: &[f64]) -> &[f64] {
        match self.nodes.get(self.leaf_index(x)) {
            Some(TreeNode::Leaf { value, .. }) => value,
            _ => &[],
        }
    }

    /// Cover-weighted mean leaf value for `class`: the tree's output when
    /// nothing about the input is known.
    #[must_use]
    pub fn expected_value(&self, class: usize) -> f64 {
        let root_cover = self.nodes.first().map_or(1.0, TreeNode::cover);
        let weighted: f64 = self
            .nodes
            .iter()
            .filter_map(|node| match node {
                TreeNode::Leaf { value, cover } => {
                    Some(cover * value.get(class).copied().unwrap_or(0.0))
                }
                TreeNode::Split { .. } => None,
            })
            .sum();
        weighted / root_cover
    }

    /// Depth of the deepest leaf (root has depth 0).
    #[must_use]
    pub fn max_depth(&self) -> usize {
        let mut depth = vec![0usize; self.nodes.len()];
        let mut deepest = 0;
        for (index, node) in self.nodes.iter().enumerate() {
            if let TreeNode::Split { left, right, .. } = node {
                let child_depth = depth[index] + 1;
                for child in [*left, *right] {
                    if let Some(slot) = depth.get_mut(child) {
                        *slot = child_depth;
                    }
                }
                deepest = deepest.max(child_depth);
            }
        }
        deepest
    }
}

/// Split rule shared by prediction and the explainers.
#[inline]
pub(crate) fn goes_left(x: &[f64], feature: usize, threshold: f64) -> bool {
    x.get(feature).is_some_and(|v| *v <= threshold)
}

// =============================================================================
// TREE ENSEMBLE
// =============================================================================

/// How the ensemble was trained; both predict by averaging tree outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleKind {
    RandomForest,
    DecisionTree,
}

/// An averaged ensemble of decision trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEnsemble {
    pub kind: EnsembleKind,
    pub n_features: usize,
    pub n_classes: usize,
    pub trees: Vec<DecisionTree>,
}

impl TreeEnsemble {
    /// Validate every tree against the ensemble's dimensions.
    pub fn validate(&mut self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("ensemble has no trees".to_string());
        }
        if self.kind == EnsembleKind::DecisionTree && self.trees.len() != 1 {
            return Err(format!(
                "decision_tree ensemble must hold exactly one tree, found {}",
                self.trees.len()
            ));
        }
        let (n_features, n_classes) = (self.n_features, self.n_classes);
        for (index, tree) in self.trees.iter_mut().enumerate() {
            tree.validate(n_features, n_classes)
                .map_err(|e| format!("tree {index}: {e}"))?;
        }
        Ok(())
    }

    /// Mean of the per-tree expected values for `class`.
    #[must_use]
    pub fn expected_value(&self, class: usize) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let total: f64 = self.trees.iter().map(|t| t.expected_value(class)).sum();
        total / self.trees.len() as f64
    }

    /// Total node count across all trees.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.trees.iter().map(|t| t.nodes().len()).sum()
    }
}

impl Classifier for TreeEnsemble {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn predict_proba(&self, x: &[f64]) -> Vec<f64> {
        let mut proba = vec![0.0; self.n_classes];
        if self.trees.is_empty() {
            return proba;
        }
        for tree in &self.trees {
            for (slot, value) in proba.iter_mut().zip(tree.leaf_value(x)) {
                *slot += value;
            }
        }
        let count = self.trees.len() as f64;
        for slot in &mut proba {
            *slot /= count;
        }
        proba
    }
}

// =============================================================================
// TESTS
// =============================================================================
