//! Path-dependent TreeSHAP.
//!
//! Exact Shapley values for a decision tree in O(leaves * depth^2), using
//! node covers as the conditional distribution of features not in the
//! coalition (Lundberg, Erion & Lee, "Consistent Individualized Feature
//! Attribution for Tree Ensembles", Algorithm 2).
//!
//! The path tracks, for every distinct feature split on between the root
//! and the current node, the fraction of coalitions-without-the-feature
//! (`zero_fraction`) and with-the-feature (`one_fraction`) that flow down
//! this branch, plus the permutation weight of each path length.

use crate::explainer::{Attribution, Explainer, ExplainerKind};
use crate::model::{goes_left, DecisionTree, TreeEnsemble, TreeNode};
use crate::Result;

/// Explainer backed by TreeSHAP; needs no background data.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeExplainer;

impl Explainer for TreeExplainer {
    fn kind(&self) -> ExplainerKind {
        ExplainerKind::Tree
    }

    fn explain(&self, model: &TreeEnsemble, x: &[f64], class: usize) -> Result<Attribution> {
        let mut values = vec![0.0; model.n_features];
        for tree in &model.trees {
            tree_shap(tree, x, class, &mut values);
        }
        if !model.trees.is_empty() {
            let count = model.trees.len() as f64;
            for v in &mut values {
                *v /= count;
            }
        }
        Ok(Attribution {
            expected_value: model.expected_value(class),
            values,
        })
    }
}

/// Add one tree's SHAP values for `class` into `phi`.
pub fn tree_shap(tree: &DecisionTree, x: &[f64], class: usize, phi: &mut [f64]) {
    if tree.nodes().is_empty() {
        return;
    }
    let walk = Walk {
        nodes: tree.nodes(),
        x,
        class,
    };
    walk.recurse(phi, 0, &[], 0, 1.0, 1.0, None);
}

#[derive(Debug, Clone, Copy, Default)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    weight: f64,
}

struct Walk<'a> {
    nodes: &'a [TreeNode],
    x: &'a [f64],
    class: usize,
}

impl Walk<'_> {
    #[allow(clippy::too_many_arguments)]
    fn recurse(
        &self,
        phi: &mut [f64],
        node: usize,
        parent_path: &[PathElement],
        unique_depth: usize,
        zero_fraction: f64,
        one_fraction: f64,
        feature: Option<usize>,
    ) {
        let mut path = parent_path[..unique_depth].to_vec();
        path.push(PathElement::default());
        extend_path(&mut path, unique_depth, zero_fraction, one_fraction, feature);

        match &self.nodes[node] {
            TreeNode::Leaf { value, .. } => {
                let leaf_value = value.get(self.class).copied().unwrap_or(0.0);
                for i in 1..=unique_depth {
                    let weight = unwound_path_sum(&path, unique_depth, i);
                    let element = path[i];
                    if let Some(f) = element.feature {
                        if let Some(slot) = phi.get_mut(f) {
                            *slot += weight
                                * (element.one_fraction - element.zero_fraction)
                                * leaf_value;
                        }
                    }
                }
            }
            TreeNode::Split {
                feature: split,
                threshold,
                left,
                right,
                cover,
            } => {
                let (hot, cold) = if goes_left(self.x, *split, *threshold) {
                    (*left, *right)
                } else {
                    (*right, *left)
                };
                let hot_zero = self.nodes[hot].cover() / cover;
                let cold_zero = self.nodes[cold].cover() / cover;

                // A feature split on again deeper down replaces its earlier
                // path entry instead of adding a second one.
                let mut depth = unique_depth;
                let mut incoming_zero = 1.0;
                let mut incoming_one = 1.0;
                if let Some(k) = (1..=depth).find(|&k| path[k].feature == Some(*split)) {
                    incoming_zero = path[k].zero_fraction;
                    incoming_one = path[k].one_fraction;
                    unwind_path(&mut path, depth, k);
                    depth -= 1;
                }

                self.recurse(
                    phi,
                    hot,
                    &path,
                    depth + 1,
                    hot_zero * incoming_zero,
                    incoming_one,
                    Some(*split),
                );
                self.recurse(
                    phi,
                    cold,
                    &path,
                    depth + 1,
                    cold_zero * incoming_zero,
                    0.0,
                    Some(*split),
                );
            }
        }
    }
}

fn extend_path(
    path: &mut [PathElement],
    unique_depth: usize,
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    path[unique_depth] = PathElement {
        feature,
        zero_fraction,
        one_fraction,
        weight: if unique_depth == 0 { 1.0 } else { 0.0 },
    };
    let denominator = (unique_depth + 1) as f64;
    for i in (0..unique_depth).rev() {
        path[i + 1].weight += one_fraction * path[i].weight * (i + 1) as f64 / denominator;
        path[i].weight = zero_fraction * path[i].weight * (unique_depth - i) as f64 / denominator;
    }
}

fn unwind_path(path: &mut [PathElement], unique_depth: usize, index: usize) {
    let one_fraction = path[index].one_fraction;
    let zero_fraction = path[index].zero_fraction;
    let denominator = (unique_depth + 1) as f64;
    let mut next_one_portion = path[unique_depth].weight;

    for i in (0..unique_depth).rev() {
        if one_fraction != 0.0 {
            let previous = path[i].weight;
            path[i].weight = next_one_portion * denominator / ((i + 1) as f64 * one_fraction);
            next_one_portion =
                previous - path[i].weight * zero_fraction * (unique_depth - i) as f64 / denominator;
        } else {
            path[i].weight =
                path[i].weight * denominator / (zero_fraction * (unique_depth - i) as f64);
        }
    }

    for i in index..unique_depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
}

/// Total permutation weight of the path with element `index` removed,
/// without modifying the path.
fn unwound_path_sum(path: &[PathElement], unique_depth: usize, index: usize) -> f64 {
    let one_fraction = path[index].one_fraction;
    let zero_fraction = path[index].zero_fraction;
    let denominator = (unique_depth + 1) as f64;
    let mut next_one_portion = path[unique_depth].weight;
    let mut total = 0.0;

    for i in (0..unique_depth).rev() {
        if one_fraction != 0.0 {
            let portion = next_one_portion * denominator / ((i + 1) as f64 * one_fraction);
            total += portion;
            next_one_portion =
                path[i].weight - portion * zero_fraction * ((unique_depth - i) as f64 / denominator);
        } else if zero_fraction != 0.0 {
            total += (path[i].weight / zero_fraction) / ((unique_depth - i) as f64 / denominator);
        }
    }
    total
}

// =============================================================================
// TESTS
// =============================================================================
