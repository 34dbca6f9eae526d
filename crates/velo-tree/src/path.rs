//! Deriving pathnames from router state trees.
//!
//! Used to keep the interception-route discriminator (the "next URL") in sync
//! with whichever subtree actually changed during a navigation.

use crate::segment::{Segment, CHILDREN_SLOT};
use crate::state::RouterStateTree;

fn segment_to_path_component(segment: &Segment) -> Option<String> {
    match segment {
        Segment::Param { value, .. } => Some(value.clone()),
        Segment::Static(s) => {
            if s.is_empty() || (s.starts_with('(') && s.ends_with(')')) {
                // Root and route-group segments contribute nothing to the URL.
                Some(String::new())
            } else {
                Some(s.clone())
            }
        }
    }
}

/// Derive the URL pathname a tree renders, or `None` when the tree is not
/// addressable (default placeholders and interception routes have no
/// pathname of their own).
pub fn extract_path_from_tree(tree: &RouterStateTree) -> Option<String> {
    let mut components = Vec::new();
    if !collect_path(tree, &mut components) {
        return None;
    }
    let joined = components
        .into_iter()
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    Some(format!("/{}", joined))
}

fn collect_path(tree: &RouterStateTree, out: &mut Vec<String>) -> bool {
    if tree.segment.is_default() || tree.segment.is_intercepted() {
        return false;
    }
    if tree.segment.is_page() {
        return true;
    }
    match segment_to_path_component(&tree.segment) {
        Some(component) => out.push(component),
        None => return false,
    }
    if let Some(child) = tree.children_slot() {
        if collect_path(child, out) {
            return true;
        }
    }
    for (slot, child) in &tree.parallel_routes {
        if slot == CHILDREN_SLOT {
            continue;
        }
        if collect_path(child, out) {
            return true;
        }
    }
    true
}

/// Find the pathname of the deepest subtree that differs between two trees.
///
/// Returns `None` when the trees are identical. Interception subtrees report
/// the root path, matching their lack of an addressable URL.
pub fn compute_changed_path(old: &RouterStateTree, new: &RouterStateTree) -> Option<String> {
    let raw = compute_changed_path_impl(old, new)?;
    let joined = raw
        .into_iter()
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    Some(format!("/{}", joined))
}

fn compute_changed_path_impl(old: &RouterStateTree, new: &RouterStateTree) -> Option<Vec<String>> {
    if old.segment.is_intercepted() || new.segment.is_intercepted() {
        return Some(Vec::new());
    }
    if !old.segment.matches_shape(&new.segment) || old.segment != new.segment {
        let mut components = Vec::new();
        if extract_into(new, &mut components) {
            return Some(components);
        }
        return Some(Vec::new());
    }
    for (slot, old_child) in &old.parallel_routes {
        if let Some(new_child) = new.parallel_routes.get(slot) {
            if let Some(mut changed) = compute_changed_path_impl(old_child, new_child) {
                let mut components = Vec::new();
                if let Some(c) = segment_to_path_component(&new.segment) {
                    components.push(c);
                }
                components.append(&mut changed);
                return Some(components);
            }
        }
    }
    None
}

fn extract_into(tree: &RouterStateTree, out: &mut Vec<String>) -> bool {
    match extract_path_from_tree(tree) {
        Some(path) => {
            out.extend(
                path.trim_start_matches('/')
                    .split('/')
                    .filter(|c| !c.is_empty())
                    .map(String::from),
            );
            true
        }
        None => false,
    }
}
