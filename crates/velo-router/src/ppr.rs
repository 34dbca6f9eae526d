//! Partial prerendering navigation tasks.
//!
//! A PPR navigation diffs the new route tree against the old one and builds a
//! tree of tasks. Each task either carries a cache node that can render
//! immediately (reused from the old tree, or complete from static prefetch
//! data) or a pending node whose dynamic holes render their loading state
//! until the trailing dynamic request resolves them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};
use velo_cache::{CacheNode, ChildSegmentMap, DataState, DeferredRsc};
use velo_tree::{
    FlightData, FlightDataPath, RouteDiffResponse, RouterStateTree, Rsc, SeedData, SlotKey,
};

use crate::error::FetchDiffError;

/// One node of the navigation task tree.
#[derive(Debug)]
pub struct Task {
    /// The (patched) router state this task renders.
    pub route: Arc<RouterStateTree>,
    /// Cache node to render, when one could be produced immediately.
    pub node: Option<Arc<CacheNode>>,
    /// Child tasks by parallel route slot.
    pub children: HashMap<SlotKey, Task>,
    /// Whether any segment in this subtree still needs the dynamic request.
    pub needs_dynamic_request: bool,
}

/// Diff the new route tree against the old tree and cache, producing a task
/// tree. Returns `None` when nothing changed and the old cache can be
/// rendered as-is.
pub fn update_cache_node_on_navigation(
    old_node: &Arc<CacheNode>,
    old_route: &RouterStateTree,
    new_route: &Arc<RouterStateTree>,
    seed: Option<&SeedData>,
    prefetch_head: Option<&Rsc>,
) -> Option<Task> {
    let mut task_children: HashMap<SlotKey, Task> = HashMap::new();
    let mut patched_children: HashMap<SlotKey, Arc<RouterStateTree>> = HashMap::new();
    let mut new_parallel_routes = old_node.parallel_routes_snapshot();
    let mut needs_dynamic_request = false;

    for (slot, new_child_route) in &new_route.parallel_routes {
        let old_child_route = old_route.parallel_routes.get(slot);
        let old_map = old_node.child_map(slot);
        let child_seed = seed.and_then(|s| s.children.get(slot));
        let new_segment = &new_child_route.segment;
        let new_key = new_segment.cache_key();
        let old_child_node = old_map.as_ref().and_then(|m| m.get(&new_key));

        let task_child = if new_segment.is_page() {
            // Page segments always re-render; even a same-URL navigation
            // gets fresh page data.
            Some(spawn_pending_task(new_child_route, child_seed, prefetch_head))
        } else if new_segment.is_default() {
            match old_child_route {
                // The old tree knows what this placeholder showed; keep it.
                Some(old_child_route) => Some(spawn_reused_task(old_child_route, old_child_node.as_ref())),
                None => Some(spawn_pending_task(new_child_route, child_seed, prefetch_head)),
            }
        } else {
            match old_child_route {
                Some(old_child_route) if old_child_route.segment == *new_segment => {
                    match &old_child_node {
                        Some(old_child_node) => update_cache_node_on_navigation(
                            old_child_node,
                            old_child_route,
                            new_child_route,
                            child_seed,
                            prefetch_head,
                        ),
                        None => {
                            Some(spawn_pending_task(new_child_route, child_seed, prefetch_head))
                        }
                    }
                }
                // A different segment now occupies the slot.
                _ => Some(spawn_pending_task(new_child_route, child_seed, prefetch_head)),
            }
        };

        match task_child {
            Some(task_child) => {
                needs_dynamic_request |= task_child.needs_dynamic_request;
                if let Some(node) = &task_child.node {
                    let new_map = match &old_map {
                        Some(map) => map.detach(),
                        None => ChildSegmentMap::new(),
                    };
                    new_map.insert(new_key, Arc::clone(node));
                    new_parallel_routes.insert(slot.clone(), new_map);
                }
                patched_children.insert(slot.clone(), Arc::clone(&task_child.route));
                task_children.insert(slot.clone(), task_child);
            }
            None => {
                patched_children.insert(slot.clone(), Arc::clone(new_child_route));
            }
        }
    }

    if task_children.is_empty() {
        return None;
    }

    let new_node = CacheNode::new();
    new_node.set_rsc_state(old_node.rsc());
    new_node.set_prefetch_rsc(old_node.prefetch_rsc());
    new_node.set_head(old_node.head());
    new_node.set_prefetch_head(old_node.prefetch_head());
    new_node.set_loading(old_node.loading());
    new_node.set_parallel_routes(new_parallel_routes);

    Some(Task {
        route: Arc::new(RouterStateTree {
            segment: new_route.segment.clone(),
            parallel_routes: patched_children,
            url: new_route.url.clone(),
            refresh: new_route.refresh,
            is_root_layout: new_route.is_root_layout,
        }),
        node: Some(Arc::new(new_node)),
        children: task_children,
        needs_dynamic_request,
    })
}

fn spawn_reused_task(route: &Arc<RouterStateTree>, node: Option<&Arc<CacheNode>>) -> Task {
    Task {
        route: Arc::clone(route),
        node: node.map(Arc::clone),
        children: HashMap::new(),
        needs_dynamic_request: false,
    }
}

fn spawn_pending_task(
    route: &Arc<RouterStateTree>,
    seed: Option<&SeedData>,
    prefetch_head: Option<&Rsc>,
) -> Task {
    let (node, needs_dynamic_request) = create_pending_cache_node(route, seed, prefetch_head);
    Task {
        route: Arc::clone(route),
        node: Some(node),
        children: HashMap::new(),
        needs_dynamic_request,
    }
}

/// Build a cache node for a segment the old tree cannot provide. Complete
/// seed data renders immediately; anything partial or missing becomes a
/// deferred slot backed by the static shell.
fn create_pending_cache_node(
    route: &RouterStateTree,
    seed: Option<&SeedData>,
    prefetch_head: Option<&Rsc>,
) -> (Arc<CacheNode>, bool) {
    let node = CacheNode::new();
    let mut any_dynamic = false;
    match seed {
        Some(seed) if seed.rsc.is_some() && !seed.is_partial => {
            node.set_rsc(seed.rsc.clone());
        }
        seed => {
            node.set_prefetch_rsc(seed.and_then(|s| s.rsc.clone()));
            node.set_rsc_state(DataState::Pending(DeferredRsc::new()));
            any_dynamic = true;
        }
    }
    node.set_loading(seed.map(|s| s.loading.clone()).unwrap_or_default());
    if route.parallel_routes.is_empty() {
        node.set_prefetch_head(prefetch_head.cloned());
    }
    for (slot, child_route) in &route.parallel_routes {
        let child_seed = seed.and_then(|s| s.children.get(slot));
        let (child_node, child_dynamic) =
            create_pending_cache_node(child_route, child_seed, prefetch_head);
        any_dynamic |= child_dynamic;
        let map = ChildSegmentMap::new();
        map.insert(child_route.segment.cache_key(), child_node);
        node.set_child_map(slot.clone(), map);
    }
    (Arc::new(node), any_dynamic)
}

/// Await the dynamic response and stream its data into the task tree. A
/// failed response aborts every still-pending slot so no awaiter hangs.
pub async fn listen_for_dynamic_request<F>(task: Task, response: F)
where
    F: Future<Output = Result<Arc<RouteDiffResponse>, FetchDiffError>>,
{
    match response.await {
        Ok(response) => match &response.flight_data {
            FlightData::Paths(paths) => {
                for path in paths {
                    write_dynamic_data_into_pending_task(&task, path);
                }
            }
            FlightData::ExternalUrl(url) => {
                warn!(url = %url, "dynamic request answered with an external redirect");
                abort_task(&task, "dynamic request redirected externally");
            }
        },
        Err(err) => {
            debug!(error = %err, "dynamic request failed, aborting task");
            abort_task(&task, &err.to_string());
        }
    }
}

fn write_dynamic_data_into_pending_task(task: &Task, path: &FlightDataPath) {
    if path.is_root_render() {
        finish_task(task, path);
        return;
    }
    // Walk the task tree to the segment the path targets.
    let mut current = task;
    for (slot, segment) in &path.segment_path {
        match current.children.get(slot) {
            Some(child) if child.route.segment.matches_shape(segment) => current = child,
            _ => {
                debug!(slot = %slot, "dynamic data targets a segment with no pending task");
                return;
            }
        }
    }
    finish_task(current, path);
}

fn finish_task(task: &Task, path: &FlightDataPath) {
    if let Some(node) = &task.node {
        finish_pending_cache_node(node, &task.route, path.seed_data.as_ref(), path.head.as_ref());
    }
    for child in task.children.values() {
        if child.needs_dynamic_request {
            if let Some(node) = &child.node {
                finish_pending_cache_node(
                    node,
                    &child.route,
                    path.seed_data.as_ref().and_then(|s| {
                        // Child tasks re-anchor on their own seed subtree.
                        child_seed_for(s, &child.route)
                    }),
                    path.head.as_ref(),
                );
            }
        }
    }
}

fn child_seed_for<'a>(seed: &'a SeedData, route: &RouterStateTree) -> Option<&'a SeedData> {
    seed.children
        .values()
        .find(|child| child.segment.matches_shape(&route.segment))
}

/// Resolve the deferred slots of a pending node tree from dynamic seed data.
fn finish_pending_cache_node(
    node: &CacheNode,
    route: &RouterStateTree,
    seed: Option<&SeedData>,
    head: Option<&Rsc>,
) {
    if let Some(seed) = seed {
        if let Some(rsc) = &seed.rsc {
            if let DataState::Pending(deferred) = node.rsc() {
                deferred.resolve(rsc.clone());
                node.set_rsc_state(DataState::Ready(rsc.clone()));
            }
        }
    }
    if route.parallel_routes.is_empty() {
        node.set_head(head.cloned());
        return;
    }
    for (slot, child_route) in &route.parallel_routes {
        let child_seed = seed.and_then(|s| s.children.get(slot));
        if let Some(map) = node.child_map(slot) {
            if let Some(child_node) = map.get(&child_route.segment.cache_key()) {
                finish_pending_cache_node(&child_node, child_route, child_seed, head);
            }
        }
    }
}

/// Propagate a cancellation into a task and every still-pending descendant,
/// so a superseded navigation leaves no awaiter hanging.
pub fn abort_task(task: &Task, reason: &str) {
    for child in task.children.values() {
        abort_task(child, reason);
    }
    if let Some(node) = &task.node {
        abort_pending_cache_node(node, reason);
    }
}

fn abort_pending_cache_node(node: &CacheNode, reason: &str) {
    if let DataState::Pending(deferred) = node.rsc() {
        deferred.abort(reason);
    }
    for slot in node.slots() {
        if let Some(map) = node.child_map(&slot) {
            for child in map.snapshot().values() {
                abort_pending_cache_node(child, reason);
            }
        }
    }
}

/// Rebuild the cache tree for a history traversal: clone along the rendered
/// path and keep prefetch variants only where the dynamic data never
/// arrived.
pub fn update_cache_node_on_popstate_restoration(
    old_node: &Arc<CacheNode>,
    route: &RouterStateTree,
) -> Arc<CacheNode> {
    let mut new_parallel_routes = old_node.parallel_routes_snapshot();
    for (slot, child_route) in &route.parallel_routes {
        let key = child_route.segment.cache_key();
        if let Some(old_map) = old_node.child_map(slot) {
            if let Some(old_child) = old_map.get(&key) {
                let new_child = update_cache_node_on_popstate_restoration(&old_child, child_route);
                let new_map = old_map.detach();
                new_map.insert(key, new_child);
                new_parallel_routes.insert(slot.clone(), new_map);
            }
        }
    }
    let still_pending = matches!(old_node.rsc(), DataState::Pending(_));
    let node = CacheNode::new();
    node.set_rsc_state(old_node.rsc());
    node.set_head(old_node.head());
    node.set_loading(old_node.loading());
    node.set_prefetch_rsc(if still_pending {
        old_node.prefetch_rsc()
    } else {
        None
    });
    node.set_prefetch_head(if still_pending {
        old_node.prefetch_head()
    } else {
        None
    });
    node.set_parallel_routes(new_parallel_routes);
    Arc::new(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use velo_tree::{LoadingState, ParamKind, Segment, CHILDREN_SLOT};

    fn old_cache_for(route: &RouterStateTree, rsc: &str) -> Arc<CacheNode> {
        let node = Arc::new(CacheNode::with_data(
            Some(Rsc::new(rsc)),
            LoadingState::None,
        ));
        for (slot, child_route) in &route.parallel_routes {
            let child = old_cache_for(child_route, rsc);
            let map = ChildSegmentMap::new();
            map.insert(child_route.segment.cache_key(), child);
            node.set_child_map(slot.clone(), map);
        }
        node
    }

    fn route(id: &str) -> Arc<RouterStateTree> {
        Arc::new(
            RouterStateTree::new(Segment::literal("")).with_child(
                CHILDREN_SLOT,
                RouterStateTree::new(Segment::param("id", id, ParamKind::Dynamic))
                    .with_child(CHILDREN_SLOT, RouterStateTree::new(Segment::page())),
            ),
        )
    }

    fn full_seed(id: &str, page_rsc: &str) -> SeedData {
        SeedData::new(Segment::literal(""), Some(Rsc::new("root"))).with_child(
            CHILDREN_SLOT,
            SeedData::new(
                Segment::param("id", id, ParamKind::Dynamic),
                Some(Rsc::new("layout")),
            )
            .with_child(
                CHILDREN_SLOT,
                SeedData::new(Segment::page(), Some(Rsc::new(page_rsc))),
            ),
        )
    }

    #[test]
    fn test_unchanged_tree_returns_none() {
        let old_route = route("1");
        let old_cache = old_cache_for(&old_route, "cached");
        // Identical tree with no page segment differences... the page
        // segment always re-renders, so trim it to layout-only trees.
        let layout_only = Arc::new(RouterStateTree::new(Segment::literal("")).with_child(
            CHILDREN_SLOT,
            RouterStateTree::new(Segment::param("id", "1", ParamKind::Dynamic)),
        ));
        let old_layout_cache = old_cache_for(&layout_only, "cached");
        let task = update_cache_node_on_navigation(
            &old_layout_cache,
            &layout_only,
            &layout_only.clone(),
            None,
            None,
        );
        assert!(task.is_none());
        drop(old_cache);
    }

    #[test]
    fn test_changed_param_spawns_pending_task() {
        let old_route = route("1");
        let new_route = route("2");
        let old_cache = old_cache_for(&old_route, "cached");
        let seed = full_seed("2", "page-2");

        let task =
            update_cache_node_on_navigation(&old_cache, &old_route, &new_route, Some(&seed), None)
                .expect("param change produces a task");
        assert!(task.node.is_some());
        // Complete seed data: nothing dynamic left.
        assert!(!task.needs_dynamic_request);

        let node = task.node.unwrap();
        let id_node = node.child_map(CHILDREN_SLOT).unwrap().get("2").unwrap();
        assert_eq!(id_node.rsc().ready(), Some(&Rsc::new("layout")));
    }

    #[test]
    fn test_partial_seed_leaves_dynamic_hole() {
        let old_route = route("1");
        let new_route = route("2");
        let old_cache = old_cache_for(&old_route, "cached");
        let mut seed = full_seed("2", "shell");
        // Mark the page as partial: its rsc is only the static shell.
        if let Some(id_seed) = seed.children.get_mut(CHILDREN_SLOT) {
            if let Some(page_seed) = id_seed.children.get_mut(CHILDREN_SLOT) {
                page_seed.is_partial = true;
            }
        }

        let task =
            update_cache_node_on_navigation(&old_cache, &old_route, &new_route, Some(&seed), None)
                .expect("task");
        assert!(task.needs_dynamic_request);

        let node = task.node.unwrap();
        let page = node
            .child_map(CHILDREN_SLOT)
            .unwrap()
            .get("2")
            .unwrap()
            .child_map(CHILDREN_SLOT)
            .unwrap()
            .get("__PAGE__")
            .unwrap();
        assert!(page.rsc().is_pending());
        assert_eq!(page.prefetch_rsc(), Some(Rsc::new("shell")));
    }

    #[test]
    fn test_abort_task_rejects_pending_slots() {
        let old_route = route("1");
        let new_route = route("2");
        let old_cache = old_cache_for(&old_route, "cached");

        let task = update_cache_node_on_navigation(&old_cache, &old_route, &new_route, None, None)
            .expect("task");
        assert!(task.needs_dynamic_request);
        let node = task.node.as_ref().unwrap().clone();
        abort_task(&task, "superseded");

        let page = node
            .child_map(CHILDREN_SLOT)
            .unwrap()
            .get("2")
            .unwrap()
            .child_map(CHILDREN_SLOT)
            .unwrap()
            .get("__PAGE__")
            .unwrap();
        match page.rsc() {
            DataState::Pending(deferred) => {
                assert!(deferred.try_get().unwrap().is_err());
            }
            other => panic!("expected pending slot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dynamic_completion_fills_holes() {
        let old_route = route("1");
        let new_route = route("2");
        let old_cache = old_cache_for(&old_route, "cached");

        let task = update_cache_node_on_navigation(&old_cache, &old_route, &new_route, None, None)
            .expect("task");
        let node = task.node.as_ref().unwrap().clone();

        let response = Arc::new(RouteDiffResponse::with_paths(vec![FlightDataPath::root(
            (*route("2")).clone(),
            Some(full_seed("2", "dynamic-page")),
            Some(Rsc::new("head")),
        )]));
        listen_for_dynamic_request(task, futures::future::ready(Ok(response))).await;

        let page = node
            .child_map(CHILDREN_SLOT)
            .unwrap()
            .get("2")
            .unwrap()
            .child_map(CHILDREN_SLOT)
            .unwrap()
            .get("__PAGE__")
            .unwrap();
        assert_eq!(page.rsc().ready(), Some(&Rsc::new("dynamic-page")));
        assert_eq!(page.head(), Some(Rsc::new("head")));
    }

    #[test]
    fn test_popstate_restoration_drops_prefetch_for_settled_nodes() {
        let old_route = route("1");
        let old_cache = old_cache_for(&old_route, "cached");
        old_cache.set_prefetch_rsc(Some(Rsc::new("stale-shell")));

        let restored = update_cache_node_on_popstate_restoration(&old_cache, &old_route);
        assert_eq!(restored.prefetch_rsc(), None);
        assert_eq!(restored.rsc().ready(), Some(&Rsc::new("cached")));
    }
}
