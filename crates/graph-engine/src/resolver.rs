//! Remote type resolution: node slot types are refined by an external
//! service, asynchronously, against a moving graph.
//!
//! Refreshes are debounced (a leading delay coalesces bursts of
//! connection-change events, a trailing delay re-fires once if the graph
//! changed again mid-flight) and every response carries the request
//! generation it was produced for; anything but the newest generation is
//! discarded.

use crate::error::Result;
use crate::graph::Graph;
use crate::registry::NodeDefPatch;
use crate::types::NodeId;
use async_trait::async_trait;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// The external service that maps a serialized graph to per-node slot
/// patches
#[async_trait]
pub trait RemoteTypeResolver: Send + Sync {
    async fn resolve(&self, snapshot: serde_json::Value)
        -> Result<HashMap<NodeId, NodeDefPatch>>;
}

/// Debounced driver for a [`RemoteTypeResolver`].
///
/// Call [`request_refresh`](Self::request_refresh) after every batch of
/// connection changes; the scheduler decides when to actually snapshot the
/// graph and ask the service.
pub struct ResolutionScheduler<R> {
    service: Arc<R>,
    graph: Arc<Mutex<Graph>>,
    generation: Arc<AtomicU64>,
    timer_armed: Arc<AtomicBool>,
    leading: Duration,
    trailing: Duration,
}

impl<R> Clone for ResolutionScheduler<R> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            graph: self.graph.clone(),
            generation: self.generation.clone(),
            timer_armed: self.timer_armed.clone(),
            leading: self.leading,
            trailing: self.trailing,
        }
    }
}

impl<R: RemoteTypeResolver + 'static> ResolutionScheduler<R> {
    pub fn new(
        service: Arc<R>,
        graph: Arc<Mutex<Graph>>,
        leading: Duration,
        trailing: Duration,
    ) -> Self {
        Self {
            service,
            graph,
            generation: Arc::new(AtomicU64::new(0)),
            timer_armed: Arc::new(AtomicBool::new(false)),
            leading,
            trailing,
        }
    }

    /// The generation of the most recent change
    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Mark the graph changed, invalidating every in-flight response.
    /// Returns the new generation.
    pub fn invalidate(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Note a connection change and schedule a refresh. Bursts within the
    /// leading delay coalesce into one request; changes landing after the
    /// request fired get exactly one trailing re-fire.
    pub fn request_refresh(&self) {
        self.invalidate();
        if self.timer_armed.swap(true, Ordering::SeqCst) {
            // a timer is already running; the generation bump is enough
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.leading).await;
            let fired = this.current_generation();
            this.run_once(fired).await;

            tokio::time::sleep(this.trailing).await;
            this.timer_armed.store(false, Ordering::SeqCst);
            let latest = this.current_generation();
            if latest != fired {
                this.run_once(latest).await;
            }
        });
    }

    /// Snapshot, query the service, and apply the response if it is still
    /// the newest
    async fn run_once(&self, generation: u64) {
        let snapshot = {
            let graph = self.graph.lock();
            if graph.is_configuring() {
                debug!("skipping type resolution: graph is being configured");
                return;
            }
            match graph.snapshot() {
                Ok(v) => v,
                Err(e) => {
                    warn!("could not snapshot graph for type resolution: {e}");
                    return;
                }
            }
        };
        match self.service.resolve(snapshot).await {
            Ok(patches) => {
                self.apply_if_current(generation, patches);
            }
            Err(e) => warn!("type resolution request failed: {e}"),
        }
    }

    /// Apply a response produced for request `generation`. A response older
    /// than the latest change is dropped; so is anything arriving while the
    /// graph is being configured. Returns whether the patches were applied.
    pub fn apply_if_current(
        &self,
        generation: u64,
        patches: HashMap<NodeId, NodeDefPatch>,
    ) -> bool {
        if generation != self.current_generation() {
            debug!(
                "discarding stale type resolution (generation {generation}, latest {})",
                self.current_generation()
            );
            return false;
        }
        let mut graph = self.graph.lock();
        if graph.is_configuring() {
            debug!("discarding type resolution: graph is being configured");
            return false;
        }
        for (node_id, patch) in patches {
            if graph.node(node_id).is_none() {
                // the node went away while the request was in flight
                continue;
            }
            if let Err(e) = graph.apply_def_patch(node_id, &patch) {
                warn!("could not apply slot patch to node {node_id}: {e}");
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::registry::{InputDef, OutputDef};
    use crate::slots::{InputSlot, OutputSlot};
    use crate::types::SlotType;
    use std::sync::atomic::AtomicUsize;

    struct CountingResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteTypeResolver for CountingResolver {
        async fn resolve(
            &self,
            _snapshot: serde_json::Value,
        ) -> Result<HashMap<NodeId, NodeDefPatch>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HashMap::new())
        }
    }

    fn shared_graph() -> Arc<Mutex<Graph>> {
        let mut g = Graph::new();
        let mut node = Node::new(1, "Dynamic");
        node.add_input(InputSlot::new("in", "*"));
        node.add_output(OutputSlot::new("out", "*"));
        g.add_node(node);
        Arc::new(Mutex::new(g))
    }

    fn patch_retyping_to(ty: &str) -> HashMap<NodeId, NodeDefPatch> {
        let mut patch = NodeDefPatch::default();
        patch.inputs.push(InputDef::new("in", ty));
        patch.outputs.push(OutputDef::new("out", ty));
        HashMap::from([(1, patch)])
    }

    fn scheduler(graph: Arc<Mutex<Graph>>) -> ResolutionScheduler<CountingResolver> {
        ResolutionScheduler::new(
            Arc::new(CountingResolver {
                calls: AtomicUsize::new(0),
            }),
            graph,
            Duration::from_millis(10),
            Duration::from_millis(20),
        )
    }

    #[tokio::test]
    async fn test_stale_response_is_discarded() {
        let graph = shared_graph();
        let s = scheduler(graph.clone());

        let older = s.invalidate();
        let newer = s.invalidate();

        assert!(!s.apply_if_current(older, patch_retyping_to("IMAGE")));
        assert_eq!(
            graph.lock().node(1).unwrap().inputs[0].ty,
            SlotType::new("*"),
            "stale patch must not touch the graph"
        );

        assert!(s.apply_if_current(newer, patch_retyping_to("MASK")));
        assert_eq!(
            graph.lock().node(1).unwrap().inputs[0].ty,
            SlotType::new("MASK")
        );
    }

    #[tokio::test]
    async fn test_response_dropped_while_configuring() {
        let graph = shared_graph();
        let s = scheduler(graph.clone());
        let generation = s.invalidate();

        graph.lock().begin_configure();
        assert!(!s.apply_if_current(generation, patch_retyping_to("IMAGE")));
        graph.lock().end_configure();
        assert!(s.apply_if_current(generation, patch_retyping_to("IMAGE")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_request() {
        let graph = shared_graph();
        let s = scheduler(graph);

        for _ in 0..5 {
            s.request_refresh();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(s.service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_after_fire_gets_trailing_refire() {
        let graph = shared_graph();
        let s = scheduler(graph);

        s.request_refresh();
        // past the leading fire, inside the trailing window
        tokio::time::sleep(Duration::from_millis(15)).await;
        s.request_refresh();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(s.service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_patch_adds_and_removes_slots() {
        let graph = shared_graph();
        let s = scheduler(graph.clone());
        let generation = s.invalidate();

        let mut patch = NodeDefPatch::default();
        patch.inputs.push(InputDef::new("in", "IMAGE"));
        patch.inputs.push(InputDef::new("mask", "MASK"));
        // output list empty: "out" disappears
        assert!(s.apply_if_current(generation, HashMap::from([(1, patch)])));

        let g = graph.lock();
        let node = g.node(1).unwrap();
        assert_eq!(node.inputs.len(), 2);
        assert_eq!(node.inputs[1].name, "mask");
        assert!(node.outputs.is_empty());
    }
}
