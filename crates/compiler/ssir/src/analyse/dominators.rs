use index_vec::IndexVec;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::cfg::graph::Predecessors;
use crate::cfg::visit::{post_order, visit_depth_first, Visitor};
use crate::cfg::{BasicBlock, Body};

index_vec::define_index_type! {
    /// The post-order number of a node in the graph a [DominatorTree] was built for.
    pub struct NodeIdx = u32;
}

/// A node of the graph the tree was built over: `None` stands for the virtual exit node of a
/// post-dominator tree.
type Node = Option<BasicBlock>;

/// The dominator tree of a function body, or of its reverse graph.
///
/// Built with the iterative algorithm of Cooper, Harvey and Kennedy over post-order numbers.
/// Blocks that cannot be reached from the root are not part of the tree: they neither dominate
/// nor are dominated by any block.
#[derive(Clone, Debug)]
pub struct DominatorTree {
    nodes: IndexVec<NodeIdx, Node>,
    index: FxHashMap<Node, NodeIdx>,
    idom: IndexVec<NodeIdx, NodeIdx>,
}

impl DominatorTree {
    /// Dominators of every block reachable from the entry block.
    pub fn compute(body: &Body) -> Self {
        let predecessors = Predecessors::compute(body);
        let post_order = post_order(body).into_iter().map(Some).collect();

        Self::build(post_order, |node| match node {
            Some(bb) => predecessors.of(bb).iter().copied().map(Some).collect(),
            None => SmallVec::new(),
        })
    }

    /// Post-dominators, rooted at a virtual exit node that succeeds every block without
    /// successors.
    ///
    /// Blocks from which no exit can be reached (e.g. infinite loops) are not part of the tree.
    pub fn compute_post(body: &Body) -> Self {
        let predecessors = Predecessors::compute(body);
        let mut visitor = ReversePostOrder {
            predecessors: &predecessors,
            seen: FxHashSet::default(),
            order: Vec::new(),
        };

        for bb in &body.layout {
            if body.successors(*bb).is_empty() {
                visit_depth_first(&mut visitor, body, *bb);
            }
        }

        let mut post_order: Vec<Node> = visitor.order.into_iter().map(Some).collect();

        post_order.push(None);

        Self::build(post_order, |node| match node {
            Some(bb) => {
                let successors = body.successors(bb);

                if successors.is_empty() {
                    smallvec::smallvec![None]
                } else {
                    successors.into_iter().map(Some).collect()
                }
            }
            None => SmallVec::new(),
        })
    }

    /// Builds the tree from a post-order of the nodes (root last) and the predecessor relation of
    /// the graph.
    fn build<F>(post_order: Vec<Node>, predecessors: F) -> Self
    where
        F: Fn(Node) -> SmallVec<[Node; 4]>,
    {
        let nodes: IndexVec<NodeIdx, Node> = IndexVec::from_vec(post_order);
        let index: FxHashMap<Node, NodeIdx> =
            nodes.iter_enumerated().map(|(i, node)| (*node, i)).collect();
        let mut idom: IndexVec<NodeIdx, Option<NodeIdx>> = index_vec::index_vec![None; nodes.len()];

        let Some(root) = nodes.len().checked_sub(1).map(NodeIdx::from_usize) else {
            return DominatorTree {
                nodes,
                index,
                idom: IndexVec::new(),
            };
        };

        idom[root] = Some(root);

        let mut changed = true;

        while changed {
            changed = false;

            for node_idx in (0..root.index()).rev().map(NodeIdx::from_usize) {
                let mut new_idom = None;

                for pred in predecessors(nodes[node_idx]) {
                    let Some(&pred_idx) = index.get(&pred) else {
                        continue;
                    };

                    if idom[pred_idx].is_none() {
                        continue;
                    }

                    new_idom = Some(match new_idom {
                        None => pred_idx,
                        Some(current) => intersect(&idom, pred_idx, current),
                    });
                }

                if new_idom != idom[node_idx] {
                    idom[node_idx] = new_idom;
                    changed = true;
                }
            }
        }

        let idom = idom
            .into_iter()
            .map(|i| i.expect("every node in the post-order is reachable from the root"))
            .collect();

        DominatorTree { nodes, index, idom }
    }

    pub fn is_reachable(&self, bb: BasicBlock) -> bool {
        self.index.contains_key(&Some(bb))
    }

    pub fn immediate_dominator(&self, bb: BasicBlock) -> Option<BasicBlock> {
        let idx = *self.index.get(&Some(bb))?;
        let idom = self.idom[idx];

        if idom == idx {
            None
        } else {
            self.nodes[idom]
        }
    }

    /// Whether every path from the root to [b] passes through [a]. A block dominates itself.
    pub fn dominates(&self, a: BasicBlock, b: BasicBlock) -> bool {
        let (Some(&a), Some(&b)) = (self.index.get(&Some(a)), self.index.get(&Some(b))) else {
            return false;
        };

        let mut finger = b;

        while finger < a {
            finger = self.idom[finger];
        }

        finger == a
    }

    pub fn strictly_dominates(&self, a: BasicBlock, b: BasicBlock) -> bool {
        a != b && self.dominates(a, b)
    }
}

fn intersect(idom: &IndexVec<NodeIdx, Option<NodeIdx>>, a: NodeIdx, b: NodeIdx) -> NodeIdx {
    let mut finger_a = a;
    let mut finger_b = b;

    while finger_a != finger_b {
        while finger_a < finger_b {
            finger_a = idom[finger_a].expect("processed node has an immediate dominator");
        }

        while finger_b < finger_a {
            finger_b = idom[finger_b].expect("processed node has an immediate dominator");
        }
    }

    finger_a
}

struct ReversePostOrder<'a> {
    predecessors: &'a Predecessors,
    seen: FxHashSet<BasicBlock>,
    order: Vec<BasicBlock>,
}

impl Visitor for ReversePostOrder<'_> {
    fn should_visit(&mut self, _body: &Body, bb: BasicBlock) -> bool {
        self.seen.insert(bb)
    }

    fn successors(&mut self, _body: &Body, bb: BasicBlock) -> SmallVec<[BasicBlock; 4]> {
        self.predecessors.of(bb).iter().copied().collect()
    }

    fn leave(&mut self, _body: &Body, bb: BasicBlock) {
        self.order.push(bb);
    }
}
