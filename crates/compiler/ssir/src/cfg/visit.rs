use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::cfg::{BasicBlock, Body};

/// A depth-first walk over the blocks of a [Body].
///
/// Every block is visited at most once. [Visitor::enter] is called when a block is first reached
/// and [Visitor::leave] once all of its successors have been walked, so collecting blocks in
/// `leave` yields a post-order.
pub trait Visitor: Sized {
    fn should_visit(&mut self, body: &Body, bb: BasicBlock) -> bool;

    fn successors(&mut self, body: &Body, bb: BasicBlock) -> SmallVec<[BasicBlock; 4]> {
        body.successors(bb)
    }

    #[allow(unused)]
    fn enter(&mut self, body: &Body, bb: BasicBlock) {}

    #[allow(unused)]
    fn leave(&mut self, body: &Body, bb: BasicBlock) {}
}

pub fn visit_depth_first<V: Visitor>(visitor: &mut V, body: &Body, start: BasicBlock) {
    if !visitor.should_visit(body, start) {
        return;
    }

    visitor.enter(body, start);

    let successors = visitor.successors(body, start);
    let mut stack = vec![(start, successors, 0usize)];

    while let Some((bb, successors, next)) = stack.last_mut() {
        if let Some(succ) = successors.get(*next).copied() {
            *next += 1;

            if visitor.should_visit(body, succ) {
                visitor.enter(body, succ);

                let successors = visitor.successors(body, succ);

                stack.push((succ, successors, 0));
            }
        } else {
            let bb = *bb;

            stack.pop();
            visitor.leave(body, bb);
        }
    }
}

struct PostOrder {
    seen: FxHashSet<BasicBlock>,
    order: Vec<BasicBlock>,
}

impl Visitor for PostOrder {
    fn should_visit(&mut self, _body: &Body, bb: BasicBlock) -> bool {
        self.seen.insert(bb)
    }

    fn leave(&mut self, _body: &Body, bb: BasicBlock) {
        self.order.push(bb);
    }
}

/// The blocks reachable from the entry block, in post-order.
pub fn post_order(body: &Body) -> Vec<BasicBlock> {
    let mut visitor = PostOrder {
        seen: FxHashSet::default(),
        order: Vec::with_capacity(body.layout.len()),
    };

    if let Some(entry) = body.entry() {
        visit_depth_first(&mut visitor, body, entry);
    }

    visitor.order
}

pub fn reverse_post_order(body: &Body) -> Vec<BasicBlock> {
    let mut order = post_order(body);

    order.reverse();

    order
}

pub fn reachable(body: &Body) -> FxHashSet<BasicBlock> {
    post_order(body).into_iter().collect()
}
