use std::collections::HashMap;
use std::rc::Rc;

use super::value::Value;
use crate::ir::Slot;
use crate::symbols::{ClassId, MethodId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchId(pub usize);

/// The method (and receiver class) a branch tree executes inside.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RootScope {
    pub method: Option<MethodId>,
    pub owner: Option<ClassId>,
}

impl RootScope {
    pub fn module() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchParent {
    Root(RootScope),
    Branch(BranchId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Return,
    FallThrough,
    LoopCutoff,
}

/// One hypothetical execution path.
#[derive(Debug, Clone)]
pub struct Branch {
    pub parent: BranchParent,
    pub stack: Vec<Rc<Value>>,
    pub slots: HashMap<Slot, Rc<Value>>,
    pub variables: HashMap<String, Rc<Value>>,
    pub visited: HashMap<usize, u8>,
    pub looped: bool,
    pub termination: Option<Termination>,
    pub returned: Option<Rc<Value>>,
}

impl Branch {
    fn new(parent: BranchParent, visited: HashMap<usize, u8>) -> Self {
        Self {
            parent,
            stack: Vec::new(),
            slots: HashMap::new(),
            variables: HashMap::new(),
            visited,
            looped: false,
            termination: None,
            returned: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.termination.is_some()
    }

    pub fn top_of_stack(&self) -> Option<Rc<Value>> {
        self.stack.last().cloned()
    }
}

/// Owns every branch created during one resolution; parents are addressed by id.
#[derive(Debug, Default)]
pub struct BranchArena {
    branches: Vec<Branch>,
}

impl BranchArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&mut self, scope: RootScope) -> BranchId {
        self.push(Branch::new(BranchParent::Root(scope), HashMap::new()))
    }

    /// Child of `parent` that inherits its visit lineage but none of its bindings.
    pub fn create_child(&mut self, parent: BranchId) -> BranchId {
        let visited = self.branches[parent.0].visited.clone();
        self.push(Branch::new(BranchParent::Branch(parent), visited))
    }

    fn push(&mut self, branch: Branch) -> BranchId {
        let id = BranchId(self.branches.len());
        self.branches.push(branch);
        id
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    pub fn get(&self, id: BranchId) -> &Branch {
        &self.branches[id.0]
    }

    pub fn get_mut(&mut self, id: BranchId) -> &mut Branch {
        &mut self.branches[id.0]
    }

    /// Walks from `id` to the root, yielding each branch on the way.
    pub fn lineage(&self, id: BranchId) -> impl Iterator<Item = &Branch> {
        let mut next = Some(id);
        std::iter::from_fn(move || {
            let current = next?;
            let branch = &self.branches[current.0];
            next = match branch.parent {
                BranchParent::Branch(parent) => Some(parent),
                BranchParent::Root(_) => None,
            };
            Some(branch)
        })
    }

    pub fn root_scope(&self, id: BranchId) -> RootScope {
        self.lineage(id)
            .find_map(|branch| match branch.parent {
                BranchParent::Root(scope) => Some(scope),
                BranchParent::Branch(_) => None,
            })
            .unwrap_or_default()
    }

    pub fn lookup_slot(&self, id: BranchId, slot: Slot) -> Option<Rc<Value>> {
        self.lineage(id)
            .find_map(|branch| branch.slots.get(&slot).cloned())
    }

    pub fn lookup_variable(&self, id: BranchId, name: &str) -> Option<Rc<Value>> {
        self.lineage(id)
            .find_map(|branch| branch.variables.get(name).cloned())
    }

    /// Binds `slot` on this branch only and pushes the value on its stack.
    pub fn bind_slot(&mut self, id: BranchId, slot: Slot, value: Rc<Value>) {
        let branch = &mut self.branches[id.0];
        branch.slots.insert(slot, value.clone());
        branch.stack.push(value);
    }

    /// Replaces the value seen through `slot` on this branch, leaving ancestors untouched.
    pub fn rebind_slot(&mut self, id: BranchId, slot: Slot, value: Rc<Value>) {
        self.branches[id.0].slots.insert(slot, value);
    }

    pub fn bind_variable(&mut self, id: BranchId, name: impl Into<String>, value: Rc<Value>) {
        self.branches[id.0].variables.insert(name.into(), value);
    }

    /// Records a visit of `index`. Returns false when this lineage already ran it.
    pub fn visit(&mut self, id: BranchId, index: usize) -> bool {
        let counter = self.branches[id.0].visited.entry(index).or_insert(0);
        *counter = counter.saturating_add(1);
        *counter == 1
    }

    pub fn finalize(&mut self, id: BranchId, termination: Termination, value: Rc<Value>) {
        let branch = &mut self.branches[id.0];
        if termination == Termination::LoopCutoff {
            branch.looped = true;
        }
        branch.termination = Some(termination);
        branch.returned = Some(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::Type;

    #[test]
    fn child_reads_parent_but_parent_does_not_see_child() {
        let mut arena = BranchArena::new();
        let root = arena.root(RootScope::module());
        arena.bind_variable(root, "x", Rc::new(Value::of_type(Type::Number)));
        let child = arena.create_child(root);
        arena.bind_variable(child, "y", Rc::new(Value::of_type(Type::String)));

        assert!(arena.lookup_variable(child, "x").is_some());
        assert!(arena.lookup_variable(child, "y").is_some());
        assert!(arena.lookup_variable(root, "y").is_none());
        assert!(arena.get(child).stack.is_empty());
    }

    #[test]
    fn visit_lineage_is_inherited() {
        let mut arena = BranchArena::new();
        let root = arena.root(RootScope::module());
        assert!(arena.visit(root, 0));
        let child = arena.create_child(root);
        assert!(!arena.visit(child, 0));
        assert!(arena.visit(child, 1));
        assert!(arena.visit(root, 1));
    }
}
