//! Heap object pools and the tracing garbage collector.
//!
//! Arrays, closures and environments live in per-kind slot pools addressed
//! by compact ids; values hold ids, never pointers, so the three kinds can
//! form arbitrary cyclic graphs. Collection is stop-the-world, non-moving
//! mark-and-sweep: mark walks a worklist seeded from the roots the caller
//! supplies, sweep returns unmarked slots to each pool's free list.

use std::{rc::Rc, time::Instant};

use crate::{
    array::OrderedMap,
    builtins::NativeHandler,
    lower::Function,
    value::Value,
};

/// Handle to a heap array (ordered map). Identity-comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayId(pub(crate) u32);

/// Handle to a heap closure. Identity-comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClosureId(pub(crate) u32);

/// Handle to a lexical environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvId(pub(crate) u32);

/// One lexical scope of a function activation: a slot vector plus a parent
/// pointer. Depth-0 slot addresses resolve into the owning frame; higher
/// depths walk the parent chain.
#[derive(Debug)]
pub(crate) struct Environment {
    pub slots: Vec<Value>,
    pub parent: Option<EnvId>,
}

/// A Function heap object.
///
/// Script closures carry compiled code and a captured environment. Host
/// facades (import forwarders and similar) instead carry a native handler
/// plus the values it needs, rooted through `roots`.
#[derive(Debug)]
pub(crate) struct Closure {
    pub name: Rc<str>,
    /// Cached code/parameter metadata for script closures.
    pub func: Option<Rc<Function>>,
    /// Captured defining environment; kept alive by GC marking through the
    /// closure.
    pub env: Option<EnvId>,
    /// Callback for builtin-like closures that must capture state.
    pub native: Option<NativeHandler>,
    /// Values this closure roots beyond its captured environment.
    pub roots: Vec<Value>,
}

/// Collector counters exposed to the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct GcStats {
    pub runs: u64,
    pub time_ms: u64,
}

/// Slot arena for one object kind. Freed slots are recycled; ids are stable
/// for the lifetime of the object (the collector never moves survivors).
#[derive(Debug)]
struct Pool<T> {
    slots: Vec<Option<T>>,
    free: Vec<u32>,
}

impl<T> Pool<T> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn alloc(&mut self, value: T) -> u32 {
        if let Some(id) = self.free.pop() {
            self.slots[id as usize] = Some(value);
            id
        } else {
            let id = u32::try_from(self.slots.len()).expect("heap pool exceeds u32 ids");
            self.slots.push(Some(value));
            id
        }
    }

    fn get(&self, id: u32) -> &T {
        self.slots[id as usize].as_ref().expect("stale heap handle")
    }

    fn get_mut(&mut self, id: u32) -> &mut T {
        self.slots[id as usize].as_mut().expect("stale heap handle")
    }

    fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Frees every unmarked slot, returning the number freed.
    fn sweep(&mut self, marks: &[bool]) -> usize {
        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_some() && !marks[index] {
                *slot = None;
                self.free.push(index as u32);
                freed += 1;
            }
        }
        freed
    }
}

/// How many allocations between implicit collections at VM safe points.
const GC_ALLOC_THRESHOLD: usize = 4096;

/// The interpreter heap: three pools plus collector state.
#[derive(Debug)]
pub struct Heap {
    arrays: Pool<OrderedMap>,
    closures: Pool<Closure>,
    envs: Pool<Environment>,
    allocs_since_gc: usize,
    stats: GcStats,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            arrays: Pool::new(),
            closures: Pool::new(),
            envs: Pool::new(),
            allocs_since_gc: 0,
            stats: GcStats::default(),
        }
    }

    pub fn alloc_array(&mut self, map: OrderedMap) -> ArrayId {
        self.allocs_since_gc += 1;
        ArrayId(self.arrays.alloc(map))
    }

    #[must_use]
    pub fn array(&self, id: ArrayId) -> &OrderedMap {
        self.arrays.get(id.0)
    }

    pub fn array_mut(&mut self, id: ArrayId) -> &mut OrderedMap {
        self.arrays.get_mut(id.0)
    }

    pub(crate) fn alloc_closure(&mut self, closure: Closure) -> ClosureId {
        self.allocs_since_gc += 1;
        ClosureId(self.closures.alloc(closure))
    }

    pub(crate) fn closure(&self, id: ClosureId) -> &Closure {
        self.closures.get(id.0)
    }

    pub(crate) fn closure_mut(&mut self, id: ClosureId) -> &mut Closure {
        self.closures.get_mut(id.0)
    }

    pub(crate) fn alloc_env(&mut self, slot_count: usize, parent: Option<EnvId>) -> EnvId {
        self.allocs_since_gc += 1;
        EnvId(self.envs.alloc(Environment {
            slots: vec![Value::None; slot_count],
            parent,
        }))
    }

    pub(crate) fn env(&self, id: EnvId) -> &Environment {
        self.envs.get(id.0)
    }

    pub(crate) fn env_mut(&mut self, id: EnvId) -> &mut Environment {
        self.envs.get_mut(id.0)
    }

    /// Live object counts per pool: (environments, arrays, closures).
    #[must_use]
    pub fn live_counts(&self) -> (usize, usize, usize) {
        (self.envs.live(), self.arrays.live(), self.closures.live())
    }

    #[must_use]
    pub fn stats(&self) -> GcStats {
        self.stats
    }

    /// True when enough allocations have accumulated that the next safe
    /// point should collect.
    #[must_use]
    pub(crate) fn wants_collection(&self) -> bool {
        self.allocs_since_gc >= GC_ALLOC_THRESHOLD
    }

    /// Runs a mark-sweep cycle over all three pools.
    ///
    /// Marking always completes. The optional millisecond budget is checked
    /// between pool sweeps: once exceeded, the remaining pools keep their
    /// garbage until the next cycle. No partially-freed object state is
    /// ever observable.
    pub(crate) fn collect<'a>(
        &mut self,
        value_roots: impl IntoIterator<Item = &'a Value>,
        env_roots: impl IntoIterator<Item = EnvId>,
        budget_ms: Option<u64>,
    ) {
        let start = Instant::now();

        let mut array_marks = vec![false; self.arrays.slots.len()];
        let mut closure_marks = vec![false; self.closures.slots.len()];
        let mut env_marks = vec![false; self.envs.slots.len()];

        enum Item {
            Arr(u32),
            Clo(u32),
            Env(u32),
        }

        let mut work: Vec<Item> = Vec::new();
        let mut seed = |work: &mut Vec<Item>, value: &Value| match value {
            Value::Array(id) => work.push(Item::Arr(id.0)),
            Value::Function(id) => work.push(Item::Clo(id.0)),
            _ => {}
        };

        for value in value_roots {
            seed(&mut work, value);
        }
        for env in env_roots {
            work.push(Item::Env(env.0));
        }

        while let Some(item) = work.pop() {
            match item {
                Item::Arr(id) => {
                    if std::mem::replace(&mut array_marks[id as usize], true) {
                        continue;
                    }
                    for (_, value) in self.arrays.get(id).iter() {
                        seed(&mut work, value);
                    }
                }
                Item::Clo(id) => {
                    if std::mem::replace(&mut closure_marks[id as usize], true) {
                        continue;
                    }
                    let closure = self.closures.get(id);
                    if let Some(env) = closure.env {
                        work.push(Item::Env(env.0));
                    }
                    for value in &closure.roots {
                        seed(&mut work, value);
                    }
                }
                Item::Env(id) => {
                    if std::mem::replace(&mut env_marks[id as usize], true) {
                        continue;
                    }
                    let env = self.envs.get(id);
                    if let Some(parent) = env.parent {
                        work.push(Item::Env(parent.0));
                    }
                    for value in &env.slots {
                        seed(&mut work, value);
                    }
                }
            }
        }

        let mut freed = 0;
        let over_budget = |start: Instant| match budget_ms {
            Some(ms) => start.elapsed().as_millis() as u64 > ms,
            None => false,
        };

        freed += self.envs.sweep(&env_marks);
        if !over_budget(start) {
            freed += self.arrays.sweep(&array_marks);
        }
        if !over_budget(start) {
            freed += self.closures.sweep(&closure_marks);
        }

        self.allocs_since_gc = 0;
        self.stats.runs += 1;
        self.stats.time_ms += start.elapsed().as_millis() as u64;
        tracing::debug!(
            freed,
            envs = self.envs.live(),
            arrays = self.arrays.live(),
            closures = self.closures.live(),
            "gc cycle"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::MapKey;

    #[test]
    fn test_unreachable_objects_are_freed() {
        let mut heap = Heap::new();
        let live = heap.alloc_array(OrderedMap::new());
        let _dead = heap.alloc_array(OrderedMap::new());
        let root = Value::Array(live);

        heap.collect([&root], [], None);
        assert_eq!(heap.live_counts(), (0, 1, 0));
    }

    #[test]
    fn test_nested_reachability() {
        let mut heap = Heap::new();
        let inner = heap.alloc_array(OrderedMap::new());
        let outer = heap.alloc_array(OrderedMap::new());
        heap.array_mut(outer).set(MapKey::str("inner"), Value::Array(inner));
        let root = Value::Array(outer);

        heap.collect([&root], [], None);
        assert_eq!(heap.live_counts(), (0, 2, 0));
        // inner still usable through its id
        assert!(heap.array(inner).is_empty());
    }

    #[test]
    fn test_cycles_are_collected() {
        let mut heap = Heap::new();
        let a = heap.alloc_array(OrderedMap::new());
        let b = heap.alloc_array(OrderedMap::new());
        heap.array_mut(a).set(MapKey::str("b"), Value::Array(b));
        heap.array_mut(b).set(MapKey::str("a"), Value::Array(a));

        heap.collect([], [], None);
        assert_eq!(heap.live_counts(), (0, 0, 0));
    }

    #[test]
    fn test_closure_keeps_environment_alive() {
        let mut heap = Heap::new();
        let env = heap.alloc_env(2, None);
        let captured = heap.alloc_array(OrderedMap::new());
        heap.env_mut(env).slots[0] = Value::Array(captured);
        let closure = heap.alloc_closure(Closure {
            name: Rc::from("f"),
            func: None,
            env: Some(env),
            native: None,
            roots: vec![],
        });
        let root = Value::Function(closure);

        heap.collect([&root], [], None);
        assert_eq!(heap.live_counts(), (1, 1, 1));
    }

    #[test]
    fn test_env_parent_chain_marked() {
        let mut heap = Heap::new();
        let parent = heap.alloc_env(1, None);
        let child = heap.alloc_env(1, Some(parent));

        heap.collect([], [child], None);
        assert_eq!(heap.live_counts(), (2, 0, 0));
    }

    #[test]
    fn test_double_collect_is_idempotent() {
        let mut heap = Heap::new();
        let live = heap.alloc_array(OrderedMap::new());
        heap.alloc_array(OrderedMap::new());
        let root = Value::Array(live);

        heap.collect([&root], [], None);
        let counts = heap.live_counts();
        heap.collect([&root], [], None);
        assert_eq!(heap.live_counts(), counts);
        assert_eq!(heap.stats().runs, 2);
    }

    #[test]
    fn test_slot_reuse_after_sweep() {
        let mut heap = Heap::new();
        let dead = heap.alloc_array(OrderedMap::new());
        heap.collect([], [], None);
        let reused = heap.alloc_array(OrderedMap::new());
        assert_eq!(dead, reused, "freed slot is recycled");
    }

    #[test]
    fn test_closure_roots_are_marked() {
        let mut heap = Heap::new();
        let payload = heap.alloc_array(OrderedMap::new());
        let closure = heap.alloc_closure(Closure {
            name: Rc::from("forwarder"),
            func: None,
            env: None,
            native: None,
            roots: vec![Value::Int(3), Value::Array(payload)],
        });
        let root = Value::Function(closure);

        heap.collect([&root], [], None);
        assert_eq!(heap.live_counts(), (0, 1, 1));
    }
}
