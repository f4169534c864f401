//! Stateful property testing for the optimistic patch/undo stack.
//!
//! Uses proptest-state-machine to check that any interleaving of patches
//! and undos leaves the cache equal to a simple reference model built on
//! snapshot restore semantics.

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;
use proptest_state_machine::{ReferenceStateMachine, StateMachineTest, prop_state_machine};
use serde_json::json;

use slate_engine::apply_optimistic;
use slate_model::{Entity, EntityKind, Operation};
use slate_store::{AppliedPatch, CacheData, CacheKey, QueryStore, ViewArgs};

const IDS: [&str; 3] = ["t1", "t2", "t3"];
const STATUSES: [&str; 4] = ["todo", "in_progress", "done", "blocked"];

/// Operations the harness can perform against the patch stack.
#[derive(Debug, Clone)]
pub enum PatchOperation {
    /// Optimistically set one task's status.
    Patch { id: String, status: String },
    /// Undo the most recent patch.
    UndoLast,
    /// Roll the whole stack back.
    UndoAll,
}

/// Reference model: current statuses plus a stack of pre-image
/// snapshots, one per outstanding patch handle.
#[derive(Clone, Debug)]
pub struct PatchModel {
    statuses: BTreeMap<String, String>,
    history: Vec<BTreeMap<String, String>>,
}

impl PatchModel {
    fn initial() -> Self {
        Self {
            statuses: IDS
                .iter()
                .map(|id| (id.to_string(), "todo".to_string()))
                .collect(),
            history: Vec::new(),
        }
    }
}

impl ReferenceStateMachine for PatchModel {
    type State = Self;
    type Transition = PatchOperation;

    fn init_state() -> BoxedStrategy<Self::State> {
        Just(Self::initial()).boxed()
    }

    fn transitions(_state: &Self::State) -> BoxedStrategy<Self::Transition> {
        prop_oneof![
            4 => (
                proptest::sample::select(IDS.to_vec()),
                proptest::sample::select(STATUSES.to_vec()),
            )
                .prop_map(|(id, status)| PatchOperation::Patch {
                    id: id.to_string(),
                    status: status.to_string(),
                }),
            1 => Just(PatchOperation::UndoLast),
            1 => Just(PatchOperation::UndoAll),
        ]
        .boxed()
    }

    fn apply(mut state: Self::State, transition: &Self::Transition) -> Self::State {
        match transition {
            PatchOperation::Patch { id, status } => {
                state.history.push(state.statuses.clone());
                state.statuses.insert(id.clone(), status.clone());
            }
            PatchOperation::UndoLast => {
                if let Some(previous) = state.history.pop() {
                    state.statuses = previous;
                }
            }
            PatchOperation::UndoAll => {
                if let Some(oldest) = state.history.first() {
                    state.statuses = oldest.clone();
                }
                state.history.clear();
            }
        }
        state
    }

    fn preconditions(_state: &Self::State, _transition: &Self::Transition) -> bool {
        true
    }
}

/// System under test: one live cache entry plus the patch handles the
/// orchestrator would be holding.
pub struct PatchHarness {
    store: Arc<QueryStore>,
    key: CacheKey,
    patches: Vec<AppliedPatch>,
}

impl PatchHarness {
    fn new() -> Self {
        let store = QueryStore::new();
        let key = CacheKey::new("tasks", "{}");
        let rows: Vec<Entity> = IDS
            .iter()
            .map(|id| {
                let mut e = Entity::new(*id, EntityKind::Task);
                e.fields.insert("status".to_string(), json!("todo"));
                e
            })
            .collect();
        let data = CacheData::Flat(rows);
        store.register(key.clone(), ViewArgs::for_project("demo"), data.empty_like());
        store.fulfill(&key, data, Default::default());
        Self {
            store,
            key,
            patches: Vec::new(),
        }
    }

    fn statuses(&self) -> BTreeMap<String, String> {
        let entry = self.store.get(&self.key).expect("entry stays live");
        let mut statuses = BTreeMap::new();
        entry.data.for_each(|e| {
            let status = e.fields["status"].as_str().expect("string status");
            statuses.insert(e.id.clone(), status.to_string());
        });
        statuses
    }
}

impl StateMachineTest for PatchHarness {
    type SystemUnderTest = Self;
    type Reference = PatchModel;

    fn init_test(
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) -> Self::SystemUnderTest {
        Self::new()
    }

    fn apply(
        mut state: Self::SystemUnderTest,
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
        transition: <Self::Reference as ReferenceStateMachine>::Transition,
    ) -> Self::SystemUnderTest {
        match transition {
            PatchOperation::Patch { id, status } => {
                let op = Operation::update(
                    "op",
                    EntityKind::Task,
                    id,
                    json!({"status": status}).as_object().unwrap().clone(),
                );
                let applied = apply_optimistic(&state.store, &[state.key.clone()], &[op]);
                assert_eq!(applied.len(), 1, "every patch targets a present row");
                state.patches.extend(applied);
            }
            PatchOperation::UndoLast => {
                if let Some(patch) = state.patches.pop() {
                    state.store.undo(patch).expect("entry stays live");
                }
            }
            PatchOperation::UndoAll => {
                let patches = std::mem::take(&mut state.patches);
                state.store.undo_all(patches);
            }
        }
        state
    }

    fn check_invariants(
        state: &Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) {
        // The cache must agree with the model after every step.
        assert_eq!(state.statuses(), ref_state.statuses);
        // One outstanding handle per un-undone patch.
        assert_eq!(state.patches.len(), ref_state.history.len());
    }
}

prop_state_machine! {
    #![proptest_config(ProptestConfig {
        cases: 50,
        max_shrink_iters: 5000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn patch_undo_state_machine(sequential 1..30 => PatchHarness);
}
