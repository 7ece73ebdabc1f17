#![cfg(test)]

// Property tests for ParallelHashSet kept inside the crate so they can check
// per-shard table invariants.

use crate::parallel_hash_set::ParallelHashSet;
use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::hash::{BuildHasher, Hasher};

// Key newtype with Borrow<str> to exercise borrowed lookup.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
struct Key(String);
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::borrow::Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// Pool-indexed operations so failing cases shrink toward earlier keys.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize),
    InsertNode(usize),
    Erase(usize),
    Extract(usize),
    Contains(String),
    Rehash(usize),
    Reserve(usize),
    Retain(u8),
    Clear,
    Iterate,
}

fn key_from(pool: &[String], i: usize) -> Key {
    Key(pool[i].clone())
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,5}", 1..=24).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(pool.clone());
        let op = prop_oneof![
            4 => idx.clone().prop_map(OpI::Insert),
            2 => idx.clone().prop_map(OpI::InsertNode),
            2 => idx.clone().prop_map(OpI::Erase),
            1 => idx.clone().prop_map(OpI::Extract),
            2 => prop_oneof![
                contains_pool.prop_map(|s: String| s),
                "[a-z]{0,5}".prop_map(|s| s)
            ]
            .prop_map(OpI::Contains),
            1 => (0usize..256).prop_map(OpI::Rehash),
            1 => (0usize..128).prop_map(OpI::Reserve),
            1 => any::<u8>().prop_map(OpI::Retain),
            1 => Just(OpI::Clear),
            1 => Just(OpI::Iterate),
        ];
        proptest::collection::vec(op, 1..80).prop_map(move |ops| (pool.clone(), ops))
    })
}

fn run_state_machine<S: BuildHasher>(
    sut: ParallelHashSet<Key, S>,
    pool: &[String],
    ops: Vec<OpI>,
) -> Result<(), TestCaseError> {
    let mut model: HashSet<Key> = HashSet::new();
    for op in ops {
        match op {
            OpI::Insert(i) => {
                let k = key_from(pool, i);
                let fresh = !model.contains(&k);
                prop_assert_eq!(sut.insert(k.clone()), fresh);
                model.insert(k);
            }
            OpI::InsertNode(i) => {
                let k = key_from(pool, i);
                let fresh = !model.contains(&k);
                let ret = sut.insert_node(k.clone());
                prop_assert_eq!(ret.inserted, fresh);
                prop_assert_eq!(ret.node.is_none(), fresh, "rejected value must come back");
                let pos = ret.position;
                let at = sut.shard(pos.shard).with_lock(|t| t.get(pos.index).cloned());
                prop_assert_eq!(at, Some(k.clone()));
                model.insert(k);
            }
            OpI::Erase(i) => {
                let k = key_from(pool, i);
                prop_assert_eq!(sut.erase(k.0.as_str()), model.remove(&k));
            }
            OpI::Extract(i) => {
                let k = key_from(pool, i);
                let got = sut.extract(&k);
                prop_assert_eq!(got, model.take(&k));
            }
            OpI::Contains(s) => {
                let has_model = model.iter().any(|k| k.0 == s);
                prop_assert_eq!(sut.contains(s.as_str()), has_model);
                prop_assert_eq!(sut.count(s.as_str()), usize::from(has_model));
            }
            OpI::Rehash(n) => sut.rehash(n),
            OpI::Reserve(n) => {
                sut.reserve(n);
                prop_assert!(sut.capacity() as f32 * sut.max_load_factor() >= n as f32);
            }
            OpI::Retain(b) => {
                let keep = |k: &Key| k.0.len() % 2 == (b % 2) as usize;
                sut.retain(|k| keep(k));
                model.retain(|k| keep(k));
            }
            OpI::Clear => {
                sut.clear();
                model.clear();
            }
            OpI::Iterate => {
                let items: Vec<Key> = sut.iter().collect();
                let s_keys: BTreeSet<_> = items.iter().cloned().collect();
                prop_assert_eq!(s_keys.len(), items.len(), "iteration yielded a duplicate");
                let m_keys: BTreeSet<_> = model.iter().cloned().collect();
                prop_assert_eq!(s_keys, m_keys);
            }
        }

        // Post-conditions after each op
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
        for i in 0..sut.shard_count() {
            sut.shard(i).with_lock(|t| t.assert_invariants());
        }
        let per_shard: usize = (0..sut.shard_count()).map(|i| sut.shard_len(i)).sum();
        prop_assert_eq!(per_shard, model.len());
    }

    // Every element lives in the shard its hash routes to.
    let mut stored = BTreeSet::new();
    for i in 0..sut.shard_count() {
        let hasher = sut.hasher();
        sut.shard(i).with_lock(|t| {
            for k in t.iter() {
                stored.insert((i, hasher.hash_one(k)));
            }
        });
    }
    for (i, h) in stored {
        prop_assert_eq!(sut.shard_index_of(h), i);
    }
    let drained: BTreeSet<Key> = sut.into_iter().collect();
    prop_assert_eq!(drained, model.into_iter().collect::<BTreeSet<_>>());
    Ok(())
}

// Property: State-machine equivalence against std::collections::HashSet.
// Invariants exercised across random operation sequences:
// - `insert`/`insert_node` report freshness exactly like the model; a
//   rejected node is handed back.
// - `erase`/`extract`/`contains`/`count` parity, including borrowed lookup.
// - `rehash`/`reserve`/`retain`/`clear` keep membership equal to the model.
// - `iter` yields each element exactly once; every shard table stays
//   internally consistent and every element sits in its routed shard.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario(), shard_bits in 0u32..4) {
        let sut: ParallelHashSet<Key> = ParallelHashSet::with_shards(1 << shard_bits);
        run_state_machine(sut, &pool, ops)?;
    }
}

// Collision variant using a constant hasher to stress equality resolution.
#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

// Property: Same state-machine invariants as above, under worst-case
// collision behavior (constant hasher). Every key routes to shard 0 and
// starts probing at slot 0.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        let sut: ParallelHashSet<Key, ConstBuildHasher> = ParallelHashSet::with_hasher(ConstBuildHasher);
        run_state_machine(sut, &pool, ops)?;
    }
}

// Property: merge moves exactly the elements missing from the target and
// leaves the rest in the source.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_merge_partitions_source(
        a in proptest::collection::btree_set(0u16..64, 0..40),
        b in proptest::collection::btree_set(0u16..64, 0..40),
    ) {
        let mut target: ParallelHashSet<u16> = ParallelHashSet::with_shards(4);
        target.extend(&a);
        let mut source: ParallelHashSet<u16> = ParallelHashSet::with_shards(2);
        source.extend(&b);

        let moved = target.merge(&mut source);
        prop_assert_eq!(moved, b.difference(&a).count());
        let t: BTreeSet<u16> = target.iter().collect();
        let s: BTreeSet<u16> = source.iter().collect();
        prop_assert_eq!(t, a.union(&b).copied().collect::<BTreeSet<_>>());
        prop_assert_eq!(s, a.intersection(&b).copied().collect::<BTreeSet<_>>());
    }
}
