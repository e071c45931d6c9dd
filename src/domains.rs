//! Map and set domain combinators.
//!
//! These lift a value domain to the composite lattices every concrete
//! analysis ends up needing: "mapping from key to value" and "set of value".
//! The entity-keyed variant additionally understands that two entity keys can
//! be the same storage *ignoring instance location*, which happens when the
//! states of two branches that allocated different objects are merged.

use crate::lattice::{merge_checked, AbstractDomain};
use crate::loc::{EntityId, EntityStore, SharedEntityStore};
use fxhash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;

/// Shared key-pointwise comparison for map lattices.
///
/// A map grows by gaining keys or by growing a key's value; losing a key that
/// the old map carried is a decrease and therefore reported as `Greater` (a
/// monotonicity violation for values produced by merges).
fn compare_maps<K: Hash + Eq, D: AbstractDomain>(
    domain: &D,
    old: &FxHashMap<K, D::Value>,
    new: &FxHashMap<K, D::Value>,
) -> Ordering {
    let mut strictly_less = old.len() < new.len();
    for (key, old_value) in old {
        match new.get(key) {
            None => return Ordering::Greater,
            Some(new_value) => match domain.compare(old_value, new_value) {
                Ordering::Greater => return Ordering::Greater,
                Ordering::Less => strictly_less = true,
                Ordering::Equal => {}
            },
        }
    }
    if strictly_less {
        Ordering::Less
    } else {
        Ordering::Equal
    }
}

/// Lifts a value domain to a "mapping from key to value" lattice.
///
/// Bottom is the empty map. Merging unions the key sets and joins the values
/// of shared keys; a merged value equal to the value domain's designated
/// remove sentinel drops its key, trading precision for map size.
#[derive(Clone, Debug, Default)]
pub struct MapDomain<K, D> {
    pub value_domain: D,
    _marker: PhantomData<K>,
}

impl<K, D> MapDomain<K, D> {
    pub fn new(value_domain: D) -> Self {
        MapDomain {
            value_domain,
            _marker: PhantomData,
        }
    }
}

impl<K, D> AbstractDomain for MapDomain<K, D>
where
    K: Clone + Debug + Eq + Hash,
    D: AbstractDomain,
{
    type Value = FxHashMap<K, D::Value>;

    fn bottom(&self) -> Self::Value {
        FxHashMap::default()
    }

    fn merge(&self, a: &Self::Value, b: &Self::Value) -> Self::Value {
        let mut result = FxHashMap::default();
        for (key, value_a) in a {
            let merged = match b.get(key) {
                Some(value_b) => merge_checked(&self.value_domain, value_a, value_b),
                None => value_a.clone(),
            };
            if !self.value_domain.is_remove_sentinel(&merged) {
                result.insert(key.clone(), merged);
            }
        }
        for (key, value_b) in b {
            if !a.contains_key(key) && !self.value_domain.is_remove_sentinel(value_b) {
                result.insert(key.clone(), value_b.clone());
            }
        }
        result
    }

    fn compare(&self, old: &Self::Value, new: &Self::Value) -> Ordering {
        compare_maps(&self.value_domain, old, new)
    }
}

/// The standard subset lattice: bottom is the empty set, merge is union,
/// and comparison is the subset test (incomparable sets are reported as
/// `Greater`, which the engine treats as a violation).
#[derive(Clone, Debug, Default)]
pub struct SetDomain<T> {
    _marker: PhantomData<T>,
}

impl<T> SetDomain<T> {
    pub fn new() -> Self {
        SetDomain {
            _marker: PhantomData,
        }
    }
}

impl<T: Clone + Debug + Eq + Hash> AbstractDomain for SetDomain<T> {
    type Value = FxHashSet<T>;

    fn bottom(&self) -> Self::Value {
        FxHashSet::default()
    }

    fn merge(&self, a: &Self::Value, b: &Self::Value) -> Self::Value {
        a.union(b).cloned().collect()
    }

    fn compare(&self, old: &Self::Value, new: &Self::Value) -> Ordering {
        if old.iter().all(|item| new.contains(item)) {
            if old.len() == new.len() {
                Ordering::Equal
            } else {
                Ordering::Less
            }
        } else {
            Ordering::Greater
        }
    }
}

/// Value domains usable under an entity-keyed map: they name the
/// "unknown / may-be" top and the default assumed for an entity seen in only
/// one of two merged states.
pub trait EntityValueDomain: AbstractDomain {
    /// The most conservative value.
    fn unknown(&self) -> Self::Value;

    /// Value assumed for a *named* entity absent from one side of a merge.
    /// Indexed/anonymous entities have no inherent default and always merge
    /// against [`EntityValueDomain::unknown`].
    fn default_for_unseen(&self, store: &EntityStore, entity: EntityId) -> Self::Value {
        let _ = (store, entity);
        self.unknown()
    }
}

/// Entity-keyed map lattice.
///
/// Merging pairs keys that are equal ignoring instance location; a pair whose
/// locations differ is re-keyed under the joined location. A result key whose
/// merged value is the unknown top is dropped: an absent key already means
/// unknown, and keeping the map's size bounded by the keys that carry
/// discriminating information is what keeps large procedures tractable. Two
/// lattice-equal states can therefore have maps of different cardinality;
/// equality must be judged through `compare`, never through `len`.
#[derive(Clone, Debug)]
pub struct EntityMapDomain<D> {
    pub value_domain: D,
    pub store: SharedEntityStore,
}

impl<D> EntityMapDomain<D> {
    pub fn new(value_domain: D, store: SharedEntityStore) -> Self {
        EntityMapDomain {
            value_domain,
            store,
        }
    }
}

impl<D: EntityValueDomain> EntityMapDomain<D> {
    fn insert_folded(&self, result: &mut FxHashMap<EntityId, D::Value>, key: EntityId, value: D::Value) {
        let folded = match result.get(&key) {
            Some(existing) => merge_checked(&self.value_domain, existing, &value),
            None => value,
        };
        if self.value_domain.is_unknown(&folded) || self.value_domain.is_remove_sentinel(&folded) {
            result.remove(&key);
        } else {
            result.insert(key, folded);
        }
    }

    fn unseen_default(&self, store: &EntityStore, entity: EntityId) -> D::Value {
        if store.entity(entity).symbol.is_some() {
            self.value_domain.default_for_unseen(store, entity)
        } else {
            self.value_domain.unknown()
        }
    }
}

impl<D: EntityValueDomain> AbstractDomain for EntityMapDomain<D> {
    type Value = FxHashMap<EntityId, D::Value>;

    fn bottom(&self) -> Self::Value {
        FxHashMap::default()
    }

    fn merge(&self, a: &Self::Value, b: &Self::Value) -> Self::Value {
        let mut store = self.store.borrow_mut();
        let mut result = FxHashMap::default();

        // Index `b` by location-erased identity.
        let mut erased_b: FxHashMap<u64, SmallVec<[EntityId; 2]>> = FxHashMap::default();
        for &key in b.keys() {
            erased_b
                .entry(store.hash_ignoring_location(key))
                .or_default()
                .push(key);
        }

        let mut matched_b: FxHashSet<EntityId> = FxHashSet::default();
        for (&key_a, value_a) in a {
            let mut candidates: SmallVec<[EntityId; 2]> = SmallVec::new();
            if let Some(bucket) = erased_b.get(&store.hash_ignoring_location(key_a)) {
                for &key_b in bucket {
                    if store.eq_ignoring_location(key_a, key_b) {
                        candidates.push(key_b);
                    }
                }
            }
            if candidates.is_empty() {
                // The entity survives only one branch; merge against its
                // default so single-branch knowledge is weakened, not kept.
                let default = self.unseen_default(&store, key_a);
                let merged = merge_checked(&self.value_domain, value_a, &default);
                self.insert_folded(&mut result, key_a, merged);
            } else {
                for key_b in candidates {
                    matched_b.insert(key_b);
                    let merged = merge_checked(&self.value_domain, value_a, &b[&key_b]);
                    let key = if key_b == key_a {
                        key_a
                    } else {
                        let loc_a = store.entity(key_a).location;
                        let loc_b = store.entity(key_b).location;
                        let joined = store.join_locations(loc_a, loc_b);
                        store.with_location(key_a, joined)
                    };
                    self.insert_folded(&mut result, key, merged);
                }
            }
        }
        for (&key_b, value_b) in b {
            if matched_b.contains(&key_b) {
                continue;
            }
            let default = self.unseen_default(&store, key_b);
            let merged = merge_checked(&self.value_domain, value_b, &default);
            self.insert_folded(&mut result, key_b, merged);
        }
        result
    }

    /// Pruning-aware comparison: merge never stores the unknown top, so a
    /// key absent from `new` reads as unknown (which any stored value is
    /// below), while a key absent from `old` is unseen state being gained.
    fn compare(&self, old: &Self::Value, new: &Self::Value) -> Ordering {
        let unknown = self.value_domain.unknown();
        let mut strictly_less = false;
        for (key, old_value) in old {
            let new_value = new.get(key).unwrap_or(&unknown);
            match self.value_domain.compare(old_value, new_value) {
                Ordering::Greater => return Ordering::Greater,
                Ordering::Less => strictly_less = true,
                Ordering::Equal => {}
            }
        }
        if strictly_less || new.keys().any(|key| !old.contains_key(key)) {
            Ordering::Less
        } else {
            Ordering::Equal
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::{ProcBody, SymbolData, TypeKind};
    use crate::lattice::{Flat, FlatDomain};
    use crate::loc::shared_store;
    use smallvec::smallvec;

    fn map_of<K: Hash + Eq, V>(entries: Vec<(K, V)>) -> FxHashMap<K, V> {
        entries.into_iter().collect()
    }

    #[test]
    fn map_merge_laws() {
        let d: MapDomain<u32, FlatDomain<i64>> = MapDomain::new(FlatDomain::default());
        let m1 = map_of(vec![(1, Flat::Known(10)), (2, Flat::Known(20))]);
        let m2 = map_of(vec![(2, Flat::Known(21)), (3, Flat::Known(30))]);

        // Commutativity and idempotence up to value equality.
        assert_eq!(d.merge(&m1, &m2), d.merge(&m2, &m1));
        assert_eq!(d.merge(&m1, &m1), m1);

        let merged = d.merge(&m1, &m2);
        assert_eq!(merged[&1], Flat::Known(10));
        assert_eq!(merged[&2], Flat::Top);
        assert_eq!(merged[&3], Flat::Known(30));
    }

    #[test]
    fn map_compare_detects_dropped_keys() {
        let d: MapDomain<u32, FlatDomain<i64>> = MapDomain::new(FlatDomain::default());
        let m1 = map_of(vec![(1, Flat::Known(10))]);
        let m2 = map_of(vec![(1, Flat::Top), (2, Flat::Known(5))]);
        assert_eq!(d.compare(&m1, &m2), Ordering::Less);
        // A key present in `old` but dropped in `new` is a decrease.
        assert_eq!(d.compare(&m2, &m1), Ordering::Greater);
        assert_eq!(d.compare(&m1, &m1), Ordering::Equal);
    }

    #[test]
    fn set_lattice() {
        let d: SetDomain<u32> = SetDomain::new();
        let s1: FxHashSet<u32> = vec![1, 2].into_iter().collect();
        let s2: FxHashSet<u32> = vec![2, 3].into_iter().collect();
        let merged = d.merge(&s1, &s2);
        assert_eq!(merged.len(), 3);
        assert_eq!(d.compare(&s1, &merged), Ordering::Less);
        assert_eq!(d.compare(&s1, &s2), Ordering::Greater);
        assert_eq!(d.compare(&s1, &s1), Ordering::Equal);
    }

    #[derive(Clone, Copy, Debug, Default)]
    struct TestValueDomain;

    impl AbstractDomain for TestValueDomain {
        type Value = Flat<i64>;
        fn bottom(&self) -> Flat<i64> {
            Flat::Bottom
        }
        fn merge(&self, a: &Flat<i64>, b: &Flat<i64>) -> Flat<i64> {
            FlatDomain::default().merge(a, b)
        }
        fn compare(&self, old: &Flat<i64>, new: &Flat<i64>) -> Ordering {
            FlatDomain::default().compare(old, new)
        }
        fn is_unknown(&self, v: &Flat<i64>) -> bool {
            matches!(v, Flat::Top)
        }
    }

    impl EntityValueDomain for TestValueDomain {
        fn unknown(&self) -> Flat<i64> {
            Flat::Top
        }
    }

    #[test]
    fn entity_map_rekeys_through_joined_location() {
        let mut body = ProcBody::new("t");
        let ty = body.add_type("Widget", TypeKind::Reference);
        let x = body.add_symbol(SymbolData::local("x", ty));

        let store = shared_store();
        let site_a = body.add_node(crate::ir::NodeKind::Creation { args: smallvec![] }, ty);
        let site_b = body.add_node(crate::ir::NodeKind::Creation { args: smallvec![] }, ty);
        let (ent_a, ent_b, joined_key) = {
            let mut s = store.borrow_mut();
            let loc_a = s.allocation_location(site_a, ty);
            let loc_b = s.allocation_location(site_b, ty);
            let ent_a = s.intern_entity(&body, Some(x), smallvec![], loc_a, ty, None);
            let ent_b = s.intern_entity(&body, Some(x), smallvec![], loc_b, ty, None);
            let joined = s.join_locations(loc_a, loc_b);
            let joined_key = s.with_location(ent_a, joined);
            (ent_a, ent_b, joined_key)
        };

        let d = EntityMapDomain::new(TestValueDomain, store.clone());
        let m1 = map_of(vec![(ent_a, Flat::Known(1))]);
        let m2 = map_of(vec![(ent_b, Flat::Known(1))]);
        let merged = d.merge(&m1, &m2);
        assert_eq!(merged.get(&joined_key), Some(&Flat::Known(1)));
        assert!(!merged.contains_key(&ent_a));
        assert!(!merged.contains_key(&ent_b));
    }

    #[test]
    fn entity_map_prunes_unknown_results() {
        let mut body = ProcBody::new("t");
        let ty = body.add_type("Widget", TypeKind::Reference);
        let x = body.add_symbol(SymbolData::local("x", ty));
        let y = body.add_symbol(SymbolData::local("y", ty));

        let store = shared_store();
        let (ent_x, ent_y) = {
            let mut s = store.borrow_mut();
            let lx = s.symbol_location(x);
            let ly = s.symbol_location(y);
            (
                s.intern_entity(&body, Some(x), smallvec![], lx, ty, None),
                s.intern_entity(&body, Some(y), smallvec![], ly, ty, None),
            )
        };

        let d = EntityMapDomain::new(TestValueDomain, store.clone());
        // `x` disagrees between branches and merges to Top: pruned.
        // `y` survives only one branch: merged against unknown, also pruned.
        let m1 = map_of(vec![(ent_x, Flat::Known(1)), (ent_y, Flat::Known(7))]);
        let m2 = map_of(vec![(ent_x, Flat::Known(2))]);
        let merged = d.merge(&m1, &m2);
        assert!(merged.is_empty());
        // Absent keys read as unknown: the pruned map is still above both
        // inputs, never a monotonicity violation.
        assert_eq!(d.compare(&m1, &merged), Ordering::Less);
        assert_eq!(d.compare(&m2, &merged), Ordering::Less);
    }

    #[test]
    fn entity_map_merge_commutes() {
        let mut body = ProcBody::new("t");
        let ty = body.add_type("Widget", TypeKind::Reference);
        let x = body.add_symbol(SymbolData::local("x", ty));
        let store = shared_store();
        let ent = {
            let mut s = store.borrow_mut();
            let lx = s.symbol_location(x);
            s.intern_entity(&body, Some(x), smallvec![], lx, ty, None)
        };
        let d = EntityMapDomain::new(TestValueDomain, store.clone());
        let m1 = map_of(vec![(ent, Flat::Known(1))]);
        let m2 = map_of(vec![(ent, Flat::Known(1))]);
        assert_eq!(d.merge(&m1, &m2), d.merge(&m2, &m1));
        assert_eq!(d.merge(&m1, &m1), m1);
    }
}
