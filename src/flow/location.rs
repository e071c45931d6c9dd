//! Location-keyed storage: reference propagation semantics.
//!
//! State is a map from [`LocationId`] to an abstract value. Assigning a
//! reference means "the target's storage regions now hold whatever the
//! source held": a single-region points-to set takes the value outright (a
//! strong update), while a multi-region set merges it into every member (a
//! weak update, since only one of them is actually written at run time).

use crate::loc::LocationId;
use fxhash::FxHashMap;
use log::trace;

pub type LocationMap<V> = FxHashMap<LocationId, V>;

/// Merged value over every region the read may refer to; `default` for
/// regions with no recorded state (and for an empty points-to set).
pub fn read<V: Clone>(
    data: &LocationMap<V>,
    locations: &[LocationId],
    default: V,
    mut merge: impl FnMut(&V, &V) -> V,
) -> V {
    let mut result: Option<V> = None;
    for loc in locations {
        let value = data.get(loc).cloned().unwrap_or_else(|| default.clone());
        result = Some(match result {
            None => value,
            Some(acc) => merge(&acc, &value),
        });
    }
    result.unwrap_or(default)
}

/// Write `value` into every region of the target's points-to set.
pub fn write<V: Clone>(
    data: &mut LocationMap<V>,
    locations: &[LocationId],
    value: V,
    mut merge: impl FnMut(&V, &V) -> V,
) {
    match locations {
        [] => {}
        [only] => {
            trace!("write: strong update of {}", only);
            data.insert(*only, value);
        }
        many => {
            for loc in many {
                let merged = match data.get(loc) {
                    Some(existing) => merge(existing, &value),
                    None => value.clone(),
                };
                trace!("write: weak update of {}", loc);
                data.insert(*loc, merged);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::loc::EntityStore;
    use crate::ir::{ProcBody, SymbolData, TypeKind};

    fn two_locations() -> (LocationId, LocationId) {
        let mut body = ProcBody::new("t");
        let widget = body.add_type("Widget", TypeKind::Reference);
        let a = body.add_symbol(SymbolData::local("a", widget));
        let b = body.add_symbol(SymbolData::local("b", widget));
        let mut store = EntityStore::default();
        (store.symbol_location(a), store.symbol_location(b))
    }

    #[test]
    fn single_target_updates_strongly() {
        let (la, lb) = two_locations();
        let mut data: LocationMap<u32> = LocationMap::default();
        data.insert(la, 1);
        write(&mut data, &[la], 5, |a, b| *a.max(b));
        assert_eq!(data[&la], 5);
        assert!(!data.contains_key(&lb));
    }

    #[test]
    fn multi_target_updates_weakly() {
        let (la, lb) = two_locations();
        let mut data: LocationMap<u32> = LocationMap::default();
        data.insert(la, 9);
        write(&mut data, &[la, lb], 5, |a, b| *a.max(b));
        // The old value survives the weak update.
        assert_eq!(data[&la], 9);
        assert_eq!(data[&lb], 5);
    }

    #[test]
    fn read_merges_over_the_points_to_set() {
        let (la, lb) = two_locations();
        let mut data: LocationMap<u32> = LocationMap::default();
        data.insert(la, 3);
        data.insert(lb, 8);
        let v = read(&data, &[la, lb], 0, |a, b| *a.max(b));
        assert_eq!(v, 8);
        let v = read(&data, &[], 42, |a, b| *a.max(b));
        assert_eq!(v, 42);
    }
}
