//! Abstract value domains.
//!
//! A domain supplies the three lattice operations the engine needs: a least
//! element, a join, and a partial-order comparison. Domains are instance
//! values rather than bare types so that composed domains (maps over a value
//! domain, entity-keyed maps sharing an interner) can carry configuration.

use std::cmp::Ordering;
use std::fmt::Debug;

/// A join-semilattice over `Value`.
///
/// `compare(old, new)` must be monotone with respect to `merge`: a value that
/// only ever grows through merges must never compare as `Greater` against its
/// successor. The engine checks this after every merge it performs and treats
/// a violation as a fatal internal-consistency failure.
pub trait AbstractDomain {
    type Value: Clone + Debug + Eq;

    /// The least element.
    fn bottom(&self) -> Self::Value;

    /// Least upper bound. Must be commutative, associative and idempotent up
    /// to `Value` equality, and must satisfy `merge(a, b) >= a` and
    /// `merge(a, b) >= b` under `compare`.
    fn merge(&self, a: &Self::Value, b: &Self::Value) -> Self::Value;

    /// `Less` if `old < new`, `Equal` if equivalent, `Greater` otherwise
    /// (including incomparable values, which can only arise from a broken
    /// transfer function).
    fn compare(&self, old: &Self::Value, new: &Self::Value) -> Ordering;

    /// True for the "unknown / may-be" top value. Map combinators prune
    /// entries carrying it, since an absent key already means unknown.
    fn is_unknown(&self, _v: &Self::Value) -> bool {
        false
    }

    /// True for a designated "stop tracking" sentinel; map merges drop keys
    /// whose merged value hits it. Off by default.
    fn is_remove_sentinel(&self, _v: &Self::Value) -> bool {
        false
    }
}

/// Merge through a domain and debug-check monotonicity of the result.
pub fn merge_checked<D: AbstractDomain>(domain: &D, a: &D::Value, b: &D::Value) -> D::Value {
    let merged = domain.merge(a, b);
    debug_assert_ne!(
        domain.compare(a, &merged),
        Ordering::Greater,
        "merge not monotone in lhs: {:?} vs {:?}",
        a,
        merged
    );
    debug_assert_ne!(
        domain.compare(b, &merged),
        Ordering::Greater,
        "merge not monotone in rhs: {:?} vs {:?}",
        b,
        merged
    );
    merged
}

/// The three-level "flat" lattice over a constant payload: bottom, a single
/// known value, or top. The workhorse of constant-style analyses and a handy
/// test domain.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Flat<T> {
    Bottom,
    Known(T),
    Top,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FlatDomain<T>(std::marker::PhantomData<T>);

impl<T: Clone + Debug + Eq> AbstractDomain for FlatDomain<T> {
    type Value = Flat<T>;

    fn bottom(&self) -> Flat<T> {
        Flat::Bottom
    }

    fn merge(&self, a: &Flat<T>, b: &Flat<T>) -> Flat<T> {
        match (a, b) {
            (Flat::Bottom, x) | (x, Flat::Bottom) => x.clone(),
            (Flat::Known(x), Flat::Known(y)) if x == y => a.clone(),
            _ => Flat::Top,
        }
    }

    fn compare(&self, old: &Flat<T>, new: &Flat<T>) -> Ordering {
        let rank = |v: &Flat<T>| match v {
            Flat::Bottom => 0,
            Flat::Known(_) => 1,
            Flat::Top => 2,
        };
        match rank(old).cmp(&rank(new)) {
            Ordering::Equal if old == new => Ordering::Equal,
            // Distinct constants at the same rank are incomparable.
            Ordering::Equal => Ordering::Greater,
            ord => ord,
        }
    }

    fn is_unknown(&self, v: &Flat<T>) -> bool {
        matches!(v, Flat::Top)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flat_lattice_laws() {
        let d = FlatDomain::<i64>::default();
        let k1 = Flat::Known(1);
        let k2 = Flat::Known(2);
        assert_eq!(d.merge(&Flat::Bottom, &k1), k1);
        assert_eq!(d.merge(&k1, &k1), k1);
        assert_eq!(d.merge(&k1, &k2), Flat::Top);
        assert_eq!(d.merge(&k1, &k2), d.merge(&k2, &k1));
        assert_eq!(d.compare(&Flat::Bottom, &k1), Ordering::Less);
        assert_eq!(d.compare(&k1, &Flat::Top), Ordering::Less);
        assert_eq!(d.compare(&k1, &k1), Ordering::Equal);
        assert_eq!(d.compare(&Flat::Top, &k1), Ordering::Greater);
        let _ = merge_checked(&d, &k1, &k2);
    }
}
