//! Entity-keyed storage: value-copy assignment semantics.
//!
//! State is a map from [`EntityId`] to an abstract value. Assigning a
//! struct-typed storage does not alias: every descendant entity of the
//! target is reset, then every tracked descendant of the *source* is cloned
//! with the target as its new root and its value copied over. That gives
//! deep value-type copy semantics without copying any memory. Writing
//! through a reference instead invalidates every entity that may alias the
//! written region.

use crate::factory::EntityFactory;
use crate::ir::{Node, Symbol};
use crate::loc::EntityId;
use fxhash::FxHashMap;
use log::trace;

pub type EntityMap<V> = FxHashMap<EntityId, V>;

/// Value stored for `node`'s entity, or `default` when untracked/unset.
pub fn read<V: Clone>(
    data: &EntityMap<V>,
    factory: &mut EntityFactory,
    node: Node,
    default: V,
) -> V {
    match factory.try_create(node) {
        Some(entity) => data.get(&entity).cloned().unwrap_or(default),
        None => default,
    }
}

/// Route `value` into the storage denoted by `target_node`.
///
/// `source_node` is the assigned expression, used to copy descendant state
/// on struct assignment.
pub fn assign<V: Clone + Eq>(
    data: &mut EntityMap<V>,
    factory: &mut EntityFactory,
    target_node: Node,
    source_node: Option<Node>,
    value: V,
    unknown: &V,
) {
    let target = match factory.try_create(target_node) {
        Some(target) => target,
        None => return,
    };
    let body = factory.body();
    if body.is_value_type(body.ty_of(target_node)) {
        trace!("assign: struct copy into {:?}", target);
        // Stale descendant state of the target must not survive the
        // overwrite.
        for descendant in factory.descendants_of(target) {
            if let Some(stored) = data.get_mut(&descendant) {
                *stored = unknown.clone();
            }
        }
        if let Some(source_node) = source_node {
            if let Some(source) = factory.try_create(source_node) {
                for descendant in factory.descendants_of(source) {
                    if let Some(v) = data.get(&descendant).cloned() {
                        let rehomed = factory.create_with_new_instance_root(descendant, target);
                        data.insert(rehomed, v);
                    }
                }
            }
        }
        data.insert(target, value);
    } else {
        reset_aliases(data, factory, target, unknown);
        data.insert(target, value);
    }
}

/// Widen every tracked entity that may share the target's storage region.
/// Used on reference writes and when a receiver escapes to an unanalyzed
/// callee.
pub fn reset_aliases<V: Clone>(
    data: &mut EntityMap<V>,
    factory: &mut EntityFactory,
    written: EntityId,
    unknown: &V,
) {
    let location = factory.store().borrow().entity(written).location;
    for alias in factory.entities_from_instance(location) {
        if alias == written {
            continue;
        }
        if let Some(stored) = data.get_mut(&alias) {
            trace!("reset_aliases: widening {:?}", alias);
            *stored = unknown.clone();
        }
    }
}

/// Seed entry state for the formal parameters (and the receiver, if any):
/// each gets an entity and the supplied initial value. Analyses with
/// points-to results route richer parameter state through `initial`; without
/// them the initial value degrades to unknown.
pub fn seed_parameters<V>(
    data: &mut EntityMap<V>,
    factory: &mut EntityFactory,
    mut initial: impl FnMut(Symbol) -> V,
) {
    let params: Vec<Symbol> = factory.body().params.clone();
    for param in params {
        if let Some(entity) = factory.try_create_for_symbol_declaration(param) {
            data.insert(entity, initial(param));
        }
    }
    if let Some(this_symbol) = factory.body().this_symbol {
        if let Some(entity) = factory.this_instance() {
            data.insert(entity, initial(this_symbol));
        }
    }
}
