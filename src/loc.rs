//! Identity model for storage locations.
//!
//! Flow-sensitive state is keyed by *what storage an expression denotes*, not
//! by the expression's syntax. Three layers give storage a structural name:
//!
//! * [`AbstractIndex`] -- how a container is indexed (constant, entity, or an
//!   unresolved operation node kept for reference identity);
//! * an abstract location -- which allocation/storage region a reference
//!   points to (allocation site, implicit receiver, or bare symbol);
//! * an analysis entity -- a named or indexed, possibly nested, storage
//!   location (symbol + index path + location + type + optional parent).
//!
//! Locations and entities are interned in [`EntityStore`]; handles compare
//! and hash as plain integers after the canonicalizing intern step. Multiple
//! entities may share one location, meaning "may be the same object".

use crate::entity;
use crate::entity::EntityVec;
use crate::ir::{Node, ProcBody, Symbol, TypeRef};
use fxhash::FxHashMap;
use log::trace;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

entity!(LocationId, "loc");
entity!(EntityId, "ent");

/// Identity for a container-access index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AbstractIndex {
    /// Index resolved to a compile-time constant.
    Constant(u64),
    /// Index denoted by another tracked entity.
    Entity(EntityId),
    /// Unresolved index, identified by its operation node.
    Operation(Node),
}

/// Identity for an abstract heap/storage region.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LocationData {
    /// An allocation site: the creating operation plus its static type.
    Allocation { site: Node, ty: TypeRef },
    /// The implicit receiver of a given declaring type.
    ThisOrMe { ty: TypeRef },
    /// Manufactured for a symbol with no executable creation in view
    /// (a parameter, a local before any allocation is observed).
    SymbolLoc { symbol: Symbol },
    /// Canonical join of base locations, produced when states from branches
    /// that allocated different objects are merged. Flattened, sorted,
    /// deduplicated; never nests.
    Join(SmallVec<[LocationId; 2]>),
}

/// The addressable unit of flow-sensitive state.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntityData {
    /// Symbol this entity is named by, if any.
    pub symbol: Option<Symbol>,
    /// Container/member access path. Non-empty when `symbol` is `None`.
    pub indices: SmallVec<[AbstractIndex; 2]>,
    /// Where this entity's storage lives.
    pub location: LocationId,
    /// Static type of the entity.
    pub ty: TypeRef,
    /// Containing entity, for nested-by-value (struct) members only.
    pub parent: Option<EntityId>,
    /// Whether this entity is reached through indices or through an
    /// instance member symbol. Computed at intern time.
    pub is_child_or_instance_member: bool,
}

/// Interner for locations and entities, plus the per-location index of
/// entities known to share a location.
///
/// One store is owned by one single-threaded analysis run and shared between
/// the entity factory and entity-keyed domains.
#[derive(Debug, Default)]
pub struct EntityStore {
    locations: EntityVec<LocationId, LocationData>,
    location_dedup: FxHashMap<LocationData, LocationId>,
    entities: EntityVec<EntityId, EntityData>,
    entity_dedup: FxHashMap<EntityData, EntityId>,
    by_location: FxHashMap<LocationId, Vec<EntityId>>,
}

pub type SharedEntityStore = Rc<RefCell<EntityStore>>;

pub fn shared_store() -> SharedEntityStore {
    Rc::new(RefCell::new(EntityStore::default()))
}

impl EntityStore {
    fn intern_location(&mut self, data: LocationData) -> LocationId {
        if let Some(&id) = self.location_dedup.get(&data) {
            return id;
        }
        let id = self.locations.push(data.clone());
        self.location_dedup.insert(data, id);
        trace!("intern_location: {} = {:?}", id, self.locations[id]);
        id
    }

    pub fn allocation_location(&mut self, site: Node, ty: TypeRef) -> LocationId {
        self.intern_location(LocationData::Allocation { site, ty })
    }

    pub fn this_location(&mut self, ty: TypeRef) -> LocationId {
        self.intern_location(LocationData::ThisOrMe { ty })
    }

    pub fn symbol_location(&mut self, symbol: Symbol) -> LocationId {
        self.intern_location(LocationData::SymbolLoc { symbol })
    }

    /// The "merged instance location" combinator: canonical join of two
    /// locations. Joining is flattening, so chains of merges stay bounded by
    /// the number of base locations.
    pub fn join_locations(&mut self, a: LocationId, b: LocationId) -> LocationId {
        if a == b {
            return a;
        }
        let mut bases: SmallVec<[LocationId; 2]> = SmallVec::new();
        for loc in [a, b].iter().copied() {
            match &self.locations[loc] {
                LocationData::Join(inner) => bases.extend(inner.iter().copied()),
                _ => bases.push(loc),
            }
        }
        bases.sort_unstable();
        bases.dedup();
        if bases.len() == 1 {
            return bases[0];
        }
        self.intern_location(LocationData::Join(bases))
    }

    /// Base locations of `loc` (itself, or the members of a join).
    pub fn base_locations(&self, loc: LocationId) -> SmallVec<[LocationId; 2]> {
        match &self.locations[loc] {
            LocationData::Join(inner) => inner.clone(),
            _ => {
                let mut v = SmallVec::new();
                v.push(loc);
                v
            }
        }
    }

    pub fn location(&self, id: LocationId) -> &LocationData {
        &self.locations[id]
    }

    /// Intern an entity, computing and validating its derived invariants.
    pub fn intern_entity(
        &mut self,
        body: &ProcBody,
        symbol: Option<Symbol>,
        indices: SmallVec<[AbstractIndex; 2]>,
        location: LocationId,
        ty: TypeRef,
        parent: Option<EntityId>,
    ) -> EntityId {
        debug_assert!(
            symbol.is_some() || !indices.is_empty(),
            "entity must be reachable by name or by access path"
        );
        if let Some(p) = parent {
            debug_assert!(
                body.is_value_type(self.entities[p].ty),
                "entity parents must have value-copy semantics"
            );
        }
        let is_child_or_instance_member = !indices.is_empty()
            || symbol.map_or(false, |s| {
                let data = &body.symbols[s];
                data.is_member() && !data.is_static
            });
        debug_assert!(parent.is_none() || is_child_or_instance_member);

        self.intern_data(EntityData {
            symbol,
            indices,
            location,
            ty,
            parent,
            is_child_or_instance_member,
        })
    }

    fn intern_data(&mut self, data: EntityData) -> EntityId {
        if let Some(&id) = self.entity_dedup.get(&data) {
            return id;
        }
        let location = data.location;
        let id = self.entities.push(data.clone());
        self.entity_dedup.insert(data, id);
        for base in self.base_locations(location) {
            self.by_location.entry(base).or_default().push(id);
        }
        trace!("intern_entity: {} = {:?}", id, self.entities[id]);
        id
    }

    /// The same entity re-homed at a different instance location. Derived
    /// fields are unaffected by the location, so they carry over.
    pub fn with_location(&mut self, id: EntityId, location: LocationId) -> EntityId {
        if self.entities[id].location == location {
            return id;
        }
        let mut data = self.entities[id].clone();
        data.location = location;
        self.intern_data(data)
    }

    pub fn entity(&self, id: EntityId) -> &EntityData {
        &self.entities[id]
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// All entities interned under a location (or any base of a join).
    /// Backs "reset every alias of this storage region".
    pub fn entities_at(&self, loc: LocationId) -> Vec<EntityId> {
        let mut out = vec![];
        for base in self.base_locations(loc) {
            if let Some(ids) = self.by_location.get(&base) {
                out.extend(ids.iter().copied());
            }
        }
        out
    }

    /// Walk the parent chain. Parents only point through value-typed
    /// containers, so the chain is finite and acyclic by construction.
    pub fn has_ancestor_or_self(&self, entity: EntityId, ancestor: EntityId) -> bool {
        let mut cur = Some(entity);
        while let Some(id) = cur {
            if id == ancestor {
                return true;
            }
            cur = self.entities[id].parent;
        }
        false
    }

    /// Equality that disregards instance locations: same symbol, index path,
    /// type, and parents equal under the same relation. Two branch states
    /// can name "the same" entity under different allocations; merging uses
    /// this relation to pair them up.
    pub fn eq_ignoring_location(&self, a: EntityId, b: EntityId) -> bool {
        if a == b {
            return true;
        }
        let (da, db) = (&self.entities[a], &self.entities[b]);
        if da.symbol != db.symbol || da.ty != db.ty || da.indices.len() != db.indices.len() {
            return false;
        }
        for (ia, ib) in da.indices.iter().zip(db.indices.iter()) {
            let same = match (ia, ib) {
                (AbstractIndex::Entity(ea), AbstractIndex::Entity(eb)) => {
                    self.eq_ignoring_location(*ea, *eb)
                }
                _ => ia == ib,
            };
            if !same {
                return false;
            }
        }
        match (da.parent, db.parent) {
            (None, None) => true,
            (Some(pa), Some(pb)) => self.eq_ignoring_location(pa, pb),
            _ => false,
        }
    }

    /// Hash consistent with [`EntityStore::eq_ignoring_location`].
    pub fn hash_ignoring_location(&self, id: EntityId) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash_erased(id, &mut hasher);
        hasher.finish()
    }

    fn hash_erased(&self, id: EntityId, hasher: &mut DefaultHasher) {
        let data = &self.entities[id];
        data.symbol.hash(hasher);
        data.ty.hash(hasher);
        data.indices.len().hash(hasher);
        for index in &data.indices {
            match index {
                AbstractIndex::Entity(e) => self.hash_erased(*e, hasher),
                other => other.hash(hasher),
            }
        }
        if let Some(p) = data.parent {
            self.hash_erased(p, hasher);
        }
    }
}
