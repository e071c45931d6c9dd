//! Entity factory: from operation nodes to analysis entities.
//!
//! The factory pattern-matches a "read/reference" node and produces the
//! entity it denotes, or nothing for nodes that don't denote storage.
//! Results are memoized per node for the lifetime of one analysis run: a
//! node is revisited many times during fixpoint iteration, and entity-keyed
//! maps rely on getting the identical handle back each time.
//!
//! Member, array and indexer entities need to know which storage region the
//! receiver points to; that knowledge is supplied by an optional points-to
//! lookup. Without one, the factory degrades soundly to tracking locals and
//! parameters only.

use crate::ir::{ConstVal, Node, NodeKind, ProcBody, Symbol, SymbolKind, TypeKind, TypeRef};
use crate::loc::{AbstractIndex, EntityId, EntityStore, LocationId, SharedEntityStore};
use fxhash::FxHashMap;
use log::trace;
use smallvec::{smallvec, SmallVec};

/// Resolves the storage regions a reference-typed node may point to.
pub type PointsToFn<'a> =
    dyn Fn(&ProcBody, &mut EntityStore, Node) -> Option<SmallVec<[LocationId; 1]>> + 'a;

pub struct EntityFactory<'a> {
    body: &'a ProcBody,
    store: SharedEntityStore,
    points_to: Option<Box<PointsToFn<'a>>>,
    node_cache: FxHashMap<Node, Option<EntityId>>,
    this_entity: Option<Option<EntityId>>,
}

impl<'a> EntityFactory<'a> {
    pub fn new(body: &'a ProcBody, store: SharedEntityStore) -> EntityFactory<'a> {
        EntityFactory {
            body,
            store,
            points_to: None,
            node_cache: FxHashMap::default(),
            this_entity: None,
        }
    }

    pub fn with_points_to(
        body: &'a ProcBody,
        store: SharedEntityStore,
        points_to: Box<PointsToFn<'a>>,
    ) -> EntityFactory<'a> {
        EntityFactory {
            points_to: Some(points_to),
            ..EntityFactory::new(body, store)
        }
    }

    pub fn body(&self) -> &'a ProcBody {
        self.body
    }

    pub fn store(&self) -> &SharedEntityStore {
        &self.store
    }

    /// The entity addressed by `node`, or `None` for nodes that don't denote
    /// storage. Memoized per node.
    pub fn try_create(&mut self, node: Node) -> Option<EntityId> {
        if let Some(&cached) = self.node_cache.get(&node) {
            return cached;
        }
        let entity = self.try_create_uncached(node);
        trace!("try_create: {} -> {:?}", node, entity);
        self.node_cache.insert(node, entity);
        entity
    }

    fn try_create_uncached(&mut self, node: Node) -> Option<EntityId> {
        let kind = self.body.nodes[node].kind.clone();
        let node_ty = self.body.ty_of(node);
        match kind {
            NodeKind::LocalRef(symbol) | NodeKind::ParamRef(symbol) => {
                Some(self.symbol_entity(symbol))
            }
            NodeKind::FieldRef { instance, field } => {
                self.member_entity(instance, field, node_ty, smallvec![])
            }
            NodeKind::PropertyRef {
                instance,
                property,
                indices,
            } => {
                // Only properties that behave like storage are tracked;
                // modelling a side-effecting getter as a location would be
                // unsound.
                let shape = match self.body.symbols[property].kind {
                    SymbolKind::Property(shape) => shape,
                    _ => return None,
                };
                if !(shape.indexer || shape.readonly || shape.auto) {
                    return None;
                }
                let indices = self.create_abstract_indices(&indices);
                self.member_entity(instance, property, node_ty, indices)
            }
            NodeKind::ArrayRef { array, indices } => {
                let location = self.pointee_location(array)?;
                let indices = self.create_abstract_indices(&indices);
                Some(self.intern(None, indices, location, node_ty, None))
            }
            NodeKind::DynamicIndex { instance, indices } => {
                let location = self.pointee_location(instance)?;
                let indices = self.create_abstract_indices(&indices);
                Some(self.intern(None, indices, location, node_ty, None))
            }
            NodeKind::InstanceRef => self.this_instance(),
            NodeKind::Invoke { method, .. } => {
                // A method symbol rarely denotes storage; kept for
                // completeness of the identity model.
                Some(self.symbol_entity(method))
            }
            NodeKind::ConditionalAccess { access, .. } => self.try_create(access),
            NodeKind::Convert { operand, .. } | NodeKind::Paren { operand } => {
                self.try_create(operand)
            }
            _ => None,
        }
    }

    /// The cached `this` entity, created on first request.
    pub fn this_instance(&mut self) -> Option<EntityId> {
        if let Some(cached) = self.this_entity {
            return cached;
        }
        let entity = self.body.this_symbol.map(|symbol| {
            let ty = self.body.symbols[symbol].ty;
            let location = self.store.borrow_mut().this_location(ty);
            self.intern(Some(symbol), smallvec![], location, ty, None)
        });
        self.this_entity = Some(entity);
        entity
    }

    /// Entity for a symbol with no operation node in view (e.g. a local that
    /// is declared but not yet referenced).
    pub fn try_create_for_symbol_declaration(&mut self, symbol: Symbol) -> Option<EntityId> {
        match self.body.symbols[symbol].kind {
            SymbolKind::Local | SymbolKind::Parameter => Some(self.symbol_entity(symbol)),
            _ => None,
        }
    }

    /// Entity for one element of a collection/object initializer, before the
    /// allocation has been assigned anywhere.
    pub fn try_create_for_element_initializer(
        &mut self,
        creation: Node,
        indices: SmallVec<[AbstractIndex; 2]>,
        ty: TypeRef,
    ) -> Option<EntityId> {
        if indices.is_empty() {
            return None;
        }
        let location = {
            let mut store = self.store.borrow_mut();
            store.allocation_location(creation, self.body.ty_of(creation))
        };
        Some(self.intern(None, indices, location, ty, None))
    }

    /// Constant-fold index operands into abstract indices; unresolvable
    /// indices fall back to entity- or node-keyed identity.
    pub fn create_abstract_indices(&mut self, nodes: &[Node]) -> SmallVec<[AbstractIndex; 2]> {
        nodes
            .iter()
            .map(|&n| match self.body.const_of(n) {
                Some(ConstVal::Int(i)) if *i >= 0 => AbstractIndex::Constant(*i as u64),
                _ => match self.try_create(n) {
                    Some(entity) => AbstractIndex::Entity(entity),
                    None => AbstractIndex::Operation(n),
                },
            })
            .collect()
    }

    /// Rewrite `entity`'s parent chain so its ultimate root becomes
    /// `new_root`, re-homing value-type descendant state during a struct
    /// assignment.
    pub fn create_with_new_instance_root(
        &mut self,
        entity: EntityId,
        new_root: EntityId,
    ) -> EntityId {
        let (entity_loc, parent) = {
            let store = self.store.borrow();
            (store.entity(entity).location, store.entity(entity).parent)
        };
        let root_loc = self.store.borrow().entity(new_root).location;
        if entity_loc == root_loc {
            return entity;
        }
        match parent {
            None => new_root,
            Some(p) => {
                let new_parent = self.create_with_new_instance_root(p, new_root);
                let (symbol, indices, ty) = {
                    let store = self.store.borrow();
                    let data = store.entity(entity);
                    (data.symbol, data.indices.clone(), data.ty)
                };
                let location = self.store.borrow().entity(new_parent).location;
                self.intern(symbol, indices, location, ty, Some(new_parent))
            }
        }
    }

    /// All entities interned under `location`: the aliases that must be
    /// reset when that region is written through a reference or escapes to
    /// an unanalyzed callee.
    pub fn entities_from_instance(&self, location: LocationId) -> Vec<EntityId> {
        self.store.borrow().entities_at(location)
    }

    /// Descendants of `root` among all interned entities.
    pub fn descendants_of(&self, root: EntityId) -> Vec<EntityId> {
        let store = self.store.borrow();
        (0..store.entity_count())
            .map(|i| EntityId::from(i as u32))
            .filter(|&e| e != root && store.has_ancestor_or_self(e, root))
            .collect()
    }

    fn symbol_entity(&mut self, symbol: Symbol) -> EntityId {
        let ty = self.body.symbols[symbol].ty;
        let location = self.store.borrow_mut().symbol_location(symbol);
        self.intern(Some(symbol), smallvec![], location, ty, None)
    }

    fn member_entity(
        &mut self,
        instance: Option<Node>,
        member: Symbol,
        node_ty: TypeRef,
        indices: SmallVec<[AbstractIndex; 2]>,
    ) -> Option<EntityId> {
        let instance = match instance {
            None => {
                // Static member: storage is named by the symbol alone.
                let location = self.store.borrow_mut().symbol_location(member);
                return Some(self.intern(Some(member), indices, location, node_ty, None));
            }
            Some(instance) => instance,
        };
        if self.body.types[self.body.ty_of(instance)].kind == TypeKind::Value {
            // Nested-by-value member: lives inside its parent's storage.
            let parent = self.try_create(instance)?;
            let location = self.store.borrow().entity(parent).location;
            Some(self.intern(Some(member), indices, location, node_ty, Some(parent)))
        } else {
            let location = self.pointee_location(instance)?;
            Some(self.intern(Some(member), indices, location, node_ty, None))
        }
    }

    /// Single location a receiver points to, joining a multi-location
    /// points-to set. `None` without points-to knowledge.
    fn pointee_location(&mut self, instance: Node) -> Option<LocationId> {
        let points_to = self.points_to.as_ref()?;
        let mut store = self.store.borrow_mut();
        let locations = points_to(self.body, &mut store, instance)?;
        let mut iter = locations.into_iter();
        let first = iter.next()?;
        Some(iter.fold(first, |acc, loc| store.join_locations(acc, loc)))
    }

    fn intern(
        &self,
        symbol: Option<Symbol>,
        indices: SmallVec<[AbstractIndex; 2]>,
        location: LocationId,
        ty: TypeRef,
        parent: Option<EntityId>,
    ) -> EntityId {
        self.store
            .borrow_mut()
            .intern_entity(self.body, symbol, indices, location, ty, parent)
    }
}

/// A conservative points-to resolver needing no separate analysis: creation
/// nodes point at their own allocation site, `this` at the receiver
/// location, reference-typed locals/parameters at their symbol's region,
/// conversions and parentheses at whatever their operand points to.
pub fn syntactic_points_to(
    body: &ProcBody,
    store: &mut EntityStore,
    node: Node,
) -> Option<SmallVec<[LocationId; 1]>> {
    match &body.nodes[node].kind {
        NodeKind::Creation { .. } => {
            Some(smallvec![store.allocation_location(node, body.ty_of(node))])
        }
        NodeKind::InstanceRef => Some(smallvec![store.this_location(body.ty_of(node))]),
        NodeKind::LocalRef(symbol) | NodeKind::ParamRef(symbol)
            if body.types[body.symbols[*symbol].ty].kind == TypeKind::Reference =>
        {
            Some(smallvec![store.symbol_location(*symbol)])
        }
        NodeKind::Convert { operand, .. } | NodeKind::Paren { operand } => {
            syntactic_points_to(body, store, *operand)
        }
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::{SymbolData, TypeKind};
    use crate::loc::shared_store;

    fn widget_body() -> (ProcBody, Symbol, Symbol, TypeRef, TypeRef) {
        let mut body = ProcBody::new("t");
        let widget = body.add_type("Widget", TypeKind::Reference);
        let int = body.add_type("int", TypeKind::Value);
        let p = body.add_symbol(SymbolData::param("p", widget));
        body.params.push(p);
        let f = body.add_symbol(SymbolData::field("f", int));
        (body, p, f, widget, int)
    }

    #[test]
    fn try_create_is_memoized() {
        let (mut body, p, _, widget, _) = widget_body();
        let read = body.add_node(NodeKind::ParamRef(p), widget);
        let store = shared_store();
        let mut factory = EntityFactory::new(&body, store);
        let a = factory.try_create(read);
        let b = factory.try_create(read);
        assert!(a.is_some());
        assert_eq!(a, b);
    }

    #[test]
    fn members_degrade_without_points_to() {
        let (mut body, p, f, widget, int) = widget_body();
        let read = body.add_node(NodeKind::ParamRef(p), widget);
        let field = body.add_node(
            NodeKind::FieldRef {
                instance: Some(read),
                field: f,
            },
            int,
        );
        let store = shared_store();
        let mut factory = EntityFactory::new(&body, store.clone());
        assert!(factory.try_create(field).is_none());
        // Locals and parameters are still tracked.
        assert!(factory.try_create(read).is_some());

        let mut factory = EntityFactory::with_points_to(&body, store, Box::new(syntactic_points_to));
        assert!(factory.try_create(field).is_some());
    }

    #[test]
    fn index_constant_folding() {
        let (mut body, p, _, widget, int) = widget_body();
        let arr = body.add_node(NodeKind::ParamRef(p), widget);
        let idx = body.add_const_node(NodeKind::Literal, int, ConstVal::Int(3));
        let opaque = body.add_node(
            NodeKind::Binary {
                op: crate::ir::BinaryOp::Add,
                lhs: idx,
                rhs: idx,
            },
            int,
        );
        let store = shared_store();
        let mut factory =
            EntityFactory::with_points_to(&body, store, Box::new(syntactic_points_to));
        let indices = factory.create_abstract_indices(&[idx, opaque]);
        assert_eq!(indices[0], AbstractIndex::Constant(3));
        assert_eq!(indices[1], AbstractIndex::Operation(opaque));
        let _ = arr;
    }

    #[test]
    fn only_storage_like_properties_are_tracked() {
        let mut body = ProcBody::new("t");
        let widget = body.add_type("Widget", TypeKind::Reference);
        let int = body.add_type("int", TypeKind::Value);
        let p = body.add_symbol(SymbolData::param("p", widget));
        body.params.push(p);
        let auto_prop = body.add_symbol(SymbolData {
            name: "Count".into(),
            kind: SymbolKind::Property(crate::ir::PropertyShape {
                auto: true,
                ..Default::default()
            }),
            ty: int,
            is_static: false,
        });
        let computed = body.add_symbol(SymbolData {
            name: "Hash".into(),
            kind: SymbolKind::Property(Default::default()),
            ty: int,
            is_static: false,
        });

        let read = body.add_node(NodeKind::ParamRef(p), widget);
        let auto_ref = body.add_node(
            NodeKind::PropertyRef {
                instance: Some(read),
                property: auto_prop,
                indices: Default::default(),
            },
            int,
        );
        let read2 = body.add_node(NodeKind::ParamRef(p), widget);
        let computed_ref = body.add_node(
            NodeKind::PropertyRef {
                instance: Some(read2),
                property: computed,
                indices: Default::default(),
            },
            int,
        );

        let store = shared_store();
        let mut factory =
            EntityFactory::with_points_to(&body, store, Box::new(syntactic_points_to));
        assert!(factory.try_create(auto_ref).is_some());
        // A computed getter is not storage.
        assert!(factory.try_create(computed_ref).is_none());
    }

    #[test]
    fn element_initializer_entities() {
        let (mut body, _, _, widget, int) = widget_body();
        let creation = body.add_node(NodeKind::Creation { args: Default::default() }, widget);
        let store = shared_store();
        let mut factory = EntityFactory::new(&body, store.clone());
        let elem = factory
            .try_create_for_element_initializer(
                creation,
                smallvec![AbstractIndex::Constant(0)],
                int,
            )
            .unwrap();
        let s = store.borrow();
        assert_eq!(s.entity(elem).symbol, None);
        assert_eq!(
            s.location(s.entity(elem).location),
            &crate::loc::LocationData::Allocation {
                site: creation,
                ty: widget
            }
        );
    }

    #[test]
    fn new_instance_root_rehomes_children() {
        let mut body = ProcBody::new("t");
        let pair = body.add_type("Pair", TypeKind::Value);
        let int = body.add_type("int", TypeKind::Value);
        let a = body.add_symbol(SymbolData::local("a", pair));
        let b = body.add_symbol(SymbolData::local("b", pair));
        let f = body.add_symbol(SymbolData::field("f", int));

        let read_a = body.add_node(NodeKind::LocalRef(a), pair);
        let field_a = body.add_node(
            NodeKind::FieldRef {
                instance: Some(read_a),
                field: f,
            },
            int,
        );
        let read_b = body.add_node(NodeKind::LocalRef(b), pair);

        let store = shared_store();
        let mut factory = EntityFactory::new(&body, store.clone());
        let ent_field_a = factory.try_create(field_a).unwrap();
        let ent_b = factory.try_create(read_b).unwrap();
        let rehomed = factory.create_with_new_instance_root(ent_field_a, ent_b);

        let s = store.borrow();
        assert_ne!(rehomed, ent_field_a);
        assert_eq!(s.entity(rehomed).symbol, Some(f));
        assert_eq!(s.entity(rehomed).parent, Some(ent_b));
        assert_eq!(s.entity(rehomed).location, s.entity(ent_b).location);
        assert!(s.has_ancestor_or_self(rehomed, ent_b));
    }
}
