// src/runtime/object.rs
//
// The class registry. The tree references classes and fields by id; the
// interpreter resolves them here. Fields only, no properties: in-place
// member initialization is always legal on fields, and readonly fields are
// writable only during construction.

use std::cell::RefCell;
use std::rc::Rc;

use crate::tree::Ty;

use super::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeDefId(pub u32);

/// Identifies one field of a registered class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId {
    pub owner: TypeDefId,
    pub index: u32,
    pub is_static: bool,
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: Rc<str>,
    pub ty: Ty,
    pub readonly: bool,
}

impl FieldDef {
    pub fn new(name: &str, ty: Ty) -> FieldDef {
        FieldDef {
            name: Rc::from(name),
            ty,
            readonly: false,
        }
    }

    pub fn readonly(name: &str, ty: Ty) -> FieldDef {
        FieldDef {
            name: Rc::from(name),
            ty,
            readonly: true,
        }
    }
}

#[derive(Debug)]
pub struct TypeDef {
    pub name: Rc<str>,
    pub fields: Vec<FieldDef>,
    pub statics: Vec<(FieldDef, RefCell<Value>)>,
    pub is_abstract: bool,
}

impl TypeDef {
    pub fn new(name: &str) -> TypeDef {
        TypeDef {
            name: Rc::from(name),
            fields: Vec::new(),
            statics: Vec::new(),
            is_abstract: false,
        }
    }

    pub fn abstract_class(name: &str) -> TypeDef {
        TypeDef {
            is_abstract: true,
            ..TypeDef::new(name)
        }
    }

    pub fn with_field(mut self, field: FieldDef) -> TypeDef {
        self.fields.push(field);
        self
    }

    pub fn with_static(mut self, field: FieldDef, initial: Value) -> TypeDef {
        self.statics.push((field, RefCell::new(initial)));
        self
    }
}

#[derive(Debug, Default)]
pub struct TypeRegistry {
    defs: Vec<TypeDef>,
}

impl TypeRegistry {
    pub fn new() -> TypeRegistry {
        TypeRegistry::default()
    }

    pub fn define(&mut self, def: TypeDef) -> TypeDefId {
        let id = TypeDefId(self.defs.len() as u32);
        self.defs.push(def);
        id
    }

    pub fn get(&self, id: TypeDefId) -> &TypeDef {
        &self.defs[id.0 as usize]
    }

    /// Field id by name; instance fields only.
    pub fn field(&self, owner: TypeDefId, name: &str) -> Option<FieldId> {
        let def = self.get(owner);
        def.fields
            .iter()
            .position(|f| &*f.name == name)
            .map(|index| FieldId {
                owner,
                index: index as u32,
                is_static: false,
            })
    }

    pub fn static_field(&self, owner: TypeDefId, name: &str) -> Option<FieldId> {
        let def = self.get(owner);
        def.statics
            .iter()
            .position(|(f, _)| &*f.name == name)
            .map(|index| FieldId {
                owner,
                index: index as u32,
                is_static: true,
            })
    }

    pub fn field_def(&self, id: FieldId) -> &FieldDef {
        let def = self.get(id.owner);
        if id.is_static {
            &def.statics[id.index as usize].0
        } else {
            &def.fields[id.index as usize]
        }
    }
}

/// A heap object: one instance of a registered class.
#[derive(Debug)]
pub struct ObjectData {
    pub type_def: TypeDefId,
    pub fields: RefCell<Vec<Value>>,
}

impl ObjectData {
    pub fn new(type_def: TypeDefId, fields: Vec<Value>) -> Rc<ObjectData> {
        Rc::new(ObjectData {
            type_def,
            fields: RefCell::new(fields),
        })
    }
}
