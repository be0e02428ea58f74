// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The Field Classifier: an immutable `(class, field) -> flags` table
//! built once at startup from parsed `.dc` declarations.

use crate::flags::{ClassId, FieldFlags, FieldId, FieldType};
use crate::parser::{ClassDecl, DefaultLiteral, FieldDecl};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read dc file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse dc file {path}: {reason}")]
    Parse { path: String, reason: String },
    #[error("duplicate class name {name}")]
    DuplicateClass { name: String },
    #[error("duplicate class id {0}")]
    DuplicateClassId(ClassId),
}

/// One resolved field in the schema, independent of which class references it.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub id: FieldId,
    pub name: String,
    pub ty: FieldType,
    pub flags: FieldFlags,
    /// Wire-encoded default value, used when a required field is absent from a
    /// `DB_GET_ALL_RESP` and when building `ENTER_LOCATION_*` defaults.
    pub default: Vec<u8>,
}

/// One class: its ordered field list (declaration order matters for `ENTER_LOCATION_*` broadcasts).
#[derive(Debug, Clone)]
pub struct ClassDef {
    pub id: ClassId,
    pub name: String,
    /// Field ids in declaration order.
    pub field_order: Vec<FieldId>,
}

impl ClassDef {
    pub fn required_fields<'a>(&'a self, schema: &'a DcSchema) -> Vec<&'a FieldDef> {
        self.field_order
            .iter()
            .filter_map(|id| schema.fields.get(id))
            .filter(|f| f.flags.required)
            .collect()
    }

    pub fn ram_only_fields<'a>(&'a self, schema: &'a DcSchema) -> Vec<&'a FieldDef> {
        self.field_order
            .iter()
            .filter_map(|id| schema.fields.get(id))
            .filter(|f| f.flags.ram && !f.flags.required)
            .collect()
    }
}

/// The immutable, process-wide DC schema: read-only after startup.
#[derive(Debug, Clone, Default)]
pub struct DcSchema {
    classes: HashMap<ClassId, ClassDef>,
    class_names: HashMap<String, ClassId>,
    fields: HashMap<FieldId, FieldDef>,
}

impl DcSchema {
    /// Parse and merge one or more `.dc` files into a single schema.
    pub fn load_files<P: AsRef<std::path::Path>>(paths: &[P]) -> Result<Self, SchemaError> {
        let mut builder = SchemaBuilder::default();
        for path in paths {
            let path_str = path.as_ref().display().to_string();
            let content =
                std::fs::read_to_string(path.as_ref()).map_err(|source| SchemaError::Io {
                    path: path_str.clone(),
                    source,
                })?;
            let classes = crate::parser::parse_dc_file(&content).map_err(|reason| {
                SchemaError::Parse {
                    path: path_str.clone(),
                    reason,
                }
            })?;
            builder.add_classes(classes)?;
        }
        tracing::info!(
            class_count = builder.classes.len(),
            field_count = builder.fields.len(),
            "loaded dc schema"
        );
        Ok(builder.finish())
    }

    /// Parse a single in-memory `.dc` source string (used by tests and by callers
    /// that assemble schema text programmatically).
    pub fn from_source(source: &str) -> Result<Self, SchemaError> {
        let classes = crate::parser::parse_dc_file(source).map_err(|reason| SchemaError::Parse {
            path: "<inline>".to_string(),
            reason,
        })?;
        let mut builder = SchemaBuilder::default();
        builder.add_classes(classes)?;
        Ok(builder.finish())
    }

    pub fn class(&self, id: ClassId) -> Option<&ClassDef> {
        self.classes.get(&id)
    }

    pub fn class_by_name(&self, name: &str) -> Option<&ClassDef> {
        self.class_names.get(name).and_then(|id| self.class(*id))
    }

    pub fn field(&self, id: FieldId) -> Option<&FieldDef> {
        self.fields.get(&id)
    }

    /// `(class, field) -> flags`, validating that the field actually belongs to the class.
    pub fn classify(&self, class: ClassId, field: FieldId) -> Option<&FieldDef> {
        let class_def = self.classes.get(&class)?;
        if !class_def.field_order.contains(&field) {
            return None;
        }
        self.fields.get(&field)
    }

    /// Required fields of `class`, in DC declaration order.
    pub fn required_fields(&self, class: ClassId) -> Vec<&FieldDef> {
        self.classes
            .get(&class)
            .map(|c| c.required_fields(self))
            .unwrap_or_default()
    }

    /// Ram-but-not-required fields of `class`, in DC declaration order.
    pub fn ram_only_fields(&self, class: ClassId) -> Vec<&FieldDef> {
        self.classes
            .get(&class)
            .map(|c| c.ram_only_fields(self))
            .unwrap_or_default()
    }

    /// Every class in the schema, for startup logging and `dbss validate`.
    pub fn classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.classes.values()
    }
}

#[derive(Default)]
struct SchemaBuilder {
    classes: HashMap<ClassId, ClassDef>,
    class_names: HashMap<String, ClassId>,
    fields: HashMap<FieldId, FieldDef>,
    next_class_id: ClassId,
    next_field_id: FieldId,
}

impl SchemaBuilder {
    fn add_classes(&mut self, decls: Vec<ClassDecl>) -> Result<(), SchemaError> {
        for decl in decls {
            self.add_class(decl)?;
        }
        Ok(())
    }

    fn add_class(&mut self, decl: ClassDecl) -> Result<(), SchemaError> {
        if self.class_names.contains_key(&decl.name) {
            return Err(SchemaError::DuplicateClass { name: decl.name });
        }

        let class_id = match decl.explicit_id {
            Some(id) => id,
            None => self.allocate_class_id(),
        };
        if self.classes.contains_key(&class_id) {
            return Err(SchemaError::DuplicateClassId(class_id));
        }
        self.next_class_id = self.next_class_id.max(class_id.wrapping_add(1));

        let mut field_order = Vec::with_capacity(decl.fields.len());
        for field_decl in decl.fields {
            let field_id = self.allocate_field_id();
            field_order.push(field_id);
            self.fields.insert(field_id, resolve_field(field_id, field_decl));
        }

        self.class_names.insert(decl.name.clone(), class_id);
        self.classes.insert(
            class_id,
            ClassDef {
                id: class_id,
                name: decl.name,
                field_order,
            },
        );
        Ok(())
    }

    fn allocate_class_id(&mut self) -> ClassId {
        let id = self.next_class_id;
        self.next_class_id = self.next_class_id.wrapping_add(1);
        id
    }

    fn allocate_field_id(&mut self) -> FieldId {
        let id = self.next_field_id;
        self.next_field_id = self.next_field_id.wrapping_add(1);
        id
    }

    fn finish(self) -> DcSchema {
        DcSchema {
            classes: self.classes,
            class_names: self.class_names,
            fields: self.fields,
        }
    }
}

fn resolve_field(id: FieldId, decl: FieldDecl) -> FieldDef {
    let default = match decl.default {
        Some(DefaultLiteral::Int(v)) => encode_int_default(decl.ty, v),
        Some(DefaultLiteral::Str(s)) => encode_string_default(&s),
        None => decl.ty.zero_value(),
    };
    FieldDef {
        id,
        name: decl.name,
        ty: decl.ty,
        flags: decl.flags,
        default,
    }
}

fn encode_int_default(ty: FieldType, value: i64) -> Vec<u8> {
    match ty {
        FieldType::U8 | FieldType::I8 => vec![value as u8],
        FieldType::U16 | FieldType::I16 => (value as u16).to_le_bytes().to_vec(),
        FieldType::U32 | FieldType::I32 => (value as u32).to_le_bytes().to_vec(),
        FieldType::U64 | FieldType::I64 => (value as u64).to_le_bytes().to_vec(),
        FieldType::String | FieldType::Blob => ty.zero_value(),
    }
}

fn encode_string_default(s: &str) -> Vec<u8> {
    let mut out = (s.len() as u16).to_le_bytes().to_vec();
    out.extend_from_slice(s.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        class DistributedTestObject5 : 5 {
          setRequired1 : uint32 required;
          setRDB3 : uint32 required db;
          setRDbD5 : uint8 ram db;
          setFoo : uint32 db;
          setBR1 : string broadcast ram;
        };
    "#;

    #[test]
    fn builds_schema_with_explicit_class_id() {
        let schema = DcSchema::from_source(SAMPLE).unwrap();
        let class = schema.class_by_name("DistributedTestObject5").unwrap();
        assert_eq!(class.id, 5);
        assert_eq!(class.field_order.len(), 5);
    }

    #[test]
    fn required_fields_in_declaration_order() {
        let schema = DcSchema::from_source(SAMPLE).unwrap();
        let required = schema.required_fields(5);
        let names: Vec<&str> = required.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["setRequired1", "setRDB3"]);
    }

    #[test]
    fn ram_only_fields_excludes_required() {
        let schema = DcSchema::from_source(SAMPLE).unwrap();
        let ram_only = schema.ram_only_fields(5);
        let names: Vec<&str> = ram_only.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["setRDbD5", "setBR1"]);
    }

    #[test]
    fn classify_rejects_field_outside_class() {
        let schema = DcSchema::from_source(SAMPLE).unwrap();
        let foo = schema.class_by_name("DistributedTestObject5").unwrap();
        let foo_id = foo
            .field_order
            .iter()
            .find(|id| schema.field(**id).unwrap().name == "setFoo")
            .copied()
            .unwrap();
        assert!(schema.classify(5, foo_id).is_some());
        assert!(schema.classify(999, foo_id).is_none());
    }

    #[test]
    fn duplicate_class_name_rejected() {
        let src = r#"
            class Foo { a : uint8; };
            class Foo { b : uint8; };
        "#;
        assert!(matches!(
            DcSchema::from_source(src),
            Err(SchemaError::DuplicateClass { .. })
        ));
    }

    #[test]
    fn default_literal_is_wire_encoded() {
        let src = r#"
            class WithDefault {
              setHp : uint32 required = 100;
            };
        "#;
        let schema = DcSchema::from_source(src).unwrap();
        let class = schema.class_by_name("WithDefault").unwrap();
        let field = schema.field(class.field_order[0]).unwrap();
        assert_eq!(field.default, 100u32.to_le_bytes().to_vec());
    }
}
