use std::fmt::Write;

use serde::Serialize;

use service_api::Entity;

use crate::operation::ArgumentDef;

/// Object type exposed by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeDef {
    pub name: String,
    /// `(field, type)` pairs, `id` first.
    pub fields: Vec<ArgumentDef>,
}

impl TypeDef {
    pub fn of<E: Entity>() -> Self {
        let mut fields = vec![ArgumentDef { name: "id".into(), ty: "Int!".into() }];
        fields.extend(E::FIELDS.iter().map(|f| ArgumentDef {
            name: f.name.to_string(),
            ty: f.ty.graphql().to_string(),
        }));
        Self { name: E::TYPE_NAME.to_string(), fields }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSignature {
    pub name: String,
    pub arguments: Vec<ArgumentDef>,
    pub returns: String,
}

/// Self-description of a service: what the gateway accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schema {
    pub types: Vec<TypeDef>,
    pub queries: Vec<FieldSignature>,
    pub mutations: Vec<FieldSignature>,
    pub subscriptions: Vec<FieldSignature>,
}

impl Schema {
    /// GraphQL SDL rendering of the schema.
    pub fn to_sdl(&self) -> String {
        let mut out = String::new();
        for ty in &self.types {
            let _ = writeln!(out, "type {} {{", ty.name);
            for f in &ty.fields {
                let _ = writeln!(out, "  {}: {}", f.name, f.ty);
            }
            out.push_str("}\n\n");
        }
        for (root, fields) in [
            ("Query", &self.queries),
            ("Mutation", &self.mutations),
            ("Subscription", &self.subscriptions),
        ] {
            if fields.is_empty() {
                continue;
            }
            let _ = writeln!(out, "type {root} {{");
            for f in fields {
                let args = if f.arguments.is_empty() {
                    String::new()
                } else {
                    let list: Vec<String> =
                        f.arguments.iter().map(|a| format!("{}: {}", a.name, a.ty)).collect();
                    format!("({})", list.join(", "))
                };
                let _ = writeln!(out, "  {}{args}: {}", f.name, f.returns);
            }
            out.push_str("}\n\n");
        }
        out.truncate(out.trim_end().len());
        out.push('\n');
        out
    }
}
