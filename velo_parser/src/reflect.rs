//! Reflection index over class declarations
//!
//! Built by a single pass over the AST after parsing, plus a second pass that
//! mixes trait methods into their users. The index is read-only afterwards;
//! the runtime reflection API answers every query from these tables.

use crate::ast::{Ast, ClassKind, NodeId, NodeKind};
use std::collections::HashMap;
use velo_common::{Diagnostics, StringId};

/// Everything the engine knows about one class-like declaration.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    /// Back-reference to the `ClassDecl` node.
    pub node: NodeId,
    pub name: StringId,
    pub kind: ClassKind,
    pub parent: Option<StringId>,
    pub interfaces: Vec<StringId>,
    /// Attribute nodes in source order.
    pub attributes: Vec<NodeId>,
    /// Method name to `FunctionDecl` node.
    pub methods: HashMap<StringId, NodeId>,
    /// Property name to `PropertyDecl` node.
    pub properties: HashMap<StringId, NodeId>,
    /// Used trait names in source order.
    pub traits: Vec<StringId>,
}

/// Post-parse class/method/attribute tables.
#[derive(Debug, Clone, Default)]
pub struct ReflectionIndex {
    classes: HashMap<StringId, ClassInfo>,
}

impl ReflectionIndex {
    /// Build the index from an AST. Dangling `extends`/`implements` names
    /// are reported through the returned diagnostics.
    pub fn build(ast: &Ast) -> (ReflectionIndex, Diagnostics) {
        let mut index = ReflectionIndex::default();
        let mut diagnostics = Diagnostics::new();

        // Pass 1: collect declarations.
        for &stmt in ast.root_statements() {
            index.collect(ast, stmt);
        }

        // Pass 2: trait mixing. Trait methods copy into the using class
        // unless the class defines a method of the same name.
        let trait_imports: Vec<(StringId, StringId)> = index
            .classes
            .values()
            .flat_map(|class| class.traits.iter().map(move |&t| (class.name, t)))
            .collect();
        for (class_name, trait_name) in trait_imports {
            let Some(trait_info) = index.classes.get(&trait_name) else {
                if let Some(class) = index.classes.get(&class_name) {
                    diagnostics.error(
                        format!("use of undefined trait '{}'", velo_common::resolve(trait_name)),
                        ast.span(class.node),
                    );
                }
                continue;
            };
            let imported: Vec<(StringId, NodeId)> =
                trait_info.methods.iter().map(|(&name, &node)| (name, node)).collect();
            if let Some(class) = index.classes.get_mut(&class_name) {
                for (name, node) in imported {
                    class.methods.entry(name).or_insert(node);
                }
            }
        }

        // Pass 3: every parent and interface must resolve.
        for class in index.classes.values() {
            if let Some(parent) = class.parent {
                if !index.classes.contains_key(&parent) {
                    diagnostics.error(
                        format!(
                            "class '{}' extends undefined class '{}'",
                            velo_common::resolve(class.name),
                            velo_common::resolve(parent)
                        ),
                        ast.span(class.node),
                    );
                }
            }
            for &interface in &class.interfaces {
                if !index.classes.contains_key(&interface) {
                    diagnostics.error(
                        format!(
                            "class '{}' implements undefined interface '{}'",
                            velo_common::resolve(class.name),
                            velo_common::resolve(interface)
                        ),
                        ast.span(class.node),
                    );
                }
            }
        }

        (index, diagnostics)
    }

    fn collect(&mut self, ast: &Ast, stmt: NodeId) {
        let NodeKind::ClassDecl { name, kind, parent, implements, members, attributes, .. } =
            ast.kind(stmt)
        else {
            return;
        };

        let mut info = ClassInfo {
            node: stmt,
            name: *name,
            kind: *kind,
            parent: *parent,
            interfaces: Vec::new(),
            attributes: ast.list(*attributes).to_vec(),
            methods: HashMap::new(),
            properties: HashMap::new(),
            traits: Vec::new(),
        };

        for &iface in ast.list(*implements) {
            if let NodeKind::Name { name } = ast.kind(iface) {
                info.interfaces.push(*name);
            }
        }

        for &member in ast.list(*members) {
            match ast.kind(member) {
                NodeKind::FunctionDecl { name, .. } => {
                    info.methods.insert(*name, member);
                }
                NodeKind::PropertyDecl { name, .. } => {
                    info.properties.insert(*name, member);
                }
                NodeKind::UseTrait { names } => {
                    for &used in ast.list(*names) {
                        if let NodeKind::Name { name } = ast.kind(used) {
                            info.traits.push(*name);
                        }
                    }
                }
                _ => {}
            }
        }

        self.classes.insert(*name, info);
    }

    pub fn get_class(&self, name: StringId) -> Option<&ClassInfo> {
        self.classes.get(&name)
    }

    pub fn class_has_method(&self, class: StringId, method: StringId) -> bool {
        self.classes
            .get(&class)
            .map_or(false, |info| info.methods.contains_key(&method))
    }

    /// Attribute nodes on a method, in source order.
    pub fn method_attributes(
        &self,
        ast: &Ast,
        class: StringId,
        method: StringId,
    ) -> Vec<NodeId> {
        let Some(node) = self.classes.get(&class).and_then(|c| c.methods.get(&method)) else {
            return Vec::new();
        };
        match ast.kind(*node) {
            NodeKind::FunctionDecl { attributes, .. } => ast.list(*attributes).to_vec(),
            _ => Vec::new(),
        }
    }

    /// Attribute nodes on a property, in source order.
    pub fn property_attributes(
        &self,
        ast: &Ast,
        class: StringId,
        property: StringId,
    ) -> Vec<NodeId> {
        let Some(node) = self.classes.get(&class).and_then(|c| c.properties.get(&property)) else {
            return Vec::new();
        };
        match ast.kind(*node) {
            NodeKind::PropertyDecl { attributes, .. } => ast.list(*attributes).to_vec(),
            _ => Vec::new(),
        }
    }

    /// Classes carrying an attribute of the given name.
    pub fn classes_with_attribute(&self, ast: &Ast, attribute: StringId) -> Vec<StringId> {
        let mut out: Vec<StringId> = self
            .classes
            .values()
            .filter(|class| {
                class.attributes.iter().any(|&attr| {
                    matches!(ast.kind(attr), NodeKind::Attribute { name, .. } if *name == attribute)
                })
            })
            .map(|class| class.name)
            .collect();
        out.sort_by_key(|id| id.0);
        out
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassInfo> {
        self.classes.values()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
