//! The `@populate` mutation transform.
//!
//! A mutation that returns only an id cannot update existing list views in
//! a normalized cache. This transform watches the queries flowing through
//! the pipeline, synthesizes fragments for every selection observed on a
//! concrete object type, and rewrites mutation fields annotated with
//! `@populate` to re-request the union of those selections.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;

use apollo_compiler::ast;
use apollo_compiler::name;
use apollo_compiler::Name;
use apollo_compiler::Node;
use indexmap::IndexMap;
use indexmap::IndexSet;

use crate::json_ext::TYPENAME;
use crate::schema::SchemaPredicates;

const POPULATE_DIRECTIVE: &str = "populate";

/// What an operation on the stream is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
    /// Removes the same-keyed query's contribution from the transform.
    Teardown,
}

/// An operation flowing through the surrounding pipeline.
#[derive(Debug, Clone)]
pub struct Operation {
    pub key: u64,
    pub kind: OperationKind,
    pub document: ast::Document,
}

/// A selection observed on a concrete type, reusable as a fragment.
struct TypeFragment {
    name: Name,
    /// The query that contributed the selection; emission stops when it is
    /// torn down.
    operation: u64,
    sequence: u64,
    definition: Node<ast::FragmentDefinition>,
}

/// Scratch state for one query analysis.
struct Analysis<'doc> {
    key: u64,
    fragments: HashMap<&'doc str, &'doc ast::FragmentDefinition>,
    /// Spread names already descended into; a definition is only observed
    /// once, and only if something actually spreads it.
    visited: HashSet<&'doc str>,
    typenames: HashSet<String>,
}

/// Stateful rewriter over an ordered stream of operations.
pub struct Populate {
    schema: SchemaPredicates,
    /// Live query keys and the typenames their selections reference.
    active: HashMap<u64, HashSet<String>>,
    /// Analysis cache per key; re-activation of a known key does not
    /// re-register fragments.
    parsed: HashMap<u64, HashSet<String>>,
    type_fragments: BTreeMap<String, Vec<TypeFragment>>,
    user_fragments: IndexMap<String, Node<ast::FragmentDefinition>>,
    sequence: u64,
}

impl Populate {
    pub fn new(schema: SchemaPredicates) -> Self {
        Self {
            schema,
            active: HashMap::new(),
            parsed: HashMap::new(),
            type_fragments: BTreeMap::new(),
            user_fragments: IndexMap::new(),
            sequence: 0,
        }
    }

    /// Handles one operation, returning it rewritten where applicable.
    ///
    /// Queries are analyzed and passed through, teardowns retire their
    /// query's fragments, and mutations and subscriptions come back with
    /// `@populate` fields expanded.
    pub fn process(&mut self, operation: Operation) -> Operation {
        match operation.kind {
            OperationKind::Query => {
                let typenames = match self.parsed.get(&operation.key) {
                    Some(typenames) => typenames.clone(),
                    None => {
                        let typenames = self.analyze(&operation.document, operation.key);
                        self.parsed.insert(operation.key, typenames.clone());
                        typenames
                    }
                };
                self.active.insert(operation.key, typenames);
                operation
            }
            OperationKind::Teardown => {
                if let Some(typenames) = self.active.remove(&operation.key) {
                    tracing::trace!(
                        "populate: torn down operation {} observing {typenames:?}",
                        operation.key,
                    );
                }
                operation
            }
            OperationKind::Mutation | OperationKind::Subscription => Operation {
                key: operation.key,
                kind: operation.kind,
                document: self.rewrite(&operation.document),
            },
        }
    }

    /// Registers a query's fragments and collects the typenames it touches.
    ///
    /// Only selections reachable from the operation count: fragment
    /// definitions are entered through their spreads, so an unreferenced
    /// definition contributes nothing.
    fn analyze(&mut self, document: &ast::Document, key: u64) -> HashSet<String> {
        let mut fragments = HashMap::new();
        for definition in &document.definitions {
            if let ast::Definition::FragmentDefinition(fragment) = definition {
                self.user_fragments
                    .insert(fragment.name.as_str().to_string(), fragment.clone());
                fragments.insert(fragment.name.as_str(), &**fragment);
            }
        }

        let mut analysis = Analysis {
            key,
            fragments,
            visited: HashSet::new(),
            typenames: HashSet::new(),
        };
        for definition in &document.definitions {
            if let ast::Definition::OperationDefinition(operation) = definition {
                let root = self
                    .schema
                    .root_typename(operation.operation_type)
                    .to_string();
                self.collect_selections(&mut analysis, &operation.selection_set, &root);
            }
        }
        analysis.typenames
    }

    fn collect_selections<'doc>(
        &mut self,
        analysis: &mut Analysis<'doc>,
        selections: &'doc [ast::Selection],
        parent_type: &str,
    ) {
        for selection in selections {
            match selection {
                ast::Selection::Field(field) => {
                    if field.name == TYPENAME || field.selection_set.is_empty() {
                        continue;
                    }
                    let Some(field_type) = self
                        .schema
                        .named_field_type(parent_type, field.name.as_str())
                        .map(str::to_string)
                    else {
                        continue;
                    };
                    analysis.typenames.insert(field_type.clone());
                    if self.schema.is_object_type(&field_type) {
                        self.register_fragment(
                            &field_type,
                            analysis.key,
                            &field.selection_set,
                        );
                    }
                    self.collect_selections(analysis, &field.selection_set, &field_type);
                }
                ast::Selection::FragmentSpread(spread) => {
                    let name = spread.fragment_name.as_str();
                    if !analysis.visited.insert(name) {
                        continue;
                    }
                    let Some(fragment) = analysis.fragments.get(name).copied() else {
                        tracing::warn!("populate: missing fragment named `{name}`");
                        continue;
                    };
                    let condition = fragment.type_condition.as_str().to_string();
                    analysis.typenames.insert(condition.clone());
                    self.collect_selections(analysis, &fragment.selection_set, &condition);
                }
                ast::Selection::InlineFragment(inline) => {
                    match inline.type_condition.as_ref().map(|name| name.as_str()) {
                        Some(condition) => {
                            analysis.typenames.insert(condition.to_string());
                            self.collect_selections(
                                analysis,
                                &inline.selection_set,
                                condition,
                            );
                        }
                        None => self.collect_selections(
                            analysis,
                            &inline.selection_set,
                            parent_type,
                        ),
                    }
                }
            }
        }
    }

    fn register_fragment(
        &mut self,
        typename: &str,
        key: u64,
        selection_set: &[ast::Selection],
    ) {
        let sequence = self.sequence;
        self.sequence += 1;
        let name_string = format!("{typename}_PopulateFragment_{sequence}");
        // both names derive from a schema-validated typename, so neither
        // constructor can reject them
        let Ok(name) = Name::new(name_string.as_str()) else {
            return;
        };
        let Ok(condition) = Name::new(typename) else {
            return;
        };
        let definition = Node::new(ast::FragmentDefinition {
            name: name.clone(),
            type_condition: condition,
            directives: ast::DirectiveList::default(),
            selection_set: selection_set.to_vec(),
        });
        self.type_fragments
            .entry(typename.to_string())
            .or_default()
            .push(TypeFragment {
                name,
                operation: key,
                sequence,
                definition,
            });
    }

    /// Rewrites `@populate` fields and appends the fragment definitions the
    /// rewritten document needs.
    fn rewrite(&self, document: &ast::Document) -> ast::Document {
        let mut used: Vec<&TypeFragment> = Vec::new();
        let mut out = ast::Document::new();

        for definition in &document.definitions {
            match definition {
                ast::Definition::OperationDefinition(operation) => {
                    let root = self.schema.root_typename(operation.operation_type);
                    let selection_set = self.rewrite_selections(
                        &operation.selection_set,
                        Some(root),
                        &mut used,
                    );
                    out.definitions.push(ast::Definition::OperationDefinition(
                        Node::new(ast::OperationDefinition {
                            operation_type: operation.operation_type,
                            name: operation.name.clone(),
                            variables: operation.variables.clone(),
                            directives: operation.directives.clone(),
                            selection_set,
                        }),
                    ));
                }
                ast::Definition::FragmentDefinition(fragment) => {
                    let selection_set = self.rewrite_selections(
                        &fragment.selection_set,
                        Some(fragment.type_condition.as_str()),
                        &mut used,
                    );
                    out.definitions.push(ast::Definition::FragmentDefinition(
                        Node::new(ast::FragmentDefinition {
                            name: fragment.name.clone(),
                            type_condition: fragment.type_condition.clone(),
                            directives: fragment.directives.clone(),
                            selection_set,
                        }),
                    ));
                }
                other => out.definitions.push(other.clone()),
            }
        }

        // stable output: synthesized fragments ordered by type condition,
        // then registration
        used.sort_by(|a, b| {
            (a.definition.type_condition.as_str(), a.sequence)
                .cmp(&(b.definition.type_condition.as_str(), b.sequence))
        });
        used.dedup_by(|a, b| a.name == b.name);

        let defined: HashSet<&str> = document
            .definitions
            .iter()
            .filter_map(|definition| match definition {
                ast::Definition::FragmentDefinition(fragment) => {
                    Some(fragment.name.as_str())
                }
                _ => None,
            })
            .collect();

        let mut queue: VecDeque<String> = VecDeque::new();
        for fragment in &used {
            collect_spread_names(&fragment.definition.selection_set, &mut queue);
            out.definitions.push(ast::Definition::FragmentDefinition(
                fragment.definition.clone(),
            ));
        }

        // user fragments transitively referenced by the synthesized bodies
        let mut emitted: IndexSet<String> = IndexSet::new();
        while let Some(name) = queue.pop_front() {
            if defined.contains(name.as_str()) || emitted.contains(&name) {
                continue;
            }
            let Some(definition) = self.user_fragments.get(&name) else {
                tracing::warn!("populate: missing user fragment `{name}`");
                continue;
            };
            emitted.insert(name);
            collect_spread_names(&definition.selection_set, &mut queue);
        }
        for name in &emitted {
            if let Some(definition) = self.user_fragments.get(name) {
                out.definitions
                    .push(ast::Definition::FragmentDefinition(definition.clone()));
            }
        }

        out
    }

    fn rewrite_selections<'a>(
        &'a self,
        selections: &[ast::Selection],
        parent_type: Option<&str>,
        used: &mut Vec<&'a TypeFragment>,
    ) -> Vec<ast::Selection> {
        let mut out = Vec::with_capacity(selections.len());
        for selection in selections {
            match selection {
                ast::Selection::Field(field) => {
                    let field_type = parent_type.and_then(|parent| {
                        self.schema.named_field_type(parent, field.name.as_str())
                    });
                    if field.directives.get(POPULATE_DIRECTIVE).is_none() {
                        match field_type {
                            Some(field_type) if !field.selection_set.is_empty() => {
                                let selection_set = self.rewrite_selections(
                                    &field.selection_set,
                                    Some(field_type),
                                    used,
                                );
                                out.push(ast::Selection::Field(Node::new(ast::Field {
                                    alias: field.alias.clone(),
                                    name: field.name.clone(),
                                    arguments: field.arguments.clone(),
                                    directives: field.directives.clone(),
                                    selection_set,
                                })));
                            }
                            // untypeable subtrees pass through untouched
                            _ => out.push(selection.clone()),
                        }
                        continue;
                    }

                    // the server does not know @populate
                    let directives = ast::DirectiveList(
                        field
                            .directives
                            .iter()
                            .filter(|directive| directive.name != POPULATE_DIRECTIVE)
                            .cloned()
                            .collect(),
                    );
                    let mut selection_set = match field_type {
                        Some(field_type) => self.rewrite_selections(
                            &field.selection_set,
                            Some(field_type),
                            used,
                        ),
                        None => field.selection_set.clone(),
                    };
                    if let Some(field_type) = field_type {
                        for concrete in self.schema.concrete_types(field_type) {
                            let Some(fragments) = self.type_fragments.get(&concrete)
                            else {
                                continue;
                            };
                            for fragment in fragments {
                                if !self.active.contains_key(&fragment.operation) {
                                    continue;
                                }
                                selection_set.push(ast::Selection::FragmentSpread(
                                    Node::new(ast::FragmentSpread {
                                        fragment_name: fragment.name.clone(),
                                        directives: ast::DirectiveList::default(),
                                    }),
                                ));
                                used.push(fragment);
                            }
                        }
                    }
                    if selection_set.is_empty() {
                        selection_set.push(typename_field());
                    }
                    out.push(ast::Selection::Field(Node::new(ast::Field {
                        alias: field.alias.clone(),
                        name: field.name.clone(),
                        arguments: field.arguments.clone(),
                        directives,
                        selection_set,
                    })));
                }
                ast::Selection::FragmentSpread(_) => out.push(selection.clone()),
                ast::Selection::InlineFragment(inline) => {
                    let parent = inline
                        .type_condition
                        .as_ref()
                        .map(|name| name.as_str())
                        .or(parent_type);
                    let selection_set =
                        self.rewrite_selections(&inline.selection_set, parent, used);
                    out.push(ast::Selection::InlineFragment(Node::new(
                        ast::InlineFragment {
                            type_condition: inline.type_condition.clone(),
                            directives: inline.directives.clone(),
                            selection_set,
                        },
                    )));
                }
            }
        }
        out
    }
}

fn typename_field() -> ast::Selection {
    ast::Selection::Field(Node::new(ast::Field {
        alias: None,
        name: name!("__typename"),
        arguments: Vec::new(),
        directives: ast::DirectiveList::default(),
        selection_set: Vec::new(),
    }))
}

fn collect_spread_names(selections: &[ast::Selection], into: &mut VecDeque<String>) {
    for selection in selections {
        match selection {
            ast::Selection::Field(field) => {
                collect_spread_names(&field.selection_set, into);
            }
            ast::Selection::FragmentSpread(spread) => {
                into.push_back(spread.fragment_name.as_str().to_string());
            }
            ast::Selection::InlineFragment(inline) => {
                collect_spread_names(&inline.selection_set, into);
            }
        }
    }
}
