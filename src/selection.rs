//! Lazy iteration over selection sets.
//!
//! Both traversals consume selections as a flat sequence of field nodes;
//! fragment spreads and inline fragments are descended into transparently
//! via an explicit stack. `__typename` fields are skipped here and handled
//! once per entity by the traversals themselves.

use apollo_compiler::ast;

use crate::ast::field_arguments;
use crate::ast::response_key;
use crate::ast::should_include;
use crate::ast::FragmentMap;
use crate::json_ext::Object;
use crate::json_ext::TYPENAME;
use crate::keys::key_of_field;
use crate::schema::SchemaPredicates;
use crate::store::Store;

/// How fragment applicability is decided when no schema is available.
pub(crate) enum FragmentMatch<'a> {
    /// Write side: the concrete result object is in hand, so a fragment
    /// matches when the data contains its fields.
    Data(&'a Object),
    /// Read side: store presence stands in for type membership. Lossy on
    /// purpose; identical field names on sibling types can over-match.
    Store {
        store: &'a Store,
        entity_key: &'a str,
    },
}

pub(crate) struct SelectionContext<'doc, 'b> {
    pub(crate) typename: Option<&'b str>,
    pub(crate) variables: &'b Object,
    pub(crate) fragments: &'b FragmentMap<'doc>,
    pub(crate) schema: Option<&'b SchemaPredicates>,
    pub(crate) matcher: FragmentMatch<'b>,
}

pub(crate) struct SelectionIter<'doc> {
    stack: Vec<std::slice::Iter<'doc, ast::Selection>>,
}

impl<'doc> SelectionIter<'doc> {
    pub(crate) fn new(selections: &'doc [ast::Selection]) -> Self {
        Self {
            stack: vec![selections.iter()],
        }
    }

    /// Yields the next included field node, descending into applicable
    /// fragments.
    pub(crate) fn next(
        &mut self,
        cx: &SelectionContext<'doc, '_>,
    ) -> Option<&'doc ast::Field> {
        while let Some(top) = self.stack.last_mut() {
            let Some(selection) = top.next() else {
                self.stack.pop();
                continue;
            };
            match selection {
                ast::Selection::Field(field) => {
                    if field.name == TYPENAME {
                        continue;
                    }
                    if !should_include(&field.directives, cx.variables) {
                        continue;
                    }
                    return Some(field);
                }
                ast::Selection::FragmentSpread(spread) => {
                    if !should_include(&spread.directives, cx.variables) {
                        continue;
                    }
                    let Some(fragment) = cx.fragments.get(spread.fragment_name.as_str())
                    else {
                        tracing::warn!(
                            "missing fragment named: {}",
                            spread.fragment_name.as_str()
                        );
                        continue;
                    };
                    if fragment_matches(
                        cx,
                        fragment.type_condition.as_str(),
                        &fragment.selection_set,
                    ) {
                        self.stack.push(fragment.selection_set.iter());
                    }
                }
                ast::Selection::InlineFragment(inline) => {
                    if !should_include(&inline.directives, cx.variables) {
                        continue;
                    }
                    let matches = match &inline.type_condition {
                        None => true,
                        Some(condition) => fragment_matches(
                            cx,
                            condition.as_str(),
                            &inline.selection_set,
                        ),
                    };
                    if matches {
                        self.stack.push(inline.selection_set.iter());
                    }
                }
            }
        }
        None
    }
}

fn fragment_matches(
    cx: &SelectionContext<'_, '_>,
    type_condition: &str,
    selection_set: &[ast::Selection],
) -> bool {
    if cx.typename == Some(type_condition) {
        return true;
    }
    if let Some(schema) = cx.schema {
        return cx
            .typename
            .map(|typename| schema.is_interface_of_type(type_condition, typename))
            .unwrap_or(false);
    }
    match &cx.matcher {
        FragmentMatch::Data(data) => {
            let matches = fragment_fields(selection_set)
                .all(|field| data.contains_key(response_key(field)));
            if matches {
                tracing::warn!(
                    "heuristically matched fragment on `{type_condition}` against \
                     data of type `{}`",
                    cx.typename.unwrap_or("unknown"),
                );
            }
            matches
        }
        FragmentMatch::Store { store, entity_key } => {
            fragment_fields(selection_set).all(|field| {
                let field_key = key_of_field(
                    field.name.as_str(),
                    field_arguments(field, cx.variables).as_ref(),
                );
                store.has_field(entity_key, &field_key)
            })
        }
    }
}

/// The top-level field nodes of a fragment selection, `__typename` aside.
fn fragment_fields(
    selection_set: &[ast::Selection],
) -> impl Iterator<Item = &ast::Field> {
    selection_set.iter().filter_map(|selection| match selection {
        ast::Selection::Field(field) if field.name != TYPENAME => Some(&**field),
        _ => None,
    })
}
