//! End-to-end scenarios across the write path, read path and populate
//! transform.

use apollo_compiler::ast::Document;
use graphcache::read_query;
use graphcache::write_query;
use graphcache::DependencySet;
use graphcache::Object;
use graphcache::Operation;
use graphcache::OperationKind;
use graphcache::Populate;
use graphcache::QueryResult;
use graphcache::Request;
use graphcache::SchemaPredicates;
use graphcache::Store;
use graphcache::Value;
use serde_json_bytes::json;
use test_log::test;

fn doc(source: &str) -> Document {
    Document::parse(source, "operation.graphql").unwrap()
}

fn object(value: Value) -> Object {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected an object"),
    }
}

fn write(store: &mut Store, query: &str, data: Value) -> DependencySet {
    let document = doc(query);
    write_query(store, &Request::new(&document), &object(data))
        .unwrap()
        .dependencies
}

fn read(store: &Store, query: &str) -> QueryResult {
    let document = doc(query);
    read_query(store, &Request::new(&document)).unwrap()
}

#[test]
fn round_trip_preserves_fully_selected_results() {
    let mut store = Store::new();
    let query = r#"{
        __typename
        todos(first: 2) {
            __typename
            id
            text
            tags
            creator { __typename id name }
        }
    }"#;
    let data = json!({
        "__typename": "Query",
        "todos": [
            {
                "__typename": "Todo",
                "id": "1",
                "text": "walk the dog",
                "tags": ["pets", "daily"],
                "creator": { "__typename": "User", "id": "7", "name": "Ada" },
            },
            {
                "__typename": "Todo",
                "id": "2",
                "text": "water plants",
                "tags": [],
                "creator": { "__typename": "User", "id": "7", "name": "Ada" },
            },
        ],
    });

    write(&mut store, query, data.clone());
    let result = read(&store, query);
    assert_eq!(result.data, data);
    assert!(!result.partial);
}

#[test]
fn argument_order_is_immaterial_across_requests() {
    let mut store = Store::new();
    write(
        &mut store,
        r#"{ todos(first: 2, after: "a") { id } }"#,
        json!({ "todos": [{ "__typename": "Todo", "id": "1" }] }),
    );

    // same arguments, written in the opposite order
    let result = read(&store, r#"{ todos(after: "a", first: 2) { id } }"#);
    assert_eq!(
        result.data,
        json!({ "__typename": "Query", "todos": [{ "__typename": "Todo", "id": "1" }] }),
    );
    assert!(!result.partial);
}

#[test]
fn read_dependencies_intersect_invalidating_writes() {
    let mut store = Store::new();
    write(
        &mut store,
        "{ todos { id text } }",
        json!({ "todos": [{ "__typename": "Todo", "id": "1", "text": "old" }] }),
    );

    let read_deps = read(&store, "{ todos { id text } }").dependencies;

    // a mutation result touching the same entity must be observable through
    // the captured keys
    let write_deps = write(
        &mut store,
        "mutation { updateTodo { id text } }",
        json!({ "updateTodo": { "__typename": "Todo", "id": "1", "text": "new" } }),
    );
    assert!(write_deps.iter().any(|key| read_deps.contains(key)));

    // and one touching an unrelated entity must not
    let unrelated = write(
        &mut store,
        "mutation { addUser { id } }",
        json!({ "addUser": { "__typename": "User", "id": "9" } }),
    );
    assert!(!unrelated.iter().any(|key| read_deps.contains(key)));
}

#[test]
fn fragments_read_back_without_a_schema() {
    let mut store = Store::new();
    let query = r#"
        {
            search {
                __typename
                ... on Todo { id text }
                ... on User { id name }
            }
        }
    "#;
    write(
        &mut store,
        query,
        json!({
            "search": [
                { "__typename": "Todo", "id": "1", "text": "walk the dog" },
                { "__typename": "User", "id": "7", "name": "Ada" },
            ],
        }),
    );

    let result = read(&store, query);
    assert_eq!(
        result.data,
        json!({
            "__typename": "Query",
            "search": [
                { "__typename": "Todo", "id": "1", "text": "walk the dog" },
                { "__typename": "User", "id": "7", "name": "Ada" },
            ],
        }),
    );
    assert!(!result.partial);
}

// a mutation result that carries a nested `__typename: "Query"` object
// reuses the query root, so refreshed root fields become visible to reads
#[test]
fn viewer_mutations_overwrite_the_query_root() {
    let mut store = Store::new();
    write(
        &mut store,
        "{ int }",
        json!({ "__typename": "Query", "int": 42 }),
    );

    let mutation = doc("mutation { mutate { viewer { int } } }");
    let data = object(json!({
        "__typename": "Mutation",
        "mutate": {
            "__typename": "MutateResult",
            "viewer": { "__typename": "Query", "int": 43 },
        },
    }));
    let result = write_query(&mut store, &Request::new(&mutation), &data).unwrap();
    assert!(result.dependencies.contains("Query.int"));

    let result = read(&store, "{ int }");
    assert_eq!(result.data, json!({ "__typename": "Query", "int": 43 }));
    assert!(!result.partial);
}

const POPULATE_SDL: &str = r#"
    type Query {
        todos: [Todo]
        users: [User]
    }
    type Mutation {
        addTodo: [Todo]
    }
    type Todo {
        id: ID!
        text: String
    }
    type User {
        id: ID!
        name: String
    }
"#;

fn operation(key: u64, kind: OperationKind, source: &str) -> Operation {
    Operation {
        key,
        kind,
        document: doc(source),
    }
}

#[test]
fn populate_is_deterministic_over_identical_histories() {
    let history = |transform: &mut Populate| {
        transform.process(operation(
            1,
            OperationKind::Query,
            "query { todos { id text } }",
        ));
        transform.process(operation(
            2,
            OperationKind::Query,
            "query { users { name } todos { text } }",
        ));
        transform.process(operation(2, OperationKind::Teardown, "{ __typename }"));
        transform
            .process(operation(
                4,
                OperationKind::Mutation,
                "mutation M { addTodo @populate }",
            ))
            .document
            .to_string()
    };

    let schema = SchemaPredicates::parse(POPULATE_SDL).unwrap();
    let first = history(&mut Populate::new(schema.clone()));
    let second = history(&mut Populate::new(schema));
    assert_eq!(first, second);

    // key 2 was torn down, key 1 stays live
    assert!(first.contains("Todo_PopulateFragment_0"));
    assert!(!first.contains("Todo_PopulateFragment_2"));
}

#[test]
fn populate_rewrites_are_repeatable() {
    let schema = SchemaPredicates::parse(POPULATE_SDL).unwrap();
    let mut transform = Populate::new(schema);
    transform.process(operation(
        1,
        OperationKind::Query,
        "query { todos { id text } }",
    ));

    let first = transform
        .process(operation(2, OperationKind::Mutation, "mutation M { addTodo @populate }"))
        .document
        .to_string();
    let second = transform
        .process(operation(3, OperationKind::Mutation, "mutation M { addTodo @populate }"))
        .document
        .to_string();
    assert_eq!(first, second);
}
