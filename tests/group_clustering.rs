//! # Group Clustering Tests
//!
//! End-to-end checks of the physical row order in a three-level group:
//! a group scan must yield a depth-first interleaving where every row is
//! immediately followed by its clustered descendants, and every child hkey
//! extends its parent's hkey as a strict byte prefix.

use arbordb::{
    Catalog, ColumnDef, DataType, GroupId, MemStore, Row, SchemaBuilder, StorageEngine, TableId,
    TxnContext, Value,
};

struct Coi {
    catalog: Catalog,
    group: GroupId,
    customer: TableId,
    order: TableId,
    item: TableId,
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// customer(cid pk) <- order(oid pk, cid fk) <- item(iid pk, oid fk), all in
/// one group.
fn coi() -> Coi {
    init_logging();
    let mut b = SchemaBuilder::new();
    let customer = b
        .add_table(
            "app",
            "customer",
            vec![
                ColumnDef::new("cid", DataType::Int).not_null(),
                ColumnDef::new("name", DataType::Text),
            ],
        )
        .unwrap();
    b.set_primary_key(customer, &["cid"]).unwrap();
    let order = b
        .add_table(
            "app",
            "order",
            vec![
                ColumnDef::new("oid", DataType::Int).not_null(),
                ColumnDef::new("cid", DataType::Int),
                ColumnDef::new("salesman", DataType::Text),
            ],
        )
        .unwrap();
    b.set_primary_key(order, &["oid"]).unwrap();
    b.declare_join("fk_order_customer", "app.customer", order, &[("cid", "cid")])
        .unwrap();
    let item = b
        .add_table(
            "app",
            "item",
            vec![
                ColumnDef::new("iid", DataType::Int).not_null(),
                ColumnDef::new("oid", DataType::Int),
            ],
        )
        .unwrap();
    b.set_primary_key(item, &["iid"]).unwrap();
    b.declare_join("fk_item_order", "app.order", item, &[("oid", "oid")])
        .unwrap();
    let group = b.create_group("customers");
    b.assign_to_group(group, customer).unwrap();
    b.assign_to_group(group, order).unwrap();
    b.assign_to_group(group, item).unwrap();
    Coi {
        catalog: b.finish().unwrap(),
        group,
        customer,
        order,
        item,
    }
}

fn insert(engine: &StorageEngine<MemStore>, s: &Coi, table: TableId, values: Vec<Value>) {
    let mut ctx = TxnContext::new();
    engine
        .insert(&s.catalog, &mut ctx, &Row::new(table, values))
        .unwrap();
}

/// (table, first column) projection of a scan, for order assertions.
fn spine(rows: &[arbordb::ScannedRow]) -> Vec<(TableId, i64)> {
    rows.iter()
        .map(|r| (r.table, r.values[0].as_int().unwrap()))
        .collect()
}

fn populate(engine: &StorageEngine<MemStore>, s: &Coi) {
    insert(engine, s, s.customer, vec![Value::Int(1), Value::text("north")]);
    insert(engine, s, s.customer, vec![Value::Int(2), Value::text("south")]);
    insert(
        engine,
        s,
        s.order,
        vec![Value::Int(10), Value::Int(1), Value::text("ann")],
    );
    insert(
        engine,
        s,
        s.order,
        vec![Value::Int(20), Value::Int(2), Value::text("bob")],
    );
    insert(engine, s, s.item, vec![Value::Int(100), Value::Int(10)]);
    insert(engine, s, s.item, vec![Value::Int(101), Value::Int(10)]);
    insert(engine, s, s.item, vec![Value::Int(200), Value::Int(20)]);
}

#[test]
fn group_scan_interleaves_depth_first() {
    let s = coi();
    let engine = StorageEngine::new(MemStore::new());
    populate(&engine, &s);
    // A sibling order arriving late still sorts into its customer's subtree.
    insert(
        &engine,
        &s,
        s.order,
        vec![Value::Int(11), Value::Int(1), Value::text("ann")],
    );

    let mut ctx = TxnContext::new();
    let rows = engine.group_scan(&s.catalog, &mut ctx, s.group).unwrap();
    assert_eq!(
        spine(&rows),
        vec![
            (s.customer, 1),
            (s.order, 10),
            (s.item, 100),
            (s.item, 101),
            (s.order, 11),
            (s.customer, 2),
            (s.order, 20),
            (s.item, 200),
        ],
        "group scan must follow each row with its clustered subtree"
    );
}

#[test]
fn child_hkey_extends_parent_hkey() {
    let s = coi();
    let engine = StorageEngine::new(MemStore::new());
    populate(&engine, &s);

    let mut ctx = TxnContext::new();
    let rows = engine.group_scan(&s.catalog, &mut ctx, s.group).unwrap();
    let hkey_of = |table: TableId, first: i64| {
        rows.iter()
            .find(|r| r.table == table && r.values[0].as_int() == Some(first))
            .map(|r| r.hkey.clone())
            .unwrap()
    };
    let c1 = hkey_of(s.customer, 1);
    let o10 = hkey_of(s.order, 10);
    let i100 = hkey_of(s.item, 100);
    assert!(o10.starts_with(&c1), "order hkey must extend customer hkey");
    assert!(i100.starts_with(&o10), "item hkey must extend order hkey");
    assert!(o10.len() > c1.len() && i100.len() > o10.len());
}

#[test]
fn table_scan_filters_one_table_in_key_order() {
    let s = coi();
    let engine = StorageEngine::new(MemStore::new());
    populate(&engine, &s);

    let mut ctx = TxnContext::new();
    let orders = engine.table_scan(&s.catalog, &mut ctx, s.order).unwrap();
    assert_eq!(
        spine(&orders),
        vec![(s.order, 10), (s.order, 20)],
        "table scan keeps group order but drops other tables"
    );
}

#[test]
fn fetch_by_primary_key() {
    let s = coi();
    let engine = StorageEngine::new(MemStore::new());
    populate(&engine, &s);

    let mut ctx = TxnContext::new();
    let row = engine
        .fetch(&s.catalog, &mut ctx, s.order, &[Value::Int(20)])
        .unwrap()
        .expect("order 20 exists");
    assert_eq!(row[1], Value::Int(2));
    assert_eq!(row[2].as_text(), Some("bob"));

    let missing = engine
        .fetch(&s.catalog, &mut ctx, s.order, &[Value::Int(999)])
        .unwrap();
    assert!(missing.is_none());
}

#[test]
fn descendants_excludes_the_row_itself() {
    let s = coi();
    let engine = StorageEngine::new(MemStore::new());
    populate(&engine, &s);

    let mut ctx = TxnContext::new();
    let below = engine
        .descendants_of(&s.catalog, &mut ctx, s.customer, &[Value::Int(1)])
        .unwrap();
    assert_eq!(
        spine(&below),
        vec![(s.order, 10), (s.item, 100), (s.item, 101)]
    );

    let leaf = engine
        .descendants_of(&s.catalog, &mut ctx, s.item, &[Value::Int(100)])
        .unwrap();
    assert!(leaf.is_empty(), "a leaf row has no descendants");
}

#[test]
fn duplicate_primary_key_is_rejected() {
    let s = coi();
    let engine = StorageEngine::new(MemStore::new());
    populate(&engine, &s);

    let mut ctx = TxnContext::new();
    let err = engine
        .insert(
            &s.catalog,
            &mut ctx,
            &Row::new(s.customer, vec![Value::Int(1), Value::text("again")]),
        )
        .unwrap_err();
    assert!(err.to_string().contains("duplicate key value"), "{err:#}");

    // Same order id under a different customer is still a duplicate: the
    // primary key is table-wide, not per-subtree.
    let err = engine
        .insert(
            &s.catalog,
            &mut ctx,
            &Row::new(
                s.order,
                vec![Value::Int(10), Value::Int(2), Value::text("eve")],
            ),
        )
        .unwrap_err();
    assert!(err.to_string().contains("duplicate key value"), "{err:#}");
}

#[test]
fn null_foreign_key_places_row_outside_any_subtree() {
    let s = coi();
    let engine = StorageEngine::new(MemStore::new());
    populate(&engine, &s);
    insert(
        &engine,
        &s,
        s.order,
        vec![Value::Int(30), Value::Null, Value::text("eve")],
    );

    let mut ctx = TxnContext::new();
    let rows = engine.group_scan(&s.catalog, &mut ctx, s.group).unwrap();
    // NULL sorts before every real customer key, so the unparented order
    // leads the relation and is no one's descendant.
    assert_eq!(spine(&rows)[0], (s.order, 30));
    for cid in [1, 2] {
        let below = engine
            .descendants_of(&s.catalog, &mut ctx, s.customer, &[Value::Int(cid)])
            .unwrap();
        assert!(below.iter().all(|r| r.values[0].as_int() != Some(30)));
    }
}
