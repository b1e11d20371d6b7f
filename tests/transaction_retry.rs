//! # Transaction Driver Integration Tests
//!
//! Engine operations run under first-committer-wins optimistic transactions
//! with bounded retry. These tests share one store between engine handles to
//! provoke real conflicts: an injected concurrent commit must force a retry
//! that succeeds against the fresh snapshot, and parallel writers must all
//! land without losing rows.

use arbordb::{
    Catalog, ColumnDef, DataType, GroupId, MemStore, Row, SchemaBuilder, StorageEngine, TableId,
    TransactionService, TxnContext, Value,
};
use std::cell::Cell;
use std::rc::Rc;
use std::thread;

struct Fixture {
    catalog: Catalog,
    group: GroupId,
    customer: TableId,
    order: TableId,
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fixture() -> Fixture {
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
            ],
        )
        .unwrap();
    b.set_primary_key(order, &["oid"]).unwrap();
    b.declare_join("fk_order_customer", "app.customer", order, &[("cid", "cid")])
        .unwrap();
    let group = b.create_group("customers");
    b.assign_to_group(group, customer).unwrap();
    b.assign_to_group(group, order).unwrap();
    Fixture {
        catalog: b.finish().unwrap(),
        group,
        customer,
        order,
    }
}

#[test]
fn conflicting_commit_forces_a_successful_retry() {
    let f = fixture();
    let store = MemStore::new();
    let engine = StorageEngine::new(store.clone());
    let rival = StorageEngine::new(store.clone());
    let mut ctx = TxnContext::new();
    engine
        .insert(
            &f.catalog,
            &mut ctx,
            &Row::new(f.customer, vec![Value::Int(1), Value::text("north")]),
        )
        .unwrap();

    // Inserting an order reads its parent customer row. Rewriting that row
    // from a rival transaction between the read and the commit invalidates
    // the snapshot and must trigger one retry.
    let svc = TransactionService::default();
    let attempts = Rc::new(Cell::new(0));
    let order_row = Row::new(f.order, vec![Value::Int(10), Value::Int(1)]);
    let counter = Rc::clone(&attempts);
    svc.run(&store, &mut ctx, |txn, _| {
        counter.set(counter.get() + 1);
        if counter.get() == 1 {
            let mut rival_ctx = TxnContext::new();
            rival
                .update(
                    &f.catalog,
                    &mut rival_ctx,
                    &Row::new(f.customer, vec![Value::Int(1), Value::text("north")]),
                    &Row::new(f.customer, vec![Value::Int(1), Value::text("renamed")]),
                )
                .unwrap();
        }
        engine.insert_in(txn, &f.catalog, &order_row)
    })
    .unwrap();
    assert_eq!(attempts.get(), 2, "first attempt conflicts, second lands");

    let rows = engine.group_scan(&f.catalog, &mut ctx, f.group).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].values[1].as_text(), Some("renamed"));
    assert_eq!(rows[1].values[0].as_int(), Some(10));
}

#[test]
fn parallel_writers_all_land() {
    let f = fixture();
    let store = MemStore::new();
    {
        let engine = StorageEngine::new(store.clone());
        let mut ctx = TxnContext::new();
        engine
            .insert(
                &f.catalog,
                &mut ctx,
                &Row::new(f.customer, vec![Value::Int(1), Value::text("north")]),
            )
            .unwrap();
    }

    thread::scope(|s| {
        for w in 0..4 {
            let store = store.clone();
            let catalog = &f.catalog;
            let order = f.order;
            s.spawn(move || {
                let engine = StorageEngine::new(store);
                let mut ctx = TxnContext::new();
                for i in 0..8 {
                    engine
                        .insert(
                            catalog,
                            &mut ctx,
                            &Row::new(
                                order,
                                vec![Value::Int(100 * (w + 1) + i), Value::Int(1)],
                            ),
                        )
                        .unwrap();
                }
            });
        }
    });

    let engine = StorageEngine::new(store);
    let mut ctx = TxnContext::new();
    let rows = engine.group_scan(&f.catalog, &mut ctx, f.group).unwrap();
    assert_eq!(rows.len(), 33, "one customer and every order from all writers");
}

#[test]
fn commit_callbacks_run_after_engine_work() {
    let f = fixture();
    let store = MemStore::new();
    let engine = StorageEngine::new(store.clone());
    let svc = TransactionService::default();
    let mut ctx = TxnContext::new();

    let fired = Rc::new(Cell::new(false));
    let flag = Rc::clone(&fired);
    let row = Row::new(f.customer, vec![Value::Int(1), Value::text("north")]);
    svc.run(&store, &mut ctx, |txn, ctx| {
        engine.insert_in(txn, &f.catalog, &row)?;
        let flag = Rc::clone(&flag);
        ctx.on_post_commit(move || {
            flag.set(true);
            Ok(())
        });
        Ok(())
    })
    .unwrap();
    assert!(fired.get(), "post-commit hook observed the commit");
    assert!(engine
        .fetch(&f.catalog, &mut ctx, f.customer, &[Value::Int(1)])
        .unwrap()
        .is_some());
}
