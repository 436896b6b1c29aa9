//! Transaction manager against an on-disk SQLite database.

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use warpgate_core::database::{DbValue, Engine, SqliteEngine};
use warpgate_core::transaction::{
    depth, insert, next_id, select, select_int, select_one, update, with_connection,
    with_engine, with_transaction,
};
use warpgate_core::Error;

async fn setup() -> (TempDir, Arc<dyn Engine>) {
    setup_with_pool(4).await
}

async fn setup_with_pool(size: u32) -> (TempDir, Arc<dyn Engine>) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("app.db").display());
    let engine: Arc<dyn Engine> = Arc::new(SqliteEngine::open(&url, Some(size)).await.unwrap());
    with_engine(
        Arc::clone(&engine),
        update(
            "create table users (id text primary key, name text not null, age integer)",
            &[],
        ),
    )
    .await
    .unwrap();
    (dir, engine)
}

async fn count(engine: &Arc<dyn Engine>) -> i64 {
    with_engine(
        Arc::clone(engine),
        select_int("select count(*) from users", &[]),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_insert_and_select() {
    let (_dir, engine) = setup().await;
    let id = next_id();

    with_engine(Arc::clone(&engine), async {
        insert(
            "users",
            &[
                ("id", DbValue::from(id.as_str())),
                ("name", "alice".into()),
                ("age", 30.into()),
            ],
        )
        .await?;

        let row = select_one("select * from users where id = ?", &[id.as_str().into()])
            .await?
            .unwrap();
        assert_eq!(row.get("name").and_then(DbValue::as_str), Some("alice"));
        assert_eq!(row.get("age").and_then(DbValue::as_i64), Some(30));

        assert!(select_one("select * from users where id = ?", &["nope".into()])
            .await?
            .is_none());
        Ok::<_, Error>(())
    })
    .await
    .unwrap();

    assert_eq!(count(&engine).await, 1);
}

#[tokio::test]
async fn test_transaction_commits_all_statements() {
    let (_dir, engine) = setup().await;

    with_engine(
        Arc::clone(&engine),
        with_transaction(async {
            update("insert into users (id, name) values (?, ?)", &["1".into(), "a".into()]).await?;
            with_transaction(async {
                update("insert into users (id, name) values (?, ?)", &["2".into(), "b".into()])
                    .await
            })
            .await?;
            Ok::<_, Error>(())
        }),
    )
    .await
    .unwrap();

    assert_eq!(count(&engine).await, 2);
}

#[tokio::test]
async fn test_inner_failure_discards_outer_work() {
    let (_dir, engine) = setup().await;

    let result = with_engine(
        Arc::clone(&engine),
        with_transaction(async {
            update("insert into users (id, name) values ('1', 'a')", &[]).await?;
            with_transaction(async {
                update("insert into users (id, name) values ('2', 'b')", &[]).await?;
                Err::<(), _>(Error::conflict())
            })
            .await
        }),
    )
    .await;

    assert!(matches!(result, Err(Error::Http { status: 409 })));
    assert_eq!(count(&engine).await, 0);
}

#[tokio::test]
async fn test_constraint_violation_rolls_back() {
    let (_dir, engine) = setup().await;

    let result = with_engine(
        Arc::clone(&engine),
        with_transaction(async {
            update("insert into users (id, name) values ('1', 'a')", &[]).await?;
            update("insert into users (id, name) values ('1', 'dup')", &[]).await
        }),
    )
    .await;

    assert!(matches!(result, Err(Error::Database { .. })));
    assert_eq!(count(&engine).await, 0);
}

#[tokio::test]
async fn test_counter_resets_after_failure() {
    let (_dir, engine) = setup().await;

    with_engine(
        Arc::clone(&engine),
        with_connection(async {
            let failed: Result<(), Error> =
                with_transaction(async { Err(Error::bad_request("nope")) }).await;
            assert!(failed.is_err());
            assert_eq!(depth().await, 0);

            update("insert into users (id, name) values ('9', 'z')", &[]).await?;
            Ok::<_, Error>(())
        }),
    )
    .await
    .unwrap();

    assert_eq!(count(&engine).await, 1);
}

#[tokio::test]
async fn test_select_int_rejects_multiple_columns() {
    let (_dir, engine) = setup().await;

    let result = with_engine(
        Arc::clone(&engine),
        select_int("select 1 as a, 2 as b", &[]),
    )
    .await;
    assert!(matches!(result, Err(Error::MultiColumns { columns: 2 })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tasks_use_own_transactions() {
    let (_dir, engine) = setup().await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(with_engine(engine, async move {
            with_transaction(async move {
                let id = format!("user-{i}");
                update("insert into users (id, name) values (?, ?)", &[id.as_str().into(), "x".into()])
                    .await?;
                if i % 2 == 1 {
                    return Err(Error::internal());
                }
                Ok(())
            })
            .await
        })));
    }

    let mut failures = 0;
    for handle in handles {
        if handle.await.unwrap().is_err() {
            failures += 1;
        }
    }

    assert_eq!(failures, 4);
    assert_eq!(count(&engine).await, 4);
    let rows = with_engine(Arc::clone(&engine), select("select id from users order by id", &[]))
        .await
        .unwrap();
    let ids: Vec<_> = rows
        .iter()
        .filter_map(|r| r.get("id").and_then(DbValue::as_str))
        .collect();
    assert_eq!(ids, vec!["user-0", "user-2", "user-4", "user-6"]);
}

#[tokio::test]
async fn test_rollback_covers_cte_and_commented_writes() {
    let (_dir, engine) = setup().await;

    let result: Result<(), Error> = with_engine(
        Arc::clone(&engine),
        with_transaction(async {
            update(
                "with v(id, name) as (select 'c1', 'cte') insert into users (id, name) select id, name from v",
                &[],
            )
            .await?;
            update("/* seed */ insert into users (id, name) values ('c2', 'comment')", &[]).await?;
            Err(Error::internal())
        }),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(count(&engine).await, 0);
}

#[tokio::test]
async fn test_cancelled_transaction_leaves_pool_clean() {
    let (_dir, engine) = setup_with_pool(1).await;

    let cancelled = tokio::time::timeout(
        Duration::from_millis(100),
        with_engine(
            Arc::clone(&engine),
            with_transaction(async {
                update("insert into users (id, name) values ('1', 'abandoned')", &[]).await?;
                std::future::pending::<()>().await;
                Ok::<_, Error>(())
            }),
        ),
    )
    .await;
    assert!(cancelled.is_err());

    with_engine(
        Arc::clone(&engine),
        update("insert into users (id, name) values ('2', 'next')", &[]),
    )
    .await
    .unwrap();

    let rows = with_engine(Arc::clone(&engine), select("select id from users", &[]))
        .await
        .unwrap();
    let ids: Vec<_> = rows
        .iter()
        .filter_map(|r| r.get("id").and_then(DbValue::as_str))
        .collect();
    assert_eq!(ids, vec!["2"]);
}
