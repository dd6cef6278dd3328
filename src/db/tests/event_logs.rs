//! Shared tests for EventLogRepo implementations

use serde_json::json;
use uuid::Uuid;

use crate::{
    db::DbPool,
    models::{EventLogFilter, NewEventLog, PageParams, event_types},
};

async fn test_insert_and_list(db: &DbPool) {
    let actor = Uuid::new_v4();
    let entry = db
        .event_logs()
        .insert(NewEventLog::new(
            event_types::USER_LOGIN,
            Some(actor),
            json!({"method": "token", "ip": "10.0.0.1"}),
        ))
        .await
        .expect("insert");
    assert_eq!(entry.event_type, "user.login");
    assert_eq!(entry.content["method"], "token");

    let page = db
        .event_logs()
        .list(&EventLogFilter::default(), PageParams::default())
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, entry.id);
    assert_eq!(page.items[0].user_id, Some(actor));
    assert_eq!(page.items[0].content["ip"], "10.0.0.1");
}

async fn test_list_filters(db: &DbPool) {
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    for (event_type, user) in [
        (event_types::USER_LOGIN, Some(alice)),
        (event_types::USER_LOGIN, Some(bob)),
        (event_types::USER_CREATE, Some(alice)),
        (event_types::INSTANCE_CREATE, None),
    ] {
        db.event_logs()
            .insert(NewEventLog::new(event_type, user, json!({})))
            .await
            .unwrap();
    }

    let logins = db
        .event_logs()
        .list(
            &EventLogFilter {
                event_type: Some("user.login".into()),
                user_id: None,
            },
            PageParams::default(),
        )
        .await
        .unwrap();
    assert_eq!(logins.total, 2);

    let alice_logins = db
        .event_logs()
        .list(
            &EventLogFilter {
                event_type: Some("user.login".into()),
                user_id: Some(alice),
            },
            PageParams::default(),
        )
        .await
        .unwrap();
    assert_eq!(alice_logins.total, 1);

    let paged = db
        .event_logs()
        .list(&EventLogFilter::default(), PageParams::new(2, 3))
        .await
        .unwrap();
    assert_eq!(paged.total, 4);
    assert_eq!(paged.items.len(), 1);
}

#[cfg(all(test, feature = "database-sqlite"))]
mod sqlite_tests {
    use crate::db::tests::harness::create_sqlite_db;

    macro_rules! sqlite_test {
        ($name:ident) => {
            #[tokio::test]
            async fn $name() {
                let db = create_sqlite_db().await;
                super::$name(&db).await;
            }
        };
    }

    sqlite_test!(test_insert_and_list);
    sqlite_test!(test_list_filters);
}

#[cfg(all(test, feature = "database-postgres"))]
mod postgres_tests {
    use crate::db::tests::harness::postgres::create_postgres_db;

    macro_rules! postgres_test {
        ($name:ident) => {
            #[tokio::test]
            #[ignore = "Requires Docker - run with `cargo test -- --ignored`"]
            async fn $name() {
                let db = create_postgres_db().await;
                super::$name(&db).await;
            }
        };
    }

    postgres_test!(test_insert_and_list);
    postgres_test!(test_list_filters);
}
