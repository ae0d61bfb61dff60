use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tenantry::application::hooks::{EntityEvent, HookEvent, HookName};
use tenantry::application::repos::RepoError;
use tenantry::application::store::{ListQuery, MAX_PAGE_LIMIT};
use tenantry::cache::{KEY_TYPE_LIST, KEY_TYPE_RECORD, KeyComponent};
use tenantry::domain::entities::Record;
use tenantry::domain::types::{AccessScope, ActorId, SortDirection};
use tenantry::modules::{Platform, organizations, units};

fn organization(name: &str) -> Record {
    Record::new().with("name", name)
}

#[tokio::test]
async fn created_record_is_readable_by_its_new_key() {
    let platform = Platform::in_memory();

    let created = platform
        .organizations
        .create(&organization("Acme"))
        .await
        .expect("create");
    let record = platform
        .organizations
        .find(created.id)
        .await
        .expect("find")
        .expect("record exists");

    assert_eq!(record.get_str("name"), Some("Acme"));
    assert_eq!(record.get_i64("id"), Some(created.id));
    assert!(record.contains("created_at"));
}

#[tokio::test]
async fn create_invalidates_cached_lists_of_the_context() {
    let platform = Platform::in_memory();
    let cache = platform.organizations.cache();
    let context = [KeyComponent::from("ctx")];

    assert!(
        cache
            .set(
                KEY_TYPE_LIST,
                &json!(["v1"]),
                Some(std::time::Duration::from_secs(60)),
                &context
            )
            .await
    );
    platform
        .organizations
        .create(&organization("Acme"))
        .await
        .expect("create");

    assert_eq!(cache.get::<Value>(KEY_TYPE_LIST, &context).await, None);
}

#[tokio::test]
async fn mutations_leave_no_stale_entries() {
    let platform = Platform::in_memory();
    let store = &platform.organizations;
    let id = store.create(&organization("Acme")).await.expect("create").id;

    let _ = store.find(id).await.expect("warm record");
    let first = store.list(&ListQuery::default()).await.expect("warm page");
    assert_eq!(first.total, 1);
    assert!(
        store
            .cache()
            .exists(KEY_TYPE_RECORD, &[KeyComponent::from(id)])
            .await
    );

    store
        .update(id, &organization("Acme Ltd"))
        .await
        .expect("update");
    assert!(
        !store
            .cache()
            .exists(KEY_TYPE_RECORD, &[KeyComponent::from(id)])
            .await
    );
    let record = store.find(id).await.expect("find").expect("exists");
    assert_eq!(record.get_str("name"), Some("Acme Ltd"));
    let page = store.list(&ListQuery::default()).await.expect("page");
    assert_eq!(page.records[0].get_str("name"), Some("Acme Ltd"));

    store.delete(id).await.expect("delete");
    assert_eq!(store.find(id).await.expect("find"), None);
    assert_eq!(
        store.list(&ListQuery::default()).await.expect("page").total,
        0
    );
}

#[tokio::test]
async fn count_is_invalidated_by_create() {
    let platform = Platform::in_memory();
    let store = &platform.organizations;

    assert_eq!(store.count(&Record::new()).await.expect("count"), 0);
    store.create(&organization("Acme")).await.expect("create");
    assert_eq!(store.count(&Record::new()).await.expect("count"), 1);
}

#[tokio::test]
async fn create_only_fields_are_ignored_on_update() {
    let platform = Platform::in_memory();
    let store = &platform.organizations;
    let id = store
        .create(&organization("Acme").with("external_ref", "acme-1"))
        .await
        .expect("create")
        .id;

    let err = store
        .update(id, &Record::new().with("external_ref", "acme-2"))
        .await
        .expect_err("nothing writable");
    assert!(matches!(err, RepoError::InvalidInput { .. }));

    let record = store.find_by("external_ref", "acme-1").await.expect("find");
    assert_eq!(record.and_then(|r| r.get_i64("id")), Some(id));
}

#[tokio::test]
async fn find_by_rejects_non_unique_fields() {
    let platform = Platform::in_memory();
    let err = platform
        .organizations
        .find_by("name", "Acme")
        .await
        .expect_err("name is not unique");
    assert!(matches!(err, RepoError::InvalidInput { .. }));
}

#[tokio::test]
async fn missing_records_report_not_found() {
    let platform = Platform::in_memory();
    let err = platform
        .organizations
        .update(42, &organization("Ghost"))
        .await
        .expect_err("missing");
    assert!(matches!(err, RepoError::NotFound));
    assert!(matches!(
        platform.organizations.delete(42).await,
        Err(RepoError::NotFound)
    ));
}

#[tokio::test]
async fn lifecycle_notifications_carry_the_effective_key() {
    let platform = Platform::in_memory();
    let seen: Arc<Mutex<Vec<(String, i64)>>> = Arc::default();

    for event in [HookEvent::Created, HookEvent::Updated, HookEvent::Deleted] {
        let seen = Arc::clone(&seen);
        platform.hooks().events.add_listener_fn(
            HookName::new(organizations::NAME, event),
            "test.recorder",
            move |event: &EntityEvent| {
                let mut seen = seen.lock().expect("lock");
                seen.push((event.entity.to_string(), event.id));
                Ok(())
            },
        );
    }

    let store = &platform.organizations;
    let id = store.create(&organization("Acme")).await.expect("create").id;
    store.update(id, &organization("Acme Ltd")).await.expect("update");
    store.delete(id).await.expect("delete");

    let seen = seen.lock().expect("lock");
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|(entity, seen_id)| entity == organizations::NAME && *seen_id == id));
}

#[tokio::test]
async fn organizations_get_a_default_unit() {
    let platform = Platform::in_memory();
    let id = platform
        .organizations
        .create(&organization("Acme"))
        .await
        .expect("create")
        .id;

    let page = platform
        .units
        .list(&ListQuery {
            filters: Record::new().with("organization_id", id),
            ..Default::default()
        })
        .await
        .expect("units");

    assert_eq!(page.total, 1);
    let unit = &page.records[0];
    assert_eq!(unit.get_str("name"), Some(units::DEFAULT_UNIT_NAME));
    assert_eq!(unit.get("is_default"), Some(&Value::Bool(true)));
}

#[tokio::test]
async fn list_pages_search_and_sort() {
    let platform = Platform::in_memory();
    let store = &platform.organizations;
    for name in ["Charlie", "alpha", "Bravo", "Alphabet"] {
        store.create(&organization(name)).await.expect("create");
    }

    let sorted = store
        .list(&ListQuery {
            sort_column: Some("name".to_string()),
            sort_direction: SortDirection::Desc,
            limit: Some(2),
            ..Default::default()
        })
        .await
        .expect("page");
    assert_eq!(sorted.total, 4);
    assert_eq!(sorted.limit, 2);
    let names: Vec<_> = sorted
        .records
        .iter()
        .filter_map(|record| record.get_str("name"))
        .collect();
    assert_eq!(names, ["alpha", "Charlie"]);

    let searched = store
        .list(&ListQuery {
            search: Some("ALPHA".to_string()),
            ..Default::default()
        })
        .await
        .expect("search");
    assert_eq!(searched.total, 2);

    let clamped = store
        .list(&ListQuery {
            limit: Some(10_000),
            ..Default::default()
        })
        .await
        .expect("clamped");
    assert_eq!(clamped.limit, MAX_PAGE_LIMIT);
}

#[tokio::test]
async fn sort_columns_are_whitelisted() {
    let platform = Platform::in_memory();
    for column in ["name; DROP TABLE organizations", "settings", "unknown"] {
        let err = platform
            .organizations
            .list(&ListQuery {
                sort_column: Some(column.to_string()),
                ..Default::default()
            })
            .await
            .expect_err("rejected");
        assert!(matches!(err, RepoError::InvalidInput { .. }), "{column}");
    }
}

#[tokio::test]
async fn scoped_lists_filter_by_owner_and_reject_unsupported_scopes() {
    let platform = Platform::in_memory();
    let store = &platform.organizations;
    store
        .create(&organization("Mine").with("owner_id", 7))
        .await
        .expect("create");
    store
        .create(&organization("Theirs").with("owner_id", 8))
        .await
        .expect("create");

    let mine = store
        .list(&ListQuery {
            scope: AccessScope::Owner(ActorId::new(7)),
            ..Default::default()
        })
        .await
        .expect("owner scope");
    assert_eq!(mine.total, 1);
    assert_eq!(mine.records[0].get_str("name"), Some("Mine"));

    let err = store
        .list(&ListQuery {
            scope: AccessScope::Unit(1),
            ..Default::default()
        })
        .await
        .expect_err("organizations have no unit field");
    assert!(matches!(err, RepoError::InvalidInput { .. }));
}

#[tokio::test]
async fn duplicate_unique_values_are_rejected() {
    let platform = Platform::in_memory();
    let customer = |name: &str| {
        (
            Record::new().with("display_name", name),
            Record::new().with("name", name).with("email", "same@example.com"),
        )
    };

    let (actor, data) = customer("Ann");
    platform
        .create_customer(&actor, &data, None)
        .await
        .expect("first");
    let (actor, data) = customer("Bob");
    let err = platform
        .create_customer(&actor, &data, None)
        .await
        .expect_err("duplicate email");
    assert!(err.to_string().contains("customers_email_key"));
}
