use std::collections::HashSet;
use std::sync::Arc;

use metrics_util::debugging::DebuggingRecorder;
use tenantry::application::authz::GrantContext;
use tenantry::application::hooks::{HookError, HookEvent, HookName};
use tenantry::cache::{
    CacheConfig, CacheManager, KEY_TYPE_RECORD, KeyComponent, MemoryCacheBackend,
};
use tenantry::domain::entities::Record;
use tenantry::domain::types::{ActorId, Capability};
use tenantry::modules::{Platform, customers, organizations};

#[tokio::test]
async fn core_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // Hit, miss, undecodable entry and sweep
    let config = CacheConfig::default();
    let cache = CacheManager::new(
        organizations::DESCRIPTOR.cache,
        config.clone(),
        Arc::new(MemoryCacheBackend::new(&config)),
    );
    let key = [KeyComponent::from(1_i64)];
    assert_eq!(cache.get::<String>(KEY_TYPE_RECORD, &key).await, None);
    cache.set(KEY_TYPE_RECORD, &"acme", None, &key).await;
    assert_eq!(
        cache.get::<String>(KEY_TYPE_RECORD, &key).await.as_deref(),
        Some("acme")
    );
    assert_eq!(cache.get::<u64>(KEY_TYPE_RECORD, &key).await, None);
    assert!(cache.clear(Some(KEY_TYPE_RECORD)).await);

    // Identity conflict, failing subscriber and grant decisions
    let platform = Platform::in_memory();
    let actor = Record::new().with("display_name", "Ada");
    let customer = |email: &str| Record::new().with("name", "Ada").with("email", email);
    platform
        .create_customer(&actor, &customer("a@example.com"), Some(500))
        .await
        .expect("first");
    let linked = platform
        .create_customer(&actor, &customer("b@example.com"), Some(500))
        .await
        .expect("second");
    assert!(linked.actor.is_conflict());

    platform.hooks().grants.add_filter_fn(
        HookName::new(customers::NAME, HookEvent::Can(Capability::View)),
        "test.fails",
        |_, _: &GrantContext| Err(HookError::failed("test.fails", "offline")),
    );
    assert!(
        !platform
            .authorizer_for(ActorId::new(77))
            .can(&customers::DESCRIPTOR, Capability::View, linked.entity.id)
            .await
    );

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "tenantry_cache_hit_total",
        "tenantry_cache_miss_total",
        "tenantry_cache_sweep_keys_total",
        "tenantry_identity_conflict_total",
        "tenantry_hook_subscriber_error_total",
        "tenantry_grant_decision_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
