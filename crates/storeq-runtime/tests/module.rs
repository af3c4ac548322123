use std::cell::Cell;
use std::rc::Rc;

use storeq_core::{ApiStore, MutationEndpoint, PrefetchOptions, QueryArg, QueryEndpoint};
use storeq_harness::{
    Action, HarnessMutationEndpoint, HarnessQueryEndpoint, HarnessStore, init_test_logging,
};
use storeq_runtime::{
    StoreQueryConfig, StoreQueryModule, SubscriptionScope, UseMutationOptions, UseQueryOptions,
    dispatch_batched, listen_batched,
};

type Endpoint = HarnessQueryEndpoint<u32, String, String>;

fn module(store: &Rc<HarnessStore>, config: StoreQueryConfig) -> StoreQueryModule {
    let api: Rc<dyn ApiStore> = store.clone();
    StoreQueryModule::for_root(api, config)
}

fn get_user(store: &Rc<HarnessStore>) -> (Rc<Endpoint>, Rc<dyn QueryEndpoint<u32, String, String>>) {
    let endpoint = Endpoint::new(store, "getUser");
    let dyn_endpoint: Rc<dyn QueryEndpoint<u32, String, String>> = endpoint.clone();
    (endpoint, dyn_endpoint)
}

// ---------------------------------------------------------------------------
// Module wiring
// ---------------------------------------------------------------------------

#[test]
fn for_root_installs_listeners_when_asked() {
    init_test_logging();
    let store = HarnessStore::new();
    let _module = module(&store, StoreQueryConfig::new().setup_listeners(true));
    assert!(store.listeners_installed());
    assert_eq!(store.action_kinds(), vec!["setupListeners"]);

    let quiet = HarnessStore::new();
    let _module = module(&quiet, StoreQueryConfig::new());
    assert!(!quiet.listeners_installed());
}

#[test]
fn module_defaults_fill_hook_options() {
    let store = HarnessStore::new();
    let module = module(
        &store,
        StoreQueryConfig::new()
            .refetch_on_focus(true)
            .refetch_on_reconnect(true),
    );
    let (endpoint, dyn_endpoint) = get_user(&store);
    let hooks = module.query_hooks(dyn_endpoint);

    let defaulted = hooks.use_query(QueryArg::Value(1), UseQueryOptions::new());
    let overridden = hooks.use_query(QueryArg::Value(2), UseQueryOptions::new().refetch_on_focus(false));
    let _a = defaulted.subscribe(|_| {});
    let _b = overridden.subscribe(|_| {});

    let first = &endpoint.subscription_options_for(&1)[0];
    assert_eq!(first.refetch_on_focus, Some(true));
    assert_eq!(first.refetch_on_reconnect, Some(true));
    let second = &endpoint.subscription_options_for(&2)[0];
    assert_eq!(second.refetch_on_focus, Some(false));
    assert_eq!(second.refetch_on_reconnect, Some(true));
}

#[test]
fn module_refetch_policy_applies_on_mount() {
    let store = HarnessStore::new();
    let module = module(&store, StoreQueryConfig::new().refetch_on_mount_or_arg_change(true));
    let (endpoint, dyn_endpoint) = get_user(&store);
    endpoint.seed(1, "cached".into());

    let stream = module
        .query_hooks(dyn_endpoint)
        .use_query(QueryArg::Value(1), UseQueryOptions::new());
    let _sub = stream.subscribe(|_| {});
    assert_eq!(endpoint.network_requests(), 1);
}

#[test]
fn module_builds_mutation_hooks() {
    let store = HarnessStore::new();
    let module = module(&store, StoreQueryConfig::new());
    let endpoint = HarnessMutationEndpoint::<u32, String, String>::new(&store, "updateUser");
    let dyn_endpoint: Rc<dyn MutationEndpoint<u32, String, String>> = endpoint.clone();

    let mutation = module
        .mutation_hook(dyn_endpoint)
        .use_mutation(UseMutationOptions::new());
    mutation.trigger(1);
    assert_eq!(endpoint.requests(), 1);
}

// ---------------------------------------------------------------------------
// Prefetch
// ---------------------------------------------------------------------------

#[test]
fn prefetch_warms_the_cache_without_subscribing() {
    let store = HarnessStore::new();
    let module = module(&store, StoreQueryConfig::new());
    let (endpoint, dyn_endpoint) = get_user(&store);
    let prefetch = module.query_hooks(dyn_endpoint).use_prefetch(PrefetchOptions::Default);

    prefetch.prefetch(1, None);
    prefetch.prefetch(1, None);
    assert_eq!(endpoint.network_requests(), 1, "pending request is joined");
    assert_eq!(endpoint.total_subscriptions(), 0);

    endpoint.resolve_all(|id| Ok(format!("user {id}")));
    prefetch.prefetch(1, None);
    assert_eq!(endpoint.network_requests(), 1, "fresh cache is reused");

    prefetch.prefetch(1, Some(PrefetchOptions::Force));
    assert_eq!(endpoint.network_requests(), 2);
    let policies: Vec<_> = store
        .actions()
        .into_iter()
        .filter_map(|action| match action {
            Action::Prefetch { options, started, .. } => Some((options, started)),
            _ => None,
        })
        .collect();
    assert_eq!(
        policies,
        vec![
            (PrefetchOptions::Default, true),
            (PrefetchOptions::Default, false),
            (PrefetchOptions::Default, false),
            (PrefetchOptions::Force, true),
        ]
    );
}

#[test]
fn prefetched_data_is_served_to_a_later_query() {
    let store = HarnessStore::new();
    let module = module(&store, StoreQueryConfig::new());
    let (endpoint, dyn_endpoint) = get_user(&store);
    let hooks = module.query_hooks(dyn_endpoint);
    hooks.use_prefetch(PrefetchOptions::Default).prefetch(8, None);
    endpoint.resolve_all(|id| Ok(format!("user {id}")));

    let stream = hooks.use_query(QueryArg::Value(8), UseQueryOptions::new());
    let _sub = stream.subscribe(|_| {});
    assert_eq!(endpoint.network_requests(), 1);
    assert!(stream.latest().is_some_and(|result| result.is_success));
}

// ---------------------------------------------------------------------------
// Batch bridge
// ---------------------------------------------------------------------------

#[test]
fn batched_dispatches_notify_once() {
    let store = HarnessStore::new();
    let (endpoint, _) = get_user(&store);
    let calls = Rc::new(Cell::new(0));
    let _listener = listen_batched(store.clone(), {
        let calls = Rc::clone(&calls);
        move || calls.set(calls.get() + 1)
    });

    dispatch_batched(|| {
        endpoint.seed(1, "a".into());
        endpoint.seed(2, "b".into());
        endpoint.seed(3, "c".into());
    });
    assert_eq!(calls.get(), 1);

    endpoint.seed(4, "d".into());
    assert_eq!(calls.get(), 2, "outside a batch every change is delivered");
}

#[test]
fn module_listen_is_batched_and_removable() {
    let store = HarnessStore::new();
    let module = module(&store, StoreQueryConfig::new());
    let (endpoint, _) = get_user(&store);
    let calls = Rc::new(Cell::new(0));
    let listener = module.listen({
        let calls = Rc::clone(&calls);
        move || calls.set(calls.get() + 1)
    });

    dispatch_batched(|| {
        endpoint.seed(1, "a".into());
        endpoint.seed(2, "b".into());
    });
    assert_eq!(calls.get(), 1);

    drop(listener);
    endpoint.seed(3, "c".into());
    assert_eq!(calls.get(), 1);
    assert_eq!(store.listener_count(), 0);
}

#[test]
fn scope_releases_every_stream_it_holds() {
    let store = HarnessStore::new();
    let module = module(&store, StoreQueryConfig::new());
    let (endpoint, dyn_endpoint) = get_user(&store);
    let hooks = module.query_hooks(dyn_endpoint);
    let first = hooks.use_query(QueryArg::Value(1), UseQueryOptions::new());
    let second = hooks.use_query(QueryArg::Value(2), UseQueryOptions::new());

    let mut scope = SubscriptionScope::new();
    scope.subscribe(&first, |_| {}).subscribe(&second, |_| {});
    assert_eq!(scope.len(), 2);
    assert_eq!(endpoint.total_subscriptions(), 2);

    drop(scope);
    assert_eq!(endpoint.total_subscriptions(), 0);
}
