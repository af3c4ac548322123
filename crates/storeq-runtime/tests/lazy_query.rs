use std::rc::Rc;
use std::time::Duration;

use storeq_core::{LazyExtra, QueryEndpoint, QueryState, StableArg, SubscriptionOptions};
use storeq_harness::{Action, HarnessQueryEndpoint, HarnessStore, Recorder};
use storeq_runtime::{LazyQueryOptions, Observable, QueryHooks};

type User = QueryState<u32, String, String>;
type Endpoint = HarnessQueryEndpoint<u32, String, String>;

fn get_user(store: &Rc<HarnessStore>) -> (Rc<Endpoint>, QueryHooks<u32, String, String>) {
    let endpoint = Endpoint::new(store, "getUser");
    let dyn_endpoint: Rc<dyn QueryEndpoint<u32, String, String>> = endpoint.clone();
    (endpoint, QueryHooks::new(dyn_endpoint))
}

fn user(id: &u32) -> Result<String, String> {
    Ok(format!("user {id}"))
}

fn initiates(store: &HarnessStore) -> Vec<(String, bool, bool)> {
    store
        .actions()
        .into_iter()
        .filter_map(|action| match action {
            Action::QueryInitiate {
                key,
                force_refetch,
                started,
                ..
            } => Some((key.to_string(), force_refetch, started)),
            _ => None,
        })
        .collect()
}

#[test]
fn nothing_is_fetched_until_triggered() {
    let store = HarnessStore::new();
    let (endpoint, hooks) = get_user(&store);
    let lazy = hooks.use_lazy_query(LazyQueryOptions::new());
    let log: Recorder<User> = Recorder::new();
    let _sub = lazy.state().subscribe(log.sink());

    assert!(store.actions().is_empty());
    assert_eq!(endpoint.network_requests(), 0);
    assert!(log.items()[0].is_uninitialized);
    assert!(matches!(lazy.last_arg().get(), StableArg::Uninitialized));
}

#[test]
fn fetch_forces_a_request_and_follows_the_argument() {
    let store = HarnessStore::new();
    let (endpoint, hooks) = get_user(&store);
    let lazy = hooks.use_lazy_query(LazyQueryOptions::new());
    let log: Recorder<User> = Recorder::new();
    let _sub = lazy.state().subscribe(log.sink());

    let invocation = lazy.fetch(1, LazyExtra::default()).expect("fetched");
    assert_eq!(initiates(&store), vec![("getUser(1)".to_owned(), true, true)]);
    assert!(log.last().expect("emitted").is_loading);
    assert!(invocation.settled().is_none());

    endpoint.resolve_all(user);
    let last = log.last().expect("emitted");
    assert_eq!(last.data.as_deref().map(String::as_str), Some("user 1"));
    assert!(matches!(invocation.settled(), Some(Ok(data)) if *data == "user 1"));

    lazy.fetch(1, LazyExtra::default()).expect("fetched");
    assert_eq!(endpoint.network_requests(), 2, "a plain trigger always refetches");
    assert_eq!(endpoint.subscription_count(&1), 1, "previous subscription released");
}

#[test]
fn prefer_cache_value_serves_the_cache() {
    let store = HarnessStore::new();
    let (endpoint, hooks) = get_user(&store);
    endpoint.seed(4, "cached".into());
    let lazy = hooks.use_lazy_query(LazyQueryOptions::new());
    let log: Recorder<User> = Recorder::new();
    let _sub = lazy.state().subscribe(log.sink());

    lazy.fetch(4, LazyExtra::prefer_cache_value()).expect("fetched");
    assert_eq!(initiates(&store), vec![("getUser(4)".to_owned(), false, false)]);
    assert_eq!(endpoint.network_requests(), 0);
    assert!(log.last().expect("emitted").is_success);
}

#[test]
fn new_argument_keeps_last_good_data() {
    let store = HarnessStore::new();
    let (endpoint, hooks) = get_user(&store);
    let lazy = hooks.use_lazy_query(LazyQueryOptions::new());
    let log: Recorder<User> = Recorder::new();
    let _sub = lazy.state().subscribe(log.sink());
    lazy.fetch(1, LazyExtra::default()).expect("fetched");
    endpoint.resolve_all(user);
    store.take_actions();

    lazy.fetch(2, LazyExtra::default()).expect("fetched");
    let kinds: Vec<_> = store.actions().iter().map(Action::kind).collect();
    assert_eq!(kinds, vec!["query/unsubscribe", "query/initiate"]);

    let last = log.last().expect("emitted");
    assert_eq!(last.data.as_deref().map(String::as_str), Some("user 1"));
    assert!(last.current_data.is_none());
    assert!(last.is_fetching);
    assert_eq!(
        lazy.last_arg().with(|arg| arg.arg().map(|arg| **arg)),
        Some(2)
    );
}

#[test]
fn remount_reissues_the_last_argument_from_cache() {
    let store = HarnessStore::new();
    let (endpoint, hooks) = get_user(&store);
    let lazy = hooks.use_lazy_query(LazyQueryOptions::new());
    let sub = lazy.state().subscribe(|_| {});
    lazy.fetch(1, LazyExtra::default()).expect("fetched");
    endpoint.resolve_all(user);

    drop(sub);
    assert_eq!(endpoint.total_subscriptions(), 0);
    assert!(lazy.invocation().is_none());
    store.take_actions();

    let log: Recorder<User> = Recorder::new();
    let _sub = lazy.state().subscribe(log.sink());
    assert_eq!(initiates(&store), vec![("getUser(1)".to_owned(), false, false)]);
    assert_eq!(endpoint.network_requests(), 1);
    assert_eq!(endpoint.subscription_count(&1), 1);
    assert_eq!(
        log.last().expect("emitted").data.as_deref().map(String::as_str),
        Some("user 1")
    );
}

#[test]
fn options_reach_the_live_subscription() {
    let store = HarnessStore::new();
    let (endpoint, hooks) = get_user(&store);
    let base = LazyQueryOptions::new();
    let options = Observable::new(base.clone());
    let lazy = hooks.use_lazy_query(&options);
    let _sub = lazy.state().subscribe(|_| {});
    lazy.fetch(1, LazyExtra::default()).expect("fetched");
    store.take_actions();

    options.set(base.polling_interval(Duration::from_secs(2)));
    let kinds: Vec<_> = store.actions().iter().map(Action::kind).collect();
    assert_eq!(kinds, vec!["query/updateSubscriptionOptions"]);
    assert_eq!(
        endpoint.subscription_options_for(&1)[0].polling_interval,
        Duration::from_secs(2)
    );
}

#[test]
fn projection_runs_on_the_lazy_state() {
    let store = HarnessStore::new();
    let (endpoint, hooks) = get_user(&store);
    let lazy = hooks.use_lazy_query(
        LazyQueryOptions::new().select_from_result(|state: &User| state.is_success),
    );
    let log = Recorder::new();
    let _sub = lazy.state().subscribe(log.sink());
    lazy.fetch(9, LazyExtra::default()).expect("fetched");
    endpoint.resolve_all(user);
    endpoint.seed(10, "unrelated".into());

    assert_eq!(log.items(), vec![false, true]);
}

#[test]
fn bare_trigger_owns_its_subscription() {
    let store = HarnessStore::new();
    let (endpoint, hooks) = get_user(&store);
    let mut trigger = hooks.use_lazy_query_subscription(&SubscriptionOptions::default());
    assert!(!trigger.is_active());

    let (arg, invocation) = trigger.trigger(5, LazyExtra::default()).expect("fetched");
    assert_eq!(arg.key().map(ToString::to_string), Some("getUser(5)".to_owned()));
    assert_eq!(invocation.query_cache_key().to_string(), "getUser(5)");
    assert!(trigger.is_active());
    assert_eq!(endpoint.subscription_count(&5), 1);

    drop(trigger);
    assert_eq!(endpoint.total_subscriptions(), 0);
}
