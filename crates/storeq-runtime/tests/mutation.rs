use std::rc::Rc;

use storeq_core::{MutationEndpoint, MutationState, RequestError};
use storeq_harness::{Action, HarnessMutationEndpoint, HarnessStore, Recorder};
use storeq_runtime::{MutationHook, UseMutationOptions};

type Saved = MutationState<u32, String, String>;
type Endpoint = HarnessMutationEndpoint<u32, String, String>;

fn update_user(store: &Rc<HarnessStore>) -> (Rc<Endpoint>, MutationHook<u32, String, String>) {
    let endpoint = Endpoint::new(store, "updateUser");
    let dyn_endpoint: Rc<dyn MutationEndpoint<u32, String, String>> = endpoint.clone();
    (endpoint, MutationHook::new(dyn_endpoint))
}

fn saved(id: &u32) -> Result<String, String> {
    Ok(format!("saved {id}"))
}

fn kinds_since(store: &HarnessStore) -> Vec<&'static str> {
    store.take_actions().iter().map(Action::kind).collect()
}

#[test]
fn state_follows_the_current_invocation() {
    let store = HarnessStore::new();
    let (endpoint, hook) = update_user(&store);
    let mutation = hook.use_mutation(UseMutationOptions::new());
    let log: Recorder<Saved> = Recorder::new();
    let _sub = mutation.state().subscribe(log.sink());
    assert!(log.items()[0].is_uninitialized);

    let invocation = mutation.trigger(1);
    let pending = log.last().expect("emitted");
    assert!(pending.is_loading);
    assert_eq!(pending.original_args.as_deref(), Some(&1));
    assert_eq!(pending.request_id.as_ref(), Some(invocation.request_id()));

    endpoint.resolve_all(saved);
    let done = log.last().expect("emitted");
    assert!(done.is_success);
    assert_eq!(done.data.as_deref().map(String::as_str), Some("saved 1"));
    assert!(matches!(invocation.settled(), Some(Ok(data)) if *data == "saved 1"));
    assert_eq!(log.len(), 3);
}

#[test]
fn retrigger_evicts_the_previous_record_first() {
    let store = HarnessStore::new();
    let (endpoint, hook) = update_user(&store);
    let mutation = hook.use_mutation(UseMutationOptions::new());
    let _sub = mutation.state().subscribe(|_| {});
    let first = mutation.trigger(1);
    endpoint.resolve_all(saved);
    store.take_actions();

    let second = mutation.trigger(2);
    assert_eq!(
        kinds_since(&store),
        vec!["mutation/release", "mutation/removeResult", "mutation/initiate"]
    );
    assert!(endpoint.record(first.request_id().as_str()).is_none());
    assert!(endpoint.record(second.request_id().as_str()).is_some());
    assert_eq!(endpoint.record_count(), 1);
    assert_eq!(
        mutation.current().map(|current| current.request_id().clone()),
        Some(second.request_id().clone())
    );
}

#[test]
fn fixed_key_records_are_shared_not_evicted() {
    let store = HarnessStore::new();
    let (endpoint, hook) = update_user(&store);
    let mutation = hook.use_mutation(UseMutationOptions::new().fixed_cache_key("profile"));
    let log: Recorder<Saved> = Recorder::new();
    let _sub = mutation.state().subscribe(log.sink());

    mutation.trigger(1);
    assert!(log.last().expect("emitted").original_args.is_none());
    endpoint.resolve_all(saved);
    store.take_actions();

    let second = mutation.trigger(2);
    assert_eq!(kinds_since(&store), vec!["mutation/release", "mutation/initiate"]);
    assert_eq!(endpoint.record_count(), 1);
    let record = endpoint.record("profile").expect("shared record");
    assert_eq!(record.request_id.as_ref(), Some(second.request_id()));

    let last = log.last().expect("emitted");
    assert!(last.is_loading);
    assert!(last.original_args.is_none());
}

#[test]
fn fixed_key_state_is_visible_to_other_bindings() {
    let store = HarnessStore::new();
    let (endpoint, hook) = update_user(&store);
    let writer = hook.use_mutation(UseMutationOptions::new().fixed_cache_key("profile"));
    let reader = hook.use_mutation(
        UseMutationOptions::new()
            .fixed_cache_key("profile")
            .select_from_result(|state: &Saved| state.data.as_deref().cloned()),
    );
    let log = Recorder::new();
    let _w = writer.state().subscribe(|_| {});
    let _r = reader.state().subscribe(log.sink());

    writer.trigger(7);
    endpoint.resolve_all(saved);
    assert_eq!(log.items(), vec![None, Some("saved 7".to_owned())]);
}

#[test]
fn reset_evicts_and_returns_to_uninitialized() {
    let store = HarnessStore::new();
    let (endpoint, hook) = update_user(&store);
    let mutation = hook.use_mutation(UseMutationOptions::new());
    let log: Recorder<Saved> = Recorder::new();
    let _sub = mutation.state().subscribe(log.sink());
    mutation.trigger(1);
    endpoint.resolve_all(saved);
    store.take_actions();

    mutation.reset();
    assert_eq!(kinds_since(&store), vec!["mutation/release", "mutation/removeResult"]);
    assert_eq!(endpoint.record_count(), 0);
    assert!(mutation.current().is_none());
    let last = log.last().expect("emitted");
    assert!(last.is_uninitialized);
    assert!(last.data.is_none());
    assert!(last.original_args.is_none());
}

#[test]
fn teardown_releases_but_keeps_the_record() {
    let store = HarnessStore::new();
    let (endpoint, hook) = update_user(&store);
    let mutation = hook.use_mutation(UseMutationOptions::new());
    let sub = mutation.state().subscribe(|_| {});
    let invocation = mutation.trigger(1);
    endpoint.resolve_all(saved);
    store.take_actions();

    drop(sub);
    assert_eq!(kinds_since(&store), vec!["mutation/release"]);
    assert_eq!(endpoint.released(), vec![invocation.request_id().clone()]);
    assert!(endpoint.record(invocation.request_id().as_str()).is_some());

    drop(mutation);
    assert!(store.actions().is_empty(), "nothing left to release");
}

#[test]
fn reset_after_a_remount_still_evicts() {
    let store = HarnessStore::new();
    let (endpoint, hook) = update_user(&store);
    let mutation = hook.use_mutation(UseMutationOptions::new());
    let sub = mutation.state().subscribe(|_| {});
    let invocation = mutation.trigger(1);
    endpoint.resolve_all(saved);
    drop(sub);

    let log: Recorder<Saved> = Recorder::new();
    let _sub = mutation.state().subscribe(log.sink());
    let remounted = log.last().expect("emitted");
    assert_eq!(remounted.request_id.as_ref(), Some(invocation.request_id()));
    store.take_actions();

    mutation.reset();
    assert_eq!(kinds_since(&store), vec!["mutation/removeResult"]);
    assert_eq!(endpoint.record_count(), 0);
    assert!(log.last().expect("emitted").is_uninitialized);
    assert_eq!(endpoint.released(), vec![invocation.request_id().clone()]);
}

#[test]
fn retrigger_after_a_remount_evicts_the_released_record() {
    let store = HarnessStore::new();
    let (endpoint, hook) = update_user(&store);
    let mutation = hook.use_mutation(UseMutationOptions::new());
    let sub = mutation.state().subscribe(|_| {});
    let first = mutation.trigger(1);
    endpoint.resolve_all(saved);
    drop(sub);
    let _sub = mutation.state().subscribe(|_| {});
    store.take_actions();

    let second = mutation.trigger(2);
    assert_eq!(kinds_since(&store), vec!["mutation/removeResult", "mutation/initiate"]);
    assert!(endpoint.record(first.request_id().as_str()).is_none());
    assert!(endpoint.record(second.request_id().as_str()).is_some());
    assert_eq!(endpoint.record_count(), 1);
}

#[test]
fn dropping_the_binding_releases_the_current_handle() {
    let store = HarnessStore::new();
    let (endpoint, hook) = update_user(&store);
    let mutation = hook.use_mutation(UseMutationOptions::new());
    let invocation = mutation.trigger(3);
    store.take_actions();

    drop(mutation);
    assert_eq!(kinds_since(&store), vec!["mutation/release"]);
    assert_eq!(endpoint.record_count(), 1);
    assert!(invocation.settled().is_none());
}

#[test]
fn abort_settles_as_an_aborted_error() {
    let store = HarnessStore::new();
    let (_endpoint, hook) = update_user(&store);
    let mutation = hook.use_mutation(UseMutationOptions::new());
    let log: Recorder<Saved> = Recorder::new();
    let _sub = mutation.state().subscribe(log.sink());

    let invocation = mutation.trigger(1);
    invocation.abort();
    let last = log.last().expect("emitted");
    assert!(last.is_error);
    assert!(last.error.as_ref().is_some_and(RequestError::is_aborted));
    assert!(matches!(invocation.settled(), Some(Err(RequestError::Aborted))));
}

#[test]
fn rejection_is_reported_as_state() {
    let store = HarnessStore::new();
    let (endpoint, hook) = update_user(&store);
    let mutation = hook.use_mutation(UseMutationOptions::new());
    let log: Recorder<Saved> = Recorder::new();
    let _sub = mutation.state().subscribe(log.sink());

    mutation.trigger(1);
    endpoint.resolve_all(|_| Err("conflict".to_owned()));
    let last = log.last().expect("emitted");
    assert!(last.is_error);
    let rejection = last.error.as_ref().and_then(|err| err.rejection().cloned());
    assert_eq!(rejection.as_deref().map(String::as_str), Some("conflict"));
}
