//! Tests for the blocking and suspending pipeline executors.
//!
//! These use the recording probes from `middleware::mock` and the
//! in-crate `FactoryResolver`, so no real middleware stack is required.
//! Probe markers (`A`, `B`, …) make each registration a distinct step
//! type; a step left unregistered doubles as proof that the executor
//! never resolved it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use middleware::mock::{AsyncProbe, CancellableProbe, ChainProbe, PipelineProbe, TraceLog};
use middleware::{
    AsyncMiddleware, AsyncPipelineStep, CancellableAsyncMiddleware, FactoryResolver, FlowError,
    Middleware, ResolveError, Resolved, StepType,
};

use crate::error::ConfigError;
use crate::{AsyncPipeline, Pipeline};

// Markers: one per logical step in a scenario.
struct A;
struct B;
struct C;

/// Register a blocking probe built afresh on every resolution.
fn register_pipeline<T: Send + Sync + 'static>(
    resolver: &mut FactoryResolver,
    owned: bool,
    build: impl Fn() -> PipelineProbe<T> + Send + Sync + 'static,
) -> StepType {
    let step = StepType::middleware::<PipelineProbe<T>, Value>();
    resolver.register(step, move || {
        let probe: Box<dyn Middleware<Value>> = Box::new(build());
        if owned {
            Resolved::owned(probe)
        } else {
            Resolved::external(probe)
        }
    });
    step
}

/// Register a plain suspending probe.
fn register_async<T: Send + Sync + 'static>(
    resolver: &mut FactoryResolver,
    owned: bool,
    build: impl Fn() -> AsyncProbe<T> + Send + Sync + 'static,
) -> StepType {
    let step = StepType::async_middleware::<AsyncProbe<T>, Value>();
    resolver.register(step, move || {
        let probe: Box<dyn AsyncMiddleware<Value>> = Box::new(build());
        if owned {
            Resolved::owned(AsyncPipelineStep::Plain(probe))
        } else {
            Resolved::external(AsyncPipelineStep::Plain(probe))
        }
    });
    step
}

/// Register a cancellation-aware suspending probe.
fn register_cancellable<T: Send + Sync + 'static>(
    resolver: &mut FactoryResolver,
    owned: bool,
    build: impl Fn() -> CancellableProbe<T> + Send + Sync + 'static,
) -> StepType {
    let step = StepType::cancellable_async_middleware::<CancellableProbe<T>, Value>();
    resolver.register(step, move || {
        let probe: Box<dyn CancellableAsyncMiddleware<Value>> = Box::new(build());
        if owned {
            Resolved::owned(AsyncPipelineStep::Cancellable(probe))
        } else {
            Resolved::external(AsyncPipelineStep::Cancellable(probe))
        }
    });
    step
}

// ============================================================
// Blocking pipeline
// ============================================================

#[test]
fn steps_execute_in_configured_order_with_propagated_values() {
    let log = TraceLog::new();
    let mut resolver = FactoryResolver::new();
    register_pipeline(&mut resolver, false, {
        let log = log.clone();
        move || PipelineProbe::<A>::forwarding("a", &log)
    });
    register_pipeline(&mut resolver, false, {
        let log = log.clone();
        move || PipelineProbe::<B>::forwarding("b", &log)
    });
    register_pipeline(&mut resolver, false, {
        let log = log.clone();
        move || PipelineProbe::<C>::forwarding("c", &log)
    });

    let mut pipeline: Pipeline<Value> = Pipeline::new(Arc::new(resolver));
    pipeline
        .add::<PipelineProbe<A>>()
        .add::<PipelineProbe<B>>()
        .add::<PipelineProbe<C>>();

    pipeline.execute(json!([])).expect("pipeline should succeed");

    // Each step saw the value produced by its predecessor.
    assert_eq!(
        log.entries(),
        vec![
            r#"a:run:[]"#.to_string(),
            r#"b:run:["a"]"#.to_string(),
            r#"c:run:["a","b"]"#.to_string(),
        ]
    );
}

#[test]
fn empty_pipeline_is_a_no_op_and_resolves_nothing() {
    // An empty resolver would fail any resolution attempt, so a clean
    // return proves none happened.
    let pipeline: Pipeline<Value> = Pipeline::new(Arc::new(FactoryResolver::new()));
    assert!(pipeline.execute(json!({})).is_ok());
}

#[test]
fn non_forwarding_step_stops_later_steps() {
    let log = TraceLog::new();
    let mut resolver = FactoryResolver::new();
    register_pipeline(&mut resolver, false, {
        let log = log.clone();
        move || PipelineProbe::<A>::forwarding("a", &log)
    });
    register_pipeline(&mut resolver, false, {
        let log = log.clone();
        move || PipelineProbe::<B>::stopping("b", &log)
    });
    // C deliberately unregistered: resolving it would fail the run.

    let mut pipeline: Pipeline<Value> = Pipeline::new(Arc::new(resolver));
    pipeline
        .add::<PipelineProbe<A>>()
        .add::<PipelineProbe<B>>()
        .add::<PipelineProbe<C>>();

    pipeline.execute(json!([])).expect("pipeline should succeed");

    assert_eq!(log.count_of("a:run"), 1);
    assert_eq!(log.count_of("b:run"), 1);
    assert_eq!(log.count_of("c:run"), 0);
}

#[test]
fn owned_instances_release_in_reverse_order() {
    let log = TraceLog::new();
    let mut resolver = FactoryResolver::new();
    register_pipeline(&mut resolver, true, {
        let log = log.clone();
        move || PipelineProbe::<A>::forwarding("a", &log)
    });
    register_pipeline(&mut resolver, true, {
        let log = log.clone();
        move || PipelineProbe::<B>::forwarding("b", &log)
    });

    let mut pipeline: Pipeline<Value> = Pipeline::new(Arc::new(resolver));
    pipeline.add::<PipelineProbe<A>>().add::<PipelineProbe<B>>();

    pipeline.execute(json!([])).expect("pipeline should succeed");

    assert_eq!(
        log.entries(),
        vec![
            r#"a:run:[]"#.to_string(),
            r#"b:run:["a"]"#.to_string(),
            "b:release".to_string(),
            "a:release".to_string(),
        ]
    );
}

#[test]
fn release_still_runs_when_a_step_fails() {
    let log = TraceLog::new();
    let mut resolver = FactoryResolver::new();
    register_pipeline(&mut resolver, true, {
        let log = log.clone();
        move || PipelineProbe::<A>::forwarding("a", &log)
    });
    register_pipeline(&mut resolver, true, {
        let log = log.clone();
        move || PipelineProbe::<B>::failing("b", &log, "boom")
    });

    let mut pipeline: Pipeline<Value> = Pipeline::new(Arc::new(resolver));
    pipeline.add::<PipelineProbe<A>>().add::<PipelineProbe<B>>();

    let result = pipeline.execute(json!([]));
    assert!(matches!(result, Err(FlowError::Middleware(_))));

    assert_eq!(
        log.entries(),
        vec![
            r#"a:run:[]"#.to_string(),
            r#"b:run:["a"]"#.to_string(),
            "b:release".to_string(),
            "a:release".to_string(),
        ]
    );
}

#[test]
fn owned_step_with_suspending_release_fails_before_running() {
    let log = TraceLog::new();
    let mut resolver = FactoryResolver::new();
    register_pipeline(&mut resolver, true, {
        let log = log.clone();
        move || PipelineProbe::<A>::forwarding("a", &log)
    });
    register_pipeline(&mut resolver, true, {
        let log = log.clone();
        move || PipelineProbe::<B>::forwarding("b", &log).suspending_release()
    });
    register_pipeline(&mut resolver, false, {
        let log = log.clone();
        move || PipelineProbe::<C>::forwarding("c", &log)
    });

    let mut pipeline: Pipeline<Value> = Pipeline::new(Arc::new(resolver));
    pipeline
        .add::<PipelineProbe<A>>()
        .add::<PipelineProbe<B>>()
        .add::<PipelineProbe<C>>();

    let result = pipeline.execute(json!([]));
    assert!(matches!(
        result,
        Err(FlowError::AsyncReleaseRequired { flow: "pipeline", .. })
    ));

    // B never ran, C was never reached, and A still released.
    assert_eq!(log.count_of("b:run"), 0);
    assert_eq!(log.count_of("c:run"), 0);
    assert_eq!(log.entries().last().map(String::as_str), Some("a:release"));
}

#[test]
fn duplicate_step_types_resolve_independently() {
    let log = TraceLog::new();
    let built = Arc::new(AtomicUsize::new(0));
    let mut resolver = FactoryResolver::new();
    register_pipeline(&mut resolver, false, {
        let (log, built) = (log.clone(), built.clone());
        move || {
            built.fetch_add(1, Ordering::SeqCst);
            PipelineProbe::<A>::forwarding("a", &log)
        }
    });

    let mut pipeline: Pipeline<Value> = Pipeline::new(Arc::new(resolver));
    pipeline.add::<PipelineProbe<A>>().add::<PipelineProbe<A>>();

    pipeline.execute(json!([])).expect("pipeline should succeed");

    assert_eq!(built.load(Ordering::SeqCst), 2);
    assert_eq!(
        log.entries(),
        vec![r#"a:run:[]"#.to_string(), r#"a:run:["a"]"#.to_string()]
    );
}

#[test]
fn add_type_rejects_a_foreign_contract() {
    let mut pipeline: Pipeline<Value> = Pipeline::new(Arc::new(FactoryResolver::new()));
    let handle = StepType::handler::<ChainProbe<A>, Value, Value>();

    let result = pipeline.add_type(handle);
    assert!(matches!(result, Err(ConfigError::ContractMismatch { .. })));
}

#[test]
fn add_type_accepts_a_matching_handle() {
    let log = TraceLog::new();
    let mut resolver = FactoryResolver::new();
    let handle = register_pipeline(&mut resolver, false, {
        let log = log.clone();
        move || PipelineProbe::<A>::forwarding("a", &log)
    });

    let mut pipeline: Pipeline<Value> = Pipeline::new(Arc::new(resolver));
    pipeline.add_type(handle).expect("handle should be accepted");

    pipeline.execute(json!([])).expect("pipeline should succeed");
    assert_eq!(log.count_of("a:run"), 1);
}

#[test]
fn unregistered_step_type_fails_resolution() {
    let mut pipeline: Pipeline<Value> = Pipeline::new(Arc::new(FactoryResolver::new()));
    pipeline.add::<PipelineProbe<A>>();

    let result = pipeline.execute(json!([]));
    assert!(matches!(
        result,
        Err(FlowError::Resolve(ResolveError::Unregistered { .. }))
    ));
}

// ============================================================
// Suspending pipeline
// ============================================================

#[tokio::test]
async fn async_steps_execute_in_configured_order() {
    let log = TraceLog::new();
    let mut resolver = FactoryResolver::new();
    register_async(&mut resolver, false, {
        let log = log.clone();
        move || AsyncProbe::<A>::forwarding("a", &log)
    });
    register_async(&mut resolver, false, {
        let log = log.clone();
        move || AsyncProbe::<B>::forwarding("b", &log)
    });
    register_cancellable(&mut resolver, false, {
        let log = log.clone();
        move || CancellableProbe::<C>::forwarding("c", &log)
    });

    let mut pipeline: AsyncPipeline<Value> = AsyncPipeline::new(Arc::new(resolver));
    pipeline
        .add::<AsyncProbe<A>>()
        .add::<AsyncProbe<B>>()
        .add_cancellable::<CancellableProbe<C>>();

    pipeline.execute(json!([])).await.expect("pipeline should succeed");

    assert_eq!(
        log.entries(),
        vec![
            r#"a:run:[]"#.to_string(),
            r#"b:run:["a"]"#.to_string(),
            r#"c:run:["a","b"]"#.to_string(),
        ]
    );
}

#[tokio::test]
async fn pre_cancelled_token_stops_a_cancellable_step() {
    let log = TraceLog::new();
    let mut resolver = FactoryResolver::new();
    register_async(&mut resolver, true, {
        let log = log.clone();
        move || AsyncProbe::<A>::forwarding("a", &log)
    });
    register_cancellable(&mut resolver, true, {
        let log = log.clone();
        move || CancellableProbe::<B>::forwarding("b", &log)
    });
    register_async(&mut resolver, false, {
        let log = log.clone();
        move || AsyncProbe::<C>::forwarding("c", &log)
    });

    let mut pipeline: AsyncPipeline<Value> = AsyncPipeline::new(Arc::new(resolver));
    pipeline
        .add::<AsyncProbe<A>>()
        .add_cancellable::<CancellableProbe<B>>()
        .add::<AsyncProbe<C>>();

    let token = CancellationToken::new();
    token.cancel();

    let result = pipeline.execute_with_cancellation(json!([]), token).await;
    assert!(matches!(result, Err(FlowError::Cancelled)));

    // The owned instances resolved so far were still released, in
    // reverse order; the step after the cancellation never ran.
    assert_eq!(
        log.entries(),
        vec![
            r#"a:run:[]"#.to_string(),
            r#"b:run:["a"]"#.to_string(),
            "b:cancelled".to_string(),
            "b:release".to_string(),
            "a:release".to_string(),
        ]
    );
}

#[tokio::test]
async fn plain_steps_never_observe_the_token() {
    let log = TraceLog::new();
    let mut resolver = FactoryResolver::new();
    register_async(&mut resolver, false, {
        let log = log.clone();
        move || AsyncProbe::<A>::forwarding("a", &log)
    });
    register_async(&mut resolver, false, {
        let log = log.clone();
        move || AsyncProbe::<B>::forwarding("b", &log)
    });

    let mut pipeline: AsyncPipeline<Value> = AsyncPipeline::new(Arc::new(resolver));
    pipeline.add::<AsyncProbe<A>>().add::<AsyncProbe<B>>();

    let token = CancellationToken::new();
    token.cancel();

    pipeline
        .execute_with_cancellation(json!([]), token)
        .await
        .expect("plain steps run to completion");

    assert_eq!(log.count_of("a:run"), 1);
    assert_eq!(log.count_of("b:run"), 1);
}

#[tokio::test]
async fn one_definition_executes_concurrently() {
    let log = TraceLog::new();
    let mut resolver = FactoryResolver::new();
    register_async(&mut resolver, false, {
        let log = log.clone();
        move || AsyncProbe::<A>::forwarding("a", &log)
    });
    register_async(&mut resolver, false, {
        let log = log.clone();
        move || AsyncProbe::<B>::forwarding("b", &log)
    });

    let mut pipeline: AsyncPipeline<Value> = AsyncPipeline::new(Arc::new(resolver));
    pipeline.add::<AsyncProbe<A>>().add::<AsyncProbe<B>>();
    let pipeline = Arc::new(pipeline);

    let (first, second) = tokio::join!(pipeline.execute(json!([])), pipeline.execute(json!([])));
    assert!(first.is_ok());
    assert!(second.is_ok());

    // Two full traversals, each with its own cursor.
    assert_eq!(log.count_of("a:run"), 2);
    assert_eq!(log.count_of("b:run"), 2);
}
