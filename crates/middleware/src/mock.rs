//! Recording test doubles for every middleware contract.
//!
//! Useful in unit and integration tests where real middleware is either
//! unavailable or irrelevant. Probes append `"<name>:<event>"` entries
//! to a shared [`TraceLog`] so tests can assert execution order,
//! short-circuiting, cancellation, and release timing.
//!
//! Resolvers key on the step's concrete type, so each probe carries a
//! marker parameter: `PipelineProbe<A>` and `PipelineProbe<B>` are
//! distinct step types sharing one implementation. Payloads are
//! `serde_json::Value`s; forwarding probes append their name to the
//! payload array so every step sees what its predecessors produced.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::traits::{
    AsyncChainNext, AsyncFinally, AsyncHandler, AsyncMiddleware, AsyncNext,
    CancellableAsyncFinally, CancellableAsyncHandler, CancellableAsyncMiddleware, ChainNext,
    Finally, Handler, Middleware, Next, ReleaseMode,
};
use crate::FlowError;

// ---------------------------------------------------------------------------
// TraceLog
// ---------------------------------------------------------------------------

/// Shared, clonable trace of probe events (in call order).
#[derive(Clone, Default)]
pub struct TraceLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    /// All entries recorded so far.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Number of entries starting with `prefix`.
    pub fn count_of(&self, prefix: &str) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

// Forwarding probes pass the payload on with their own name appended.
fn annotate(name: &str, parameter: &Value) -> Value {
    let mut seen = parameter.as_array().cloned().unwrap_or_default();
    seen.push(json!(name));
    Value::Array(seen)
}

// ---------------------------------------------------------------------------
// Pipeline probes
// ---------------------------------------------------------------------------

/// What a pipeline probe does after recording its run.
#[derive(Clone)]
pub enum ProbeBehaviour {
    /// Annotate the payload with the probe's name and forward it.
    Forward,
    /// Return without forwarding, ending the flow early.
    Stop,
    /// Fail with a middleware error.
    Fail(String),
}

/// Blocking pipeline probe; `T` is a marker making each use a distinct
/// step type.
pub struct PipelineProbe<T> {
    name: &'static str,
    log: TraceLog,
    behaviour: ProbeBehaviour,
    release_mode: ReleaseMode,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PipelineProbe<T> {
    fn with(name: &'static str, log: &TraceLog, behaviour: ProbeBehaviour) -> Self {
        Self {
            name,
            log: log.clone(),
            behaviour,
            release_mode: ReleaseMode::Blocking,
            _marker: PhantomData,
        }
    }

    /// A probe that records its run and forwards.
    pub fn forwarding(name: &'static str, log: &TraceLog) -> Self {
        Self::with(name, log, ProbeBehaviour::Forward)
    }

    /// A probe that records its run and returns without forwarding.
    pub fn stopping(name: &'static str, log: &TraceLog) -> Self {
        Self::with(name, log, ProbeBehaviour::Stop)
    }

    /// A probe that fails with a middleware error.
    pub fn failing(name: &'static str, log: &TraceLog, message: &str) -> Self {
        Self::with(name, log, ProbeBehaviour::Fail(message.to_owned()))
    }

    /// Mark the probe's cleanup as requiring a suspending flow.
    pub fn suspending_release(mut self) -> Self {
        self.release_mode = ReleaseMode::Suspending;
        self
    }
}

impl<T: Send + Sync + 'static> Middleware<Value> for PipelineProbe<T> {
    fn run(&self, parameter: Value, next: Next<'_, Value>) -> Result<(), FlowError> {
        self.log.record(format!("{}:run:{}", self.name, parameter));
        match &self.behaviour {
            ProbeBehaviour::Forward => next.run(annotate(self.name, &parameter)),
            ProbeBehaviour::Stop => Ok(()),
            ProbeBehaviour::Fail(message) => Err(anyhow!("{message}").into()),
        }
    }

    fn release(&mut self) {
        self.log.record(format!("{}:release", self.name));
    }

    fn release_mode(&self) -> ReleaseMode {
        self.release_mode
    }
}

/// Suspending pipeline probe (plain contract — never sees the token).
pub struct AsyncProbe<T> {
    name: &'static str,
    log: TraceLog,
    behaviour: ProbeBehaviour,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AsyncProbe<T> {
    fn with(name: &'static str, log: &TraceLog, behaviour: ProbeBehaviour) -> Self {
        Self {
            name,
            log: log.clone(),
            behaviour,
            _marker: PhantomData,
        }
    }

    /// A probe that records its run and forwards.
    pub fn forwarding(name: &'static str, log: &TraceLog) -> Self {
        Self::with(name, log, ProbeBehaviour::Forward)
    }

    /// A probe that records its run and returns without forwarding.
    pub fn stopping(name: &'static str, log: &TraceLog) -> Self {
        Self::with(name, log, ProbeBehaviour::Stop)
    }

    /// A probe that fails with a middleware error.
    pub fn failing(name: &'static str, log: &TraceLog, message: &str) -> Self {
        Self::with(name, log, ProbeBehaviour::Fail(message.to_owned()))
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> AsyncMiddleware<Value> for AsyncProbe<T> {
    async fn run(&self, parameter: Value, next: AsyncNext<'_, Value>) -> Result<(), FlowError> {
        self.log.record(format!("{}:run:{}", self.name, parameter));
        match &self.behaviour {
            ProbeBehaviour::Forward => next.run(annotate(self.name, &parameter)).await,
            ProbeBehaviour::Stop => Ok(()),
            ProbeBehaviour::Fail(message) => Err(anyhow!("{message}").into()),
        }
    }

    async fn release(&mut self) {
        self.log.record(format!("{}:release", self.name));
    }
}

/// Suspending pipeline probe that observes the cancellation token
/// before deciding anything else.
pub struct CancellableProbe<T> {
    name: &'static str,
    log: TraceLog,
    behaviour: ProbeBehaviour,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CancellableProbe<T> {
    /// A probe that forwards unless the token is already cancelled.
    pub fn forwarding(name: &'static str, log: &TraceLog) -> Self {
        Self {
            name,
            log: log.clone(),
            behaviour: ProbeBehaviour::Forward,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> CancellableAsyncMiddleware<Value> for CancellableProbe<T> {
    async fn run(
        &self,
        parameter: Value,
        next: AsyncNext<'_, Value>,
        token: CancellationToken,
    ) -> Result<(), FlowError> {
        self.log.record(format!("{}:run:{}", self.name, parameter));
        if token.is_cancelled() {
            self.log.record(format!("{}:cancelled", self.name));
            return Err(FlowError::Cancelled);
        }
        match &self.behaviour {
            ProbeBehaviour::Forward => next.run(annotate(self.name, &parameter)).await,
            ProbeBehaviour::Stop => Ok(()),
            ProbeBehaviour::Fail(message) => Err(anyhow!("{message}").into()),
        }
    }

    async fn release(&mut self) {
        self.log.record(format!("{}:release", self.name));
    }
}

// ---------------------------------------------------------------------------
// Chain probes
// ---------------------------------------------------------------------------

/// What a chain probe does after recording its run.
#[derive(Clone)]
pub enum ChainBehaviour {
    /// Annotate the payload with the probe's name and forward it.
    Forward,
    /// Answer with the given value, short-circuiting the chain.
    Answer(Value),
    /// Fail with a middleware error.
    Fail(String),
}

/// Blocking chain probe over `Value -> Value`.
pub struct ChainProbe<T> {
    name: &'static str,
    log: TraceLog,
    behaviour: ChainBehaviour,
    release_mode: ReleaseMode,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ChainProbe<T> {
    fn with(name: &'static str, log: &TraceLog, behaviour: ChainBehaviour) -> Self {
        Self {
            name,
            log: log.clone(),
            behaviour,
            release_mode: ReleaseMode::Blocking,
            _marker: PhantomData,
        }
    }

    /// A handler that records its run and forwards.
    pub fn forwarding(name: &'static str, log: &TraceLog) -> Self {
        Self::with(name, log, ChainBehaviour::Forward)
    }

    /// A handler that answers with `answer`, short-circuiting the chain.
    pub fn answering(name: &'static str, log: &TraceLog, answer: Value) -> Self {
        Self::with(name, log, ChainBehaviour::Answer(answer))
    }

    /// A handler that fails with a middleware error.
    pub fn failing(name: &'static str, log: &TraceLog, message: &str) -> Self {
        Self::with(name, log, ChainBehaviour::Fail(message.to_owned()))
    }

    /// Mark the probe's cleanup as requiring a suspending flow.
    pub fn suspending_release(mut self) -> Self {
        self.release_mode = ReleaseMode::Suspending;
        self
    }
}

impl<T: Send + Sync + 'static> Handler<Value, Value> for ChainProbe<T> {
    fn run(&self, parameter: Value, next: ChainNext<'_, Value, Value>) -> Result<Value, FlowError> {
        self.log.record(format!("{}:run:{}", self.name, parameter));
        match &self.behaviour {
            ChainBehaviour::Forward => next.run(annotate(self.name, &parameter)),
            ChainBehaviour::Answer(answer) => Ok(answer.clone()),
            ChainBehaviour::Fail(message) => Err(anyhow!("{message}").into()),
        }
    }

    fn release(&mut self) {
        self.log.record(format!("{}:release", self.name));
    }

    fn release_mode(&self) -> ReleaseMode {
        self.release_mode
    }
}

/// Suspending chain probe (plain contract).
pub struct AsyncChainProbe<T> {
    name: &'static str,
    log: TraceLog,
    behaviour: ChainBehaviour,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AsyncChainProbe<T> {
    fn with(name: &'static str, log: &TraceLog, behaviour: ChainBehaviour) -> Self {
        Self {
            name,
            log: log.clone(),
            behaviour,
            _marker: PhantomData,
        }
    }

    /// A handler that records its run and forwards.
    pub fn forwarding(name: &'static str, log: &TraceLog) -> Self {
        Self::with(name, log, ChainBehaviour::Forward)
    }

    /// A handler that answers with `answer`, short-circuiting the chain.
    pub fn answering(name: &'static str, log: &TraceLog, answer: Value) -> Self {
        Self::with(name, log, ChainBehaviour::Answer(answer))
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> AsyncHandler<Value, Value> for AsyncChainProbe<T> {
    async fn run(
        &self,
        parameter: Value,
        next: AsyncChainNext<'_, Value, Value>,
    ) -> Result<Value, FlowError> {
        self.log.record(format!("{}:run:{}", self.name, parameter));
        match &self.behaviour {
            ChainBehaviour::Forward => next.run(annotate(self.name, &parameter)).await,
            ChainBehaviour::Answer(answer) => Ok(answer.clone()),
            ChainBehaviour::Fail(message) => Err(anyhow!("{message}").into()),
        }
    }

    async fn release(&mut self) {
        self.log.record(format!("{}:release", self.name));
    }
}

/// Suspending chain probe that observes the cancellation token before
/// deciding anything else.
pub struct CancellableChainProbe<T> {
    name: &'static str,
    log: TraceLog,
    behaviour: ChainBehaviour,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CancellableChainProbe<T> {
    /// A handler that forwards unless the token is already cancelled.
    pub fn forwarding(name: &'static str, log: &TraceLog) -> Self {
        Self {
            name,
            log: log.clone(),
            behaviour: ChainBehaviour::Forward,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> CancellableAsyncHandler<Value, Value> for CancellableChainProbe<T> {
    async fn run(
        &self,
        parameter: Value,
        next: AsyncChainNext<'_, Value, Value>,
        token: CancellationToken,
    ) -> Result<Value, FlowError> {
        self.log.record(format!("{}:run:{}", self.name, parameter));
        if token.is_cancelled() {
            self.log.record(format!("{}:cancelled", self.name));
            return Err(FlowError::Cancelled);
        }
        match &self.behaviour {
            ChainBehaviour::Forward => next.run(annotate(self.name, &parameter)).await,
            ChainBehaviour::Answer(answer) => Ok(answer.clone()),
            ChainBehaviour::Fail(message) => Err(anyhow!("{message}").into()),
        }
    }

    async fn release(&mut self) {
        self.log.record(format!("{}:release", self.name));
    }
}

// ---------------------------------------------------------------------------
// Fallback probes
// ---------------------------------------------------------------------------

/// Blocking chain fallback probe returning a fixed value.
pub struct FinallyProbe<T> {
    name: &'static str,
    log: TraceLog,
    result: Value,
    release_mode: ReleaseMode,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FinallyProbe<T> {
    /// A fallback that records its invocation and returns `result`.
    pub fn returning(name: &'static str, log: &TraceLog, result: Value) -> Self {
        Self {
            name,
            log: log.clone(),
            result,
            release_mode: ReleaseMode::Blocking,
            _marker: PhantomData,
        }
    }

    /// Mark the probe's cleanup as requiring a suspending flow.
    pub fn suspending_release(mut self) -> Self {
        self.release_mode = ReleaseMode::Suspending;
        self
    }
}

impl<T: Send + Sync + 'static> Finally<Value, Value> for FinallyProbe<T> {
    fn finally(&self, parameter: Value) -> Result<Value, FlowError> {
        self.log.record(format!("{}:finally:{}", self.name, parameter));
        Ok(self.result.clone())
    }

    fn release(&mut self) {
        self.log.record(format!("{}:release", self.name));
    }

    fn release_mode(&self) -> ReleaseMode {
        self.release_mode
    }
}

/// Suspending chain fallback probe (plain contract).
pub struct AsyncFinallyProbe<T> {
    name: &'static str,
    log: TraceLog,
    result: Value,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AsyncFinallyProbe<T> {
    /// A fallback that records its invocation and returns `result`.
    pub fn returning(name: &'static str, log: &TraceLog, result: Value) -> Self {
        Self {
            name,
            log: log.clone(),
            result,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> AsyncFinally<Value, Value> for AsyncFinallyProbe<T> {
    async fn finally(&self, parameter: Value) -> Result<Value, FlowError> {
        self.log.record(format!("{}:finally:{}", self.name, parameter));
        Ok(self.result.clone())
    }

    async fn release(&mut self) {
        self.log.record(format!("{}:release", self.name));
    }
}

/// Suspending chain fallback probe that observes the token.
pub struct CancellableFinallyProbe<T> {
    name: &'static str,
    log: TraceLog,
    result: Value,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CancellableFinallyProbe<T> {
    /// A fallback that returns `result` unless the token is cancelled.
    pub fn returning(name: &'static str, log: &TraceLog, result: Value) -> Self {
        Self {
            name,
            log: log.clone(),
            result,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> CancellableAsyncFinally<Value, Value> for CancellableFinallyProbe<T> {
    async fn finally(&self, parameter: Value, token: CancellationToken) -> Result<Value, FlowError> {
        self.log.record(format!("{}:finally:{}", self.name, parameter));
        if token.is_cancelled() {
            self.log.record(format!("{}:cancelled", self.name));
            return Err(FlowError::Cancelled);
        }
        Ok(self.result.clone())
    }

    async fn release(&mut self) {
        self.log.record(format!("{}:release", self.name));
    }
}
