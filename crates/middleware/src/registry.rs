//! `FactoryResolver` — a registry of factory closures, the library's
//! stand-in for a dependency-injection container.
//!
//! Registration captures how to construct a step instance under a given
//! resolved form; resolution runs the factory afresh on every call, so
//! a step type configured twice in one flow yields two instances.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use tracing::debug;

use crate::resolve::{Resolved, Resolver, StepType};
use crate::ResolveError;

type AnyFactory = Box<dyn Any + Send + Sync>;
type Factory<S> = Box<dyn Fn() -> Resolved<S> + Send + Sync>;

/// Maps step types to the factories that construct their instances.
///
/// Keyed twice: by the concrete step type, then by the resolved form a
/// flow asks for — one step type may be registered under several
/// contracts (say, as both a pipeline and a chain step).
#[derive(Default)]
pub struct FactoryResolver {
    factories: HashMap<TypeId, HashMap<TypeId, AnyFactory>>,
}

impl FactoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory producing `step` instances in the resolved
    /// form `S`. Registering the same step and form again replaces the
    /// earlier factory.
    pub fn register<S: 'static>(
        &mut self,
        step: StepType,
        factory: impl Fn() -> Resolved<S> + Send + Sync + 'static,
    ) -> &mut Self {
        debug!(step = step.name(), "registering middleware factory");
        let boxed: Factory<S> = Box::new(factory);
        self.factories
            .entry(step.id())
            .or_default()
            .insert(TypeId::of::<S>(), Box::new(boxed));
        self
    }
}

impl<S: 'static> Resolver<S> for FactoryResolver {
    fn resolve(&self, step: &StepType) -> Result<Resolved<S>, ResolveError> {
        let forms = self
            .factories
            .get(&step.id())
            .ok_or_else(|| ResolveError::Unregistered {
                step: step.name().to_owned(),
            })?;
        let factory = forms
            .get(&TypeId::of::<S>())
            .and_then(|f| f.downcast_ref::<Factory<S>>())
            .ok_or_else(|| ResolveError::WrongContract {
                resolver: Resolver::<S>::name(self).to_owned(),
                step: step.name().to_owned(),
            })?;
        Ok(factory())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::Value;

    use super::*;
    use crate::mock::{PipelineProbe, TraceLog};
    use crate::traits::{Handler, Middleware};

    struct A;

    #[test]
    fn resolves_a_fresh_instance_per_call() {
        let log = TraceLog::new();
        let built = Arc::new(AtomicUsize::new(0));
        let step = StepType::middleware::<PipelineProbe<A>, Value>();

        let mut resolver = FactoryResolver::new();
        resolver.register(step, {
            let (log, built) = (log.clone(), built.clone());
            move || {
                built.fetch_add(1, Ordering::SeqCst);
                let probe: Box<dyn Middleware<Value>> =
                    Box::new(PipelineProbe::<A>::forwarding("a", &log));
                Resolved::external(probe)
            }
        });

        let first: Result<Resolved<Box<dyn Middleware<Value>>>, _> = resolver.resolve(&step);
        let second: Result<Resolved<Box<dyn Middleware<Value>>>, _> = resolver.resolve(&step);
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unregistered_step_type_is_reported() {
        let resolver = FactoryResolver::new();
        let step = StepType::middleware::<PipelineProbe<A>, Value>();

        let result: Result<Resolved<Box<dyn Middleware<Value>>>, _> = resolver.resolve(&step);
        assert!(matches!(result, Err(ResolveError::Unregistered { .. })));
    }

    #[test]
    fn known_step_type_under_wrong_contract_is_reported() {
        let log = TraceLog::new();
        let step = StepType::middleware::<PipelineProbe<A>, Value>();

        let mut resolver = FactoryResolver::new();
        resolver.register(step, {
            let log = log.clone();
            move || {
                let probe: Box<dyn Middleware<Value>> =
                    Box::new(PipelineProbe::<A>::forwarding("a", &log));
                Resolved::external(probe)
            }
        });

        // The step is registered, but not as a chain handler.
        let result: Result<Resolved<Box<dyn Handler<Value, Value>>>, _> = resolver.resolve(&step);
        assert!(matches!(result, Err(ResolveError::WrongContract { .. })));
    }
}
