// Request-processing pipeline framework.
//
// A Pipeline is a named, ordered list of steps applied to one request.
// Steps run strictly serially; the first error stops the pipeline and is
// surfaced to the caller unchanged. Steps communicate through the typed
// request context: the original input, the in-progress new state, and a
// string-keyed bag for everything else.

pub mod steps;

use std::any::Any;
use std::collections::HashMap;

use async_trait::async_trait;

use stigmer_core::{ApiError, ApiResource, ResourceKind};

// Well-known bag keys.
pub mod keys {
    /// Previously persisted resource loaded by a Load* step
    pub const EXISTING: &str = "existing";
    /// Target id for Get/Delete/Subscribe style requests
    pub const TARGET_ID: &str = "target_id";
    /// Reference lookup input (slug, owner scope, org)
    pub const REFERENCE: &str = "reference";
    /// Set by LoadForApply: no resource occupies the slug slot yet
    pub const SHOULD_CREATE: &str = "should_create";
    /// Id of the default instance created/resolved for a template
    pub const DEFAULT_INSTANCE_ID: &str = "default_instance_id";
    /// Parent workflow loaded by LoadParentWorkflow
    pub const PARENT_WORKFLOW: &str = "parent_workflow";
    /// Incoming status payload for the update-status pipeline
    pub const STATUS_UPDATE: &str = "status_update";
}

/// String-keyed typed storage shared by the steps of one pipeline run.
#[derive(Default)]
pub struct Bag {
    values: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl Bag {
    pub fn set<T: Send + Sync + 'static>(&mut self, key: &'static str, value: T) {
        self.values.insert(key, Box::new(value));
    }

    pub fn get<T: 'static>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref())
    }

    pub fn take<T: 'static>(&mut self, key: &str) -> Option<T> {
        if !self.values.get(key)?.is::<T>() {
            return None;
        }
        self.values
            .remove(key)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

/// Context carried through one pipeline execution.
pub struct RequestContext<R: ApiResource> {
    kind: ResourceKind,
    /// Call made through a system-context method (CreateAsSystem)
    pub system_call: bool,
    input: R,
    new_state: R,
    pub bag: Bag,
}

impl<R: ApiResource> RequestContext<R> {
    pub fn new(input: R) -> Self {
        Self {
            kind: R::KIND,
            system_call: false,
            new_state: input.clone(),
            input,
            bag: Bag::default(),
        }
    }

    pub fn new_system(input: R) -> Self {
        let mut ctx = Self::new(input);
        ctx.system_call = true;
        ctx
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn input(&self) -> &R {
        &self.input
    }

    pub fn new_state(&self) -> &R {
        &self.new_state
    }

    pub fn new_state_mut(&mut self) -> &mut R {
        &mut self.new_state
    }

    pub fn set_new_state(&mut self, state: R) {
        self.new_state = state;
    }

    pub fn take_new_state(self) -> R {
        self.new_state
    }
}

/// One operation within a pipeline.
#[async_trait]
pub trait Step<R: ApiResource>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError>;
}

/// Named ordered list of steps.
pub struct Pipeline<R: ApiResource> {
    name: &'static str,
    steps: Vec<Box<dyn Step<R>>>,
}

impl<R: ApiResource> Pipeline<R> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: impl Step<R> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run every step in declared order; stop at the first error.
    pub async fn run(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        for step in &self.steps {
            tracing::trace!(pipeline = self.name, step = step.name(), "executing step");
            if let Err(err) = step.execute(ctx).await {
                tracing::debug!(
                    pipeline = self.name,
                    step = step.name(),
                    error = %err,
                    "pipeline step failed"
                );
                return Err(err);
            }
        }
        Ok(())
    }
}
