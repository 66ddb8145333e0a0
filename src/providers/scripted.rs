// src/providers/scripted.rs
//! In-process sources: a closure wrapper and a deterministic script player.
//! Used for tests, local runs and static "estimate" sources.

use std::collections::VecDeque;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::source::{RawResult, SourceOperation};

/// Wrap an async closure `Fn(&Req) -> Future<Output = Result<RawResult<T>, SourceError>>`.
/// The closure receives an owned clone of the request.
pub struct FnSource<F, Req, T> {
    f: F,
    _marker: PhantomData<fn(Req) -> T>,
}

impl<F, Req, T> FnSource<F, Req, T> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut, Req, T> SourceOperation<Req, T> for FnSource<F, Req, T>
where
    F: Fn(Req) -> Fut + Send + Sync,
    Fut: Future<Output = Result<RawResult<T>, SourceError>> + Send,
    Req: Clone + Send + Sync,
    T: Send,
{
    async fn call(&self, request: &Req) -> Result<RawResult<T>, SourceError> {
        (self.f)(request.clone()).await
    }
}

/// One scripted step.
#[derive(Debug, Clone)]
pub enum Step<T> {
    Ok(RawResult<T>),
    Err(SourceError),
    /// Sleep, then behave like the inner step (useful for timeouts).
    Delayed(Duration, Box<Step<T>>),
}

/// Replays a fixed script; once exhausted, repeats the last step.
/// Counts calls so tests can assert on attempt numbers.
pub struct ScriptedSource<T> {
    steps: Mutex<VecDeque<Step<T>>>,
    last: Mutex<Option<Step<T>>>,
    calls: Arc<AtomicU32>,
}

impl<T: Clone> ScriptedSource<T> {
    pub fn new(steps: Vec<Step<T>>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(None),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Always returns the same step.
    pub fn always(step: Step<T>) -> Self {
        Self::new(vec![step])
    }

    pub fn always_data(value: T) -> Self {
        Self::always(Step::Ok(RawResult::Data(value)))
    }

    pub fn always_text(text: impl Into<String>) -> Self {
        Self::always(Step::Ok(RawResult::Text(text.into())))
    }

    pub fn always_err(err: SourceError) -> Self {
        Self::always(Step::Err(err))
    }

    /// Shared call counter; keep a handle before moving the source into a resolver.
    pub fn call_counter(&self) -> Arc<AtomicU32> {
        self.calls.clone()
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Option<Step<T>> {
        let mut steps = self.steps.lock().unwrap_or_else(|e| e.into_inner());
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        match steps.pop_front() {
            Some(step) => {
                *last = Some(step.clone());
                Some(step)
            }
            None => last.clone(),
        }
    }
}

async fn play<T>(step: Step<T>) -> Result<RawResult<T>, SourceError> {
    let mut step = step;
    loop {
        match step {
            Step::Ok(raw) => return Ok(raw),
            Step::Err(e) => return Err(e),
            Step::Delayed(d, inner) => {
                tokio::time::sleep(d).await;
                step = *inner;
            }
        }
    }
}

#[async_trait]
impl<Req, T> SourceOperation<Req, T> for ScriptedSource<T>
where
    Req: Sync,
    T: Clone + Send + Sync,
{
    async fn call(&self, _request: &Req) -> Result<RawResult<T>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            Some(step) => play(step).await,
            None => Err(SourceError::terminal("empty script")),
        }
    }
}
