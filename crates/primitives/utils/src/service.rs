//! Service trait, cancellation context and service groups.
//!
//! Every long-running component of the keeper (log polling, resync, report
//! coordination, head tracking) is a [Service]. Services spawn their tasks
//! onto a shared [JoinSet] and are stopped through the [ServiceContext]
//! they were started with.

use anyhow::Context;
use std::future::Future;
use std::panic;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Cancellation context associated to a [Service].
///
/// # Scope
///
/// Services are said to be in the same _local scope_ if they inherit the same
/// `token_local` cancellation token, which happens when they are started
/// with a context created by [ServiceContext::child]. A service can cancel
/// its local scope without affecting the rest of the process.
///
/// All contexts which descend from the same root share the same _global
/// scope_: [ServiceContext::cancel_global] stops every one of them.
#[derive(Default, Clone)]
pub struct ServiceContext {
    token_global: CancellationToken,
    token_local: Option<CancellationToken>,
}

impl ServiceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops all services under the same global context scope.
    pub fn cancel_global(&self) {
        tracing::info!("🔌 Gracefully shutting down keeper");
        self.token_global.cancel();
    }

    /// Stops all services under the same local context scope.
    pub fn cancel_local(&self) {
        self.token_local.as_ref().unwrap_or(&self.token_global).cancel();
    }

    /// Completes once this context is cancelled, locally or globally.
    pub async fn cancelled(&self) {
        match &self.token_local {
            Some(token_local) => {
                tokio::select! {
                    _ = self.token_global.cancelled() => {},
                    _ = token_local.cancelled() => {}
                }
            }
            None => self.token_global.cancelled().await,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token_global.is_cancelled() || self.token_local.as_ref().map(|t| t.is_cancelled()).unwrap_or(false)
    }

    /// Runs a future until it completes or the context is cancelled.
    ///
    /// The future must be cancel-safe: it may be dropped at any await point.
    ///
    /// # Returns
    ///
    /// The output of the future wrapped in [Some], or [None] if the context
    /// was cancelled first.
    pub async fn run_until_cancelled<T, F>(&self, f: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            res = f => Some(res),
            _ = self.cancelled() => None
        }
    }

    /// Copies the context into a new local scope.
    ///
    /// Any service which uses this new context will be able to cancel the
    /// services in the same local scope as itself, and any further child
    /// services, without affecting the rest of the global scope.
    pub fn child(&self) -> Self {
        let token_local = self.token_local.as_ref().unwrap_or(&self.token_global).child_token();
        Self { token_global: self.token_global.clone(), token_local: Some(token_local) }
    }
}

/// The keeper is divided into services, each with a single responsibility.
#[async_trait::async_trait]
pub trait Service: 'static + Send + Sync {
    /// Default impl does not start any task.
    async fn start(&mut self, _join_set: &mut JoinSet<anyhow::Result<()>>, _ctx: ServiceContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn start_and_drive_to_end(mut self, ctx: ServiceContext) -> anyhow::Result<()>
    where
        Self: Sized,
    {
        let mut join_set = JoinSet::new();
        self.start(&mut join_set, ctx).await.context("Starting service")?;
        drive_joinset(join_set).await
    }
}

/// A set of services started together, each in its own child scope.
#[derive(Default)]
pub struct ServiceGroup {
    services: Vec<Box<dyn Service>>,
    join_set: Option<JoinSet<anyhow::Result<()>>>,
}

impl ServiceGroup {
    pub fn new(services: Vec<Box<dyn Service>>) -> Self {
        Self { services, join_set: Some(Default::default()) }
    }

    /// Add a new service to the service group.
    pub fn push(&mut self, value: impl Service) -> anyhow::Result<()> {
        if self.join_set.is_none() && !self.services.is_empty() {
            anyhow::bail!("Cannot add services to a group that has been started.")
        }
        self.join_set.get_or_insert_with(Default::default);
        self.services.push(Box::new(value));
        Ok(())
    }

    pub fn with(mut self, value: impl Service) -> anyhow::Result<Self> {
        self.push(value)?;
        Ok(self)
    }
}

#[async_trait::async_trait]
impl Service for ServiceGroup {
    async fn start(&mut self, join_set: &mut JoinSet<anyhow::Result<()>>, ctx: ServiceContext) -> anyhow::Result<()> {
        // drive the join set as a nested task
        let mut own_join_set = self.join_set.take().context("Service group has already been started")?;
        for svc in self.services.iter_mut() {
            svc.start(&mut own_join_set, ctx.child()).await.context("Starting service")?;
        }

        join_set.spawn(drive_joinset(own_join_set));
        Ok(())
    }
}

async fn drive_joinset(mut join_set: JoinSet<anyhow::Result<()>>) -> anyhow::Result<()> {
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(result) => result?,
            Err(panic_error) if panic_error.is_panic() => {
                // bubble up panics too
                panic::resume_unwind(panic_error.into_panic());
            }
            Err(_task_cancelled_error) => {}
        }
    }

    Ok(())
}

/// Completes on `SIGINT` or `SIGTERM`.
pub async fn shutdown_signal() {
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => signal.recv().await,
            // SIGTERM not supported
            Err(_) => core::future::pending().await,
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm => {},
    };
}
