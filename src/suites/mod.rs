//! Service suites: the step table and lifecycle hooks for each service under
//! test.
//!
//! Every suite shares the [`World`] (configuration plus the process-wide
//! resource set) and the same scenario hooks; they differ only in which step
//! groups they register. The catalog is static, so listing or linting a
//! suite's steps never touches the network.

pub mod bob;
pub mod common;
pub mod mastermgmt;
pub mod usermgmt;
pub mod virtualclassroom;

use crate::auth::{
    AccountKind, AccountStore, Claims, IdentityClient, PgAccountStore, SignedIn, TokenIssuer,
    sign_in,
};
use crate::bus;
use crate::config::{ConfigError, SuiteConfig};
use crate::connections::Connections;
use crate::context::{SharedState, StepContext};
use crate::features::PlannedScenario;
use crate::registry::{RegistryBuilder, RegistryCell, RegistryError, StepRegistry};
use crate::rpc::{self, Method};
use crate::runner::{RunnerError, ScenarioHooks, ScenarioOutcome};
use crate::state::ScenarioState;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use itertools::Itertools;
use sqlx::PgPool;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Database holding users, lessons and locations.
pub const PRIMARY_DATABASE: &str = "bob";

/// Everything a step handler may reach besides its scenario state.
pub struct World {
    config: Arc<SuiteConfig>,
    connections: Connections,
    identity: Arc<dyn TokenIssuer>,
    accounts: Option<Arc<dyn AccountStore>>,
    root: Option<SignedIn>,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("connections", &self.connections)
            .field("accounts", &self.accounts.is_some())
            .field("root", &self.root.as_ref().map(|root| &root.user_id))
            .finish_non_exhaustive()
    }
}

impl World {
    /// Assemble a world from parts; used by tests and dry runs.
    #[must_use]
    pub fn new(
        config: SuiteConfig,
        connections: Connections,
        identity: Arc<dyn TokenIssuer>,
        accounts: Option<Arc<dyn AccountStore>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            connections,
            identity,
            accounts,
            root: None,
        }
    }

    /// Build the resource set for `config` and sign in the root account.
    ///
    /// The root account is skipped, with a warning, when no identity provider
    /// is configured.
    ///
    /// # Errors
    ///
    /// Fails when a resource cannot be created or the root sign-in fails.
    pub async fn boot(config: SuiteConfig) -> Result<Self> {
        let connections = Connections::connect(&config).await?;
        let exchange = connections.channel(&config.identity.exchange_service).ok();
        let identity = IdentityClient::new(
            config.identity.firebase_addr.clone(),
            config.identity.applicant.clone(),
            config.identity.school_id,
            exchange,
        );
        let accounts = connections
            .database(PRIMARY_DATABASE)
            .ok()
            .map(|pool| Arc::new(PgAccountStore::new(pool.clone())) as Arc<dyn AccountStore>);
        let mut world = Self::new(config, connections, Arc::new(identity), accounts);
        if world.config.identity.firebase_addr.is_empty() {
            tracing::warn!("no identity provider configured; scenarios start without a root account");
        } else {
            world.sign_in_root().await?;
        }
        Ok(world)
    }

    /// Seed a school admin and keep it as the root account.
    ///
    /// # Errors
    ///
    /// Fails when no account store is configured or sign-in fails.
    pub async fn sign_in_root(&mut self) -> Result<()> {
        let signed = self
            .sign_in(AccountKind::SchoolAdmin)
            .await
            .context("sign in root account")?;
        tracing::info!(user_id = %signed.user_id, "root account ready");
        self.root = Some(signed);
        Ok(())
    }

    /// Seed an account of `kind` in the configured school and issue its token.
    ///
    /// # Errors
    ///
    /// Fails when no account store is configured or sign-in fails.
    pub async fn sign_in(&self, kind: AccountKind) -> Result<SignedIn> {
        if kind.user_group().is_none() {
            return Ok(SignedIn::unauthenticated());
        }
        sign_in(
            self.accounts()?,
            self.identity.as_ref(),
            kind,
            self.config.identity.school_id,
            &self.config.identity.resource_path,
        )
        .await
    }

    /// Loaded configuration.
    #[must_use]
    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    /// Process-wide resources.
    #[must_use]
    pub const fn connections(&self) -> &Connections {
        &self.connections
    }

    /// Where seeded users are written.
    ///
    /// # Errors
    ///
    /// Fails when the primary database is not configured.
    pub fn accounts(&self) -> Result<&dyn AccountStore, ConfigError> {
        self.accounts.as_deref().ok_or_else(|| ConfigError::Missing {
            kind: "database",
            name: PRIMARY_DATABASE.to_owned(),
        })
    }

    /// Pool for the database called `name`.
    ///
    /// # Errors
    ///
    /// Fails when the database is not configured.
    pub fn database(&self, name: &str) -> Result<&PgPool, ConfigError> {
        self.connections.database(name)
    }

    /// Claims of the root account, when one signed in.
    #[must_use]
    pub fn root_claims(&self) -> Option<Claims> {
        self.root.as_ref().and_then(|root| {
            root.claims(
                self.config.identity.school_id,
                &self.config.identity.resource_path,
            )
        })
    }

    /// Close the resource set.
    pub async fn shutdown(&self) {
        self.connections.close().await;
    }
}

type Register = fn(&mut RegistryBuilder<World>) -> Result<(), RegistryError>;

/// A named service suite.
pub struct Suite {
    name: &'static str,
    description: &'static str,
    groups: &'static [Register],
    cell: &'static RegistryCell<World>,
}

impl fmt::Debug for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suite").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Suite {
    /// Service name used with `--service`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// One-line summary.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        self.description
    }

    /// Step table, compiled on first use and shared afterwards.
    ///
    /// # Errors
    ///
    /// Returns the registration error of the first build.
    pub fn registry(&self) -> Result<Arc<StepRegistry<World>>, RegistryError> {
        self.cell.get_or_build(|| {
            let mut builder = RegistryBuilder::new();
            for register in self.groups {
                register(&mut builder)?;
            }
            Ok(builder.build())
        })
    }
}

static BOB_STEPS: RegistryCell<World> = RegistryCell::new();
static MASTERMGMT_STEPS: RegistryCell<World> = RegistryCell::new();
static USERMGMT_STEPS: RegistryCell<World> = RegistryCell::new();
static VIRTUALCLASSROOM_STEPS: RegistryCell<World> = RegistryCell::new();

static SUITES: [Suite; 4] = [
    Suite {
        name: "bob",
        description: "core service: client versions, uploads and lesson events",
        groups: &[common::register as Register, bob::register],
        cell: &BOB_STEPS,
    },
    Suite {
        name: "mastermgmt",
        description: "master data: location fixtures, lowest-level queries and imports",
        groups: &[common::register as Register, mastermgmt::register],
        cell: &MASTERMGMT_STEPS,
    },
    Suite {
        name: "usermgmt",
        description: "user management: student and parent creation",
        groups: &[common::register as Register, usermgmt::register],
        cell: &USERMGMT_STEPS,
    },
    Suite {
        name: "virtualclassroom",
        description: "virtual classroom: stream publishing admission",
        groups: &[common::register as Register, virtualclassroom::register],
        cell: &VIRTUALCLASSROOM_STEPS,
    },
];

/// Every known suite.
#[must_use]
pub fn all() -> &'static [Suite] {
    &SUITES
}

/// Look a suite up by service name.
///
/// # Errors
///
/// Returns [`RunnerError::UnknownService`] listing the known names.
pub fn find(name: &str) -> Result<&'static Suite, RunnerError> {
    all()
        .iter()
        .find(|suite| suite.name == name.trim())
        .ok_or_else(|| RunnerError::UnknownService {
            name: name.to_owned(),
            available: all().iter().map(Suite::name).join(", "),
        })
}

/// Scenario lifecycle shared by every suite.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuiteHooks;

#[async_trait]
impl ScenarioHooks<World> for SuiteHooks {
    async fn before_scenario(
        &self,
        world: &Arc<World>,
        _scenario: &PlannedScenario,
        ctx: StepContext,
    ) -> Result<StepContext> {
        let (ctx, state) = ctx.ensure_state::<ScenarioState>();
        {
            let mut state = state.lock().await;
            state.current_school_id = Some(world.config.identity.school_id);
            state.resource_path = Some(world.config.identity.resource_path.clone());
        }
        let ctx = match world.root_claims() {
            Some(claims) => ctx.with_value(claims),
            None => ctx,
        };
        Ok(ctx.with_timeout(world.config.scenario.timeout()))
    }

    async fn after_scenario(
        &self,
        _world: &Arc<World>,
        _scenario: &PlannedScenario,
        ctx: &StepContext,
        _outcome: ScenarioOutcome,
    ) -> Result<()> {
        if !ctx.has_state::<ScenarioState>() {
            return Ok(());
        }
        let (subscriptions, waiters) = ctx.state::<ScenarioState>().lock().await.take_subscriptions();
        if !subscriptions.is_empty() || !waiters.is_empty() {
            tracing::debug!(
                subscriptions = subscriptions.len(),
                waiters = waiters.len(),
                "draining scenario subscriptions"
            );
        }
        bus::drain(subscriptions).await;
        for waiter in waiters {
            waiter.disarm().await;
        }
        Ok(())
    }
}

/// Send `request` as the signed-in user and capture the outcome in `state`.
///
/// Transport and service failures are recorded, not returned; only a
/// missing service configuration fails the step.
///
/// # Errors
///
/// Fails when `method.service` has no configured channel.
pub async fn call<Req, Resp>(
    world: &World,
    ctx: &StepContext,
    state: &SharedState<ScenarioState>,
    method: Method,
    request: Req,
) -> Result<()>
where
    Req: prost::Message + Clone + Send + Sync + 'static,
    Resp: prost::Message + Default + Send + Sync + 'static,
{
    let outcome = send::<Req, Resp>(world, ctx, state, method, request).await?;
    state.lock().await.record_outcome(outcome);
    Ok(())
}

/// Send `request` as the signed-in user and return the raw outcome.
///
/// The request is recorded in `state`; the outcome is left to the caller,
/// which lets race steps collect several outcomes at once.
///
/// # Errors
///
/// Fails when `method.service` has no configured channel.
pub async fn send<Req, Resp>(
    world: &World,
    ctx: &StepContext,
    state: &SharedState<ScenarioState>,
    method: Method,
    request: Req,
) -> Result<Result<Resp, tonic::Status>>
where
    Req: prost::Message + Clone + Send + Sync + 'static,
    Resp: prost::Message + Default + Send + Sync + 'static,
{
    let channel = world.connections.channel(method.service)?;
    let token = {
        let mut state = state.lock().await;
        state.record_request(request.clone());
        state.auth_token.clone()
    };
    let timeout = ctx.bounded(world.config.scenario.timeout());
    let outcome = match rpc::outgoing(request, token.as_deref(), timeout) {
        Ok(request) => rpc::unary::<Req, Resp>(channel, method, request).await,
        Err(status) => Err(status),
    };
    Ok(outcome)
}

/// Wait for a message on `subject` accepted by `accept`.
///
/// Consumes the waiter a `listening for messages on subject` step armed
/// before the triggering request. The window is `override_wait` when given,
/// else the configured event wait, and never extends past the scenario
/// deadline.
///
/// # Errors
///
/// Fails when no waiter was armed for `subject` or no accepted message
/// arrives in time.
pub async fn await_event<P>(
    world: &World,
    ctx: &StepContext,
    state: &SharedState<ScenarioState>,
    subject: &str,
    override_wait: Option<Duration>,
    accept: P,
) -> Result<()>
where
    P: FnMut(&bus::BusMessage) -> bool + Send,
{
    let mut waiter = state.lock().await.take_waiter(subject).with_context(|| {
        format!(
            "add `listening for messages on subject \"{subject}\"` before the step that publishes"
        )
    })?;
    let window = ctx.bounded(override_wait.unwrap_or_else(|| world.config.scenario.event_wait()));
    let result = waiter.wait_for(window, accept).await;
    waiter.disarm().await;
    result?;
    Ok(())
}

#[cfg(test)]
#[path = "suites_tests.rs"]
mod tests;
