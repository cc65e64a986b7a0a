//! Master data steps: location fixtures, lowest-level queries, imports and
//! upsert events.
//!
//! The location fixture is a small tree seeded straight into the database.
//! Each row carries whether the service should report it as a lowest-level
//! location, either written in the step's table or derived with
//! [`lowest_level`].

use super::{PRIMARY_DATABASE, World, await_event, call, common};
use crate::auth::Claims;
use crate::bus::decode_message;
use crate::context::StepContext;
use crate::ids;
use crate::registry::{DataTable, RegistryBuilder, RegistryError, StepArgs};
use crate::rpc::messages::{
    EventUpsertLocation, EventUpsertLocationType, IMPORT_LOCATION, ImportLocationRequest,
    ImportLocationResponse, Paging, RETRIEVE_LOWEST_LEVEL_LOCATIONS,
    RetrieveLowestLevelLocationsRequest, RetrieveLowestLevelLocationsResponse,
};
use crate::state::ScenarioState;
use anyhow::{Context as _, Result, bail, ensure};
use itertools::Itertools;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use time::OffsetDateTime;

/// Page size used when listing locations.
const PAGE_LIMIT: u32 = 100;

/// One seeded location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureLocation {
    /// Name as written in the feature.
    pub key: String,
    /// Generated primary key.
    pub location_id: String,
    /// Stored name: the key plus a run suffix.
    pub name: String,
    /// Key of the parent row.
    pub parent: Option<String>,
    /// Row is archived.
    pub archived: bool,
    /// Row should come back from a lowest-level query.
    pub expected: bool,
}

/// Locations seeded by the current scenario.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationFixture {
    /// Type shared by every seeded location.
    pub location_type_id: String,
    /// Rows, parents before children.
    pub locations: Vec<FixtureLocation>,
}

impl LocationFixture {
    /// Build a fixture from `(key, parent, archived, expected)` rows.
    ///
    /// A missing `expected` is derived with [`lowest_level`].
    ///
    /// # Errors
    ///
    /// Fails when a parent is not declared before its child or a key repeats.
    pub fn from_rows(rows: &[(String, Option<String>, bool, Option<bool>)]) -> Result<Self> {
        let suffix = ids::random_suffix();
        let mut locations: Vec<FixtureLocation> = Vec::with_capacity(rows.len());
        for (key, parent, archived, _) in rows {
            ensure!(
                locations.iter().all(|row| row.key != *key),
                "location '{key}' is declared twice"
            );
            if let Some(parent) = parent {
                ensure!(
                    locations.iter().any(|row| row.key == *parent),
                    "location '{key}' names parent '{parent}' before it is declared"
                );
            }
            locations.push(FixtureLocation {
                key: key.clone(),
                location_id: ids::new_id(),
                name: format!("{key} {suffix}"),
                parent: parent.clone(),
                archived: *archived,
                expected: false,
            });
        }
        let derived = lowest_level(&locations);
        for (row, (_, _, _, expected)) in locations.iter_mut().zip(rows) {
            row.expected = expected.unwrap_or_else(|| derived.contains(&row.key));
        }
        Ok(Self {
            location_type_id: ids::new_id(),
            locations,
        })
    }

    /// Parse a `name | parent | archived | expected` table.
    ///
    /// # Errors
    ///
    /// Fails on a missing `name` column, an unparsable flag, or a bad tree.
    pub fn from_table(table: &DataTable) -> Result<Self> {
        let flag = |raw: Option<&String>, column: &str| -> Result<Option<bool>> {
            raw.map(|text| text.trim())
                .filter(|text| !text.is_empty())
                .map(|text| {
                    text.parse::<bool>()
                        .with_context(|| format!("column {column}: '{text}' is not true or false"))
                })
                .transpose()
        };
        let mut rows = Vec::new();
        for record in table.records() {
            let key = record
                .get("name")
                .map(|name| name.trim().to_owned())
                .filter(|name| !name.is_empty())
                .context("every location row needs a name")?;
            let parent = record
                .get("parent")
                .map(|parent| parent.trim().to_owned())
                .filter(|parent| !parent.is_empty());
            let archived = flag(record.get("archived"), "archived")?.unwrap_or(false);
            let expected = flag(record.get("expected"), "expected")?;
            rows.push((key, parent, archived, expected));
        }
        Self::from_rows(&rows)
    }

    /// The default tree: an organisation with active, archived and nested
    /// branches.
    ///
    /// # Errors
    ///
    /// Never fails for the built-in rows; kept fallible to share
    /// [`Self::from_rows`].
    pub fn builtin() -> Result<Self> {
        let row = |key: &str, parent: Option<&str>, archived: bool| {
            (key.to_owned(), parent.map(str::to_owned), archived, None)
        };
        Self::from_rows(&[
            row("org", None, false),
            row("center-a", Some("org"), false),
            row("class-a1", Some("center-a"), false),
            row("class-a2", Some("center-a"), true),
            row("center-b", Some("org"), true),
            row("class-b1", Some("center-b"), false),
            row("center-c", Some("org"), false),
        ])
    }

    /// Slash-separated ids from the root down to `row`.
    #[must_use]
    pub fn access_path(&self, row: &FixtureLocation) -> String {
        let by_key: HashMap<&str, &FixtureLocation> = self
            .locations
            .iter()
            .map(|location| (location.key.as_str(), location))
            .collect();
        let mut chain = vec![row.location_id.as_str()];
        let mut cursor = row.parent.as_deref();
        while let Some(parent) = cursor.and_then(|key| by_key.get(key)) {
            chain.push(parent.location_id.as_str());
            cursor = parent.parent.as_deref();
        }
        chain.iter().rev().join("/")
    }

    /// Ids of the expected rows whose name contains `filter`, ignoring case.
    #[must_use]
    pub fn expected_ids(&self, filter: &str) -> BTreeSet<String> {
        let needle = filter.to_lowercase();
        self.locations
            .iter()
            .filter(|row| row.expected && row.name.to_lowercase().contains(&needle))
            .map(|row| row.location_id.clone())
            .collect()
    }

    fn parent_id(&self, row: &FixtureLocation) -> Option<&str> {
        let parent = row.parent.as_deref()?;
        self.locations
            .iter()
            .find(|location| location.key == parent)
            .map(|location| location.location_id.as_str())
    }
}

/// Keys of the lowest-level locations in `rows`.
///
/// A location is lowest-level when neither it nor any ancestor is archived
/// and it has no active child. Archived branches therefore never contribute,
/// even through their descendants.
#[must_use]
pub fn lowest_level(rows: &[FixtureLocation]) -> BTreeSet<String> {
    let by_key: HashMap<&str, &FixtureLocation> =
        rows.iter().map(|row| (row.key.as_str(), row)).collect();
    let is_active = |row: &FixtureLocation| {
        let mut cursor = Some(row);
        while let Some(current) = cursor {
            if current.archived {
                return false;
            }
            cursor = current.parent.as_deref().and_then(|key| by_key.get(key).copied());
        }
        true
    };
    let active: BTreeSet<&str> = rows
        .iter()
        .filter(|row| is_active(row))
        .map(|row| row.key.as_str())
        .collect();
    let with_active_child: BTreeSet<&str> = rows
        .iter()
        .filter(|row| active.contains(row.key.as_str()))
        .filter_map(|row| row.parent.as_deref())
        .collect();
    active
        .difference(&with_active_child)
        .map(|key| (*key).to_owned())
        .collect()
}

/// CSV payload waiting to be imported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ImportPayload(String);

/// Register the master data steps.
///
/// # Errors
///
/// Propagates pattern registration failures.
pub fn register(steps: &mut RegistryBuilder<World>) -> Result<(), RegistryError> {
    steps
        .step(r"^a list of locations are existed in DB$", builtin_locations)?
        .step(r"^these locations exist in DB:?$", table_locations)?
        .step(
            r#"^user retrieve lowest level of locations with filter "([^"]*)"$"#,
            retrieve_lowest_level,
        )?
        .step(
            r#"^must return lowest level of locations with filter "([^"]*)"$"#,
            must_return_lowest_level,
        )?
        .step(r"^a location import payload:?$", location_import_payload)?
        .step(r"^importing location$", importing_location)?
        .step(r"^returns (\d+) location failed$", returns_location_failed)?
        .step(
            r#"^Mastermgmt must push msg "([^"]*)" subject "([^"]*)" to nats(?: within "([^"]*)")?$"#,
            mastermgmt_must_push_msg,
        )?;
    Ok(())
}

async fn builtin_locations(world: Arc<World>, ctx: StepContext, _args: StepArgs) -> Result<StepContext> {
    seed(&world, ctx, LocationFixture::builtin()?).await
}

async fn table_locations(world: Arc<World>, ctx: StepContext, args: StepArgs) -> Result<StepContext> {
    let table = args.table().context("this step needs a data table")?;
    seed(&world, ctx, LocationFixture::from_table(table)?).await
}

async fn seed(world: &World, ctx: StepContext, fixture: LocationFixture) -> Result<StepContext> {
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let resource_path = match ctx.value::<Claims>() {
        Some(claims) => claims.resource_path.clone(),
        None => state
            .lock()
            .await
            .resource_path
            .clone()
            .unwrap_or_else(|| world.config().identity.resource_path.clone()),
    };
    let pool = world.database(PRIMARY_DATABASE)?;
    let now = OffsetDateTime::now_utc();
    let mut tx = pool.begin().await.context("begin location fixture")?;
    sqlx::query(
        "INSERT INTO location_types (location_type_id, name, display_name, resource_path, created_at, updated_at) \
         VALUES ($1, $2, $2, $3, $4, $4)",
    )
    .bind(&fixture.location_type_id)
    .bind(format!("bdd-type-{}", fixture.location_type_id))
    .bind(&resource_path)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("insert location type")?;
    for row in &fixture.locations {
        sqlx::query(
            "INSERT INTO locations (location_id, name, location_type, parent_location_id, is_archived, \
             access_path, resource_path, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)",
        )
        .bind(&row.location_id)
        .bind(&row.name)
        .bind(&fixture.location_type_id)
        .bind(fixture.parent_id(row))
        .bind(row.archived)
        .bind(fixture.access_path(row))
        .bind(&resource_path)
        .bind(now)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("insert location {}", row.key))?;
    }
    tx.commit().await.context("commit location fixture")?;
    tracing::debug!(locations = fixture.locations.len(), "location fixture seeded");

    let mut state = state.lock().await;
    state
        .location_ids
        .extend(fixture.locations.iter().map(|row| row.location_id.clone()));
    state.with_extension(|slot: &mut LocationFixture| *slot = fixture);
    Ok(ctx)
}

async fn retrieve_lowest_level(
    world: Arc<World>,
    ctx: StepContext,
    args: StepArgs,
) -> Result<StepContext> {
    let filter = args.string(0)?;
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let location_ids = state.lock().await.location_ids.clone();
    let request = RetrieveLowestLevelLocationsRequest {
        name: filter,
        paging: Some(Paging {
            limit: PAGE_LIMIT,
            offset: 0,
        }),
        location_ids,
    };
    call::<_, RetrieveLowestLevelLocationsResponse>(
        &world,
        &ctx,
        &state,
        RETRIEVE_LOWEST_LEVEL_LOCATIONS,
        request,
    )
    .await?;
    Ok(ctx)
}

async fn must_return_lowest_level(
    _world: Arc<World>,
    ctx: StepContext,
    args: StepArgs,
) -> Result<StepContext> {
    let filter = args.string(0)?;
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let state = state.lock().await;
    let actual: BTreeSet<String> = state
        .response::<RetrieveLowestLevelLocationsResponse>()?
        .locations
        .iter()
        .map(|location| location.location_id.clone())
        .collect();
    let expected = state
        .peek_extension::<LocationFixture>()
        .map(|fixture| fixture.expected_ids(&filter))
        .context("no locations were seeded in this scenario")?;
    compare_locations(&expected, &actual)?;
    Ok(ctx)
}

/// Fail unless `actual` holds exactly the `expected` ids.
///
/// # Errors
///
/// Describes the missing and unexpected ids.
pub fn compare_locations(expected: &BTreeSet<String>, actual: &BTreeSet<String>) -> Result<()> {
    let missing = expected.difference(actual).join(", ");
    let extra = actual.difference(expected).join(", ");
    ensure!(
        missing.is_empty() && extra.is_empty(),
        "lowest-level locations differ; missing [{missing}], unexpected [{extra}]"
    );
    Ok(())
}

async fn location_import_payload(
    _world: Arc<World>,
    ctx: StepContext,
    args: StepArgs,
) -> Result<StepContext> {
    let payload = args
        .doc_string()
        .context("this step needs a doc string with the CSV payload")?
        .to_owned();
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    state
        .lock()
        .await
        .with_extension(|slot: &mut ImportPayload| *slot = ImportPayload(payload));
    Ok(ctx)
}

async fn importing_location(world: Arc<World>, ctx: StepContext, _args: StepArgs) -> Result<StepContext> {
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let payload = state
        .lock()
        .await
        .peek_extension::<ImportPayload>()
        .map(|payload| payload.0.clone().into_bytes())
        .context("no import payload was prepared")?;
    call::<_, ImportLocationResponse>(
        &world,
        &ctx,
        &state,
        IMPORT_LOCATION,
        ImportLocationRequest { payload },
    )
    .await?;
    Ok(ctx)
}

async fn returns_location_failed(
    _world: Arc<World>,
    ctx: StepContext,
    args: StepArgs,
) -> Result<StepContext> {
    let expected: usize = args.parse(0)?;
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let state = state.lock().await;
    let errors = &state.response::<ImportLocationResponse>()?.errors;
    ensure!(
        errors.len() == expected,
        "expected {expected} failed row(s) but got {}: {}",
        errors.len(),
        errors
            .iter()
            .map(|err| format!("row {}: {}", err.row_number, err.error))
            .join("; ")
    );
    Ok(ctx)
}

async fn mastermgmt_must_push_msg(
    world: Arc<World>,
    ctx: StepContext,
    args: StepArgs,
) -> Result<StepContext> {
    let msg = args.string(0)?;
    let subject = args.string(1)?;
    let within = common::wait_override(&args, 2)?;
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let (location_ids, type_id, imported) = {
        let state = state.lock().await;
        let fixture = state.peek_extension::<LocationFixture>();
        (
            state.location_ids.iter().cloned().collect::<BTreeSet<_>>(),
            fixture.map(|fixture| fixture.location_type_id.clone()),
            state
                .peek_extension::<ImportPayload>()
                .map(|payload| payload.0.clone())
                .unwrap_or_default(),
        )
    };
    let names_imported = |name: &str| !name.is_empty() && imported.contains(name);
    match msg.trim() {
        "UpsertLocation" => {
            await_event(&world, &ctx, &state, &subject, within, |message| {
                decode_message::<EventUpsertLocation>(message).is_some_and(|event| {
                    event.locations.iter().any(|location| {
                        location_ids.contains(&location.location_id) || names_imported(&location.name)
                    })
                })
            })
            .await
        }
        "UpsertLocationType" => {
            await_event(&world, &ctx, &state, &subject, within, |message| {
                decode_message::<EventUpsertLocationType>(message).is_some_and(|event| {
                    event.location_types.iter().any(|location_type| {
                        type_id.as_deref() == Some(location_type.location_type_id.as_str())
                            || names_imported(&location_type.name)
                    })
                })
            })
            .await
        }
        other => bail!("unknown master data event '{other}'"),
    }
    .with_context(|| format!("waiting for {msg} on {subject}"))?;
    Ok(ctx)
}

#[cfg(test)]
#[path = "mastermgmt_tests.rs"]
mod tests;
