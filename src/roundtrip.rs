use futures_util::FutureExt;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, info};

use crate::{
    compare::{check_answer, check_schema},
    schema::{Dataset, Schema},
    warehouse::{Connection, ConnectorOptions, DataSession, SaveMode},
    Result, SnowcheckError,
};

/// Progress of a round trip, logged as each check passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundTripStage {
    Start,
    Written,
    ExistenceVerified,
    Reloaded,
    SchemaVerified,
    ContentVerified,
}

/// Everything a round trip needs besides the connection and session.
#[derive(Debug, Clone)]
pub struct RoundTrip<'a> {
    pub table: &'a str,
    pub source: &'a Dataset,
    /// Schema the reloaded table must have; the source schema when `None`.
    pub expected_schema: Option<&'a Schema>,
    pub mode: SaveMode,
    pub format: &'a str,
    pub options: &'a ConnectorOptions,
}

/// Write `source` to the table, read it back and compare schema and rows.
///
/// The table is dropped afterwards on every exit path, including a panic
/// inside the session or connection. When verification fails and the drop
/// fails as well, the drop error is returned with the verification failure
/// folded into its message, so a table left behind is never silent.
pub async fn round_trip<C, S>(conn: &mut C, session: &mut S, trip: RoundTrip<'_>) -> Result<()>
where
    C: Connection + ?Sized,
    S: DataSession + ?Sized,
{
    info!("→ Round trip through table {} ({})", trip.table, trip.mode);

    let outcome = AssertUnwindSafe(verify(&mut *conn, session, &trip))
        .catch_unwind()
        .await;
    let cleanup = drop_table_if_exists(conn, trip.table).await;

    match outcome {
        Ok(Ok(stage)) => {
            debug!(table = trip.table, ?stage, "round trip verified");
            cleanup
        }
        Ok(Err(err)) => match cleanup {
            Ok(()) => Err(err),
            Err(cleanup_err) => {
                error!(
                    "Failed to drop {} after a failed round trip: {}",
                    trip.table, cleanup_err
                );
                let detail = match cleanup_err {
                    SnowcheckError::Warehouse(message) => message,
                    other => other.to_string(),
                };
                Err(SnowcheckError::Warehouse(format!(
                    "{} (after failed round trip: {})",
                    detail, err
                )))
            }
        },
        Err(panic_payload) => {
            if let Err(cleanup_err) = cleanup {
                error!(
                    "Failed to drop {} after a panicking round trip: {}",
                    trip.table, cleanup_err
                );
            }
            panic::resume_unwind(panic_payload)
        }
    }
}

async fn verify<C, S>(conn: &mut C, session: &mut S, trip: &RoundTrip<'_>) -> Result<RoundTripStage>
where
    C: Connection + ?Sized,
    S: DataSession + ?Sized,
{
    let mut stage = RoundTripStage::Start;
    let options = trip.options.with_table(trip.table);

    session
        .write(trip.source, trip.format, &options, trip.mode)
        .await?;
    stage = advance(stage, RoundTripStage::Written, trip.table);

    if !conn.table_exists(trip.table).await? {
        return Err(SnowcheckError::Assertion(format!(
            "table {} does not exist after writing it",
            trip.table
        )));
    }
    stage = advance(stage, RoundTripStage::ExistenceVerified, trip.table);

    let loaded = session.read(trip.format, &options).await?;
    stage = advance(stage, RoundTripStage::Reloaded, trip.table);

    let expected_schema = trip.expected_schema.unwrap_or(&trip.source.schema);
    check_schema(&loaded.schema, expected_schema)?;
    stage = advance(stage, RoundTripStage::SchemaVerified, trip.table);

    check_answer(&loaded.rows, &trip.source.rows)?;
    Ok(advance(stage, RoundTripStage::ContentVerified, trip.table))
}

fn advance(from: RoundTripStage, to: RoundTripStage, table: &str) -> RoundTripStage {
    debug!(table, ?from, ?to, "round trip stage");
    to
}

pub async fn drop_table_if_exists<C>(conn: &mut C, table: &str) -> Result<()>
where
    C: Connection + ?Sized,
{
    conn.execute_update(&format!("drop table if exists {}", table))
        .await?;
    conn.commit().await
}
