//! Columnar event log storage (Arrow/Parquet)
//!
//! **Append-Only Design**:
//! - The event log is never updated in place; batches are only appended
//! - Write pattern: one `RecordBatch` per flushed group of events
//! - Use case: handing the log to the durable store, offline analysis,
//!   restoring aggregate counters after a restart
//!
//! ## Schema
//!
//! | column          | type                      | nullable |
//! |-----------------|---------------------------|----------|
//! | `experiment_id` | Utf8                      | no       |
//! | `variant_id`    | Utf8                      | no       |
//! | `session_key`   | Utf8                      | no       |
//! | `kind`          | Utf8                      | no       |
//! | `subtype`       | Utf8                      | yes      |
//! | `user_agent`    | Utf8                      | yes      |
//! | `referrer`      | Utf8                      | yes      |
//! | `timestamp`     | Timestamp(ms, "UTC")      | no       |

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::DateTime;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use tracing::debug;

use crate::experiment::{EventKind, EventMetadata, EventRecord};
use crate::{Error, Result};

/// Arrow schema of the event log.
#[must_use]
pub fn event_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("experiment_id", DataType::Utf8, false),
        Field::new("variant_id", DataType::Utf8, false),
        Field::new("session_key", DataType::Utf8, false),
        Field::new("kind", DataType::Utf8, false),
        Field::new("subtype", DataType::Utf8, true),
        Field::new("user_agent", DataType::Utf8, true),
        Field::new("referrer", DataType::Utf8, true),
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        ),
    ]))
}

/// Append-only columnar store of events.
#[derive(Debug, Default)]
pub struct EventStore {
    batches: Vec<RecordBatch>,
}

impl EventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `events` as a single batch.
    ///
    /// # Errors
    ///
    /// Returns error if the batch cannot be built.
    pub fn from_events(events: &[EventRecord]) -> Result<Self> {
        let mut store = Self::new();
        store.append_events(events)?;
        Ok(store)
    }

    /// Load an event log from a Parquet file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or its schema is not the
    /// event schema.
    pub fn load_parquet<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .map_err(|e| Error::StorageError(format!("Failed to open Parquet file: {e}")))?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

        let mut store = Self::new();
        for batch in reader {
            store.append_batch(batch?)?;
        }
        debug!(rows = store.num_rows(), "event log loaded from parquet");
        Ok(store)
    }

    /// Write every batch to a Parquet file (whole-file replace).
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created or written.
    pub fn write_parquet<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = ArrowWriter::try_new(file, event_schema(), None)?;
        for batch in &self.batches {
            writer.write(batch)?;
        }
        writer.close()?;
        debug!(rows = self.num_rows(), "event log written to parquet");
        Ok(())
    }

    /// All record batches.
    #[must_use]
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    /// Total number of events.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Append events as a new batch. Empty input appends nothing.
    ///
    /// # Errors
    ///
    /// Returns error if the batch cannot be built.
    pub fn append_events(&mut self, events: &[EventRecord]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let batch = events_to_batch(events)?;
        self.batches.push(batch);
        Ok(())
    }

    /// Append a pre-built batch.
    ///
    /// # Errors
    ///
    /// Returns error if the batch schema is not the event schema.
    pub fn append_batch(&mut self, batch: RecordBatch) -> Result<()> {
        let expected = event_schema();
        if batch.schema().fields() != expected.fields() {
            return Err(Error::StorageError(format!(
                "Schema mismatch: expected {:?}, got {:?}",
                expected,
                batch.schema()
            )));
        }
        self.batches.push(batch);
        Ok(())
    }

    /// Decode every stored event in append order.
    ///
    /// # Errors
    ///
    /// Returns error if a row holds an unknown kind or an invalid timestamp.
    pub fn events(&self) -> Result<Vec<EventRecord>> {
        let mut events = Vec::with_capacity(self.num_rows());
        for batch in &self.batches {
            events.extend(batch_to_events(batch)?);
        }
        Ok(events)
    }
}

/// Convert events into a record batch with [`event_schema`].
///
/// # Errors
///
/// Returns error if Arrow rejects the columns.
pub fn events_to_batch(events: &[EventRecord]) -> Result<RecordBatch> {
    let experiment_ids = StringArray::from_iter_values(events.iter().map(EventRecord::experiment_id));
    let variant_ids = StringArray::from_iter_values(events.iter().map(EventRecord::variant_id));
    let session_keys = StringArray::from_iter_values(events.iter().map(EventRecord::session_key));
    let kinds = StringArray::from_iter_values(events.iter().map(|e| e.kind().as_str()));
    let subtypes: StringArray = events.iter().map(EventRecord::subtype).collect();
    let user_agents: StringArray = events
        .iter()
        .map(|e| e.metadata().user_agent.as_deref())
        .collect();
    let referrers: StringArray = events
        .iter()
        .map(|e| e.metadata().referrer.as_deref())
        .collect();
    let timestamps = TimestampMillisecondArray::from(
        events
            .iter()
            .map(|e| e.timestamp().timestamp_millis())
            .collect::<Vec<i64>>(),
    )
    .with_timezone("UTC");

    Ok(RecordBatch::try_new(
        event_schema(),
        vec![
            Arc::new(experiment_ids),
            Arc::new(variant_ids),
            Arc::new(session_keys),
            Arc::new(kinds),
            Arc::new(subtypes),
            Arc::new(user_agents),
            Arc::new(referrers),
            Arc::new(timestamps),
        ],
    )?)
}

/// Decode a record batch produced by [`events_to_batch`].
///
/// # Errors
///
/// Returns error on missing/mistyped columns, unknown kinds or invalid
/// timestamps.
pub fn batch_to_events(batch: &RecordBatch) -> Result<Vec<EventRecord>> {
    let experiment_ids = string_column(batch, "experiment_id")?;
    let variant_ids = string_column(batch, "variant_id")?;
    let session_keys = string_column(batch, "session_key")?;
    let kinds = string_column(batch, "kind")?;
    let subtypes = string_column(batch, "subtype")?;
    let user_agents = string_column(batch, "user_agent")?;
    let referrers = string_column(batch, "referrer")?;
    let timestamps = batch
        .column_by_name("timestamp")
        .and_then(|c| c.as_any().downcast_ref::<TimestampMillisecondArray>())
        .ok_or_else(|| Error::StorageError("missing or mistyped column 'timestamp'".to_string()))?;

    (0..batch.num_rows())
        .map(|row| {
            let kind: EventKind = kinds.value(row).parse()?;
            let millis = timestamps.value(row);
            let timestamp = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
                Error::StorageError(format!("invalid timestamp {millis} at row {row}"))
            })?;
            Ok(EventRecord::builder(
                experiment_ids.value(row),
                variant_ids.value(row),
                session_keys.value(row),
                kind,
            )
            .subtype(optional(subtypes, row))
            .metadata(EventMetadata {
                user_agent: optional(user_agents, row),
                referrer: optional(referrers, row),
            })
            .timestamp(timestamp)
            .build())
        })
        .collect()
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| Error::StorageError(format!("missing or mistyped column '{name}'")))
}

fn optional(column: &StringArray, row: usize) -> Option<String> {
    (!column.is_null(row)).then(|| column.value(row).to_string())
}
