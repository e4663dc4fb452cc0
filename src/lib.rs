//! Record store for the vaccination-by-municipality open dataset.
//!
//! Records live in memory as one ordered sequence mirrored to a JSON file.
//! Create and update copy only allow-listed field names from the caller's
//! input; a [`RefreshJob`] appends the entries of the current week from the
//! remote dataset each time the week changes.
//!
//! # Examples
//! ```
//! use datavaccin_lib::{RecordFilter, RecordStore};
//! use serde_json::json;
//!
//! let mut store = RecordStore::new();
//! let input = json!({
//!     "recordid": "r1",
//!     "commune_residence": "75056",
//!     "semaine_injection": "2022-10",
//!     "unexpected": "dropped",
//! });
//! let record = store.create(input.as_object().unwrap()).unwrap();
//! assert_eq!(record.fields.len(), 2);
//!
//! let filter = RecordFilter::municipality("75056").week("2022-10");
//! assert_eq!(store.filter(&filter).count(), 1);
//! ```

pub mod error;
pub mod filter;
pub mod record;
pub mod refresh;
#[cfg(feature = "remote")]
pub mod remote;
pub mod shared;
pub mod store;
pub mod week;

pub use error::{RefreshError, SourceError, StoreError, WeekParseError};
pub use filter::RecordFilter;
pub use record::{AllowList, Fields, Input, Record, DATASET_ID, VACCINATION_FIELDS};
pub use refresh::{refresh_week, DataSource, RefreshJob, RefreshOutcome};
#[cfg(feature = "remote")]
pub use remote::OpenDataSource;
pub use shared::{Meta, SharedStore};
pub use store::{AppendReport, DuplicatePolicy, RecordStore};
pub use week::WeekId;
