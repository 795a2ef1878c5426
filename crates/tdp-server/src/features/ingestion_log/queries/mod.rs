//! Ingestion log queries

pub mod get_entry;
pub mod list_entries;

pub use get_entry::{ExceptionItem, GetLogEntryError, GetLogEntryQuery, LogEntryDetails};
pub use list_entries::{
    ListLogEntriesError, ListLogEntriesQuery, ListLogEntriesResponse, LogEntryItem,
};
