//! Ingest exception queries

pub mod list_exceptions;

pub use list_exceptions::{
    ExceptionListItem, ListExceptionsError, ListExceptionsQuery, ListExceptionsResponse,
};
