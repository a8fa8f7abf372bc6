//! Data source implementations
//!
//! Read-only lookups over the list endpoints. Each module exposes `KIND`,
//! `schema()` and a type implementing [`ddprov_core::DataSource`];
//! [`crate::register`] wires them into a registry.

pub mod monitor;
pub mod security_rules;
pub mod user;

use ddprov_core::error::{Error, Result};

/// The only item of a lookup result
///
/// `what` names the search in the error ("monitor matching name cpu").
pub(crate) fn only<T>(mut items: Vec<T>, what: &str) -> Result<T> {
    match items.len() {
        0 => Err(Error::Other(format!(
            "your query returned no result for {}, please try a less specific search criteria",
            what
        ))),
        1 => Ok(items.remove(0)),
        n => Err(Error::Other(format!(
            "your query returned {} results for {}, please try a more specific search criteria",
            n, what
        ))),
    }
}
