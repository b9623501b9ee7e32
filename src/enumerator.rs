//! Find out which source collections a run migrates.
use crate::error::{MigrateError, Result};
use crate::store::SourceDb;
use tracing::warn;

/// get names of collections to migrate from `source`.
///
/// When given `colls` is not None, it only returns collections in `colls` which exist in `source`.
/// Names are sorted, the order doesn't matter for migration but makes logs stable.
pub fn list_collections<S: SourceDb>(source: &S, colls: Option<&[String]>) -> Result<Vec<String>> {
    let mut names = source
        .list_collection_names()
        .map_err(|detail| MigrateError::SourceUnavailable {
            db: source.name().to_string(),
            detail,
        })?;
    names.sort();

    match colls {
        None => Ok(names),
        Some(colls) => {
            for missing in colls.iter().filter(|c| !names.contains(c)) {
                warn!(coll = %missing, db = source.name(), "Collection doesn't exist in source database, skip it");
            }
            Ok(names
                .into_iter()
                .filter(|name| colls.iter().any(|c| c == name))
                .collect())
        }
    }
}
