//! Entity bound for migratable records

use tandem_store::record::Record;

/// A record type that can flow through validation and repair
///
/// Comparison (`PartialEq`) is what detects divergent rows, so it must cover
/// every column the migration is expected to keep in sync.
pub trait Entity: Record + Clone + PartialEq + 'static {}

impl<T> Entity for T where T: Record + Clone + PartialEq + 'static {}
