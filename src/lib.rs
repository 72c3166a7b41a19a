/// Copyright: Kyler Chin <kyler@catenarymaps.org>
/// Catenary Transit Initiatives
/// Removal of the attribution is not allowed, as covered under the AGPL license

pub mod config;
pub mod live_status;
pub mod models;
pub mod postgres_tools;
pub mod reconcile;
pub mod schema;
pub mod store;
