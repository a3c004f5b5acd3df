/**
 * C1 — Graph Driver
 *
 * Tenant-isolated storage primitive underlying the entity graph (C2) and
 * relationship graph (C3). Nothing above this module ever opens a
 * connection directly; everyone calls through `GraphDriver::read`/`write`.
 */
mod driver;
mod rows;
mod schema;

pub use driver::GraphDriver;
pub use rows::{normalize_rows, sql_value_to_json, Row};
