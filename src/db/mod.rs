//! Database module: row models and SQL repositories.
//!
//! - `model`: rows returned by queries and the inputs of upserts.
//! - `repo`: SQL-only functions over a shared `Pool`.
//!
//! The repository API is re-exported at `crate::db::*`.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{
    ApplicationRow, ApplicationUpsert, CandidateRow, CandidateUpsert, OrgCredentials,
    OrganizationRow, RoleRow, RoleUpsert,
};
