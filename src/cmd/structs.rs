//! JSON mirrors of the small slice of `helm ... -o json` output this crate
//! actually parses.

use serde_derive::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct HelmHistoryRow {
    pub revision: u32,
    pub status: String,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelmStatusRow {
    pub name: String,
    pub namespace: String,
    pub revision: String,
    pub status: String,
    pub description: String,
}
