//! Persistence of acquisition records and the read side used by dashboards.
pub mod series;
pub mod storage;
