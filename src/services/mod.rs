// Warehouse session core
pub mod packing;
pub mod picking;
pub mod sessions;

// Stock ledger primitive (all stock mutations funnel through it)
pub mod stock;

// Maintenance
pub mod reaper;
