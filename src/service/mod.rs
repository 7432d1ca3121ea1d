//! Token lifecycle coordination.

mod refresh;

pub use refresh::{
    CoordinatorStatus, RefreshOutcome, SweepSummary, TokenRefreshCoordinator,
    DEFAULT_SWEEP_INTERVAL_MINUTES,
};
