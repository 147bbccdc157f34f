use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("peer rejected; latency too high")]
    RejectedHighLatency,

    #[error("peer rejected; insufficient capacity")]
    RejectedNoCapacity,

    #[error("probe function is required")]
    MissingProbe,

    #[error("connectedness function is required")]
    MissingConnectedness,
}
