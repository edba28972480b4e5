use thiserror::Error;

/// Errors raised while loading or validating the TOML config file.
/// Fatal at startup; the binary exits with code 1.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed config: {0}")]
    Malformed(#[from] toml::de::Error),
    #[error("missing environment variable referenced by config: {0}")]
    MissingEnv(String),
    #[error("config invariant violated: {0}")]
    InvariantViolation(String),
}

/// Errors from the venue client (C1). Distinguishes what the caller should
/// do: retry, stop, or give up on this operation only.
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("transient venue error: {0}")]
    Transient(String),
    #[error("venue auth failure: {0}")]
    Auth(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("rate limited")]
    RateLimited,
    #[error("fatal venue error: {0}")]
    Fatal(String),
}

impl VenueError {
    /// Whether the executor's retry loop should attempt this operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VenueError::Transient(_) | VenueError::RateLimited)
    }
}

/// Errors from the exposure ledger (C4). Any occurrence indicates a bug in
/// the reserve/commit/release protocol, not an external failure; the
/// orchestrator halts rather than attempting to continue with a possibly
/// inconsistent ledger.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("commit attempted without a prior reserve for token {0:?}")]
    CommitWithoutReserve(u64),
    #[error("double commit for token {0:?}")]
    DoubleCommit(u64),
    #[error("release of unknown reservation token {0:?}")]
    UnknownToken(u64),
    #[error("trade_id {0} already processed")]
    AlreadyProcessed(String),
}
