use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("trigger source refers to unknown register '{0}'")]
    UnknownField(String),
    #[error("register '{0}' is not an inbound register")]
    NotInbound(String),
    #[error("input bank trigger needs at least one threshold pin")]
    EmptyThresholdBank,
    #[error("clock rate must be non-zero")]
    ZeroClock,
    #[error("hold time must be at least one tick")]
    ZeroHoldTicks,
}
