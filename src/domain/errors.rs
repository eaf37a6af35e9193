use thiserror::Error;

/// Of the five error taxa an engine tick can produce (§7), only a programmer
/// fault is modeled as a variant here. The other four — input absent,
/// transient I/O, invariant violation, budget exceeded — are all specified
/// as non-fatal by their own definition ("never fatal", "degrade to
/// fallback", "return neutral with flag"), so each engine models them
/// directly as `Ok(None)`, a deterministic fallback value, or a neutral
/// value with a flag, never as an `Err`. `Fault` is the only variant a tick
/// driver does not swallow, and even that is caught at the per-symbol tick
/// boundary and logged rather than unwinding the scheduler.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("programmer fault: {0}")]
    Fault(#[from] anyhow::Error),
}

impl EngineError {
    /// Whether a tick driver should swallow this error (log + skip) rather
    /// than let it propagate. Always `false` today since `Fault` is the only
    /// variant, kept so a future recoverable variant doesn't have to touch
    /// every call site that checks this.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EngineError::Fault(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_is_not_recoverable() {
        let err = EngineError::Fault(anyhow::anyhow!("bug"));
        assert!(!err.is_recoverable());
    }
}
