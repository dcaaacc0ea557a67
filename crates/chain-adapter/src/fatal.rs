//! Fatal-error channel.
//!
//! Components that fail outside the caller's control flow (the live consumer task, broker
//! connection callbacks) report here instead of exiting. The owner of the receiver decides how
//! to terminate, exactly once.

use crate::error::AdapterError;
use tokio::sync::mpsc;

/// Sending half; cheap to clone and callable from synchronous callbacks.
#[derive(Debug, Clone)]
pub struct FatalSignal {
    tx: mpsc::UnboundedSender<AdapterError>,
}

impl FatalSignal {
    pub fn report(&self, err: impl Into<AdapterError>) {
        let err = err.into();
        tracing::error!(reason = %err, "fatal error reported");
        // Receiver gone means shutdown is already under way.
        let _ = self.tx.send(err);
    }
}

#[derive(Debug)]
pub struct FatalReceiver {
    rx: mpsc::UnboundedReceiver<AdapterError>,
}

impl FatalReceiver {
    /// First reported fatal error. None if every signal was dropped without reporting.
    pub async fn recv(&mut self) -> Option<AdapterError> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<AdapterError> {
        self.rx.try_recv().ok()
    }
}

pub fn fatal_channel() -> (FatalSignal, FatalReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FatalSignal { tx }, FatalReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerError;

    #[tokio::test]
    async fn first_report_is_received() {
        let (signal, mut rx) = fatal_channel();
        let cloned = signal.clone();
        cloned.report(LedgerError::Closed);
        signal.report(AdapterError::AlreadyStarted);
        assert!(matches!(
            rx.recv().await,
            Some(AdapterError::Ledger(LedgerError::Closed))
        ));
        assert!(matches!(rx.try_recv(), Some(AdapterError::AlreadyStarted)));
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn recv_ends_when_all_signals_dropped() {
        let (signal, mut rx) = fatal_channel();
        drop(signal);
        assert!(rx.recv().await.is_none());
    }
}
