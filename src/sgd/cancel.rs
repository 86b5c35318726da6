//! Cooperative cancellation of fits.

use tokio::sync::watch;

#[derive(Debug)]
/// The handle cancelling a fit.
pub struct Canceller(watch::Sender<bool>);

#[derive(Debug, Clone)]
/// The signal a fit checks at each epoch boundary.
pub struct Cancellation(watch::Receiver<bool>);

/// Creates a connected cancellation pair.
pub fn cancellation() -> (Canceller, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (Canceller(tx), Cancellation(rx))
}

impl Canceller {
    /// Requests all fits holding a corresponding [`Cancellation`] to stop.
    pub fn cancel(&self) {
        // nobody listens anymore if this fails
        let _ = self.0.send(true);
    }
}

impl Cancellation {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}
