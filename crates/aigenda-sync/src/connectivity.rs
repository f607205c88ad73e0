//! Connectivity monitor.
//!
//! Platform code reports online/offline transitions through a
//! [`ConnectivityHandle`]; the engine observes them through the cloneable
//! [`Connectivity`] reader. Dependencies are injected rather than bound to
//! ambient platform events so tests can substitute their own signal.

use tokio::sync::watch;

/// Create a linked handle/reader pair with the given initial state.
#[must_use]
pub fn connectivity_channel(initially_online: bool) -> (ConnectivityHandle, Connectivity) {
    let (tx, rx) = watch::channel(initially_online);
    (ConnectivityHandle { tx }, Connectivity { rx })
}

/// Writer half: owned by whatever integrates the platform's
/// online/offline signals.
pub struct ConnectivityHandle {
    tx: watch::Sender<bool>,
}

impl ConnectivityHandle {
    /// Report the current connectivity. Repeated reports of the same
    /// state are not observable as transitions.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Reader half held by the engine.
#[derive(Clone)]
pub struct Connectivity {
    rx: watch::Receiver<bool>,
}

impl Connectivity {
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the next transition and return the new state.
    ///
    /// Returns `None` once the handle is dropped; the last observed state
    /// then stays in effect.
    pub async fn changed(&mut self) -> Option<bool> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}
