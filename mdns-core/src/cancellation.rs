use tokio::sync::watch;

/// The "off-switch" shared by a scope of cooperating state machines
/// (RFC invariant: stopping a scope tears down every descendant within one
/// tick). Cloning an [`OffSwitch`] gives a new listener on the same switch;
/// flipping it from any clone stops every descendant.
#[derive(Clone)]
pub struct OffSwitch {
    tx: watch::Sender<bool>,
}

/// A listener handed to a single state machine. Dropping it detaches from
/// the switch without affecting siblings.
#[derive(Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl OffSwitch {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn listener(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Idempotent: flipping an already-stopped switch is a no-op.
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for OffSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves as soon as the switch is flipped; resolves immediately if it
    /// already has been.
    pub async fn stopped(&mut self) {
        if self.is_stopped() {
            return;
        }
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_is_idempotent_and_visible_to_every_listener() {
        let switch = OffSwitch::new();
        let mut a = switch.listener();
        let mut b = switch.listener();
        assert!(!a.is_stopped());
        switch.stop();
        switch.stop();
        a.stopped().await;
        b.stopped().await;
        assert!(a.is_stopped());
        assert!(b.is_stopped());
    }
}
