use std::sync::Arc;
use tokio::sync::watch;

/// A one-way flag every task of a process can check or wait on.
#[derive(Clone)]
pub struct Flag(Arc<watch::Sender<bool>>);

impl Flag {
    pub fn new(value: bool) -> Self {
        let (sender, _) = watch::channel(value);
        Self(Arc::new(sender))
    }

    pub fn is_raised(&self) -> bool {
        *self.0.borrow()
    }

    pub fn raise(&self) {
        self.0.send_replace(true);
    }

    /// Resolves once the flag has been raised, immediately if it already is.
    pub async fn raised(&self) {
        let mut receiver = self.0.subscribe();
        let _ = receiver.wait_for(|raised| *raised).await;
    }
}
