//! Page signals and the first-signal-wins settle race
//!
//! A backend forwards what happens inside a page (network went idle, the
//! renderer crashed, a script threw, something was logged at error level)
//! into a [`SignalSender`]. [`settle`] consumes those signals together with
//! the load operation and resolves exactly once: on the first terminal
//! signal. Dropping the [`Subscription`] detaches the backend's listeners so
//! nothing else is delivered after the race is decided.

use crate::{Error, Result};
use std::future::Future;
use tokio::sync::mpsc;

/// Something observed inside a page while it loads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSignal {
    /// No network activity for the settling window
    NetworkIdle,
    /// The page's renderer faulted (e.g. crashed)
    RuntimeFault(String),
    /// A script threw and nothing caught it
    UncaughtException(String),
    /// Console output at error severity
    ConsoleError(String),
}

impl PageSignal {
    pub fn is_fault(&self) -> bool {
        !matches!(self, PageSignal::NetworkIdle)
    }

    /// All three fault sources map to a single error category.
    pub fn into_error(self) -> Error {
        match self {
            PageSignal::NetworkIdle => Error::Other("network idle is not a fault".into()),
            PageSignal::RuntimeFault(msg) => Error::PageRuntimeFault(format!("page error: {}", msg)),
            PageSignal::UncaughtException(msg) => {
                Error::PageRuntimeFault(format!("uncaught exception: {}", msg))
            }
            PageSignal::ConsoleError(msg) => Error::PageRuntimeFault(format!("console error: {}", msg)),
        }
    }
}

pub type SignalSender = mpsc::UnboundedSender<PageSignal>;
pub type SignalReceiver = mpsc::UnboundedReceiver<PageSignal>;

pub fn channel() -> (SignalSender, SignalReceiver) {
    mpsc::unbounded_channel()
}

/// Keeps a backend's listeners attached; detaches them on drop.
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new<F>(detach: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// A subscription with nothing to detach.
    pub fn noop() -> Self {
        Self { detach: None }
    }

    pub fn detach(mut self) {
        self.run_detach();
    }

    fn run_detach(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

/// Drive `load` and wait for the page to settle.
///
/// Resolves `Ok` on the first [`PageSignal::NetworkIdle`], or with the error of
/// the first fault signal or of `load` itself, whichever comes first. Signals
/// arriving after that are never looked at. There is no timeout here; callers
/// bound the whole race.
pub async fn settle<F>(load: F, signals: &mut SignalReceiver) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::pin!(load);
    let mut loaded = false;

    loop {
        tokio::select! {
            res = &mut load, if !loaded => {
                res?;
                loaded = true;
            }
            signal = signals.recv() => {
                return match signal {
                    Some(signal) if signal.is_fault() => Err(signal.into_error()),
                    Some(_) => Ok(()),
                    None => Err(Error::Page("page event stream closed before the page settled".into())),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn idle_after_load_resolves_ok() {
        let (tx, mut rx) = channel();
        let load = async move {
            tx.send(PageSignal::NetworkIdle).unwrap();
            Ok(())
        };
        assert!(settle(load, &mut rx).await.is_ok());
    }

    #[tokio::test]
    async fn first_fault_wins() {
        let (tx, mut rx) = channel();
        tx.send(PageSignal::ConsoleError("first".into())).unwrap();
        tx.send(PageSignal::UncaughtException("second".into())).unwrap();
        tx.send(PageSignal::NetworkIdle).unwrap();

        let err = settle(async { Ok(()) }, &mut rx).await.unwrap_err();
        match err {
            Error::PageRuntimeFault(msg) => assert!(msg.contains("first"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn load_failure_is_reported() {
        let (_tx, mut rx) = channel();
        let err = settle(async { Err(Error::Page("navigation failed".into())) }, &mut rx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Page(_)));
    }

    #[tokio::test]
    async fn fault_during_slow_load_resolves_early() {
        let (tx, mut rx) = channel();
        let load = async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        };
        tx.send(PageSignal::RuntimeFault("crashed".into())).unwrap();
        let err = tokio::time::timeout(Duration::from_secs(5), settle(load, &mut rx))
            .await
            .expect("settle should not wait for the load")
            .unwrap_err();
        assert!(matches!(err, Error::PageRuntimeFault(_)));
    }

    #[tokio::test]
    async fn closed_stream_is_an_error() {
        let (tx, mut rx) = channel();
        drop(tx);
        assert!(settle(async { Ok(()) }, &mut rx).await.is_err());
    }

    #[test]
    fn subscription_detaches_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = Subscription::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        sub.detach();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let c = count.clone();
        drop(Subscription::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
