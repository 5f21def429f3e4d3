use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// A cancellable delayed callback.
///
/// The callback runs once `delay` elapses unless [`cancel`](Self::cancel)
/// is called first. Each timer carries the generation it was armed for so
/// the callback can tell whether it has been superseded.
#[derive(Debug)]
pub struct DebounceTimer {
    token: CancellationToken,
    generation: u64,
}

impl DebounceTimer {
    pub fn schedule<F>(delay: Duration, generation: u64, on_fire: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(delay) => on_fire.await,
            }
        });
        Self { token, generation }
    }

    /// Cancel this timer and arm a replacement.
    pub fn reschedule<F>(self, delay: Duration, generation: u64, on_fire: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        Self::schedule(delay, generation, on_fire)
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn bump(fired: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let fired = fired.clone();
        async move {
            fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = DebounceTimer::schedule(Duration::from_secs(10), 1, bump(&fired));
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.generation(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = DebounceTimer::schedule(Duration::from_secs(10), 1, bump(&fired));
        tokio::time::sleep(Duration::from_secs(5)).await;
        timer.cancel();
        assert!(timer.is_cancelled());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_restarts_the_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = DebounceTimer::schedule(Duration::from_secs(10), 1, bump(&fired));
        tokio::time::sleep(Duration::from_secs(8)).await;
        let timer = timer.reschedule(Duration::from_secs(10), 2, bump(&fired));
        tokio::time::sleep(Duration::from_secs(8)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.generation(), 2);
    }
}
