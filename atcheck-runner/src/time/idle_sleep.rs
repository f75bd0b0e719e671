// Copyright (c) The atcheck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use pin_project_lite::pin_project;
use std::{future::Future, pin::Pin, task::Poll, time::Duration};
use tokio::time::{Instant, Sleep};

pub(crate) fn idle_sleep(window: Duration) -> IdleSleep {
    IdleSleep::new(window)
}

pin_project! {
    /// A wrapper around `tokio::time::Sleep` that models an idle deadline:
    /// it starts disarmed, can be (re)armed to fire `window` from now, and
    /// can be disarmed again without dropping the timer entry.
    ///
    /// While disarmed, polling returns `Pending` forever.
    #[derive(Debug)]
    pub(crate) struct IdleSleep {
        #[pin]
        sleep: Sleep,
        window: Duration,
        armed: bool,
    }
}

impl IdleSleep {
    fn new(window: Duration) -> Self {
        Self {
            sleep: tokio::time::sleep_until(far_future()),
            window,
            armed: false,
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed
    }

    /// Arms (or re-arms) the deadline to `window` from now.
    pub(crate) fn arm(self: Pin<&mut Self>) {
        let this = self.project();
        this.sleep.reset(Instant::now() + *this.window);
        *this.armed = true;
    }

    /// Disarms the deadline without firing it. A later `arm` starts a fresh
    /// window; the old deadline is forgotten.
    pub(crate) fn disarm(self: Pin<&mut Self>) {
        let this = self.project();
        this.sleep.reset(far_future());
        *this.armed = false;
    }
}

impl Future for IdleSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if *this.armed {
            this.sleep.poll(cx)
        } else {
            Poll::Pending
        }
    }
}

// Cribbed from tokio.
fn far_future() -> Instant {
    // Roughly 30 years from now.
    // API does not provide a way to obtain max `Instant`
    // or convert specific date in the future to instant.
    // 1000 years overflows on macOS, 100 years overflows on FreeBSD.
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::poll;
    use std::pin::pin;

    #[tokio::test(start_paused = true)]
    async fn disarmed_sleep_never_fires() {
        let mut sleep = pin!(idle_sleep(Duration::from_secs(30)));
        assert!(!sleep.is_armed());
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(poll!(sleep.as_mut()).is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_restarts_the_window() {
        let mut sleep = pin!(idle_sleep(Duration::from_secs(30)));
        sleep.as_mut().arm();

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(poll!(sleep.as_mut()).is_pending());

        // Re-arming at t=20 moves the deadline to t=50.
        sleep.as_mut().arm();
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(poll!(sleep.as_mut()).is_pending());
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(poll!(sleep.as_mut()).is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_cancels_a_pending_deadline() {
        let mut sleep = pin!(idle_sleep(Duration::from_secs(30)));
        sleep.as_mut().arm();
        tokio::time::advance(Duration::from_secs(29)).await;
        sleep.as_mut().disarm();
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(poll!(sleep.as_mut()).is_pending());
    }
}
