use std::{
    future::Future,
    pin::Pin,
    task::{ready, Context, Poll},
};

use tokio::time::{sleep_until, Instant, Sleep};

/// What a driver does after one task activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Run again on the next poll (cooperative reschedule).
    Again,
    /// Sleep until the deadline.
    Sleep(Instant),
    /// Nothing to do until an input wakes the task.
    Wait,
    /// The input closed and nothing is left to emit.
    Done,
}

/// A one-shot timer that can be re-armed and cancelled.
///
/// The underlying [`Sleep`] is allocated on first use and reset afterwards.
#[derive(Debug, Default)]
pub(crate) struct Timer {
    /// We need the sleep to be pinned (`Sleep` is not `Unpin`)
    sleep: Option<Pin<Box<Sleep>>>,
    armed: bool,
}

impl Timer {
    /// Arms the timer to fire at `deadline`, replacing any earlier deadline.
    pub(crate) fn schedule_at(&mut self, deadline: Instant) {
        match self.sleep {
            Some(ref mut sleep) => sleep.as_mut().reset(deadline),
            None => self.sleep = Some(Box::pin(sleep_until(deadline))),
        }
        self.armed = true;
    }

    pub(crate) fn unschedule(&mut self) {
        self.armed = false;
    }

    pub(crate) fn scheduled(&self) -> bool {
        self.armed
    }

    /// Makes the timer match `deadline`: armed at it if some, unscheduled if none.
    pub(crate) fn sync(&mut self, deadline: Option<Instant>) {
        match deadline {
            Some(deadline) if self.deadline() != Some(deadline) => self.schedule_at(deadline),
            Some(_) => {}
            None => self.unschedule(),
        }
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        match self.sleep {
            Some(ref sleep) if self.armed => Some(sleep.deadline()),
            _ => None,
        }
    }

    /// Resolves once when an armed timer fires, leaving it unscheduled. An unscheduled timer is
    /// always pending and registers no wake-up.
    pub(crate) fn poll_fire(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        if !self.armed {
            return Poll::Pending;
        }

        let Some(ref mut sleep) = self.sleep else { return Poll::Pending };
        ready!(sleep.as_mut().poll(cx));
        self.armed = false;
        Poll::Ready(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::future::poll_fn;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_once_and_can_be_rearmed() {
        let mut timer = Timer::default();
        assert!(!timer.scheduled());

        let start = Instant::now();
        timer.schedule_at(start + Duration::from_millis(10));
        poll_fn(|cx| timer.poll_fire(cx)).await;
        assert_eq!(Instant::now(), start + Duration::from_millis(10));
        assert!(!timer.scheduled());

        timer.sync(Some(start + Duration::from_millis(30)));
        assert_eq!(timer.deadline(), Some(start + Duration::from_millis(30)));
        timer.sync(None);
        assert!(timer.deadline().is_none());
    }
}
