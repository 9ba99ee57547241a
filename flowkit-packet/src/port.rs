use std::{
    collections::VecDeque,
    fmt,
    task::{Context, Poll},
};

use tokio::sync::mpsc;
use tracing::trace;

use crate::Packet;

/// A push port: the receiving side of a packet hand-off. Pushing never fails; a sink that cannot
/// accept the packet drops it.
pub trait Push {
    /// Hands `packet` to this sink.
    fn push(&mut self, packet: Packet);
}

impl Push for Vec<Packet> {
    fn push(&mut self, packet: Packet) {
        Vec::push(self, packet);
    }
}

impl Push for VecDeque<Packet> {
    fn push(&mut self, packet: Packet) {
        self.push_back(packet);
    }
}

impl Push for mpsc::UnboundedSender<Packet> {
    fn push(&mut self, packet: Packet) {
        if self.send(packet).is_err() {
            trace!("receiver closed, dropping packet");
        }
    }
}

impl Push for mpsc::Sender<Packet> {
    fn push(&mut self, packet: Packet) {
        if let Err(e) = self.try_send(packet) {
            trace!("dropping packet: {e}");
        }
    }
}

impl<P: Push + ?Sized> Push for Box<P> {
    fn push(&mut self, packet: Packet) {
        (**self).push(packet);
    }
}

impl<P: Push + ?Sized> Push for &mut P {
    fn push(&mut self, packet: Packet) {
        (**self).push(packet);
    }
}

/// A sink that drops every packet.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl Push for Discard {
    fn push(&mut self, _packet: Packet) {}
}

/// Adapts a closure into a [`Push`] sink.
pub struct PushFn<F>(pub F);

impl<F> fmt::Debug for PushFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushFn").finish_non_exhaustive()
    }
}

impl<F: FnMut(Packet)> Push for PushFn<F> {
    fn push(&mut self, packet: Packet) {
        (self.0)(packet);
    }
}

/// A boxed, sendable push port.
pub type BoxPush = Box<dyn Push + Send>;

/// A fixed number of output ports, each of which may be left unconnected.
#[derive(Default)]
pub struct Outputs {
    ports: Vec<Option<BoxPush>>,
}

impl fmt::Debug for Outputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.ports.iter().map(Option::is_some)).finish()
    }
}

impl Outputs {
    /// Creates `n` unconnected output ports.
    pub fn new(n: usize) -> Self {
        Self { ports: (0..n).map(|_| None).collect() }
    }

    /// Connects port `port` to `sink`. Ports past the end are ignored.
    pub fn connect(mut self, port: usize, sink: impl Push + Send + 'static) -> Self {
        self.set(port, Some(Box::new(sink)));
        self
    }

    /// Connects or disconnects port `port`.
    pub fn set(&mut self, port: usize, sink: Option<BoxPush>) {
        if let Some(slot) = self.ports.get_mut(port) {
            *slot = sink;
        }
    }

    /// Returns the number of output ports.
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// Returns true if there are no output ports.
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Returns true if port `port` exists and is connected.
    pub fn is_connected(&self, port: usize) -> bool {
        matches!(self.ports.get(port), Some(Some(_)))
    }

    /// Pushes `packet` on port `port`, or drops it if the port does not exist or is unconnected.
    /// Returns true if the packet was handed to a sink.
    pub fn checked_push(&mut self, port: usize, packet: Packet) -> bool {
        match self.ports.get_mut(port) {
            Some(Some(sink)) => {
                sink.push(packet);
                true
            }
            _ => {
                trace!(port, len = packet.len(), "output unconnected, dropping packet");
                false
            }
        }
    }
}

/// A pull port: the sending side of a packet hand-off, polled by a downstream element.
///
/// `Poll::Pending` means the upstream is currently empty and `Poll::Ready(None)` that it is
/// exhausted for good. If [`Pull::notifies`] is true, a `Pending` result has registered the task
/// for a wake-up once a packet becomes available. Otherwise the caller has to poll again on its
/// own.
pub trait Pull {
    /// Attempts to pull a packet.
    fn poll_pull(&mut self, cx: &mut Context<'_>) -> Poll<Option<Packet>>;

    /// Returns true if `Pending` from [`Pull::poll_pull`] schedules a wake-up.
    fn notifies(&self) -> bool {
        true
    }
}

impl Pull for mpsc::Receiver<Packet> {
    fn poll_pull(&mut self, cx: &mut Context<'_>) -> Poll<Option<Packet>> {
        self.poll_recv(cx)
    }
}

impl Pull for mpsc::UnboundedReceiver<Packet> {
    fn poll_pull(&mut self, cx: &mut Context<'_>) -> Poll<Option<Packet>> {
        self.poll_recv(cx)
    }
}

/// A finite queue: yields its packets, then reports the end of input.
impl Pull for VecDeque<Packet> {
    fn poll_pull(&mut self, _cx: &mut Context<'_>) -> Poll<Option<Packet>> {
        Poll::Ready(self.pop_front())
    }
}

impl<P: Pull + ?Sized> Pull for Box<P> {
    fn poll_pull(&mut self, cx: &mut Context<'_>) -> Poll<Option<Packet>> {
        (**self).poll_pull(cx)
    }

    fn notifies(&self) -> bool {
        (**self).notifies()
    }
}

/// Adapts a closure into a [`Pull`] source that never ends and never notifies: `None` from the
/// closure means "empty right now".
pub struct PullFn<F>(pub F);

impl<F> fmt::Debug for PullFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PullFn").finish_non_exhaustive()
    }
}

impl<F: FnMut() -> Option<Packet>> Pull for PullFn<F> {
    fn poll_pull(&mut self, _cx: &mut Context<'_>) -> Poll<Option<Packet>> {
        match (self.0)() {
            Some(packet) => Poll::Ready(Some(packet)),
            None => Poll::Pending,
        }
    }

    fn notifies(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use futures::task::noop_waker_ref;

    use super::*;

    #[test]
    fn checked_push_drops_on_unconnected_ports() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut outputs =
            Outputs::new(2).connect(0, PushFn(move |p: Packet| sink.lock().unwrap().push(p)));

        assert!(outputs.checked_push(0, Packet::new(vec![1u8])));
        assert!(!outputs.checked_push(1, Packet::new(vec![2u8])));
        assert!(!outputs.checked_push(7, Packet::new(vec![3u8])));
        assert!(outputs.is_connected(0));
        assert!(!outputs.is_connected(1));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn pull_sources() {
        let mut cx = Context::from_waker(noop_waker_ref());

        let mut queue: VecDeque<Packet> = VecDeque::from(vec![Packet::new(vec![0u8; 4])]);
        assert!(matches!(queue.poll_pull(&mut cx), Poll::Ready(Some(p)) if p.len() == 4));
        assert!(matches!(queue.poll_pull(&mut cx), Poll::Ready(None)));

        let mut remaining = 1;
        let mut source = PullFn(move || {
            (remaining > 0).then(|| {
                remaining -= 1;
                Packet::default()
            })
        });
        assert!(!source.notifies());
        assert!(source.poll_pull(&mut cx).is_ready());
        assert!(source.poll_pull(&mut cx).is_pending());
    }

    #[tokio::test]
    async fn channels_are_ports() {
        let (mut tx, mut rx) = mpsc::unbounded_channel::<Packet>();
        Push::push(&mut tx, Packet::new(vec![1u8, 2, 3]));
        drop(tx);

        let p = futures::future::poll_fn(|cx| rx.poll_pull(cx)).await;
        assert_eq!(p.map(|p| p.len()), Some(3));
        assert!(futures::future::poll_fn(|cx| rx.poll_pull(cx)).await.is_none());
    }
}
