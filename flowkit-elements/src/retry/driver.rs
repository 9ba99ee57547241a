use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use flowkit_packet::{Pull, Push};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, Instrument};

use super::sender::{AckRetrySender, TxHistory, TxResult, TxSummary};
use crate::timer::Timer;

/// A handle to a running ACK retry sender's transmission history.
#[derive(Debug, Clone)]
pub struct AckRetrySenderHandle {
    history: Arc<Mutex<TxHistory>>,
}

impl AckRetrySenderHandle {
    /// The recorded transmission results, oldest first.
    pub fn history(&self) -> Vec<TxResult> {
        self.history.lock().iter().copied().collect()
    }

    /// Summarises the recorded results.
    pub fn summary(&self) -> TxSummary {
        self.history.lock().summary()
    }

    /// Forgets the recorded results.
    pub fn clear_history(&self) {
        self.history.lock().clear();
    }
}

impl AckRetrySender {
    /// Binds the sender to its ports: packets to send on `input`, ACKs on `acks`, and every
    /// transmission (first or repeated) on `output`.
    pub fn into_driver<I, A, O>(
        self,
        input: I,
        acks: A,
        output: O,
    ) -> (AckRetrySenderDriver<I, A, O>, AckRetrySenderHandle)
    where
        I: Pull + Unpin,
        A: Pull + Unpin,
        O: Push + Unpin,
    {
        let handle = AckRetrySenderHandle { history: Arc::clone(self.history()) };
        let driver = AckRetrySenderDriver {
            sender: self,
            input: Some(input),
            acks: Some(acks),
            output,
            timer: Timer::default(),
        };
        (driver, handle)
    }

    /// Binds the sender to its ports and spawns the driver on the tokio runtime.
    pub fn spawn<I, A, O>(self, input: I, acks: A, output: O) -> AckRetrySenderHandle
    where
        I: Pull + Unpin + Send + 'static,
        A: Pull + Unpin + Send + 'static,
        O: Push + Unpin + Send + 'static,
    {
        let (driver, handle) = self.into_driver(input, acks, output);
        tokio::spawn(driver.instrument(tracing::debug_span!("ack_retry_sender")));
        handle
    }
}

/// Drives an [`AckRetrySender`]. Completes once its packet input closes and the last packet is
/// acknowledged or given up on.
#[derive(Debug)]
pub struct AckRetrySenderDriver<I, A, O> {
    sender: AckRetrySender,
    /// `None` once closed.
    input: Option<I>,
    acks: Option<A>,
    output: O,
    timer: Timer,
}

impl<I, A, O> Future for AckRetrySenderDriver<I, A, O>
where
    I: Pull + Unpin,
    A: Pull + Unpin,
    O: Push + Unpin,
{
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            let mut spin = false;

            // ACKs first: an ACK and a timeout arriving together count as acknowledged.
            if let Some(acks) = this.acks.as_mut() {
                loop {
                    match acks.poll_pull(cx) {
                        Poll::Ready(Some(ack)) => {
                            this.sender.on_ack(&ack);
                        }
                        Poll::Ready(None) => {
                            debug!("ACK input closed");
                            this.acks = None;
                            break;
                        }
                        Poll::Pending => {
                            spin |= !acks.notifies();
                            break;
                        }
                    }
                }
            }

            this.timer.sync(this.sender.deadline());
            if this.timer.poll_fire(cx).is_ready() {
                if let Some(packet) = this.sender.on_timer(Instant::now()) {
                    this.output.push(packet);
                }
                continue;
            }

            if !this.sender.is_waiting() {
                if let Some(input) = this.input.as_mut() {
                    match input.poll_pull(cx) {
                        Poll::Ready(Some(packet)) => {
                            let packet = this.sender.on_pull(packet, Instant::now());
                            this.output.push(packet);
                            continue;
                        }
                        Poll::Ready(None) => {
                            debug!("input closed");
                            this.input = None;
                        }
                        Poll::Pending => spin |= !input.notifies(),
                    }
                }

                if this.input.is_none() {
                    debug!(summary = %this.sender.history().lock().summary(), "stopping");
                    return Poll::Ready(());
                }
            }

            if spin {
                cx.waker().wake_by_ref();
            }
            return Poll::Pending;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, time::Duration};

    use flowkit_packet::{ether::EtherHeader, MacAddr, Packet, PushFn};
    use tokio::sync::mpsc;

    use super::*;
    use crate::retry::{AckRetrySenderOptions, ETHERTYPE_ACK};

    const A: MacAddr = MacAddr(2, 0, 0, 0, 0, 0xa);
    const B: MacAddr = MacAddr(2, 0, 0, 0, 0, 0xb);

    fn frame(src: MacAddr, dst: MacAddr, ethertype: u16) -> Packet {
        let mut p = Packet::new(vec![0u8; 32]);
        EtherHeader { src, dst, ethertype }.encap(&mut p);
        p
    }

    fn sender(max_tries: u32) -> AckRetrySender {
        let options = AckRetrySenderOptions::default()
            .max_tries(max_tries)
            .timeout(Duration::from_millis(10));
        AckRetrySender::try_new(options).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn retransmits_until_max_tries() {
        let _ = tracing_subscriber::fmt::try_init();

        let start = Instant::now();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&sent);
        let output = PushFn(move |_: Packet| log.lock().push(Instant::now() - start));

        let input: VecDeque<Packet> = [frame(A, B, 0x0800)].into();
        let (_ack_tx, acks) = mpsc::unbounded_channel::<Packet>();
        let (driver, handle) = sender(3).into_driver(input, acks, output);
        driver.await;

        let ms = Duration::from_millis;
        assert_eq!(*sent.lock(), vec![ms(0), ms(10), ms(20)]);
        assert_eq!(Instant::now() - start, ms(30));

        let history = handle.history();
        assert_eq!(history.len(), 1);
        assert_eq!((history[0].transmissions, history[0].success), (3, false));
    }

    #[tokio::test(start_paused = true)]
    async fn ack_cancels_retransmission() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Packet>();
        let (in_tx, input) = mpsc::unbounded_channel::<Packet>();
        let (ack_tx, acks) = mpsc::unbounded_channel::<Packet>();
        let handle = sender(16).spawn(input, acks, out_tx);

        in_tx.send(frame(A, B, 0x0800)).unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        let count = |rx: &mut mpsc::UnboundedReceiver<Packet>| {
            std::iter::from_fn(|| rx.try_recv().ok()).count()
        };
        assert_eq!(count(&mut out_rx), 2);

        // An ACK from the wrong station changes nothing.
        ack_tx.send(frame(A, MacAddr(2, 0, 0, 0, 0, 0xc), ETHERTYPE_ACK)).unwrap();
        ack_tx.send(frame(B, A, ETHERTYPE_ACK)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count(&mut out_rx), 0);

        let summary = handle.summary();
        assert_eq!((summary.packets, summary.success), (1, 1));
        assert_eq!(summary.max_transmissions, 2);

        // The next packet goes out right away.
        in_tx.send(frame(A, B, 0x0800)).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(count(&mut out_rx), 1);

        handle.clear_history();
        assert!(handle.history().is_empty());
    }
}
