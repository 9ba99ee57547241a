use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use flowkit_packet::{Packet, Pull};
use tokio::{
    sync::{mpsc, oneshot},
    time::{interval_at, Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, Instrument};

use super::solicitor::{Ip6NdSolicitor, NdStats, NdTableEntry, EXPIRE_INTERVAL};
use crate::HandleError;

#[derive(Debug)]
enum Command {
    Table { response: oneshot::Sender<Vec<NdTableEntry>> },
}

/// A handle to a running neighbour solicitor.
#[derive(Debug, Clone)]
pub struct Ip6NdSolicitorHandle {
    to_driver: mpsc::UnboundedSender<Command>,
    stats: Arc<NdStats>,
}

impl Ip6NdSolicitorHandle {
    /// The shared counters.
    pub fn stats(&self) -> &NdStats {
        &self.stats
    }

    /// Dumps the neighbour table.
    pub async fn table(&self) -> Result<Vec<NdTableEntry>, HandleError> {
        let (response, rx) = oneshot::channel();
        self.to_driver.send(Command::Table { response }).map_err(|_| HandleError::DriverStopped)?;
        rx.await.map_err(|_| HandleError::DriverStopped)
    }
}

impl Ip6NdSolicitor {
    /// Binds the solicitor to its inputs: IPv6 packets on `ip6` and neighbour advertisements on
    /// `responses`. Must be called within a tokio runtime.
    pub fn into_driver<I, R>(
        self,
        ip6: I,
        responses: R,
    ) -> (Ip6NdSolicitorDriver<I, R>, Ip6NdSolicitorHandle)
    where
        I: Pull + Unpin,
        R: Pull + Unpin,
    {
        let (to_driver, from_handle) = mpsc::unbounded_channel();
        let handle = Ip6NdSolicitorHandle { to_driver, stats: Arc::clone(self.stats()) };

        let mut expire = interval_at(Instant::now() + EXPIRE_INTERVAL, EXPIRE_INTERVAL);
        expire.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let driver = Ip6NdSolicitorDriver {
            solicitor: self,
            ip6: Some(ip6),
            responses: Some(responses),
            expire,
            from_handle,
        };

        (driver, handle)
    }

    /// Binds the solicitor to its inputs and spawns the driver on the tokio runtime.
    pub fn spawn<I, R>(self, ip6: I, responses: R) -> Ip6NdSolicitorHandle
    where
        I: Pull + Unpin + Send + 'static,
        R: Pull + Unpin + Send + 'static,
    {
        let (driver, handle) = self.into_driver(ip6, responses);
        let span = tracing::debug_span!("ip6_nd_solicitor", ip = %driver.solicitor.ip());
        tokio::spawn(driver.instrument(span));
        handle
    }
}

/// Drives an [`Ip6NdSolicitor`]. Completes once both inputs close.
#[derive(Debug)]
pub struct Ip6NdSolicitorDriver<I, R> {
    solicitor: Ip6NdSolicitor,
    /// `None` once closed.
    ip6: Option<I>,
    responses: Option<R>,
    expire: Interval,
    from_handle: mpsc::UnboundedReceiver<Command>,
}

/// Pulls everything `input` has ready into `f`. Returns true if the input is exhausted.
fn drain<P: Pull>(input: &mut P, cx: &mut Context<'_>, mut f: impl FnMut(Packet)) -> bool {
    loop {
        match input.poll_pull(cx) {
            Poll::Ready(Some(packet)) => f(packet),
            Poll::Ready(None) => return true,
            Poll::Pending => {
                if !input.notifies() {
                    cx.waker().wake_by_ref();
                }
                return false;
            }
        }
    }
}

impl<I: Pull + Unpin, R: Pull + Unpin> Future for Ip6NdSolicitorDriver<I, R> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        while let Poll::Ready(Some(cmd)) = this.from_handle.poll_recv(cx) {
            match cmd {
                Command::Table { response } => {
                    let _ = response.send(this.solicitor.table());
                }
            }
        }

        while let Poll::Ready(now) = this.expire.poll_tick(cx) {
            this.solicitor.expire(now);
        }

        // Advertisements first, so that packets arriving together with the answer go straight out.
        if let Some(responses) = this.responses.as_mut() {
            let solicitor = &mut this.solicitor;
            if drain(responses, cx, |p| solicitor.handle_response(&p, Instant::now())) {
                debug!("response input closed");
                this.responses = None;
            }
        }

        if let Some(ip6) = this.ip6.as_mut() {
            let solicitor = &mut this.solicitor;
            if drain(ip6, cx, |p| solicitor.handle_ip6(p)) {
                debug!("IPv6 input closed");
                this.ip6 = None;
            }
        }

        if this.ip6.is_none() && this.responses.is_none() {
            debug!(entries = this.solicitor.len(), "inputs closed, stopping");
            return Poll::Ready(());
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use std::{net::Ipv6Addr, time::Duration};

    use flowkit_packet::{ip::ipv6, nd::neighbor_advertisement, MacAddr};

    use super::*;
    use crate::nd::Ip6NdSolicitorOptions;

    const ME: Ipv6Addr = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1);
    const HIM: Ipv6Addr = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0x99);
    const MY_MAC: MacAddr = MacAddr(2, 0, 0, 0, 0, 1);
    const HIS_MAC: MacAddr = MacAddr(2, 0, 0, 0, 0, 0x99);

    #[tokio::test(start_paused = true)]
    async fn resolves_and_expires() {
        let _ = tracing_subscriber::fmt::try_init();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Packet>();
        let (query_tx, mut query_rx) = mpsc::unbounded_channel::<Packet>();
        let (ip6_tx, ip6_rx) = mpsc::unbounded_channel::<Packet>();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel::<Packet>();

        let handle = Ip6NdSolicitor::try_new(Ip6NdSolicitorOptions::new(ME, MY_MAC).outputs(2))
            .unwrap()
            .connect(0, out_tx)
            .connect(1, query_tx)
            .spawn(ip6_rx, resp_rx);

        ip6_tx.send(ipv6(ME, HIM, b"hello")).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(query_rx.try_recv().is_ok());
        assert_eq!(handle.stats().queries_sent(), 1);

        resp_tx.send(neighbor_advertisement(HIM, HIS_MAC, ME, MY_MAC)).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(out_rx.try_recv().unwrap().data().ends_with(b"hello"));

        let table = handle.table().await.unwrap();
        assert_eq!(table, vec![NdTableEntry { ip: HIM, ok: true, mac: HIS_MAC }]);

        // The expiry sweep runs every 15 seconds; the entry dies on the first sweep past 120.
        tokio::time::sleep(Duration::from_secs(136)).await;
        assert!(handle.table().await.unwrap().is_empty());

        drop(ip6_tx);
        drop(resp_tx);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(matches!(handle.table().await, Err(HandleError::DriverStopped)));
    }
}
