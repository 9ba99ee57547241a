use std::{collections::VecDeque, sync::Arc, time::Duration};

use flowkit_elements::{LinkUnqueue, LinkUnqueueOptions, RatedUnqueue, RatedUnqueueOptions};
use flowkit_packet::{Packet, PullFn, PushFn};
use parking_lot::Mutex;
use tokio::{sync::mpsc, time::Instant};

/// A source that always has a packet ready.
fn endless() -> PullFn<impl FnMut() -> Option<Packet>> {
    PullFn(|| Some(Packet::new(vec![0u8; 64])))
}

#[tokio::test(start_paused = true)]
async fn rated_unqueue_paces_an_endless_source() {
    let _ = tracing_subscriber::fmt::try_init();

    let start = Instant::now();
    let times = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&times);
    let output = PushFn(move |_: Packet| log.lock().push(Instant::now() - start));

    let handle =
        RatedUnqueue::try_new(RatedUnqueueOptions::new(10)).unwrap().spawn(endless(), output);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let times = times.lock().clone();
    assert!((9..=11).contains(&times.len()), "{} packets in one second", times.len());
    for pair in times.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(
            gap >= Duration::from_millis(99) && gap <= Duration::from_millis(102),
            "gap {gap:?}"
        );
    }
    assert_eq!(handle.stats().pushed(), times.len() as u64);
}

#[tokio::test(start_paused = true)]
async fn rate_change_takes_effect() {
    let (tx, mut rx) = mpsc::unbounded_channel::<Packet>();
    let handle = RatedUnqueue::try_new(RatedUnqueueOptions::new(10)).unwrap().spawn(endless(), tx);

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    let slow = std::iter::from_fn(|| rx.try_recv().ok()).count();

    handle.set_rate(100, Some(10)).unwrap();
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    let fast = std::iter::from_fn(|| rx.try_recv().ok()).count();

    assert!((9..=11).contains(&slow), "{slow}");
    assert!(fast > 5 * slow, "{fast} packets after raising the rate");
    assert!(handle.set_rate(10, Some(0)).is_err());
}

/// A rate limiter feeding a slow link: everything arrives, in order, no faster than the link.
#[tokio::test(start_paused = true)]
async fn rate_limited_link_preserves_order() {
    let _ = tracing_subscriber::fmt::try_init();

    let numbered: VecDeque<Packet> = (1..=20u8).map(|seq| Packet::new(vec![seq; 100])).collect();

    let (mid_tx, mid_rx) = mpsc::unbounded_channel::<Packet>();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Packet>();

    RatedUnqueue::try_new(RatedUnqueueOptions::new(1_000)).unwrap().spawn(numbered, mid_tx);
    // 100-byte packets at 10 kB/s: 10ms each on the wire.
    let options =
        LinkUnqueueOptions::new(Duration::from_millis(50), 10_000).timer_slack(Duration::ZERO);
    let link = LinkUnqueue::try_new(options).unwrap().spawn(mid_rx, out_tx);

    let start = Instant::now();
    let mut received = Vec::new();
    let mut last = None;
    while let Some(packet) = out_rx.recv().await {
        let now = Instant::now();
        if let Some(prev) = last {
            assert!(now - prev >= Duration::from_millis(10));
        }
        last = Some(now);
        received.push(packet.data()[0]);
        if received.len() == 20 {
            break;
        }
    }

    assert_eq!(received, (1..=20).collect::<Vec<u8>>());
    // First packet: 50ms latency + 10ms on the wire, then one every 10ms.
    assert_eq!(Instant::now() - start, Duration::from_millis(60 + 19 * 10));
    assert_eq!(link.size(), 0);
}
