use std::{collections::VecDeque, time::Duration};

use flowkit_elements::{retry::ETHERTYPE_ACK, AckRetrySender, AckRetrySenderOptions};
use flowkit_packet::{ether::EtherHeader, MacAddr, Packet, PushFn};
use tokio::{sync::mpsc, time::Instant};

const LOCAL: MacAddr = MacAddr(2, 0, 0, 0, 0, 1);
const REMOTE: MacAddr = MacAddr(2, 0, 0, 0, 0, 2);

fn frame(src: MacAddr, dst: MacAddr, ethertype: u16, seq: u8) -> Packet {
    let mut p = Packet::new(vec![seq; 46]);
    EtherHeader { src, dst, ethertype }.encap(&mut p);
    p
}

/// A link that loses every first transmission: each packet needs exactly one retry.
#[tokio::test(start_paused = true)]
async fn recovers_from_a_lossy_link() {
    let _ = tracing_subscriber::fmt::try_init();

    let (ack_tx, acks) = mpsc::unbounded_channel::<Packet>();
    let mut transmissions = 0;
    let mut delivered = Vec::new();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let lossy = PushFn(move |p: Packet| {
        transmissions += 1;
        if transmissions % 2 == 1 {
            return;
        }
        delivered.push(p.data()[14]);
        let _ = done_tx.send(delivered.clone());
        let _ = ack_tx.send(frame(REMOTE, LOCAL, ETHERTYPE_ACK, 0));
    });

    let input: VecDeque<Packet> = (0..5).map(|seq| frame(LOCAL, REMOTE, 0x0800, seq)).collect();
    let options = AckRetrySenderOptions::default().timeout(Duration::from_millis(20));
    let (driver, handle) =
        AckRetrySender::try_new(options).unwrap().into_driver(input, acks, lossy);

    let start = Instant::now();
    driver.await;
    assert_eq!(Instant::now() - start, Duration::from_millis(5 * 20));

    let delivered = std::iter::from_fn(|| done_rx.try_recv().ok()).last().unwrap();
    assert_eq!(delivered, vec![0, 1, 2, 3, 4]);

    let summary = handle.summary();
    assert_eq!((summary.packets, summary.success, summary.fail), (5, 5, 0));
    assert_eq!((summary.min_transmissions, summary.max_transmissions), (2, 2));
    assert!(handle.history().iter().all(|r| r.transmissions == 2 && r.success));
}
