use std::{net::Ipv4Addr, time::Duration};

use flowkit::{
    packet::ip, AggregateFilter, AggregateFilterOptions, AggregateIPAddrPair, LinkUnqueue,
    LinkUnqueueOptions, Packet, PushFn, RatedUnqueue, RatedUnqueueOptions,
};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    // Traffic between four hosts, generated as fast as it is pulled.
    let hosts: Vec<Ipv4Addr> = (1..=4).map(|n| Ipv4Addr::new(10, 0, 0, n)).collect();
    let mut n = 0usize;
    let source = flowkit::PullFn(move || {
        n += 1;
        let src = hosts[n % hosts.len()];
        let dst = hosts[(n / hosts.len()) % hosts.len()];
        Some(ip::ipv4(src, dst, &[0u8; 200]))
    });

    // Flows 1 and 2 go over a slow link, everything else is dropped.
    let (link_tx, link_rx) = mpsc::unbounded_channel::<Packet>();
    let filter = AggregateFilter::try_new(AggregateFilterOptions::default().pattern("allow 1-2"))
        .unwrap()
        .connect(0, link_tx);
    let aggregator = AggregateIPAddrPair::new().connect(0, filter);

    let rated =
        RatedUnqueue::try_new(RatedUnqueueOptions::new(100)).unwrap().spawn(source, aggregator);

    let link_options = LinkUnqueueOptions::new(Duration::from_millis(20), 8_000);
    let link = LinkUnqueue::try_new(link_options).unwrap().spawn(
        link_rx,
        PushFn(|p: Packet| {
            println!("aggregate {} paint {} len {}", p.anno().aggregate, p.anno().paint, p.len())
        }),
    );

    tokio::time::sleep(Duration::from_secs(2)).await;

    println!(
        "rated unqueue: {} packets pushed, {} bytes; link: {} in flight, {} delivered",
        rated.stats().pushed(),
        rated.stats().bytes(),
        link.size(),
        link.stats().pushed(),
    );
}
