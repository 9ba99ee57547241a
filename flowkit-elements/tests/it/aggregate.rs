use std::{net::Ipv4Addr, sync::Arc};

use flowkit_elements::{
    AggregateFilter, AggregateFilterOptions, AggregateIPAddrPair, FilterAction,
};
use flowkit_packet::{ip, Packet, Push, PushFn};
use parking_lot::Mutex;

fn host(n: u8) -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 1, n)
}

type Seen = Arc<Mutex<Vec<(usize, u32, u8)>>>;

fn recorder(seen: &Seen, port: usize) -> PushFn<impl FnMut(Packet)> {
    let seen = Arc::clone(seen);
    PushFn(move |p: Packet| seen.lock().push((port, p.anno().aggregate, p.anno().paint)))
}

/// Flows are numbered by the aggregator and routed by number.
#[test]
fn aggregate_then_filter() {
    let _ = tracing_subscriber::fmt::try_init();

    let seen = Seen::default();
    let filter = AggregateFilter::try_new(
        AggregateFilterOptions::default()
            .outputs(2)
            .pattern("allow 1")
            .pattern("1 2")
            .default_action(FilterAction::Drop),
    )
    .unwrap()
    .connect(0, recorder(&seen, 0))
    .connect(1, recorder(&seen, 1));

    let mut agg = AggregateIPAddrPair::new().connect(0, filter);

    agg.push(ip::ipv4(host(1), host(2), b"a")); // flow 1, forward
    agg.push(ip::ipv4(host(3), host(4), b"b")); // flow 2
    agg.push(ip::ipv4(host(2), host(1), b"c")); // flow 1, reverse
    agg.push(ip::ipv4(host(5), host(6), b"d")); // flow 3, dropped
    agg.push(Packet::new(vec![0u8; 4])); // no IP header, output 1 unconnected

    assert_eq!(*seen.lock(), vec![(0, 1, 0), (1, 2, 0), (0, 1, 1)]);
    assert_eq!(agg.flow_count(), 3);
}

/// Rules and actions are reachable from the public `aggregate` module.
#[test]
fn rules_parse_through_public_paths() {
    use flowkit_elements::aggregate::{self, AggregateRange};

    let rule: aggregate::FilterRule = "deny 7 9-11".parse().unwrap();
    assert_eq!(rule.action, aggregate::FilterAction::Drop);
    assert_eq!(rule.aggregates, vec![AggregateRange::Range(7, 7), AggregateRange::Range(9, 11)]);

    let port: aggregate::FilterAction = "3".parse().unwrap();
    assert_eq!(port, aggregate::FilterAction::Port(3));
    assert!("nope 1".parse::<aggregate::FilterRule>().is_err());
}
