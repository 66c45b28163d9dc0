//! Hub Integration Tests
//!
//! End-to-end routing scenarios: entry point matching, fallback transforms,
//! diagnostics for unrecognized payloads, static routes, and the cleanup
//! cascade that closes every destination exactly once.

use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;
use relay_core::{
    channel, Destination, EndpointError, EndpointId, Hub, HubConfig, HubError, Message, Routable,
    Sender,
};

/// Collect everything a receiver yields on a background thread
fn collect<T: Send + 'static>(rx: relay_core::Receiver<T>) -> thread::JoinHandle<Vec<T>> {
    thread::spawn(move || rx.into_iter().collect())
}

// =============================================================================
// Dispatch
// =============================================================================

#[test]
fn test_addressed_message_reaches_its_entry_point_and_unmatched_goes_to_fallback() {
    let (a, a_rx) = channel::<Message>(4);
    let (b, b_rx) = channel::<Message>(4);
    let (f, f_rx) = channel::<Message>(4);
    let c = EndpointId::reserve();
    let (a_out, b_out, f_out) = (collect(a_rx), collect(b_rx), collect(f_rx));

    let mut hub = Hub::new(f.clone());
    hub.add_entry_point(a.clone()).unwrap();
    hub.add_entry_point(b.clone()).unwrap();
    let ingress = hub.init().unwrap();

    let m1 = Message::text(a.id(), "m1");
    let m2 = Message::text(c, "m2");
    ingress.send(m1.clone()).unwrap();
    ingress.send(m2.clone()).unwrap();
    ingress.close().unwrap();
    let report = hub.cleanup();

    assert_eq!(a_out.join().unwrap(), vec![m1]);
    assert_eq!(b_out.join().unwrap(), Vec::<Message>::new());
    assert_eq!(f_out.join().unwrap(), vec![m2.fallback()]);
    assert_eq!(report.stats.routed, 1);
    assert_eq!(report.stats.fallback, 1);
}

#[test]
fn test_unaddressed_message_goes_to_fallback_once() {
    let (entry, entry_rx) = channel::<Message>(4);
    let (f, f_rx) = channel::<Message>(4);
    let (entry_out, f_out) = (collect(entry_rx), collect(f_rx));

    let mut hub = Hub::new(f);
    hub.add_entry_point(entry).unwrap();
    let ingress = hub.init().unwrap();
    ingress.send(Message::fatal("disk on fire")).unwrap();
    ingress.close().unwrap();
    hub.cleanup();

    assert!(entry_out.join().unwrap().is_empty());
    assert_eq!(f_out.join().unwrap(), vec![Message::fatal("disk on fire")]);
}

#[test]
fn test_unrecognized_payload_becomes_diagnostic_on_fallback() {
    let (f, f_rx) = channel::<Message>(4);
    let f_out = collect(f_rx);

    let mut hub = Hub::new(f);
    let ingress = hub.init().unwrap();
    ingress.send(Message::foreign(&vec![0xc3u8, 0x28])).unwrap();
    ingress.close().unwrap();
    let report = hub.cleanup();

    let received = f_out.join().unwrap();
    assert_eq!(received.len(), 1);
    match &received[0] {
        Message::Fatal { text } => {
            assert!(text.contains("unrecognized message"), "{text}");
            assert!(text.contains("[195, 40]"), "{text}");
        }
        other => panic!("expected a diagnostic, got {other:?}"),
    }
    assert_eq!(report.stats.diagnostics, 1);
}

#[test]
fn test_fifo_order_preserved_per_entry_point() {
    let (a, a_rx) = channel::<Message>(0);
    let (f, _f_rx) = channel::<Message>(1);
    let a_out = collect(a_rx);

    let mut hub = Hub::with_config(
        f,
        &HubConfig {
            ingress_capacity: 0,
        },
    );
    hub.add_entry_point(a.clone()).unwrap();
    let ingress = hub.init().unwrap();
    for i in 0..200 {
        ingress.send(Message::count(a.id(), "n", i)).unwrap();
    }
    ingress.close().unwrap();
    hub.cleanup();

    let deltas: Vec<_> = a_out
        .join()
        .unwrap()
        .into_iter()
        .map(|m| match m {
            Message::Count { delta, .. } => delta,
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(deltas, (0..200).collect::<Vec<_>>());
}

// =============================================================================
// Routes
// =============================================================================

#[test]
fn test_ambiguous_connection_keeps_original_route() {
    let (src, src_rx) = channel::<Message>(4);
    let (first, first_rx) = channel::<Message>(4);
    let (second, second_rx) = channel::<Message>(4);
    let (f, _f_rx) = channel::<Message>(4);
    let (first_out, second_out) = (collect(first_rx), collect(second_rx));

    let mut hub = Hub::new(f);
    hub.add_connection(src_rx.clone(), first.clone()).unwrap();
    let err = hub.add_connection(src_rx.clone(), second.clone()).unwrap_err();
    assert!(matches!(err, HubError::AmbiguousConnection { from } if from == src.id()));

    let ingress = hub.init().unwrap();
    src.send(Message::fatal("via route")).unwrap();
    src.close().unwrap();
    ingress.close().unwrap();
    let report = hub.cleanup();

    assert!(!second.is_closed(), "rejected destination is not owned by the hub");
    second.close().unwrap();

    assert_eq!(first_out.join().unwrap(), vec![Message::fatal("via route")]);
    assert!(second_out.join().unwrap().is_empty());
    assert_eq!(report.stats.forwarded, 1);
}

#[test]
fn test_static_route_to_fallback() {
    let (src, src_rx) = channel::<Message>(4);
    let (f, f_rx) = channel::<Message>(4);
    let f_out = collect(f_rx);

    let mut hub = Hub::new(f.clone());
    hub.add_connection(src_rx, f.clone()).unwrap();
    let ingress = hub.init().unwrap();
    src.send(Message::fatal("read error")).unwrap();
    src.close().unwrap();
    ingress.close().unwrap();
    let report = hub.cleanup();

    assert_eq!(f_out.join().unwrap(), vec![Message::fatal("read error")]);
    assert_eq!(report.closed, vec![f.id()]);
}

// =============================================================================
// Cleanup
// =============================================================================

#[test]
fn test_cleanup_closes_each_destination_once_with_fallback_last() {
    let (src1, src1_rx) = channel::<Message>(1);
    let (src2, src2_rx) = channel::<Message>(1);
    let (a, _a_rx) = channel::<Message>(1);
    let (b, _b_rx) = channel::<Message>(1);
    let (f, _f_rx) = channel::<Message>(1);

    let mut hub = Hub::new(f.clone());
    // `a` is both a route destination and an entry point, `f` is both the
    // fallback and an entry point.
    hub.add_connection(src1_rx, a.clone()).unwrap();
    hub.add_connection(src2_rx, b.clone()).unwrap();
    hub.add_entry_point(a.clone()).unwrap();
    hub.add_entry_point(f.clone()).unwrap();
    let ingress = hub.init().unwrap();

    src1.close().unwrap();
    src2.close().unwrap();
    ingress.close().unwrap();
    let report = hub.cleanup();

    let mut expected: Vec<EndpointId> = vec![a.id(), b.id()];
    expected.sort();
    expected.push(f.id());
    assert_eq!(report.closed, expected);
    assert!(report.already_closed.is_empty());

    for sender in [&a, &b, &f] {
        assert_eq!(
            sender.close(),
            Err(EndpointError::AlreadyClosed { id: sender.id() })
        );
    }
}

#[test]
fn test_cleanup_closes_shared_route_destination_once() {
    let (src1, src1_rx) = channel::<Message>(1);
    let (src2, src2_rx) = channel::<Message>(1);
    let (src3, src3_rx) = channel::<Message>(1);
    let (shared, shared_rx) = channel::<Message>(4);
    let (other, _other_rx) = channel::<Message>(1);
    let (f, _f_rx) = channel::<Message>(1);
    let shared_out = collect(shared_rx);

    let mut hub = Hub::new(f.clone());
    hub.add_connection(src1_rx, shared.clone()).unwrap();
    hub.add_connection(src2_rx, shared.clone()).unwrap();
    hub.add_connection(src3_rx, other.clone()).unwrap();
    let ingress = hub.init().unwrap();

    src1.send(Message::fatal("one")).unwrap();
    src2.send(Message::fatal("two")).unwrap();
    for src in [&src1, &src2, &src3, &ingress] {
        src.close().unwrap();
    }
    let report = hub.cleanup();

    let mut expected = vec![shared.id(), other.id()];
    expected.sort();
    expected.push(f.id());
    assert_eq!(report.closed, expected);
    assert!(report.already_closed.is_empty());
    assert_eq!(report.stats.forwarded, 2);

    // The two routes are not ordered relative to each other.
    let received = shared_out.join().unwrap();
    assert_eq!(received.len(), 2);
    assert!(received.contains(&Message::fatal("one")));
    assert!(received.contains(&Message::fatal("two")));
}

#[test]
fn test_cleanup_reports_destinations_closed_elsewhere() {
    let (a, _a_rx) = channel::<Message>(1);
    let (f, _f_rx) = channel::<Message>(1);

    let mut hub = Hub::new(f.clone());
    hub.add_entry_point(a.clone()).unwrap();
    let ingress = hub.init().unwrap();
    a.close().unwrap();
    ingress.close().unwrap();

    let report = hub.cleanup();
    assert_eq!(report.closed, vec![f.id()]);
    assert_eq!(report.already_closed, vec![a.id()]);
}

#[test]
fn test_message_to_closed_entry_point_is_dropped_and_counted() {
    let (a, _a_rx) = channel::<Message>(1);
    let (f, f_rx) = channel::<Message>(4);
    let f_out = collect(f_rx);

    let mut hub = Hub::new(f);
    hub.add_entry_point(a.clone()).unwrap();
    a.close().unwrap();
    let ingress = hub.init().unwrap();

    ingress.send(Message::text(a.id(), "too late")).unwrap();
    ingress.send(Message::fatal("still routed")).unwrap();
    ingress.close().unwrap();
    let report = hub.cleanup();

    assert_eq!(f_out.join().unwrap(), vec![Message::fatal("still routed")]);
    assert_eq!(report.stats.dropped, 1);
}

#[test]
fn test_downstream_consumers_finish_after_cleanup() {
    let (counter, counter_rx) = channel::<Message>(2);
    let (f, f_rx) = channel::<Message>(2);

    let counter_thread = thread::spawn(move || {
        counter_rx
            .iter()
            .filter_map(|m| match m {
                Message::Count { delta, .. } => Some(delta),
                _ => None,
            })
            .sum::<i64>()
    });
    let f_out = collect(f_rx);

    let mut hub = Hub::new(f);
    hub.add_entry_point(counter.clone()).unwrap();
    let ingress = hub.init().unwrap();

    let producer = {
        let ingress = ingress.clone();
        let to = counter.id();
        thread::spawn(move || {
            for _ in 0..100 {
                ingress.send(Message::count(to, "word", 1)).unwrap();
            }
        })
    };
    producer.join().unwrap();
    ingress.close().unwrap();
    hub.cleanup();

    assert_eq!(counter_thread.join().unwrap(), 100);
    assert!(f_out.join().unwrap().is_empty());
}

// =============================================================================
// Custom payloads
// =============================================================================

/// A payload whose diagnostics are themselves unrecognized
#[derive(Debug, PartialEq)]
enum Opaque {
    To(EndpointId, u8),
    Garbage,
    Note(String),
}

impl Routable for Opaque {
    fn destination(&self) -> Destination {
        match self {
            Self::To(id, _) => Destination::Endpoint(*id),
            Self::Garbage | Self::Note(_) => Destination::Unrecognized("opaque".to_string()),
        }
    }

    fn diagnostic(reason: String) -> Self {
        Self::Note(reason)
    }
}

#[test]
fn test_unrecognized_diagnostic_goes_straight_to_fallback() {
    let (entry, entry_rx): (Sender<Opaque>, _) = channel(4);
    let (f, f_rx) = channel::<Opaque>(4);
    let (entry_out, f_out) = (collect(entry_rx), collect(f_rx));

    let mut hub = Hub::new(f);
    hub.add_entry_point(entry.clone()).unwrap();
    let ingress = hub.init().unwrap();
    ingress.send(Opaque::Garbage).unwrap();
    ingress.send(Opaque::To(EndpointId::reserve(), 7)).unwrap();
    ingress.send(Opaque::To(entry.id(), 9)).unwrap();
    ingress.close().unwrap();
    let report = hub.cleanup();

    assert_eq!(entry_out.join().unwrap(), vec![Opaque::To(entry.id(), 9)]);
    let fallback = f_out.join().unwrap();
    assert_eq!(fallback.len(), 2);
    assert_eq!(fallback[0], Opaque::Note("opaque".to_string()));
    // Default fallback transform is the identity
    assert!(matches!(fallback[1], Opaque::To(_, 7)));
    assert_eq!(report.stats.diagnostics, 1);
}

/// Panics when the router asks where the zero value goes
struct Volatile(u32);

impl Routable for Volatile {
    fn destination(&self) -> Destination {
        if self.0 == 0 {
            panic!("volatile payload exploded");
        }
        Destination::Unaddressed
    }

    fn diagnostic(_reason: String) -> Self {
        Self(u32::MAX)
    }
}

#[test]
fn test_cleanup_returns_after_router_dies() {
    let (f, _f_rx) = channel::<Volatile>(1);
    let mut hub = Hub::with_config(
        f,
        &HubConfig {
            ingress_capacity: 1,
        },
    );
    let ingress = hub.init().unwrap();

    // The first value kills the router; the rest are stranded in the ingress
    // buffer and its full outbound endpoint.
    for i in 0..5 {
        ingress.send(Volatile(i)).unwrap();
    }
    ingress.close().unwrap();

    let (done, done_rx) = channel(1);
    let cleaner = thread::spawn(move || {
        let _ = done.send(hub.cleanup());
    });
    let report = done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("cleanup did not return after the router died");
    cleaner.join().unwrap();

    assert_eq!(report.stats.dropped, 4);
    assert_eq!(report.stats.fallback, 0);
}
