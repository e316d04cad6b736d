//! Black-box scenarios against the public `tubular` API (spec.md §8
//! P1/P2/P3/P6), run as true integration tests rather than in-crate
//! unit tests — exercised through `Dispatcher::from_maps` with
//! `kernel::mock::MockMapSet` (requires the `testing` feature, enabled
//! for this crate's own dev-dependency build).

use std::net::UdpSocket;
use std::os::fd::OwnedFd;

use tubular::kernel::mock::MockMapSet;
use tubular::{Binding, Dispatcher, Label, Prefix, Protocol};

fn binding(label: &str, protocol: Protocol, prefix: &str, len: u8, port: u16) -> Binding {
    Binding::new(
        Label::new(label).unwrap(),
        protocol,
        Prefix::new(prefix.parse().unwrap(), len).unwrap(),
        port,
    )
}

#[test]
fn two_bindings_to_the_same_destination_share_one_record() {
    let mut dispatcher = Dispatcher::from_maps(MockMapSet::default(), 512, true);

    // Same label/protocol, two different prefixes: one destination, refcount 2 (P1/P2).
    dispatcher
        .add_binding(&binding("web", Protocol::Tcp, "10.0.0.0", 24, 0))
        .unwrap();
    dispatcher
        .add_binding(&binding("web", Protocol::Tcp, "10.0.1.0", 24, 0))
        .unwrap();

    let destinations = dispatcher.list_destinations().unwrap();
    assert_eq!(destinations.len(), 1);
    assert_eq!(destinations[0].1.refcount, 2);

    assert_eq!(dispatcher.list_bindings().unwrap().len(), 2);
}

#[test]
fn removing_every_binding_releases_the_destination_record() {
    let mut dispatcher = Dispatcher::from_maps(MockMapSet::default(), 512, true);
    let a = binding("web", Protocol::Tcp, "10.0.0.0", 24, 0);
    let b = binding("web", Protocol::Tcp, "10.0.1.0", 24, 0);

    dispatcher.add_binding(&a).unwrap();
    dispatcher.add_binding(&b).unwrap();
    dispatcher.remove_binding(&a).unwrap();
    dispatcher.remove_binding(&b).unwrap();

    assert!(dispatcher.list_bindings().unwrap().is_empty());
    assert!(dispatcher.list_destinations().unwrap().is_empty());
}

#[test]
fn add_then_remove_returns_store_to_prior_contents() {
    // P6: Idempotence of Add;Remove.
    let mut dispatcher = Dispatcher::from_maps(MockMapSet::default(), 512, true);
    let baseline = binding("spectrum", Protocol::Udp, "1.2.3.0", 24, 0);
    dispatcher.add_binding(&baseline).unwrap();
    let before = dispatcher.list_bindings().unwrap();

    let probe = binding("probe", Protocol::Tcp, "5.6.7.0", 24, 443);
    dispatcher.add_binding(&probe).unwrap();
    dispatcher.remove_binding(&probe).unwrap();

    let after = dispatcher.list_bindings().unwrap();
    assert_eq!(before, after);
}

#[test]
fn freed_destination_id_is_reused_before_allocating_higher() {
    // P3: lowest-free-ID reuse once a destination record is fully released.
    let mut dispatcher = Dispatcher::from_maps(MockMapSet::default(), 512, true);
    let a = binding("a", Protocol::Tcp, "10.0.0.0", 24, 0);
    let b = binding("b", Protocol::Tcp, "10.0.1.0", 24, 0);
    let c = binding("c", Protocol::Tcp, "10.0.2.0", 24, 0);

    dispatcher.add_binding(&a).unwrap();
    dispatcher.add_binding(&b).unwrap();

    let id_a = dispatcher
        .list_destinations()
        .unwrap()
        .iter()
        .find(|(d, _)| d.label.as_str() == "a")
        .unwrap()
        .1
        .id;

    dispatcher.remove_binding(&a).unwrap();
    dispatcher.add_binding(&c).unwrap();

    let id_c = dispatcher
        .list_destinations()
        .unwrap()
        .iter()
        .find(|(d, _)| d.label.as_str() == "c")
        .unwrap()
        .1
        .id;

    assert_eq!(id_a, id_c, "the ID freed by removing `a` should be reused by `c`");
}

#[test]
fn bulk_replace_reports_the_correct_diff() {
    let mut dispatcher = Dispatcher::from_maps(MockMapSet::default(), 512, true);
    let a = binding("a", Protocol::Tcp, "10.0.0.0", 8, 0);
    let b = binding("b", Protocol::Tcp, "10.0.1.0", 24, 0);
    let c = binding("c", Protocol::Tcp, "10.0.2.0", 24, 0);

    dispatcher.add_binding(&a).unwrap();
    dispatcher.add_binding(&b).unwrap();

    let (added, removed) = dispatcher.replace_bindings(&[a.clone(), c.clone()]).unwrap();
    assert_eq!(added, vec![c]);
    assert_eq!(removed, vec![b]);
    assert_eq!(dispatcher.list_bindings().unwrap().len(), 2);
}

#[test]
fn registering_a_socket_without_a_matching_binding_still_creates_a_destination() {
    let mut dispatcher = Dispatcher::from_maps(MockMapSet::default(), 512, true);
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let fd: OwnedFd = socket.into();

    let created = dispatcher
        .register_socket(fd, Label::new("standalone").unwrap())
        .unwrap();
    assert!(created);

    let destinations = dispatcher.list_destinations().unwrap();
    assert_eq!(destinations.len(), 1);
    assert!(destinations[0].1.socket_installed);
}

#[test]
fn read_only_dispatcher_rejects_socket_registration() {
    let mut dispatcher = Dispatcher::from_maps(MockMapSet::default(), 512, false);
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let fd: OwnedFd = socket.into();

    assert!(dispatcher
        .register_socket(fd, Label::new("standalone").unwrap())
        .is_err());
}
