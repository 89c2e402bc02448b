//! Loopback tests for the TCP + UDP link.

use std::net::TcpListener;
use std::sync::Once;
use std::thread;
use std::time::Duration;

use lockstep::frame::FrameId;
use lockstep::message::Message;
use lockstep::state::StateTag;
use lockstep::transport::socket::SocketLink;
use lockstep::transport::{Delivery, Link, Timeout};

static INIT: Once = Once::new();

fn init() {
    INIT.call_once(lockstep::init_tracing);
}

/// Connected pair over an ephemeral loopback port.
fn link_pair() -> (SocketLink, SocketLink) {
    init();
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let addr = listener.local_addr().expect("listener addr");

    let connector = thread::spawn(move || SocketLink::connect(addr.into()).expect("connect"));
    let accepted = SocketLink::accept(&listener).expect("accept");
    let connected = connector.join().expect("connector thread panicked");
    (accepted, connected)
}

/// UDP on loopback is reliable in practice, but delivery is still
/// asynchronous; poll with a deadline.
fn recv_within(link: &mut SocketLink, deadline: Duration) -> Option<Message> {
    link.recv(Timeout::Duration(deadline)).expect("recv failed")
}

#[test]
fn reliable_messages_arrive_in_order() {
    let (mut a, mut b) = link_pair();

    let sequence = vec![
        Message::Window("left".to_owned()),
        Message::Window("right".to_owned()),
        Message::Run,
        Message::Exit,
    ];
    for msg in &sequence {
        a.send(Delivery::Reliable, msg).unwrap();
    }

    for expected in &sequence {
        let got = recv_within(&mut b, Duration::from_secs(5)).expect("message missing");
        assert_eq!(&got, expected);
    }
}

#[test]
fn fast_messages_arrive_on_loopback() {
    let (mut a, mut b) = link_pair();

    a.send(Delivery::Fast, &Message::Render(FrameId(42))).unwrap();
    let got = recv_within(&mut b, Duration::from_secs(5));
    assert_eq!(got, Some(Message::Render(FrameId(42))));

    // And in the other direction, on b's own fast socket.
    b.send(Delivery::Fast, &Message::Swap(FrameId(42))).unwrap();
    let got = recv_within(&mut a, Duration::from_secs(5));
    assert_eq!(got, Some(Message::Swap(FrameId(42))));
}

#[test]
fn large_state_payload_survives_both_channels() {
    let (mut a, mut b) = link_pair();
    let msg = Message::State {
        tag: StateTag::new(3),
        bytes: vec![0xab; 16 * 1024],
    };

    a.send(Delivery::Reliable, &msg).unwrap();
    assert_eq!(recv_within(&mut b, Duration::from_secs(5)), Some(msg.clone()));

    a.send(Delivery::Fast, &msg).unwrap();
    assert_eq!(recv_within(&mut b, Duration::from_secs(5)), Some(msg));
}

#[test]
fn bounded_recv_times_out_quietly() {
    let (_a, mut b) = link_pair();
    let got = b
        .recv(Timeout::Duration(Duration::from_millis(20)))
        .unwrap();
    assert_eq!(got, None);
}

#[test]
fn peer_close_is_detected_on_receive() {
    let (a, mut b) = link_pair();
    drop(a);

    // The closed TCP stream surfaces as an error, not a silent None.
    let mut saw_error = false;
    for _ in 0..100 {
        match b.recv(Timeout::Duration(Duration::from_millis(10))) {
            Err(_) => {
                saw_error = true;
                break;
            }
            Ok(Some(_)) => panic!("unexpected message"),
            Ok(None) => {}
        }
    }
    assert!(saw_error, "peer close never surfaced");
}
