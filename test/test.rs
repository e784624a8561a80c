// Copyright 2026 the crossio contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::thread;
use std::time::{Duration, Instant};

use crossio::*;

/// Sends a payload from the connected socket to the bound one and back,
/// comparing at each hop.
fn bounce(bound: &mut Socket, connected: &mut Socket) {
    let payload: Vec<u8> = (0..32u8).map(|_| rand::random::<u8>()).collect();

    connected.send(&payload, 0).unwrap();
    let received = bound.recv(0).unwrap();
    assert_eq!(payload, received);

    bound.send(&received, 0).unwrap();
    let echoed = connected.recv(0).unwrap();
    assert_eq!(payload, echoed);
}

fn unique_ipc_path(tag: &str) -> String {
    let path = format!(
        "{}/crossio-test-{}-{}",
        std::env::temp_dir().display(),
        tag,
        std::process::id()
    );
    // A crashed previous run may have left the socket file behind.
    let _ = std::fs::remove_file(&path);
    format!("ipc://{}", path)
}

/// Connects to an inproc endpoint bound by another thread, waiting for the
/// binder to get there first.
fn connect_when_bound(socket: &mut Socket, endpoint: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match socket.connect(endpoint) {
            Ok(()) => return,
            Err(Error::ConnectionRefused) if Instant::now() < deadline => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => panic!("connect '{}' failed: {}", endpoint, e),
        }
    }
}

#[test]
fn test_reqrep_inproc() {
    let _ = env_logger::try_init();
    let ctx = Context::new().unwrap();
    let mut rep = ctx.socket(SocketType::Rep).unwrap();
    rep.bind("inproc://reqrep").unwrap();
    let mut req = ctx.socket(SocketType::Req).unwrap();
    req.connect("inproc://reqrep").unwrap();

    bounce(&mut rep, &mut req);

    drop(req);
    drop(rep);
    ctx.term().unwrap();
}

#[test]
fn test_reqrep_fsm_violations() {
    let _ = env_logger::try_init();
    let ctx = Context::new().unwrap();
    let mut rep = ctx.socket(SocketType::Rep).unwrap();
    rep.bind("inproc://reqrep-fsm").unwrap();
    let mut req = ctx.socket(SocketType::Req).unwrap();
    req.connect("inproc://reqrep-fsm").unwrap();

    // Receiving before any request was sent is a state machine violation,
    // as is a second send before the reply arrived.
    assert!(matches!(req.recv(0), Err(Error::InvalidState)));
    req.send(b"question", 0).unwrap();
    assert!(matches!(req.send(b"again", 0), Err(Error::InvalidState)));

    // The worker side mirrors the restriction.
    assert!(matches!(rep.send(b"answer", 0), Err(Error::InvalidState)));
    let request = rep.recv(0).unwrap();
    assert_eq!(b"question".to_vec(), request);
    rep.send(b"answer", 0).unwrap();
    assert_eq!(b"answer".to_vec(), req.recv(0).unwrap());
}

#[test]
fn test_msg_flags() {
    let _ = env_logger::try_init();
    let ctx = Context::new().unwrap();
    let mut router = ctx.socket(SocketType::Router).unwrap();
    router.bind("inproc://flags").unwrap();
    let mut dealer = ctx.socket(SocketType::Dealer).unwrap();
    dealer.connect("inproc://flags").unwrap();

    // Send a two-part message.
    dealer.send(b"A", SNDMORE).unwrap();
    dealer.send(b"B", 0).unwrap();

    // The peer identity comes first.
    let identity = router.recv_msg(0).unwrap();
    assert!(identity.has_more());
    assert!(router.recv_more());

    // Then the first part of the message body.
    let part = router.recv_msg(0).unwrap();
    assert_eq!(b"A", part.data());
    assert!(part.has_more());
    assert!(router.recv_more());

    // And finally the second part of the message body.
    let part = router.recv_msg(0).unwrap();
    assert_eq!(b"B", part.data());
    assert!(!part.has_more());
    assert!(!router.recv_more());
}

#[test]
fn test_router_replies_by_identity() {
    let _ = env_logger::try_init();
    let ctx = Context::new().unwrap();
    let mut router = ctx.socket(SocketType::Router).unwrap();
    router.bind("inproc://route-back").unwrap();
    let mut dealer = ctx.socket(SocketType::Dealer).unwrap();
    dealer.connect("inproc://route-back").unwrap();

    dealer.send(b"hi", 0).unwrap();

    let identity = router.recv(0).unwrap();
    assert_eq!(5, identity.len());
    assert_eq!(b"hi".to_vec(), router.recv(0).unwrap());

    // Route the reply back through the identity prefix.
    router.send(&identity, SNDMORE).unwrap();
    router.send(b"hello", 0).unwrap();
    assert_eq!(b"hello".to_vec(), dealer.recv(0).unwrap());

    // An identity frame with no body to follow is refused outright.
    assert!(matches!(
        router.send(&identity, 0),
        Err(Error::InvalidState)
    ));
}

#[test]
fn test_timeo() {
    let _ = env_logger::try_init();
    let ctx = Context::new().unwrap();
    let mut pull = ctx.socket(SocketType::Pull).unwrap();
    pull.bind("inproc://timeout_test").unwrap();

    // Non-blocking receive returns straight away.
    assert!(matches!(pull.recv(DONTWAIT), Err(Error::WouldBlock)));

    // The receive timeout is honoured.
    pull.set_option(SocketOption::RecvTimeout(Some(Duration::from_millis(500))))
        .unwrap();
    let watch = Instant::now();
    assert!(matches!(pull.recv(0), Err(Error::WouldBlock)));
    let elapsed = watch.elapsed();
    assert!(elapsed >= Duration::from_millis(450), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1500), "{:?}", elapsed);

    // A connection established mid-wait must not distort the timeout.
    pull.set_option(SocketOption::RecvTimeout(Some(Duration::from_secs(2))))
        .unwrap();
    let worker_ctx = ctx.clone();
    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_secs(1));
        let mut push = worker_ctx.socket(SocketType::Push).unwrap();
        push.connect("inproc://timeout_test").unwrap();
        thread::sleep(Duration::from_secs(1));
        drop(push);
    });
    let watch = Instant::now();
    assert!(matches!(pull.recv(0), Err(Error::WouldBlock)));
    let elapsed = watch.elapsed();
    assert!(elapsed >= Duration::from_millis(1900), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(3000), "{:?}", elapsed);
    worker.join().unwrap();

    // Timeouts must not break normal transfers.
    let mut push = ctx.socket(SocketType::Push).unwrap();
    push.connect("inproc://timeout_test").unwrap();
    push.send(b"12345678ABCDEFGH12345678abcdefgh", 0).unwrap();
    assert_eq!(32, pull.recv(0).unwrap().len());
}

#[test]
fn test_linger() {
    let _ = env_logger::try_init();
    let ctx = Context::new().unwrap();
    let mut push = ctx.socket(SocketType::Push).unwrap();

    // Set linger to 0.1 second.
    push.set_option(SocketOption::Linger(Some(Duration::from_millis(100))))
        .unwrap();

    // Connect to a non-existent endpoint and queue one message.
    push.connect("tcp://127.0.0.1:5560").unwrap();
    push.send(b"r", 0).unwrap();

    // Closing and terminating should take roughly the linger interval.
    drop(push);
    let watch = Instant::now();
    ctx.term().unwrap();
    let elapsed = watch.elapsed();
    assert!(elapsed >= Duration::from_millis(70), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(2000), "{:?}", elapsed);
}

#[test]
fn test_pair_ipc() {
    let _ = env_logger::try_init();
    let endpoint = unique_ipc_path("pair");
    let ctx = Context::new().unwrap();
    let mut bound = ctx.socket(SocketType::Pair).unwrap();
    bound.bind(&endpoint).unwrap();
    let mut connected = ctx.socket(SocketType::Pair).unwrap();
    connected.connect(&endpoint).unwrap();

    // Timeouts double as the test failing instead of hanging.
    bound
        .set_option(SocketOption::RecvTimeout(Some(Duration::from_secs(5))))
        .unwrap();
    connected
        .set_option(SocketOption::RecvTimeout(Some(Duration::from_secs(5))))
        .unwrap();

    bounce(&mut bound, &mut connected);

    drop(connected);
    drop(bound);
    ctx.term().unwrap();
}

#[test]
fn test_pair_tcp() {
    let _ = env_logger::try_init();
    let ctx = Context::new().unwrap();
    let mut bound = ctx.socket(SocketType::Pair).unwrap();
    bound.bind("tcp://127.0.0.1:5561").unwrap();
    let mut connected = ctx.socket(SocketType::Pair).unwrap();
    connected.connect("tcp://127.0.0.1:5561").unwrap();

    bound
        .set_option(SocketOption::RecvTimeout(Some(Duration::from_secs(5))))
        .unwrap();
    connected
        .set_option(SocketOption::RecvTimeout(Some(Duration::from_secs(5))))
        .unwrap();

    bounce(&mut bound, &mut connected);
}

#[test]
fn test_pair_tcp_late_bind() {
    let _ = env_logger::try_init();
    let ctx = Context::new().unwrap();
    let mut connected = ctx.socket(SocketType::Pair).unwrap();
    connected
        .set_option(SocketOption::RecvTimeout(Some(Duration::from_secs(5))))
        .unwrap();
    // Nobody is listening yet; the connecter keeps retrying.
    connected.connect("tcp://127.0.0.1:5562").unwrap();
    connected.send(b"early bird", 0).unwrap();

    thread::sleep(Duration::from_millis(300));
    let mut bound = ctx.socket(SocketType::Pair).unwrap();
    bound
        .set_option(SocketOption::RecvTimeout(Some(Duration::from_secs(5))))
        .unwrap();
    bound.bind("tcp://127.0.0.1:5562").unwrap();

    assert_eq!(b"early bird".to_vec(), bound.recv(0).unwrap());
}

#[test]
fn test_dealer_router_tcp() {
    let _ = env_logger::try_init();
    let ctx = Context::new().unwrap();
    let mut router = ctx.socket(SocketType::Router).unwrap();
    router
        .set_option(SocketOption::RecvTimeout(Some(Duration::from_secs(5))))
        .unwrap();
    router.bind("tcp://127.0.0.1:5563").unwrap();
    let mut dealer = ctx.socket(SocketType::Dealer).unwrap();
    dealer
        .set_option(SocketOption::RecvTimeout(Some(Duration::from_secs(5))))
        .unwrap();
    dealer.connect("tcp://127.0.0.1:5563").unwrap();

    dealer.send(b"A", SNDMORE).unwrap();
    dealer.send(b"B", 0).unwrap();

    let identity = router.recv(0).unwrap();
    assert!(router.recv_more());
    assert_eq!(b"A".to_vec(), router.recv(0).unwrap());
    assert!(router.recv_more());
    assert_eq!(b"B".to_vec(), router.recv(0).unwrap());
    assert!(!router.recv_more());

    router.send(&identity, SNDMORE).unwrap();
    router.send(b"ack", 0).unwrap();
    assert_eq!(b"ack".to_vec(), dealer.recv(0).unwrap());
}

#[test]
fn test_pubsub_filtering() {
    let _ = env_logger::try_init();
    let ctx = Context::new().unwrap();
    let mut publisher = ctx.socket(SocketType::Pub).unwrap();
    publisher.bind("inproc://weather").unwrap();

    let mut subscriber = ctx.socket(SocketType::Sub).unwrap();
    subscriber
        .set_option(SocketOption::Subscribe(b"temp.".to_vec()))
        .unwrap();
    subscriber.connect("inproc://weather").unwrap();

    publisher.send(b"wind.north 12", 0).unwrap();
    publisher.send(b"temp.london 17", 0).unwrap();

    // Only the matching topic arrives.
    assert_eq!(b"temp.london 17".to_vec(), subscriber.recv(0).unwrap());
    assert!(matches!(subscriber.recv(DONTWAIT), Err(Error::WouldBlock)));

    // Unsubscribing stops the flow again.
    subscriber
        .set_option(SocketOption::Unsubscribe(b"temp.".to_vec()))
        .unwrap();
    publisher.send(b"temp.london 18", 0).unwrap();
    assert!(matches!(subscriber.recv(DONTWAIT), Err(Error::WouldBlock)));

    // Receiving on a publisher and sending on a subscriber are undefined.
    assert!(matches!(publisher.recv(0), Err(Error::NotSupported)));
    assert!(matches!(
        subscriber.send(b"no", 0),
        Err(Error::NotSupported)
    ));
}

#[test]
fn test_xpub_sees_subscriptions() {
    let _ = env_logger::try_init();
    let ctx = Context::new().unwrap();
    let mut publisher = ctx.socket(SocketType::XPub).unwrap();
    publisher
        .set_option(SocketOption::RecvTimeout(Some(Duration::from_secs(5))))
        .unwrap();
    publisher.bind("inproc://xpub").unwrap();

    let mut subscriber = ctx.socket(SocketType::Sub).unwrap();
    subscriber.connect("inproc://xpub").unwrap();
    subscriber
        .set_option(SocketOption::Subscribe(b"topic".to_vec()))
        .unwrap();

    // The subscription control frame surfaces on the XPUB side.
    let frame = publisher.recv(0).unwrap();
    assert_eq!(1, frame[0]);
    assert_eq!(b"topic", &frame[1..]);

    publisher.send(b"topic update", 0).unwrap();
    assert_eq!(b"topic update".to_vec(), subscriber.recv(0).unwrap());
}

#[test]
fn test_push_pull_distribution() {
    let _ = env_logger::try_init();
    let ctx = Context::new().unwrap();
    let mut push = ctx.socket(SocketType::Push).unwrap();
    push.bind("inproc://fanout").unwrap();

    let mut first = ctx.socket(SocketType::Pull).unwrap();
    first.connect("inproc://fanout").unwrap();
    let mut second = ctx.socket(SocketType::Pull).unwrap();
    second.connect("inproc://fanout").unwrap();

    for part in [b"a", b"b", b"c", b"d"] {
        push.send(part, 0).unwrap();
    }

    // Load balancing rotates over the pipes in attach order; fair
    // queueing preserves per-pipe ordering.
    assert_eq!(b"a".to_vec(), first.recv(0).unwrap());
    assert_eq!(b"c".to_vec(), first.recv(0).unwrap());
    assert_eq!(b"b".to_vec(), second.recv(0).unwrap());
    assert_eq!(b"d".to_vec(), second.recv(0).unwrap());
}

#[test]
fn test_hwm_backpressure() {
    let _ = env_logger::try_init();
    let ctx = Context::new().unwrap();
    let mut pull = ctx.socket(SocketType::Pull).unwrap();
    pull.set_option(SocketOption::Hwm(2)).unwrap();
    pull.bind("inproc://backpressure").unwrap();

    let mut push = ctx.socket(SocketType::Push).unwrap();
    push.set_option(SocketOption::Hwm(2)).unwrap();
    push.connect("inproc://backpressure").unwrap();

    // The inproc watermark is the sum of both sides: 4 messages fit.
    for i in 0..4u8 {
        push.send(&[i], DONTWAIT).unwrap();
    }
    assert!(matches!(push.send(b"x", DONTWAIT), Err(Error::WouldBlock)));

    // Draining to the low-water mark (half the window) resumes the
    // writer.
    assert_eq!(vec![0], pull.recv(0).unwrap());
    assert_eq!(vec![1], pull.recv(0).unwrap());
    push.send(b"x", DONTWAIT).unwrap();
}

#[test]
fn test_survey_roundtrip() {
    let _ = env_logger::try_init();
    let ctx = Context::new().unwrap();
    let mut surveyor = ctx.socket(SocketType::Surveyor).unwrap();
    surveyor
        .set_option(SocketOption::SurveyDeadline(Duration::from_secs(2)))
        .unwrap();
    surveyor.bind("inproc://census").unwrap();

    let mut alpha = ctx.socket(SocketType::Respondent).unwrap();
    alpha.connect("inproc://census").unwrap();
    let mut beta = ctx.socket(SocketType::Respondent).unwrap();
    beta.connect("inproc://census").unwrap();

    surveyor.send(b"ready?", 0).unwrap();

    assert_eq!(b"ready?".to_vec(), alpha.recv(0).unwrap());
    alpha.send(b"yes", 0).unwrap();
    assert_eq!(b"ready?".to_vec(), beta.recv(0).unwrap());
    beta.send(b"no", 0).unwrap();

    let mut responses = vec![surveyor.recv(0).unwrap(), surveyor.recv(0).unwrap()];
    responses.sort();
    assert_eq!(vec![b"no".to_vec(), b"yes".to_vec()], responses);
}

#[test]
fn test_survey_deadline_expires() {
    let _ = env_logger::try_init();
    let ctx = Context::new().unwrap();
    let mut surveyor = ctx.socket(SocketType::Surveyor).unwrap();
    surveyor
        .set_option(SocketOption::SurveyDeadline(Duration::from_millis(200)))
        .unwrap();
    surveyor.bind("inproc://quiet-census").unwrap();

    let mut mute = ctx.socket(SocketType::Respondent).unwrap();
    mute.connect("inproc://quiet-census").unwrap();

    surveyor.send(b"anyone?", 0).unwrap();
    let watch = Instant::now();
    assert!(matches!(surveyor.recv(0), Err(Error::WouldBlock)));
    let elapsed = watch.elapsed();
    assert!(elapsed >= Duration::from_millis(150), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1500), "{:?}", elapsed);

    // With the survey over, receiving is a state machine violation.
    assert!(matches!(surveyor.recv(0), Err(Error::InvalidState)));
}

#[test]
fn test_streamer_device() {
    let _ = env_logger::try_init();
    let ctx = Context::new().unwrap();

    let device_ctx = ctx.clone();
    let relay = thread::spawn(move || {
        let mut front = device_ctx.socket(SocketType::Pull).unwrap();
        front.bind("inproc://device-in").unwrap();
        let mut back = device_ctx.socket(SocketType::Push).unwrap();
        back.bind("inproc://device-out").unwrap();
        device(Device::Streamer, &mut front, &mut back)
    });

    let mut source = ctx.socket(SocketType::Push).unwrap();
    connect_when_bound(&mut source, "inproc://device-in");
    let mut sink = ctx.socket(SocketType::Pull).unwrap();
    sink.set_option(SocketOption::RecvTimeout(Some(Duration::from_secs(5))))
        .unwrap();
    connect_when_bound(&mut sink, "inproc://device-out");

    source.send(b"through", 0).unwrap();
    assert_eq!(b"through".to_vec(), sink.recv(0).unwrap());

    // Terminating the context unblocks the device loop with an error.
    drop(source);
    drop(sink);
    ctx.term().unwrap();
    assert!(matches!(relay.join().unwrap(), Err(Error::Terminated)));
}

#[test]
fn test_large_messages_roundtrip() {
    let _ = env_logger::try_init();
    let ctx = Context::new().unwrap();
    let mut bound = ctx.socket(SocketType::Pair).unwrap();
    bound.bind("inproc://large").unwrap();
    let mut connected = ctx.socket(SocketType::Pair).unwrap();
    connected.connect("inproc://large").unwrap();

    // Cross the inline-storage boundary and go well past it.
    for size in [30usize, 31, 1024, 1 << 16] {
        let payload: Vec<u8> = (0..size).map(|i| i as u8).collect();
        connected.send(&payload, 0).unwrap();
        assert_eq!(payload, bound.recv(0).unwrap());
    }
}

#[test]
fn test_connect_without_binder_is_refused() {
    let _ = env_logger::try_init();
    let ctx = Context::new().unwrap();
    let mut pair = ctx.socket(SocketType::Pair).unwrap();
    assert!(matches!(
        pair.connect("inproc://nobody-home"),
        Err(Error::ConnectionRefused)
    ));
    assert!(matches!(
        pair.connect("pgm://eth0;239.0.0.1:5555"),
        Err(Error::ProtocolNotSupported)
    ));
    assert!(matches!(
        pair.connect("inproc-not-a-uri"),
        Err(Error::InvalidArgument)
    ));
}

#[test]
fn test_poll_reports_readiness() {
    let _ = env_logger::try_init();
    let ctx = Context::new().unwrap();
    let mut pull = ctx.socket(SocketType::Pull).unwrap();
    pull.bind("inproc://pollme").unwrap();
    let mut push = ctx.socket(SocketType::Push).unwrap();
    push.connect("inproc://pollme").unwrap();

    // Nothing readable yet.
    {
        let mut items = [PollItem::socket(&mut pull, POLLIN)];
        let ready = poll(&mut items, Some(Duration::from_millis(50))).unwrap();
        assert_eq!(0, ready);
    }

    push.send(b"wake", 0).unwrap();
    {
        let mut items = [PollItem::socket(&mut pull, POLLIN)];
        let ready = poll(&mut items, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(1, ready);
        assert_eq!(POLLIN, items[0].revents() & POLLIN);
    }
    assert_eq!(b"wake".to_vec(), pull.recv(0).unwrap());
}

#[test]
fn test_term_unblocks_blocked_recv() {
    let _ = env_logger::try_init();
    let ctx = Context::new().unwrap();
    let worker_ctx = ctx.clone();
    let worker = thread::spawn(move || {
        let mut pull = worker_ctx.socket(SocketType::Pull).unwrap();
        pull.bind("inproc://stuck").unwrap();
        let result = pull.recv(0);
        drop(pull);
        result
    });

    thread::sleep(Duration::from_millis(200));
    ctx.term().unwrap();
    assert!(matches!(worker.join().unwrap(), Err(Error::Terminated)));
}
