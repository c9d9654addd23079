use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use libcellular::modem::sara_r::SaraR;
use libcellular::network::CancelToken;
use libcellular::network::at::ErrorCode;
use libcellular::network::error::{OpenFailure, SocketError};
use libcellular::network::socket::{MAX_SOCKETS, Protocol, RX_CAPACITY, SocketConfig, SocketStack, SocketState, Sockets};

use crate::sim::*;

type SimStack = SocketStack<SimChannel, SimClock, SaraR>;

fn stack_with(config: SocketConfig) -> (Shared, SimStack) {
    let (sim, engine) = rig();
    let stack = SocketStack::new(engine, SaraR::r510(), config).unwrap();
    (sim, stack)
}

fn stack() -> (Shared, SimStack) {
    stack_with(SocketConfig::default())
}

/// Socket 0 over TCP with a peer whose bytes wait in the returned inbox.
fn tcp_peer(sim: &Shared) -> Inbox {
    let inbox: Inbox = Rc::new(RefCell::new(VecDeque::new()));
    let mut sim = sim.borrow_mut();
    sim.on("AT+USOCR=6", |_| vec![lines(&["+USOCR: 0"])]);
    sim.on("AT+USOCO=", |_| vec![ok()]);
    sim.on("AT+USOCL=", |_| vec![ok()]);
    accept_writes(&mut sim);
    serve_reads(&mut sim, &inbox);
    inbox
}

/// Data arriving from the peer: queue it and announce it.
fn arrive(sim: &Shared, inbox: &Inbox, data: &[u8]) {
    inbox.borrow_mut().extend(data.iter().copied());
    sim.borrow_mut().inject(&urc(&format!("+UUSORD: 0,{}", data.len())));
}

#[test]
fn test_open_send_receive_close() {
    let (sim, mut stack) = stack();
    let inbox = tcp_peer(&sim);

    let handle = stack.open("example.com", 80, Protocol::Tcp).unwrap();
    assert_eq!(handle.id(), 0);
    assert_eq!(stack.state(handle), SocketState::Open);
    assert_eq!(stack.remote(handle).unwrap().host.as_str(), "example.com");
    assert!(sim.borrow().position("AT+USOCO=0,\"example.com\",80").is_some());

    assert_eq!(stack.send(handle, b"ping").unwrap(), 4);
    assert_eq!(sim.borrow().payloads, vec![b"ping".to_vec()]);

    arrive(&sim, &inbox, b"pong");
    let mut buf = [0u8; 16];
    assert_eq!(stack.receive(handle, &mut buf).unwrap(), 4);
    assert_eq!(&buf[..4], b"pong");
    assert_eq!(stack.receive(handle, &mut buf).unwrap(), 0);

    stack.close(handle).unwrap();
    assert_eq!(sim.borrow().last_command(), Some("AT+USOCL=0,1"));
    assert_eq!(stack.state(handle), SocketState::Closing);
    assert_eq!(stack.send(handle, b"late"), Err(SocketError::NotConnected));

    sim.borrow_mut().inject(&urc("+UUSOCL: 0"));
    stack.service().unwrap();
    assert_eq!(stack.state(handle), SocketState::Closed);
    stack.close(handle).unwrap();
    assert_eq!(sim.borrow().count("AT+USOCL"), 1);
}

#[test]
fn test_udp_socket_reads_with_sender() {
    let (sim, mut stack) = stack();
    {
        let mut sim = sim.borrow_mut();
        sim.on("AT+USOCR=17", |_| vec![lines(&["+USOCR: 1"])]);
        sim.on("AT+USORF=1,4", |_| {
            vec![Action::Reply(
                b"\r\n+USORF: 1,\"10.0.0.7\",5683,4,\"abcd\"\r\n\r\nOK\r\n".to_vec(),
            )]
        });
    }

    let handle = stack.open("10.0.0.7", 5683, Protocol::Udp).unwrap();
    assert_eq!(handle.id(), 1);
    sim.borrow_mut().inject(&urc("+UUSORF: 1,4"));

    let mut buf = [0u8; 8];
    assert_eq!(stack.receive(handle, &mut buf).unwrap(), 4);
    assert_eq!(&buf[..4], b"abcd");
}

#[test]
fn test_all_slots_in_use() {
    let (sim, mut stack) = stack();
    let next = Rc::new(Cell::new(0u8));
    let counter = next.clone();
    sim.borrow_mut().on("AT+USOCR=6", move |_| {
        let id = counter.get();
        counter.set(id + 1);
        vec![lines(&[format!("+USOCR: {}", id).as_str()])]
    });

    let handles: Vec<_> = (0..MAX_SOCKETS)
        .map(|_| stack.open("example.com", 80, Protocol::Tcp).unwrap())
        .collect();
    let ids: Vec<u8> = handles.iter().map(|handle| handle.id()).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4, 5, 6]);

    assert_eq!(
        stack.open("example.com", 80, Protocol::Tcp),
        Err(SocketError::NoSlots)
    );
    assert_eq!(sim.borrow().count("AT+USOCR"), MAX_SOCKETS);
}

#[test]
fn test_identifier_not_reused_while_close_pending() {
    let (sim, mut stack) = stack();
    {
        let mut sim = sim.borrow_mut();
        sim.on("AT+USOCR=6", |_| vec![lines(&["+USOCR: 2"])]);
        sim.on("AT+USOCL=", |_| vec![ok()]);
    }

    let first = stack.open("example.com", 80, Protocol::Tcp).unwrap();
    assert_eq!(first.id(), 2);
    stack.close(first).unwrap();
    assert_eq!(stack.state(first), SocketState::Closing);

    assert_eq!(
        stack.open("example.com", 80, Protocol::Tcp),
        Err(SocketError::OpenFailed(OpenFailure::IdCollision))
    );
    assert_eq!(sim.borrow().last_command(), Some("AT+USOCL=2"));
    assert_eq!(stack.state(first), SocketState::Closing);

    sim.borrow_mut().inject(&urc("+UUSOCL: 2"));
    stack.service().unwrap();
    assert_eq!(stack.state(first), SocketState::Closed);

    let second = stack.open("example.com", 80, Protocol::Tcp).unwrap();
    assert_eq!(second.id(), 2);
    assert_ne!(first, second);
    assert_eq!(stack.state(first), SocketState::Closed);
    assert_eq!(stack.state(second), SocketState::Open);
    assert_eq!(stack.send(first, b"stale"), Err(SocketError::NotConnected));
}

#[test]
fn test_unconfirmed_close_is_forced() {
    let config = SocketConfig {
        close_timeout_ms: 1_000,
        ..SocketConfig::default()
    };
    let (sim, mut stack) = stack_with(config);
    tcp_peer(&sim);

    let handle = stack.open("example.com", 80, Protocol::Tcp).unwrap();
    stack.close(handle).unwrap();
    stack.service().unwrap();
    assert_eq!(stack.state(handle), SocketState::Closing);

    stack.delay_ms(1_500);
    stack.service().unwrap();
    assert_eq!(sim.borrow().last_command(), Some("AT+USOCL=0"));
    assert_eq!(stack.state(handle), SocketState::Closed);
}

#[test]
fn test_full_buffer_stops_reads() {
    let (sim, mut stack) = stack();
    let inbox = tcp_peer(&sim);
    let handle = stack.open("example.com", 80, Protocol::Tcp).unwrap();

    let data: Vec<u8> = (0..2_000u32).map(|i| (i % 251) as u8).collect();
    arrive(&sim, &inbox, &data);

    for _ in 0..5 {
        stack.service().unwrap();
    }
    assert_eq!(stack.buffered(handle), RX_CAPACITY);
    let reads = sim.borrow().count("AT+USORD=");
    stack.service().unwrap();
    assert_eq!(sim.borrow().count("AT+USORD="), reads);

    let mut received = Vec::new();
    let mut one = [0u8; 1];
    assert_eq!(stack.receive(handle, &mut one).unwrap(), 1);
    received.push(one[0]);
    assert_eq!(sim.borrow().count("AT+USORD="), reads);

    stack.service().unwrap();
    assert_eq!(sim.borrow().count("AT+USORD="), reads + 1);
    assert_eq!(sim.borrow().last_command(), Some("AT+USORD=0,1"));

    let mut buf = [0u8; 256];
    for _ in 0..100 {
        if received.len() == data.len() {
            break;
        }
        let read = stack.receive(handle, &mut buf).unwrap();
        received.extend_from_slice(&buf[..read]);
    }
    assert_eq!(received, data);
}

#[test]
fn test_remote_close_after_buffered_data() {
    let (sim, mut stack) = stack();
    let inbox = tcp_peer(&sim);
    let handle = stack.open("example.com", 80, Protocol::Tcp).unwrap();

    arrive(&sim, &inbox, b"bye!!");
    stack.service().unwrap();
    assert_eq!(stack.buffered(handle), 5);

    sim.borrow_mut().inject(&urc("+UUSOCL: 0"));
    stack.service().unwrap();
    assert_eq!(stack.state(handle), SocketState::Closing);

    let mut buf = [0u8; 16];
    assert_eq!(stack.receive(handle, &mut buf).unwrap(), 5);
    assert_eq!(&buf[..5], b"bye!!");
    assert_eq!(stack.receive(handle, &mut buf), Err(SocketError::RemoteClosed));
    assert_eq!(stack.receive(handle, &mut buf), Err(SocketError::RemoteClosed));
    assert_eq!(stack.send(handle, b"x"), Err(SocketError::NotConnected));

    stack.close(handle).unwrap();
    assert_eq!(sim.borrow().count("AT+USOCL"), 0);
}

#[test]
fn test_data_and_remote_close_in_one_burst() {
    let (sim, mut stack) = stack();
    let inbox = tcp_peer(&sim);
    let handle = stack.open("example.com", 80, Protocol::Tcp).unwrap();

    inbox.borrow_mut().extend(b"hello world".iter().copied());
    let mut burst = urc("+UUSORD: 0,11");
    burst.extend(urc("+UUSOCL: 0"));
    sim.borrow_mut().inject(&burst);

    let mut buf = [0u8; 32];
    assert_eq!(stack.receive(handle, &mut buf), Ok(11));
    assert_eq!(&buf[..11], b"hello world");
    assert_eq!(sim.borrow().count("AT+USORD=0,"), 1);
    assert_eq!(stack.receive(handle, &mut buf), Err(SocketError::RemoteClosed));

    stack.close(handle).unwrap();
    assert_eq!(sim.borrow().count("AT+USOCL"), 0);
}

#[test]
fn test_remote_close_waits_for_announced_data() {
    let (sim, mut stack) = stack();
    let inbox = tcp_peer(&sim);
    let handle = stack.open("example.com", 80, Protocol::Tcp).unwrap();

    let data: Vec<u8> = (0..1_000u32).map(|i| (i % 251) as u8).collect();
    arrive(&sim, &inbox, &data);
    sim.borrow_mut().inject(&urc("+UUSOCL: 0"));
    stack.service().unwrap();
    assert_eq!(stack.state(handle), SocketState::Closing);

    let mut received = Vec::new();
    let mut buf = [0u8; 300];
    loop {
        match stack.receive(handle, &mut buf) {
            Ok(read) => received.extend_from_slice(&buf[..read]),
            Err(error) => {
                assert_eq!(error, SocketError::RemoteClosed);
                break;
            }
        }
    }
    assert_eq!(received, data);
    assert_eq!(stack.state(handle), SocketState::Closed);
}

#[test]
fn test_failed_read_after_remote_close() {
    let (sim, mut stack) = stack();
    let inbox = tcp_peer(&sim);
    let handle = stack.open("example.com", 80, Protocol::Tcp).unwrap();
    sim.borrow_mut().on("AT+USORD=", |_| vec![cme(3)]);

    arrive(&sim, &inbox, b"gone");
    sim.borrow_mut().inject(&urc("+UUSOCL: 0"));
    let mut buf = [0u8; 16];
    assert_eq!(stack.receive(handle, &mut buf), Err(SocketError::RemoteClosed));
    assert_eq!(stack.state(handle), SocketState::Closed);
}

#[test]
fn test_buffered_bytes_before_read_error() {
    let (sim, mut stack) = stack();
    let inbox = tcp_peer(&sim);
    let handle = stack.open("example.com", 80, Protocol::Tcp).unwrap();

    arrive(&sim, &inbox, b"first");
    stack.service().unwrap();
    assert_eq!(stack.buffered(handle), 5);

    sim.borrow_mut().on("AT+USORD=", |_| vec![cme(3)]);
    arrive(&sim, &inbox, b"second");
    let mut buf = [0u8; 16];
    assert_eq!(stack.receive(handle, &mut buf), Ok(5));
    assert_eq!(&buf[..5], b"first");
    assert_eq!(
        stack.receive(handle, &mut buf),
        Err(SocketError::Rejected(ErrorCode::Cme(Some(3))))
    );
    assert_eq!(stack.receive(handle, &mut buf), Ok(0));
    assert_eq!(stack.state(handle), SocketState::Open);
}

#[test]
fn test_large_send_is_split() {
    let (sim, mut stack) = stack();
    tcp_peer(&sim);
    let handle = stack.open("example.com", 80, Protocol::Tcp).unwrap();

    let data: Vec<u8> = (0..700u32).map(|i| (i % 256) as u8).collect();
    assert_eq!(stack.send(handle, &data).unwrap(), 700);

    let sim = sim.borrow();
    assert_eq!(sim.count("AT+USOWR=0,512"), 1);
    assert_eq!(sim.count("AT+USOWR=0,188"), 1);
    assert_eq!(sim.uploaded(), data);
}

#[test]
fn test_partial_write_continues_with_rest() {
    let (sim, mut stack) = stack();
    tcp_peer(&sim);
    sim.borrow_mut().on("AT+USOWR=", |command| {
        let len = arg(command, 1);
        vec![Action::Prompt {
            len,
            then: format!("\r\n+USOWR: 0,{}\r\n\r\nOK\r\n", len.min(100)).into_bytes(),
        }]
    });
    let handle = stack.open("example.com", 80, Protocol::Tcp).unwrap();

    assert_eq!(stack.send(handle, &[7u8; 300]).unwrap(), 300);
    let writes: Vec<String> = sim
        .borrow()
        .commands
        .iter()
        .filter(|command| command.starts_with("AT+USOWR"))
        .cloned()
        .collect();
    assert_eq!(writes, vec!["AT+USOWR=0,300", "AT+USOWR=0,200", "AT+USOWR=0,100"]);
}

#[test]
fn test_rejected_write_is_retried_then_reported() {
    let config = SocketConfig {
        write_retries: 2,
        write_retry_delay_ms: 100,
        ..SocketConfig::default()
    };
    let (sim, mut stack) = stack_with(config);
    tcp_peer(&sim);
    sim.borrow_mut().on("AT+USOWR=", |_| vec![cme(3)]);
    let handle = stack.open("example.com", 80, Protocol::Tcp).unwrap();
    let before = sim.borrow().now;

    assert_eq!(
        stack.send(handle, b"data"),
        Err(SocketError::Rejected(ErrorCode::Cme(Some(3))))
    );
    assert_eq!(sim.borrow().count("AT+USOWR"), 3);
    assert!(sim.borrow().now - before >= 300);
    assert_eq!(stack.state(handle), SocketState::Open);
}

#[test]
fn test_failed_connect_releases_modem_socket() {
    let (sim, mut stack) = stack();
    tcp_peer(&sim);
    sim.borrow_mut().on("AT+USOCO=", |_| vec![cme(30)]);

    assert_eq!(
        stack.open("example.com", 80, Protocol::Tcp),
        Err(SocketError::OpenFailed(OpenFailure::Rejected(ErrorCode::Cme(Some(30)))))
    );
    assert_eq!(sim.borrow().last_command(), Some("AT+USOCL=0"));

    sim.borrow_mut().on("AT+USOCO=", |_| vec![ok()]);
    let handle = stack.open("example.com", 80, Protocol::Tcp).unwrap();
    assert_eq!(stack.state(handle), SocketState::Open);
}

#[test]
fn test_cancelled_connect() {
    let (sim, mut stack) = stack();
    tcp_peer(&sim);
    let token = Rc::new(CancelToken::new());
    {
        let mut sim = sim.borrow_mut();
        sim.silence("AT+USOCO=");
        sim.cancel_at(500, token.clone());
    }

    assert_eq!(
        stack.open_cancellable("example.com", 80, Protocol::Tcp, Some(&token)),
        Err(SocketError::Cancelled)
    );
    assert_eq!(sim.borrow().last_command(), Some("AT+USOCL=0"));

    token.reset();
    sim.borrow_mut().on("AT+USOCO=", |_| vec![ok()]);
    let handle = stack
        .open_cancellable("example.com", 80, Protocol::Tcp, Some(&token))
        .unwrap();
    assert_eq!(handle.id(), 0);
}

#[test]
fn test_cancel_during_create_releases_late_socket() {
    let (sim, mut stack) = stack();
    tcp_peer(&sim);
    let token = Rc::new(CancelToken::new());
    {
        let mut sim = sim.borrow_mut();
        sim.on("AT+USOCR=6", |_| {
            vec![Action::After(800, b"\r\n+USOCR: 0\r\n\r\nOK\r\n".to_vec())]
        });
        sim.cancel_at(300, token.clone());
    }

    assert_eq!(
        stack.open_cancellable("example.com", 80, Protocol::Tcp, Some(&token)),
        Err(SocketError::Cancelled)
    );
    assert_eq!(sim.borrow().commands, ["AT+USOCR=6", "AT+USOCL=0"]);

    token.reset();
    sim.borrow_mut().on("AT+USOCR=6", |_| vec![lines(&["+USOCR: 0"])]);
    let handle = stack
        .open_cancellable("example.com", 80, Protocol::Tcp, Some(&token))
        .unwrap();
    assert_eq!(handle.id(), 0);
    assert_eq!(stack.state(handle), SocketState::Open);
}

#[test]
fn test_create_failures() {
    let (sim, mut stack) = stack();
    sim.borrow_mut().on("AT+USOCR=6", |_| vec![lines(&["+USOCR: 9"])]);
    assert_eq!(
        stack.open("example.com", 80, Protocol::Tcp),
        Err(SocketError::OpenFailed(OpenFailure::BadResponse))
    );
    assert_eq!(sim.borrow().last_command(), Some("AT+USOCL=9"));

    sim.borrow_mut().silence("AT+USOCR=6");
    assert_eq!(
        stack.open("example.com", 80, Protocol::Tcp),
        Err(SocketError::OpenFailed(OpenFailure::Timeout))
    );
}

#[test]
fn test_invalid_endpoints() {
    let (sim, mut stack) = stack();
    for (host, port) in [("", 80), ("bad\"host", 80), ("example.com", 0)] {
        assert_eq!(
            stack.open(host, port, Protocol::Tcp),
            Err(SocketError::InvalidArgument)
        );
    }
    assert!(sim.borrow().commands.is_empty());
}

#[test]
fn test_channel_loss_fails_sockets() {
    let (sim, mut stack) = stack();
    tcp_peer(&sim);
    let handle = stack.open("example.com", 80, Protocol::Tcp).unwrap();

    sim.borrow_mut().fail_reads = true;
    let mut buf = [0u8; 8];
    assert_eq!(stack.receive(handle, &mut buf), Err(SocketError::ChannelLost));
    assert_eq!(stack.state(handle), SocketState::Error);
    assert_eq!(stack.receive(handle, &mut buf), Err(SocketError::ChannelLost));

    stack.close(handle).unwrap();
    assert_eq!(stack.state(handle), SocketState::Closed);
}
