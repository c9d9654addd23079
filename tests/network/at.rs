use std::cell::Cell;
use std::rc::Rc;

use libcellular::diag::Diagnostics;
use libcellular::network::CancelToken;
use libcellular::network::at::{Category, CategorySet, Command, EngineConfig, ErrorCode, INBOX_DEPTH, Response};
use libcellular::network::error::EngineError;

use crate::sim::*;

fn texts(response: &Response) -> Vec<String> {
    response
        .lines()
        .iter()
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect()
}

#[test]
fn test_notifications_interleaved_with_response() {
    let (sim, mut engine) = rig();
    {
        let mut sim = sim.borrow_mut();
        sim.max_read = 3;
        sim.on("AT+CSQ", |_| {
            vec![Action::Reply(
                b"\r\n+UUSORD: 0,5\r\n\r\n+CSQ: 17,99\r\n\r\n+UUSOCL: 1\r\n\r\nOK\r\n".to_vec(),
            )]
        });
    }
    let sockets = engine
        .register_listener(CategorySet::of(&[Category::SocketData, Category::SocketClosed]))
        .unwrap();

    let response = engine.execute(Command::new("AT+CSQ").unwrap()).unwrap();
    assert_eq!(texts(&response), vec!["+CSQ: 17,99"]);

    let first = engine.next_notification(sockets).unwrap();
    assert_eq!(first.category(), Category::SocketData);
    assert_eq!(first.line(), "+UUSORD: 0,5");
    let second = engine.next_notification(sockets).unwrap();
    assert_eq!(second.category(), Category::SocketClosed);
    assert_eq!(second.line(), "+UUSOCL: 1");
    assert!(engine.next_notification(sockets).is_none());
}

#[test]
fn test_late_result_is_not_attributed_to_next_command() {
    let (sim, mut engine) = rig();
    {
        let mut sim = sim.borrow_mut();
        sim.on("AT+COPS=?", |_| {
            vec![Action::After(150, b"\r\n+COPS: (1,\"late\")\r\n\r\nOK\r\n".to_vec())]
        });
        sim.on("AT+CSQ", |_| vec![lines(&["+CSQ: 20,0"])]);
    }

    let slow = Command::new("AT+COPS=?").unwrap().with_timeout(100);
    assert_eq!(engine.execute(slow).unwrap(), Response::Timeout);

    let response = engine.execute(Command::new("AT+CSQ").unwrap()).unwrap();
    assert_eq!(texts(&response), vec!["+CSQ: 20,0"]);
    // The next command waits for the line to go quiet after the late reply.
    assert!(sim.borrow().now >= 400);
}

#[test]
fn test_error_results_carry_codes() {
    let (sim, mut engine) = rig();
    {
        let mut sim = sim.borrow_mut();
        sim.on("AT+CPIN?", |_| vec![cme(10)]);
        sim.on("AT+COPS", |_| vec![error()]);
    }

    match engine.execute(Command::new("AT+CPIN?").unwrap()).unwrap() {
        Response::Error(code, message) => {
            assert_eq!(code, ErrorCode::Cme(Some(10)));
            assert_eq!(message.as_str(), "SIM not inserted");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(
        engine.execute_ok(Command::new("AT+COPS=0").unwrap()),
        Err(EngineError::Rejected(ErrorCode::Generic))
    );
}

#[test]
fn test_echo_and_garbage_are_dropped() {
    let (sim, mut engine) = rig();
    {
        let mut sim = sim.borrow_mut();
        sim.inject(&[0xff, 0xfe, b'\r', b'\n']);
        sim.on("AT+CGMI", |_| {
            vec![Action::Reply(b"AT+CGMI\r\r\nu-blox\r\n\r\nOK\r\n".to_vec())]
        });
    }

    let lines = engine.execute_ok(Command::new("AT+CGMI").unwrap()).unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(&lines[0][..], b"u-blox");
}

#[test]
fn test_payload_with_line_breaks_is_one_line() {
    let (sim, mut engine) = rig();
    sim.borrow_mut().on("AT+USORD=0,7", |_| vec![read_reply(0, b"ab\r\nOK\r")]);

    let response = engine.execute(Command::new("AT+USORD=0,7").unwrap()).unwrap();
    assert_eq!(response.lines().len(), 1);
    assert_eq!(&response.lines()[0][..], b"+USORD: 0,7,\"ab\r\nOK\r\"");
}

#[test]
fn test_data_prompt_streams_payload() {
    let (sim, mut engine) = rig();
    accept_writes(&mut sim.borrow_mut());

    let command = Command::new("AT+USOWR=0,5").unwrap();
    let response = engine.execute_with_data(command, b"hello", None).unwrap();
    assert_eq!(response.field("+USOWR:"), Some("0,5"));
    assert_eq!(sim.borrow().payloads, vec![b"hello".to_vec()]);
}

#[test]
fn test_solicited_registration_is_a_response_line() {
    let (sim, mut engine) = rig();
    sim.borrow_mut().on("AT+CEREG?", |_| vec![lines(&["+CEREG: 1,5"])]);
    let registration = engine
        .register_listener(CategorySet::of(&[Category::Registration]))
        .unwrap();

    let response = engine.execute(Command::new("AT+CEREG?").unwrap()).unwrap();
    assert_eq!(response.field("+CEREG:"), Some("1,5"));
    assert!(engine.next_notification(registration).is_none());

    sim.borrow_mut().inject(&urc("+CEREG: 5"));
    engine.service().unwrap();
    let notification = engine.next_notification(registration).unwrap();
    assert_eq!(notification.params(), "5");
}

#[test]
fn test_retry_until_ok() {
    let (sim, mut engine) = rig();
    let calls = Rc::new(Cell::new(0));
    let seen = calls.clone();
    sim.borrow_mut().on("AT+CFUN=1", move |_| {
        seen.set(seen.get() + 1);
        if seen.get() < 3 { vec![error()] } else { vec![ok()] }
    });

    let response = engine
        .execute_with_retry(Command::new("AT+CFUN=1").unwrap(), 5, 500)
        .unwrap();
    assert!(response.is_ok());
    assert_eq!(calls.get(), 3);
    assert!(sim.borrow().now >= 1_000);
}

#[test]
fn test_retry_returns_last_failure() {
    let (sim, mut engine) = rig();
    sim.borrow_mut().on("AT+CFUN=1", |_| vec![cme(30)]);

    let response = engine
        .execute_with_retry(Command::new("AT+CFUN=1").unwrap(), 2, 100)
        .unwrap();
    assert!(matches!(response, Response::Error(ErrorCode::Cme(Some(30)), _)));
    assert_eq!(sim.borrow().count("AT+CFUN=1"), 2);
}

#[test]
fn test_submitted_commands_complete_in_order() {
    let (sim, mut engine) = rig();
    {
        let mut sim = sim.borrow_mut();
        sim.on("AT+CGMI", |_| vec![lines(&["u-blox"])]);
        sim.on("AT+CGMM", |_| vec![lines(&["SARA-R510M8S"])]);
    }

    let first = engine.submit(Command::new("AT+CGMI").unwrap()).unwrap();
    let second = engine.submit(Command::new("AT+CGMM").unwrap()).unwrap();
    assert_ne!(first, second);

    let mut completions = Vec::new();
    for _ in 0..100 {
        if let Some(done) = engine.poll().unwrap() {
            completions.push(done);
        }
        if completions.len() == 2 {
            break;
        }
    }
    assert_eq!(completions.len(), 2);
    assert_eq!(completions[0].tag, first);
    assert_eq!(completions[0].response.first_text(), Some("u-blox"));
    assert_eq!(completions[1].tag, second);
    assert_eq!(completions[1].response.first_text(), Some("SARA-R510M8S"));
    assert_eq!(sim.borrow().commands, vec!["AT+CGMI", "AT+CGMM"]);
    assert!(engine.is_idle());
}

#[test]
fn test_queue_is_bounded() {
    let (_sim, mut engine) = rig();
    for _ in 0..4 {
        engine.submit(Command::new("AT").unwrap()).unwrap();
    }
    assert_eq!(engine.submit(Command::new("AT").unwrap()), Err(EngineError::Busy));
}

#[test]
fn test_blocking_call_finishes_queued_commands_first() {
    let (sim, mut engine) = rig();
    sim.borrow_mut().on("AT+CGMI", |_| vec![lines(&["u-blox"])]);

    let queued = engine.submit(Command::new("AT+CGMI").unwrap()).unwrap();
    assert!(engine.execute(Command::new("AT").unwrap()).unwrap().is_ok());
    assert_eq!(sim.borrow().commands, vec!["AT+CGMI", "AT"]);

    let response = engine.take_completion(queued).unwrap();
    assert_eq!(response.first_text(), Some("u-blox"));
    assert!(engine.take_completion(queued).is_none());
}

#[test]
fn test_cancel_in_flight_command() {
    let (sim, mut engine) = rig();
    let token = Rc::new(CancelToken::new());
    {
        let mut sim = sim.borrow_mut();
        sim.silence("AT+COPS=?");
        sim.cancel_at(300, token.clone());
    }

    let search = Command::new("AT+COPS=?").unwrap().with_timeout(60_000);
    assert_eq!(
        engine.execute_cancellable(search, Some(&token)),
        Err(EngineError::Cancelled)
    );
    let cancelled_at = sim.borrow().now;
    assert!((300..1_000).contains(&cancelled_at));

    // Already cancelled: nothing is sent.
    let sent = sim.borrow().commands.len();
    assert_eq!(
        engine.execute_cancellable(Command::new("AT").unwrap(), Some(&token)),
        Err(EngineError::Cancelled)
    );
    assert_eq!(sim.borrow().commands.len(), sent);

    token.reset();
    assert!(engine.execute(Command::new("AT").unwrap()).unwrap().is_ok());
}

#[test]
fn test_channel_failure_holds_until_reset() {
    let (sim, mut engine) = rig();
    sim.borrow_mut().fail_reads = true;

    assert_eq!(engine.execute(Command::new("AT").unwrap()), Err(EngineError::ChannelLost));
    assert!(engine.is_lost());

    sim.borrow_mut().fail_reads = false;
    assert_eq!(engine.execute(Command::new("AT").unwrap()), Err(EngineError::ChannelLost));
    assert_eq!(engine.submit(Command::new("AT").unwrap()), Err(EngineError::ChannelLost));

    engine.reset();
    assert!(engine.execute(Command::new("AT").unwrap()).unwrap().is_ok());
}

#[test]
fn test_full_inbox_drops_oldest() {
    let (sim, mut engine) = rig();
    let calls = engine
        .register_listener(CategorySet::of(&[Category::IncomingCall]))
        .unwrap();
    {
        let mut sim = sim.borrow_mut();
        for index in 0..INBOX_DEPTH + 2 {
            sim.inject(&urc(&format!("+CMTI: \"ME\",{}", index)));
        }
    }

    engine.service().unwrap();
    assert_eq!(engine.dropped_notifications(calls), 2);
    let oldest = engine.next_notification(calls).unwrap();
    assert_eq!(oldest.line(), "+CMTI: \"ME\",2");
    let mut remaining = 1;
    while engine.next_notification(calls).is_some() {
        remaining += 1;
    }
    assert_eq!(remaining, INBOX_DEPTH);
}

#[test]
fn test_listeners_are_independent() {
    let (sim, mut engine) = rig();
    let all = engine.register_listener(CategorySet::ALL).unwrap();
    let data = engine
        .register_listener(CategorySet::of(&[Category::SocketData]))
        .unwrap();
    sim.borrow_mut().inject(&urc("+UUSORD: 3,12"));
    sim.borrow_mut().inject(&urc("RING"));

    engine.service().unwrap();
    assert_eq!(engine.next_notification(data).unwrap().line(), "+UUSORD: 3,12");
    assert!(engine.next_notification(data).is_none());
    assert_eq!(engine.next_notification(all).unwrap().line(), "+UUSORD: 3,12");
    assert_eq!(engine.next_notification(all).unwrap().category(), Category::IncomingCall);

    assert!(engine.unregister_listener(data));
    assert!(!engine.unregister_listener(data));
}

#[test]
fn test_transcript_capture() {
    let transcript = Transcript::leaked();
    let config = EngineConfig {
        capture_transcript: true,
        ..EngineConfig::default()
    };
    let (sim, engine) = rig_with(config);
    let mut engine = engine.with_diagnostics(Diagnostics::silent().with_record_sink(transcript));
    sim.borrow_mut().on("AT+CSQ", |_| vec![lines(&["+CSQ: 17,99"])]);

    engine.execute(Command::new("AT+CSQ").unwrap()).unwrap();
    let text = transcript.text();
    assert!(text.contains(">> AT+CSQ\n"));
    assert!(text.contains("<< +CSQ: 17,99\n"));
    assert!(text.contains("<< OK\n"));
    assert!(transcript.streams().iter().all(|stream| stream == "at"));
}

#[test]
fn test_command_length_is_checked() {
    let long = format!("AT+{}", "X".repeat(200));
    assert_eq!(Command::new(&long), Err(EngineError::CommandTooLong));
}
