//! Batch drivers exercised against a canned-response loopback server.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fourfetch::{
    framer, request, BatchConfig, ConnectionContext, Interest, MemorySink, StagePipeline, Step,
    Strategy,
};

const ALL_STRATEGIES: [Strategy; 4] = [
    Strategy::Serial,
    Strategy::ThreadPoolBlocking,
    Strategy::CallbackChain,
    Strategy::FutureChain,
];

/// Serves `connections` connections on an ephemeral port. Each connection is
/// handled on its own thread: the request is read up to its terminator, the
/// response pieces are written with `piece_delay` in between, then the
/// connection closes. Returns the port.
fn spawn_server(connections: usize, pieces: Vec<Vec<u8>>, piece_delay: Duration) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let port = listener.local_addr().expect("local addr").port();
    thread::spawn(move || {
        for _ in 0..connections {
            let (mut stream, _) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            let pieces = pieces.clone();
            thread::spawn(move || {
                let mut received = Vec::new();
                let mut buf = [0u8; 512];
                while !received.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => return,
                        Ok(n) => received.extend_from_slice(&buf[..n]),
                    }
                }
                for (index, piece) in pieces.iter().enumerate() {
                    if index > 0 {
                        thread::sleep(piece_delay);
                    }
                    if stream.write_all(piece).is_err() {
                        return;
                    }
                    let _ = stream.flush();
                }
            });
        }
    });
    port
}

/// Accepts one connection, reads the request, and then goes silent without
/// ever closing, so the Receive stage stays pending.
fn spawn_silent_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let port = listener.local_addr().expect("local addr").port();
    thread::spawn(move || {
        let (mut stream, _) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(_) => return,
        };
        let mut buf = [0u8; 512];
        let _ = stream.read(&mut buf);
        thread::sleep(Duration::from_secs(5));
    });
    port
}

fn run(hosts: Vec<String>, strategy: Strategy, port: u16) -> Vec<fourfetch::CompletedExchange> {
    let mut config = BatchConfig::new(hosts, strategy);
    config.port = port;
    let sink = Arc::new(MemorySink::new());
    fourfetch::run_batch(&config, sink.clone());
    sink.take()
}

#[test]
fn every_strategy_fetches_the_whole_batch() {
    let response = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello".to_vec();
    for &strategy in &ALL_STRATEGIES {
        let port = spawn_server(3, vec![response.clone()], Duration::from_millis(0));
        let hosts = vec![
            "127.0.0.1/one".to_string(),
            "127.0.0.1/two".to_string(),
            "127.0.0.1/three".to_string(),
        ];
        let mut exchanges = run(hosts, strategy, port);
        exchanges.sort_by_key(|e| e.id);

        assert_eq!(exchanges.len(), 3, "{:?} lost exchanges", strategy);
        for (index, exchange) in exchanges.iter().enumerate() {
            assert_eq!(exchange.id, index as u32, "{:?} ids", strategy);
            assert_eq!(exchange.hostname, "127.0.0.1");
            assert_eq!(
                framer::body(&exchange.response),
                Some(&b"hello"[..]),
                "{:?} body",
                strategy
            );
        }
    }
}

#[test]
fn response_split_across_many_reads_is_assembled_in_order() {
    let pieces = vec![
        b"HTTP/1.1 200 OK\r\nContent-Le".to_vec(),
        b"ngth: 12\r\n\r\nhello,".to_vec(),
        b" world".to_vec(),
    ];
    let port = spawn_server(1, pieces, Duration::from_millis(20));
    let exchanges = run(vec!["127.0.0.1".to_string()], Strategy::Serial, port);

    assert_eq!(exchanges.len(), 1);
    assert_eq!(framer::body(&exchanges[0].response), Some(&b"hello, world"[..]));
    assert_eq!(
        framer::declared_content_length(&exchanges[0].response).unwrap(),
        12
    );
}

#[test]
fn peer_close_before_declared_length_completes_with_what_arrived() {
    // The server promises 50 bytes but closes after 3. Graceful early stop:
    // the accumulated bytes are still delivered.
    let pieces = vec![b"HTTP/1.1 200 OK\r\nContent-Length: 50\r\n\r\nhel".to_vec()];
    let port = spawn_server(1, pieces, Duration::from_millis(0));
    let exchanges = run(vec!["127.0.0.1".to_string()], Strategy::Serial, port);

    assert_eq!(exchanges.len(), 1);
    assert!(exchanges[0].response.ends_with(b"hel"));
    assert!(!framer::is_complete(&exchanges[0].response));
}

#[test]
fn one_unresolvable_host_does_not_sink_the_batch() {
    let response = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok".to_vec();
    for &strategy in &ALL_STRATEGIES {
        let port = spawn_server(2, vec![response.clone()], Duration::from_millis(0));
        let hosts = vec![
            "127.0.0.1/a".to_string(),
            // RFC 2606 reserves .invalid; resolution must fail.
            "no-such-host.invalid/b".to_string(),
            "127.0.0.1/c".to_string(),
        ];
        let mut exchanges = run(hosts, strategy, port);
        exchanges.sort_by_key(|e| e.id);

        let ids: Vec<u32> = exchanges.iter().map(|e| e.id).collect();
        assert_eq!(ids, [0, 2], "{:?} should drop only the failed host", strategy);
        for exchange in &exchanges {
            assert_eq!(framer::body(&exchange.response), Some(&b"ok"[..]));
        }
    }
}

#[test]
fn refused_connection_produces_no_artifact_and_returns() {
    // Bind then immediately drop, so the port is known-dead.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        listener.local_addr().expect("local addr").port()
    };
    let exchanges = run(vec!["127.0.0.1".to_string()], Strategy::Serial, port);
    assert!(exchanges.is_empty());
}

#[test]
fn stages_complete_strictly_in_order() {
    let port = spawn_silent_server();
    let ctx = ConnectionContext::resolve("127.0.0.1", 0, port).expect("resolve loopback");
    assert!(!ctx.connect_signaled());
    assert!(!ctx.send_signaled());
    assert!(!ctx.receive_signaled());

    let text = request::minimal(ctx.hostname(), ctx.request_path());
    let mut pipeline = StagePipeline::new(ctx, text.into_bytes());

    // Step the pipeline manually until the first read is pending. At every
    // point, a later stage's signal implies the earlier one's.
    let mut rounds = 0;
    loop {
        let ctx = pipeline.context();
        if ctx.send_signaled() {
            assert!(ctx.connect_signaled(), "send signaled before connect");
        }
        if ctx.receive_signaled() {
            assert!(ctx.send_signaled(), "receive signaled before send");
        }
        match pipeline.advance().expect("pipeline failed") {
            Step::Wait(Interest::Read) => break,
            Step::Wait(interest) => pipeline.wait(interest).expect("wait failed"),
            Step::Finished => panic!("finished against a silent server"),
        }
        rounds += 1;
        assert!(rounds < 100, "pipeline did not reach the Receive stage");
    }

    let ctx = pipeline.context();
    assert!(ctx.connect_signaled());
    assert!(ctx.send_signaled());
    assert!(!ctx.receive_signaled(), "receive cannot complete: the server is silent");
}
