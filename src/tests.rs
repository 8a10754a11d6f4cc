#[cfg(test)]
mod tests {
    use crate::checks::{Checks, HAS_CONTENT, HAS_SENDER, HAS_TIMESTAMP, STATUS_IS_101};
    use crate::config::DriverConfig;
    use crate::frame::{read_frame, write_frame, Frame, OpCode};
    use crate::message::Broadcast;
    use crate::metrics::RunCounters;
    use crate::payload::{AlphanumericPayload, PayloadSource};
    use crate::ramp::{RampSchedule, RampStage};
    use crate::request::{accept_key, build_upgrade_request, client_url, parse_upgrade_response};
    use crate::runner::{RunReport, Runner};
    use crate::session::connect;
    use crate::workload::run_virtual_user;
    use serde_json::json;
    use std::error::Error;
    use std::sync::Arc;
    use std::time::Duration;
    use time::OffsetDateTime;
    use tokio::io::{split, AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;
    use uuid::Uuid;

    // Server half of the upgrade, for loopback tests: consume the request
    // head, answer 101 with the derived accept key, hand back the halves so
    // the test can speak frames.
    async fn accept_websocket(
        stream: TcpStream,
    ) -> (BufReader<ReadHalf<TcpStream>>, WriteHalf<TcpStream>) {
        let (read, mut write) = split(stream);
        let mut reader = BufReader::new(read);

        let mut key = None;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            if let Some(value) = line.strip_prefix("Sec-WebSocket-Key:") {
                key = Some(value.trim().to_string());
            }
            if line == "\r\n" {
                break;
            }
        }

        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Accept: {}\r\n\r\n",
            accept_key(&key.unwrap()),
        );
        write.write_all(response.as_bytes()).await.unwrap();

        (reader, write)
    }

    // Reads data frames off a test connection until the client closes it,
    // returning the text payloads in arrival order.
    async fn collect_messages(reader: &mut BufReader<ReadHalf<TcpStream>>) -> Vec<String> {
        let mut messages = Vec::new();
        loop {
            match read_frame(reader).await {
                Ok(frame) => match frame.opcode {
                    OpCode::Text => messages.push(String::from_utf8(frame.payload).unwrap()),
                    OpCode::Close => break,
                    _ => {}
                },
                Err(_) => break,
            }
        }
        messages
    }

    fn test_config(target: String) -> DriverConfig {
        DriverConfig {
            target,
            tick_period: Duration::from_millis(10),
            post_send_delay: Duration::from_millis(50),
            session_deadline: Duration::from_millis(400),
            sample_interval: Duration::from_millis(25),
            connect_timeout: Duration::from_secs(2),
            ..DriverConfig::default()
        }
    }

    #[test]
    fn test_stage_spec_parsing() {
        let stage: RampStage = "30s:100".parse().unwrap();
        assert_eq!(stage, RampStage::new(Duration::from_secs(30), 100));

        let stage: RampStage = "1m:50".parse().unwrap();
        assert_eq!(stage, RampStage::new(Duration::from_secs(60), 50));

        // Bare numbers are seconds
        let stage: RampStage = "45:10".parse().unwrap();
        assert_eq!(stage, RampStage::new(Duration::from_secs(45), 10));

        assert!("bogus".parse::<RampStage>().is_err());
        assert!("30s".parse::<RampStage>().is_err());
        assert!("0s:5".parse::<RampStage>().is_err());
    }

    #[test]
    fn test_schedule_totals_and_stage_targets() {
        let schedule = RampSchedule::broadcast_soak();
        assert_eq!(schedule.total_duration(), Duration::from_secs(210));

        // The end of each stage lands exactly on that stage's target.
        assert_eq!(schedule.target_at(Duration::from_secs(30)), 1_000_000);
        assert_eq!(schedule.target_at(Duration::from_secs(90)), 50);
        assert_eq!(schedule.target_at(Duration::from_secs(120)), 100);
        assert_eq!(schedule.target_at(Duration::from_secs(180)), 100);
        assert_eq!(schedule.target_at(Duration::from_secs(210)), 0);

        // Before the first stage makes any progress there is nobody to run,
        // and past the end the final target is held.
        assert_eq!(schedule.target_at(Duration::ZERO), 0);
        assert_eq!(schedule.target_at(Duration::from_secs(1000)), 0);
    }

    #[test]
    fn test_schedule_interpolates_linearly() {
        let schedule =
            RampSchedule::new(vec![RampStage::new(Duration::from_secs(10), 100)]).unwrap();
        assert_eq!(schedule.target_at(Duration::from_secs(5)), 50);
        assert_eq!(schedule.target_at(Duration::from_millis(2500)), 25);

        // A descending stage interpolates downward the same way.
        let schedule = RampSchedule::new(vec![
            RampStage::new(Duration::from_secs(10), 100),
            RampStage::new(Duration::from_secs(10), 0),
        ])
        .unwrap();
        assert_eq!(schedule.target_at(Duration::from_secs(15)), 50);
    }

    #[test]
    fn test_schedule_rejects_bad_stages() {
        assert!(RampSchedule::new(Vec::new()).is_err());
        assert!(
            RampSchedule::new(vec![RampStage::new(Duration::ZERO, 10)]).is_err()
        );
    }

    #[test]
    fn test_threshold_is_strict() {
        let checks = Checks::new();
        for i in 0..100 {
            checks.record(HAS_SENDER, i < 94);
        }
        assert!((checks.pass_rate() - 0.94).abs() < 1e-9);
        // 94% is below the bar, and sitting exactly on it is still a failure.
        assert!(!checks.meets(0.95));
        assert!(!checks.meets(0.94));
        assert!(checks.meets(0.93));
    }

    #[test]
    fn test_checks_concurrent_increments() {
        let checks = Arc::new(Checks::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let checks = checks.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..1000 {
                    checks.record(HAS_CONTENT, i % 2 == 0);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(checks.total(), 8000);
        let stats = checks.snapshot();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].passed, 4000);
        assert_eq!(stats[0].failed, 4000);
    }

    #[test]
    fn test_broadcast_missing_timestamp() {
        let checks = Checks::new();
        let broadcast = Broadcast::decode(r#"{"sender":"x","content":"hi"}"#).unwrap();
        broadcast.record_checks(&checks);

        let stats = checks.snapshot();
        let stat = |name: &str| stats.iter().find(|s| s.name == name).unwrap();
        assert_eq!(stat(HAS_SENDER).passed, 1);
        assert_eq!(stat(HAS_CONTENT).passed, 1);
        assert_eq!(stat(HAS_TIMESTAMP).failed, 1);
        assert_eq!(stat(HAS_TIMESTAMP).passed, 0);
    }

    #[test]
    fn test_broadcast_rejects_unstructured_payloads() {
        assert!(Broadcast::decode("not json").is_err());
        assert!(Broadcast::decode("[1,2,3]").is_err());

        // Extra fields are fine, presence of the three is all that matters.
        let broadcast =
            Broadcast::decode(r#"{"sender":"a","content":"b","timestamp":1,"room":"c"}"#).unwrap();
        assert!(broadcast.sender.is_some());
        assert!(broadcast.content.is_some());
        assert!(broadcast.timestamp.is_some());
    }

    #[test]
    fn test_client_url_carries_identity() {
        let url = client_url("ws://127.0.0.1:9090/ws", "loadtest", 3).unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:9090/ws?username=loadtest-3");

        assert!(client_url("https://127.0.0.1/ws", "loadtest", 0).is_err());
        assert!(client_url("wss://127.0.0.1/ws", "loadtest", 0).is_err());
    }

    #[test]
    fn test_upgrade_request_contents() {
        let url = client_url("ws://localhost:9090/ws", "loadtest", 3).unwrap();
        let request = build_upgrade_request(&url, "dGhlIHNhbXBsZSBub25jZQ==").unwrap();

        assert!(request.starts_with("GET /ws?username=loadtest-3 HTTP/1.1"));
        assert!(request.contains("Host: localhost:9090"));
        assert!(request.contains("Upgrade: websocket"));
        assert!(request.contains("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ=="));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_accept_key_known_vector() {
        // The sample handshake from RFC 6455 section 1.3.
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_parse_upgrade_response() {
        let head = b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n";
        let response = parse_upgrade_response(head).unwrap();
        assert_eq!(response.status, 101);
        assert_eq!(
            response.accept.as_deref(),
            Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
        );

        let head = b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n";
        let response = parse_upgrade_response(head).unwrap();
        assert_eq!(response.status, 403);
        assert!(response.accept.is_none());
    }

    #[test]
    fn test_payload_source_sizes() {
        let source = AlphanumericPayload;
        let payload = source.string(1000);
        assert_eq!(payload.len(), 1000);
        assert!(payload.chars().all(|c| c.is_ascii_alphanumeric()));

        assert_eq!(source.string(10_000).len(), 10_000);
    }

    #[tokio::test]
    async fn test_frame_round_trips() -> Result<(), Box<dyn Error>> {
        let (mut client, mut server) = tokio::io::duplex(256 * 1024);

        // Client-to-server frames are masked on the wire and unmasked on
        // arrival.
        write_frame(&mut client, Frame::text(b"hello".to_vec()), true).await?;
        let frame = read_frame(&mut server).await?;
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload, b"hello");

        // 16-bit extended length.
        let payload = vec![b'a'; 10_000];
        write_frame(&mut client, Frame::text(payload.clone()), true).await?;
        let frame = read_frame(&mut server).await?;
        assert_eq!(frame.payload, payload);

        // 64-bit extended length.
        let payload = vec![b'b'; 70_000];
        write_frame(&mut client, Frame::text(payload.clone()), true).await?;
        let frame = read_frame(&mut server).await?;
        assert_eq!(frame.payload, payload);

        // Server-to-client frames go unmasked.
        write_frame(&mut server, Frame::text(b"broadcast".to_vec()), false).await?;
        let frame = read_frame(&mut client).await?;
        assert_eq!(frame.payload, b"broadcast");

        Ok(())
    }

    #[tokio::test]
    async fn test_fragmented_control_frame_rejected() -> Result<(), Box<dyn Error>> {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(
            &mut client,
            Frame::new(false, OpCode::Ping, Vec::new()),
            true,
        )
        .await?;
        assert!(read_frame(&mut server).await.is_err());
        Ok(())
    }

    #[test]
    fn test_opcode_parsing() {
        assert_eq!(OpCode::from(0x1).unwrap(), OpCode::Text);
        assert_eq!(OpCode::from(0x8).unwrap(), OpCode::Close);
        assert!(OpCode::from(0x3).is_err());
        assert!(OpCode::Close.is_control());
        assert!(!OpCode::Text.is_control());
    }

    #[tokio::test]
    async fn test_session_close_is_single_fire() -> Result<(), Box<dyn Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut reader, _write) = accept_websocket(stream).await;
            collect_messages(&mut reader).await
        });

        let url = client_url(&format!("ws://{}/ws", addr), "loadtest", 0)?;
        let (session, _events) = connect(&url, Duration::from_secs(2)).await?;

        assert!(session.close());
        // The loser of the close race must land on a no-op.
        assert!(!session.close());
        assert!(session.is_closed());
        assert!(session.send_text(String::from("late")).is_err());

        server.await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_workload_sends_in_order_and_validates() -> Result<(), Box<dyn Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut reader, mut write) = accept_websocket(stream).await;

            // One well-formed broadcast, then collect what the client sends.
            let broadcast = json!({
                "sender": "loadtest-7",
                "content": "hello everyone",
                "timestamp": "2024-05-04T10:00:00Z",
            })
            .to_string();
            write_frame(&mut write, Frame::text(broadcast.into_bytes()), false)
                .await
                .unwrap();

            collect_messages(&mut reader).await
        });

        let config = Arc::new(test_config(format!("ws://{}/ws", addr)));
        let checks = Arc::new(Checks::new());
        let counters = Arc::new(RunCounters::new());
        run_virtual_user(0, config, checks.clone(), counters.clone(), Arc::new(AlphanumericPayload)).await;

        let messages = timeout(Duration::from_secs(5), server).await??;
        assert_eq!(messages.len(), 3, "one tick sends exactly three messages");
        assert_eq!(messages[0], "Message from VU 0");
        assert_eq!(messages[1].len(), 1000);
        assert_eq!(messages[2].len(), 10_000);

        let stats = checks.snapshot();
        let stat = |name: &str| stats.iter().find(|s| s.name == name).unwrap();
        assert_eq!(stat(STATUS_IS_101).passed, 1);
        assert_eq!(stat(HAS_SENDER).passed, 1);
        assert_eq!(stat(HAS_CONTENT).passed, 1);
        assert_eq!(stat(HAS_TIMESTAMP).passed, 1);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.messages_sent, 3);
        assert_eq!(snapshot.sessions_completed, 1);
        assert_eq!(snapshot.sessions_failed, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_workload_ends_at_deadline_without_messages() -> Result<(), Box<dyn Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        // A server that accepts and listens but never says anything.
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut reader, _write) = accept_websocket(stream).await;
            collect_messages(&mut reader).await
        });

        let config = Arc::new(DriverConfig {
            tick_period: Duration::from_millis(20),
            post_send_delay: Duration::from_secs(5),
            session_deadline: Duration::from_millis(150),
            ..test_config(format!("ws://{}/ws", addr))
        });
        let checks = Arc::new(Checks::new());
        let counters = Arc::new(RunCounters::new());

        // The post-send delay would hold the cycle far past the deadline,
        // the bound has to cut through it.
        timeout(
            Duration::from_secs(2),
            run_virtual_user(0, config, checks.clone(), counters.clone(), Arc::new(AlphanumericPayload)),
        )
        .await?;

        let stats = checks.snapshot();
        assert_eq!(stats.len(), 1, "only the handshake check is recorded");
        assert_eq!(stats[0].name, STATUS_IS_101);
        assert_eq!(stats[0].passed, 1);
        assert_eq!(counters.snapshot().sessions_completed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_workload_records_refused_handshake() -> Result<(), Box<dyn Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = split(stream);
            let mut reader = BufReader::new(read);
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).await.unwrap();
                if line == "\r\n" {
                    break;
                }
            }
            write
                .write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
        });

        let config = Arc::new(test_config(format!("ws://{}/ws", addr)));
        let checks = Arc::new(Checks::new());
        let counters = Arc::new(RunCounters::new());
        run_virtual_user(0, config, checks.clone(), counters.clone(), Arc::new(AlphanumericPayload)).await;

        let stats = checks.snapshot();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].name, STATUS_IS_101);
        assert_eq!(stats[0].failed, 1);
        assert_eq!(counters.snapshot().sessions_failed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_workload_survives_malformed_payloads() -> Result<(), Box<dyn Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut reader, mut write) = accept_websocket(stream).await;

            // Garbage first, then a valid broadcast. The client has to keep
            // going after the first one.
            write_frame(&mut write, Frame::text(b"not json".to_vec()), false)
                .await
                .unwrap();
            let broadcast = json!({
                "sender": "s",
                "content": "c",
                "timestamp": 1714816800,
            })
            .to_string();
            write_frame(&mut write, Frame::text(broadcast.into_bytes()), false)
                .await
                .unwrap();

            collect_messages(&mut reader).await
        });

        let config = Arc::new(test_config(format!("ws://{}/ws", addr)));
        let checks = Arc::new(Checks::new());
        let counters = Arc::new(RunCounters::new());
        run_virtual_user(0, config, checks.clone(), counters.clone(), Arc::new(AlphanumericPayload)).await;
        timeout(Duration::from_secs(5), server).await??;

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.decode_failures, 1);
        assert_eq!(snapshot.messages_received, 2);

        let stats = checks.snapshot();
        let stat = |name: &str| stats.iter().find(|s| s.name == name).unwrap();
        // The malformed payload contributed nothing, the valid one passed.
        assert_eq!(stat(HAS_SENDER).passed, 1);
        assert_eq!(stat(HAS_SENDER).failed, 0);
        assert_eq!(stat(HAS_TIMESTAMP).passed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_runner_executes_schedule_end_to_end() -> Result<(), Box<dyn Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        // Accept-loop broadcast server: every client gets one valid message
        // and is then drained until it closes.
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                tokio::spawn(async move {
                    let (mut reader, mut write) = accept_websocket(stream).await;
                    let broadcast = json!({
                        "sender": "server",
                        "content": "welcome",
                        "timestamp": "2024-05-04T10:00:00Z",
                    })
                    .to_string();
                    let _ = write_frame(&mut write, Frame::text(broadcast.into_bytes()), false).await;
                    collect_messages(&mut reader).await
                });
            }
        });

        let config = DriverConfig {
            schedule: RampSchedule::new(vec![
                RampStage::new(Duration::from_millis(300), 3),
                RampStage::new(Duration::from_millis(200), 0),
            ])?,
            tick_period: Duration::from_millis(10),
            post_send_delay: Duration::from_millis(30),
            session_deadline: Duration::from_millis(120),
            sample_interval: Duration::from_millis(25),
            max_concurrent: 4,
            ..test_config(format!("ws://{}/ws", addr))
        };

        let runner = Runner::new(config)?;
        let report = timeout(Duration::from_secs(10), runner.run()).await?;

        assert!(report.counters.sessions_started >= 1);
        assert_eq!(
            report.counters.sessions_started,
            report.counters.sessions_completed + report.counters.sessions_failed,
        );
        assert!(report.elapsed >= Duration::from_millis(500));
        assert!(report.passed, "clean run must clear the threshold");

        let status = report
            .checks
            .iter()
            .find(|stat| stat.name == STATUS_IS_101)
            .unwrap();
        assert_eq!(status.failed, 0);
        Ok(())
    }

    #[test]
    fn test_report_renders_verdict() {
        let checks = Checks::new();
        for i in 0..100 {
            checks.record(HAS_SENDER, i < 94);
        }

        let report = RunReport {
            run_id: Uuid::new_v8([7u8; 16]),
            started_at: OffsetDateTime::UNIX_EPOCH,
            elapsed: Duration::from_secs(210),
            checks: checks.snapshot(),
            pass_rate: checks.pass_rate(),
            threshold: 0.95,
            passed: checks.meets(0.95),
            counters: RunCounters::new().snapshot(),
        };

        let rendered = report.to_string();
        assert!(rendered.contains("94.00% passed"));
        assert!(rendered.ends_with("FAILED"));
    }
}
