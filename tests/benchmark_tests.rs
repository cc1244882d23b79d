//! Performance benchmarks for the hot transport paths

use protocol::{messages, zerocode, Packet, PacketFlags, SequenceWindow, TemplateRegistry};
use region::{AgentCircuitData, AgentCircuitManager, MemorySink, PacketServer, RegionConfig, ThrottleCategory};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

fn sample_packet() -> Packet {
    let names: Vec<(u32, String)> = (0..20).map(|i| (i, format!("object {}", i))).collect();
    let pairs: Vec<(u32, &str)> = names.iter().map(|(id, name)| (*id, name.as_str())).collect();
    let mut packet = Packet::reliable(42, messages::object_name(Uuid::new_v4(), Uuid::nil(), &pairs));
    packet.acks = vec![1, 2, 3, 4];
    packet
}

/// Benchmarks encoding and decoding a mid-sized packet
#[test]
fn benchmark_codec_round_trip() {
    let templates = TemplateRegistry::standard();
    let packet = sample_packet();

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = protocol::encode(&packet).unwrap();
        let decoded = protocol::decode(&bytes, &templates).unwrap();
        assert_eq!(decoded.sequence, 42);
    }

    let duration = start.elapsed();
    println!(
        "Codec round trip: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Generous bound so unoptimised builds pass
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks zero-coding a body dominated by zero runs
#[test]
fn benchmark_zerocode() {
    let mut body = vec![0u8; 1024];
    for i in (0..body.len()).step_by(37) {
        body[i] = i as u8 | 1;
    }

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let packed = zerocode::encode(&body);
        let unpacked = zerocode::decode(&packed).unwrap();
        assert_eq!(unpacked.len(), body.len());
    }

    let duration = start.elapsed();
    println!(
        "Zerocode: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 5000);
}

/// Benchmarks the duplicate window under sustained inserts
#[test]
fn benchmark_sequence_window() {
    let mut window = SequenceWindow::new(1024);

    let iterations = 200_000u32;
    let start = Instant::now();

    for seq in 1..=iterations {
        window.insert(seq);
        assert!(!window.insert(seq));
    }

    let duration = start.elapsed();
    println!(
        "Sequence window: {} inserts in {:?} ({:.2} ns/insert)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert_eq!(window.len(), 1024);
    assert!(duration.as_millis() < 5000);
}

fn connected_server() -> (PacketServer, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let auth = Arc::new(AgentCircuitManager::new());
    let server = PacketServer::inline(RegionConfig::default(), auth.clone(), sink.clone());

    let agent = Uuid::new_v4();
    let session = Uuid::new_v4();
    auth.add_new_circuit(AgentCircuitData::new(1, agent, session));
    let hello = Packet::reliable(1, messages::use_circuit_code(1, session, agent));
    server
        .process_datagram(&protocol::encode(&hello).unwrap(), "127.0.0.1:5000".parse().unwrap(), Instant::now())
        .unwrap();
    sink.take();
    (server, sink)
}

/// Benchmarks inbound processing of reliable packets on one circuit
#[test]
fn benchmark_inbound_processing() {
    let (server, _sink) = connected_server();
    let from = "127.0.0.1:5000".parse().unwrap();

    let iterations = 20_000u32;
    let datagrams: Vec<Vec<u8>> = (2..iterations + 2)
        .map(|seq| {
            let mut packet = Packet::new(seq, messages::complete_ping_check(seq as u8));
            packet.flags |= PacketFlags::RELIABLE;
            protocol::encode(&packet).unwrap()
        })
        .collect();

    let start = Instant::now();
    for datagram in &datagrams {
        server.process_datagram(datagram, from, Instant::now()).unwrap();
    }
    let duration = start.elapsed();

    println!(
        "Inbound processing: {} datagrams in {:?} ({:.2} μs/datagram)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(server.stats().received(), u64::from(iterations));
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks unthrottled reliable sends on one circuit
#[test]
fn benchmark_outbound_sends() {
    let (server, sink) = connected_server();
    let message = sample_packet().message;

    let iterations = 1_000;
    let start = Instant::now();
    for _ in 0..iterations {
        server
            .send_reliable(1, &message, ThrottleCategory::Unknown)
            .unwrap();
    }
    let duration = start.elapsed();

    println!(
        "Outbound sends: {} packets in {:?} ({:.2} μs/packet)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(sink.len(), iterations);
    assert_eq!(server.circuit(1).unwrap().unacked(), iterations);
    assert!(duration.as_millis() < 5000);
}
