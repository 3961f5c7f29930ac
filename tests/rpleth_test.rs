//! Rpleth gateway: card events stream to the TCP client, commands are acked.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use serial_test::serial;

use gatehouse::config::BusSettings;
use gatehouse::core::frame::Frame;
use gatehouse::protocol::rpleth::{decode, encode, HidCommand, ReadBuffer, RplethPacket, SensorType};
use gatehouse::{MessageBus, ModuleDefinition, ModuleManager};

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn gateway(port: u16, reader: &str) -> (MessageBus, ModuleManager) {
    let bus = MessageBus::new(&BusSettings::default());
    let mut manager = ModuleManager::with_builtin_modules(bus.clone());
    let config: toml::Value = toml::from_str(&format!(
        r#"
        port = {port}
        reader = "{reader}"
        stream_mode = true
        "#
    ))
    .unwrap();
    manager
        .load_module(ModuleDefinition::new("rpleth", "rpleth").with_config(config))
        .unwrap();
    manager.init_modules().unwrap();
    (bus, manager)
}

fn connect(port: u16) -> TcpStream {
    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_millis(300)))
        .unwrap();
    // Let the gateway's accept run before any event is published.
    std::thread::sleep(Duration::from_millis(100));
    stream
}

/// Reads until one packet decodes, or gives up after `deadline`.
fn read_packet(stream: &mut TcpStream, deadline: Duration) -> Option<RplethPacket> {
    let mut buffer = ReadBuffer::default();
    let mut chunk = [0u8; 256];
    let start = Instant::now();
    while start.elapsed() < deadline {
        match stream.read(&mut chunk) {
            Ok(0) => return None,
            Ok(count) => {
                buffer.extend(&chunk[..count]);
                if let Some(packet) = decode(&mut buffer) {
                    return Some(packet);
                }
            }
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut => {}
            Err(_) => return None,
        }
    }
    None
}

#[test]
#[serial]
fn card_events_for_the_configured_reader_are_streamed() {
    let port = free_port();
    let (bus, mut manager) = gateway(port, "WIEGAND1");
    let mut stream = connect(port);

    bus.publish("S_WIEGAND1", Frame::of("ff:ab:cd:ef:12"));

    let packet = read_packet(&mut stream, Duration::from_secs(2)).unwrap();
    assert!(packet.is_good);
    assert_eq!(packet.sensor, SensorType::Hid as u8);
    assert_eq!(packet.command, HidCommand::Badge as u8);
    assert_eq!(packet.payload, vec![0xff, 0xab, 0xcd, 0xef, 0x12]);

    manager.stop_modules();
}

#[test]
#[serial]
fn every_connected_client_receives_the_badge_packet() {
    let port = free_port();
    let (bus, mut manager) = gateway(port, "WIEGAND1");
    let mut first = connect(port);
    let mut second = connect(port);

    bus.publish("S_WIEGAND1", Frame::of("ff:ab:cd:ef:12"));

    for stream in [&mut first, &mut second] {
        let packet = read_packet(stream, Duration::from_secs(2)).unwrap();
        assert!(packet.is_good);
        assert_eq!(packet.command, HidCommand::Badge as u8);
        assert_eq!(packet.payload, vec![0xff, 0xab, 0xcd, 0xef, 0x12]);
    }

    // A departed client must not take the survivors with it.
    drop(first);
    std::thread::sleep(Duration::from_millis(100));
    bus.publish("S_WIEGAND1", Frame::of("00:00:00:00"));

    let packet = read_packet(&mut second, Duration::from_secs(2)).unwrap();
    assert_eq!(packet.payload, vec![0x00, 0x00, 0x00, 0x00]);

    manager.stop_modules();
}

#[test]
#[serial]
fn events_for_other_readers_produce_no_output() {
    let port = free_port();
    let (bus, mut manager) = gateway(port, "WIEGAND1");
    let mut stream = connect(port);

    bus.publish("S_OTHER_READER", Frame::of("00:00:00:00"));

    assert!(read_packet(&mut stream, Duration::from_millis(500)).is_none());

    manager.stop_modules();
}

#[test]
#[serial]
fn well_formed_commands_are_acknowledged_by_echo() {
    let port = free_port();
    let (_bus, mut manager) = gateway(port, "WIEGAND1");
    let mut stream = connect(port);

    let wire = encode(SensorType::Hid, HidCommand::Beep as u8, &[0x01, 0xf4]).unwrap();
    stream.write_all(&wire).unwrap();

    let ack = read_packet(&mut stream, Duration::from_secs(2)).unwrap();
    assert!(ack.is_good);
    assert_eq!(ack.sensor, SensorType::Hid as u8);
    assert_eq!(ack.command, HidCommand::Beep as u8);
    assert_eq!(ack.payload, vec![0x01, 0xf4]);

    manager.stop_modules();
}
