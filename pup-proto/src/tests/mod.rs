use std::time::Duration;

use assert_matches::assert_matches;
use hex_literal::hex;

use crate::lwp3::{self, DeviceCategory, DeviceType};
use crate::model::Motor;
use crate::spike::{self, cobs, test_encode};
use crate::*;

mod util;
use util::*;

#[test]
fn lwp3_connect_and_bootstrap() {
    let _guard = subscribe();
    let mut t = TestHub::new(TransportKind::Ble);
    t.hub.connect(t.now).unwrap();
    assert_eq!(t.hub.state(), HubState::Connecting);
    assert_matches!(t.io()[..], [IoAction::Open]);
    assert_eq!(
        t.events(),
        vec![HubEvent::StateChanged(HubState::Connecting)]
    );

    // BLE stays in connecting until services arrive
    t.event(TransportEvent::Connected);
    assert_eq!(t.hub.state(), HubState::Connecting);

    t.event(TransportEvent::ServicesDiscovered(lwp3_services()));
    assert_eq!(t.hub.state(), HubState::Connected);
    assert_eq!(t.hub.protocol(), Some(Protocol::Lwp3Ble));

    let io = t.io();
    assert_eq!(io.len(), 4);
    assert_matches!(io[0], IoAction::Subscribe(LWP3_TAG));
    assert_matches!(io[1], IoAction::ReadRssi);
    assert_matches!(
        &io[2],
        IoAction::Write(w) if w.payload
            == lwp3::hub_property_request(lwp3::HubProperty::BATTERY_VOLTAGE)
            && w.tag == Some(LWP3_TAG)
            && w.mode == WriteMode::WithoutResponse
    );
    assert_matches!(
        &io[3],
        IoAction::Write(w) if w.payload
            == lwp3::hub_property_enable_updates(lwp3::HubProperty::BATTERY_VOLTAGE)
    );
    assert!(t
        .events()
        .contains(&HubEvent::StateChanged(HubState::Connected)));
}

#[test]
fn battery_update_reaches_snapshot() {
    let mut t = TestHub::new(TransportKind::Ble);
    t.connect_lwp3();
    t.frame(LWP3_TAG, &hex!("06 00 01 06 06 64"));
    assert_eq!(t.hub.snapshot().battery, Some(100));
    assert_eq!(t.events(), vec![HubEvent::BatteryChanged(100)]);
}

#[test]
fn battery_events_are_dampened() {
    let mut t = TestHub::new(TransportKind::Ble);
    t.connect_lwp3();

    // a zero first reading is recorded but not announced
    t.frame(LWP3_TAG, &hex!("06 00 01 06 06 00"));
    assert_eq!(t.hub.snapshot().battery, Some(0));
    assert_eq!(t.events(), vec![]);

    t.frame(LWP3_TAG, &hex!("06 00 01 06 06 64"));
    assert_eq!(t.events(), vec![HubEvent::BatteryChanged(100)]);

    // unchanged within the window: silent
    t.frame(LWP3_TAG, &hex!("06 00 01 06 06 64"));
    assert_eq!(t.events(), vec![]);
    t.advance(Duration::from_secs(119));
    t.io();
    t.frame(LWP3_TAG, &hex!("06 00 01 06 06 64"));
    assert_eq!(t.events(), vec![]);

    // window elapsed: the same value is re-announced
    t.advance(Duration::from_secs(1));
    t.io();
    t.frame(LWP3_TAG, &hex!("06 00 01 06 06 64"));
    assert_eq!(t.events(), vec![HubEvent::BatteryChanged(100)]);

    // a change always fires immediately
    t.frame(LWP3_TAG, &hex!("06 00 01 06 06 63"));
    assert_eq!(t.events(), vec![HubEvent::BatteryChanged(99)]);
}

#[test]
fn attach_streams_values_and_detach_clears() {
    let _guard = subscribe();
    let mut t = TestHub::new(TransportKind::Ble);
    t.connect_lwp3();

    // Distance Sensor appears on port A
    t.frame(
        LWP3_TAG,
        &hex!("0F 00 04 00 01 3E 00 01 00 00 00 02 00 00 00"),
    );
    let events = t.events();
    assert!(events.contains(&HubEvent::AttachedDevicesChanged));
    let snapshot = t.hub.snapshot();
    assert_eq!(
        snapshot.attached[&Port(0)].category,
        DeviceCategory::Sensor
    );

    // attach triggers a mode-0 subscription with delta 1
    let writes = t.writes();
    assert_eq!(writes, vec![lwp3::port_input_format_setup(Port(0), 0, 1, true)]);

    t.frame(LWP3_TAG, &hex!("05 00 45 00 7B"));
    assert!(t.events().contains(&HubEvent::DeviceDataChanged));
    assert_eq!(t.hub.snapshot().raw_values[&Port(0)][..], [0x7B]);

    t.frame(LWP3_TAG, &hex!("05 00 04 00 00"));
    let events = t.events();
    assert!(events.contains(&HubEvent::AttachedDevicesChanged));
    assert!(events.contains(&HubEvent::DeviceDataChanged));
    let snapshot = t.hub.snapshot();
    assert!(snapshot.attached.is_empty());
    assert!(snapshot.raw_values.is_empty());
}

#[test]
fn internal_ports_are_not_subscribed() {
    let mut t = TestHub::new(TransportKind::Ble);
    t.connect_lwp3();
    // Hub Status Light on internal port 50
    t.frame(
        LWP3_TAG,
        &hex!("0F 00 04 32 01 17 00 01 00 00 00 01 00 00 00"),
    );
    assert!(t.events().contains(&HubEvent::AttachedDevicesChanged));
    assert_eq!(t.writes(), Vec::<bytes::Bytes>::new());
    assert!(t.hub.snapshot().attached[&Port(50)].label.contains("Light"));
}

#[test]
fn virtual_attach_subscribes_too() {
    let mut t = TestHub::new(TransportKind::Ble);
    t.connect_lwp3();
    t.frame(LWP3_TAG, &hex!("09 00 04 10 02 31 00 00 01"));
    assert_eq!(
        t.writes(),
        vec![lwp3::port_input_format_setup(Port(16), 0, 1, true)]
    );
}

#[test]
fn malformed_frames_are_dropped_not_fatal() {
    let mut t = TestHub::new(TransportKind::Ble);
    t.connect_lwp3();
    t.frame(LWP3_TAG, &hex!("7F 00 01"));
    assert_eq!(
        t.events(),
        vec![HubEvent::Diagnostic(Diagnostic::MalformedFrame)]
    );
    // the session keeps decoding afterwards
    t.frame(LWP3_TAG, &hex!("06 00 01 06 06 50"));
    assert_eq!(t.hub.snapshot().battery, Some(80));
}

#[test]
fn unknown_message_type_surfaces_diagnostic() {
    let mut t = TestHub::new(TransportKind::Ble);
    t.connect_lwp3();
    t.frame(LWP3_TAG, &hex!("04 00 7E 55"));
    assert_eq!(
        t.events(),
        vec![HubEvent::Diagnostic(Diagnostic::UnknownMessage { ty: 0x7E })]
    );
}

#[test]
fn connect_deadline_closes_transport() {
    let mut t = TestHub::new(TransportKind::Ble);
    t.hub.connect(t.now).unwrap();
    t.io();
    t.events();
    assert_eq!(
        t.hub.poll_timeout(),
        Some(t.now + Duration::from_secs(10))
    );

    t.advance(Duration::from_secs(10));
    assert_eq!(t.hub.state(), HubState::Disconnecting);
    assert_matches!(t.io()[..], [IoAction::Close]);
    let events = t.events();
    assert!(events.contains(&HubEvent::ConnectFailed(ConnectFailure::Timeout)));

    t.event(TransportEvent::Disconnected { reason: None });
    assert_eq!(t.hub.state(), HubState::Disconnected);
    assert_eq!(t.hub.poll_timeout(), None);
}

#[test]
fn no_usable_protocol_fails_the_attempt() {
    let mut t = TestHub::new(TransportKind::Ble);
    t.hub.connect(t.now).unwrap();
    t.io();
    t.events();
    t.event(TransportEvent::Connected);
    t.event(TransportEvent::ServicesDiscovered(vec![DiscoveredService {
        service: uuid::uuid!("0000180f-0000-1000-8000-00805f9b34fb"),
        characteristics: Vec::new(),
    }]));
    let events = t.events();
    assert!(events.contains(&HubEvent::NoUsableProtocol));
    assert!(events.contains(&HubEvent::ConnectFailed(ConnectFailure::NoUsableProtocol)));
    assert_eq!(t.hub.state(), HubState::Disconnecting);
    assert_matches!(t.io()[..], [IoAction::Close]);
}

#[test]
fn state_machine_rejects_misordered_calls() {
    let mut t = TestHub::new(TransportKind::Ble);
    assert_eq!(
        t.hub.disconnect(),
        Err(InvalidState(HubState::Disconnected))
    );
    t.hub.connect(t.now).unwrap();
    assert_eq!(
        t.hub.connect(t.now),
        Err(InvalidState(HubState::Connecting))
    );
    t.hub.disconnect().unwrap();
    // idempotent teardown: a second disconnect is invalid but harmless
    assert_eq!(
        t.hub.disconnect(),
        Err(InvalidState(HubState::Disconnecting))
    );
}

#[test]
fn disconnect_clears_the_snapshot() {
    let mut t = TestHub::new(TransportKind::Ble);
    t.connect_lwp3();
    t.frame(LWP3_TAG, &hex!("06 00 01 06 06 64"));
    t.hub.disconnect().unwrap();
    t.event(TransportEvent::Disconnected { reason: None });
    assert_eq!(t.hub.state(), HubState::Disconnected);
    let snapshot = t.hub.snapshot();
    assert_eq!(snapshot.battery, None);
    assert!(snapshot.attached.is_empty());
}

#[test]
fn spike_bootstrap_negotiates_and_subscribes() {
    let _guard = subscribe();
    let mut t = TestHub::new(TransportKind::Ble);
    t.hub.connect(t.now).unwrap();
    t.io();
    t.events();
    t.event(TransportEvent::Connected);
    t.event(TransportEvent::ServicesDiscovered(spike_services()));
    assert_eq!(t.hub.protocol(), Some(Protocol::SpikeBinary));

    let io = t.io();
    assert_eq!(io.len(), 3);
    assert_matches!(io[0], IoAction::Subscribe(SPIKE_TX_TAG));
    assert_matches!(io[1], IoAction::ReadRssi);
    assert_matches!(
        &io[2],
        IoAction::Write(w) if w.payload == cobs::pack(&spike::info_request())
            && w.tag == Some(SPIKE_RX_TAG)
    );

    // info response arrives split across two notifications
    let wire = cobs::pack(&test_encode::info_response(&default_info()));
    t.frame(SPIKE_TX_TAG, &wire[..4]);
    assert!(t.hub.limits().is_none());
    t.frame(SPIKE_TX_TAG, &wire[4..]);
    assert_eq!(t.hub.limits().map(|l| l.max_packet_size), Some(509));

    // negotiation complete: subscribe to the 5 s telemetry stream
    assert_eq!(
        t.writes(),
        vec![bytes::Bytes::from(cobs::pack(&spike::device_notification_request(5000)))]
    );
}

#[test]
fn spike_notification_fills_exactly_one_typed_map_per_port() {
    let mut t = TestHub::new(TransportKind::Ble);
    t.connect_spike(&default_info());

    t.spike_notify(
        &[
            test_encode::battery(75),
            test_encode::motor(0, 49, 0, 50, 50, 360),
        ],
        7,
    );
    let events = t.events();
    assert!(events.contains(&HubEvent::BatteryChanged(75)));
    assert!(events.contains(&HubEvent::DeviceDataChanged));
    assert!(events.contains(&HubEvent::AttachedDevicesChanged));

    let snapshot = t.hub.snapshot();
    assert_eq!(snapshot.battery, Some(75));
    assert_eq!(
        snapshot.motors[&Port(0)],
        Motor {
            device_type: DeviceType(49),
            speed: 50,
            position: 360,
            absolute_position: 0,
        }
    );
    assert!(snapshot.distances.is_empty());
    assert!(snapshot.colors.is_empty());
    assert!(snapshot.forces.is_empty());
    assert!(snapshot.light_matrices.is_empty());
    assert_eq!(snapshot.attached[&Port(0)].device_type, DeviceType(49));
}

#[test]
fn spike_notifications_replace_stale_ports() {
    let mut t = TestHub::new(TransportKind::Ble);
    t.connect_spike(&default_info());

    t.spike_notify(
        &[
            test_encode::motor(0, 49, 0, 0, 10, 0),
            test_encode::distance(1, 250),
        ],
        9,
    );
    assert_eq!(t.hub.snapshot().distances[&Port(1)], 250);
    t.events();

    t.spike_notify(&[test_encode::motor(0, 49, 90, 0, 0, 450)], 3);
    let snapshot = t.hub.snapshot();
    assert!(snapshot.distances.is_empty());
    assert!(!snapshot.attached.contains_key(&Port(1)));
    assert_eq!(snapshot.motors[&Port(0)].position, 450);
    assert!(t.events().contains(&HubEvent::AttachedDevicesChanged));
}

#[test]
fn spike_imu_and_unknown_record() {
    let mut t = TestHub::new(TransportKind::Ble);
    t.connect_spike(&default_info());

    t.spike_notify(
        &[
            test_encode::imu(3, [1, 2, 3], [4, 5, 6], [7, 8, 9]),
            vec![0x77, 0xAA], // unknown tag aborts the walk
            test_encode::battery(50),
        ],
        5,
    );
    let events = t.events();
    assert!(events.contains(&HubEvent::Diagnostic(Diagnostic::UnknownRecord { tag: 0x77 })));
    let snapshot = t.hub.snapshot();
    let imu = snapshot.imu.unwrap();
    assert_eq!(imu.orientation, [7, 8, 9]);
    // the battery record after the unknown tag never decoded
    assert_eq!(snapshot.battery, None);
}

#[test]
fn spike_console_forwarded_as_text() {
    let mut t = TestHub::new(TransportKind::Ble);
    t.connect_spike(&default_info());
    let mut wire = vec![spike::CONSOLE_NOTIFICATION];
    wire.extend_from_slice(b"print(1)");
    t.frame(SPIKE_TX_TAG, &cobs::pack(&wire));
    assert_eq!(t.events(), vec![HubEvent::Console("print(1)".into())]);
}

#[test]
fn spike_writes_chunk_to_negotiated_packet_size() {
    let mut t = TestHub::new(TransportKind::Ble);
    let mut info = default_info();
    info.max_packet_size = 5;
    t.connect_spike(&info);

    t.hub.send(Command::SetName("Benny's Hub".into()));
    let writes = t.writes();
    let expected = cobs::pack(&spike::set_hub_name("Benny's Hub"));
    assert!(writes.len() > 1);
    assert!(writes.iter().all(|chunk| chunk.len() <= 5));
    let joined: Vec<u8> = writes.iter().flat_map(|c| c.iter().copied()).collect();
    assert_eq!(joined, expected);
}

#[test]
fn spike_motor_commands_are_unsupported() {
    let mut t = TestHub::new(TransportKind::Ble);
    t.connect_spike(&default_info());
    t.hub.send(Command::StartSpeed {
        port: Port(0),
        speed: 50,
        max_power: 100,
        use_profile: 0,
    });
    assert_eq!(
        t.events(),
        vec![HubEvent::Diagnostic(Diagnostic::UnsupportedCommand {
            command: "start_speed"
        })]
    );
    assert_eq!(t.writes(), Vec::<bytes::Bytes>::new());
}

#[test]
fn lwp3_motor_commands_hit_the_wire() {
    let mut t = TestHub::new(TransportKind::Ble);
    t.connect_lwp3();
    t.hub.send(Command::StartSpeed {
        port: Port(0),
        speed: 75,
        max_power: 100,
        use_profile: 0,
    });
    let writes = t.writes();
    assert_eq!(writes[0][..], hex!("09 00 81 00 11 07 4B 64 00"));

    t.hub.send(Command::ProgramFlow { stop: true, slot: 0 });
    assert_eq!(
        t.events(),
        vec![HubEvent::Diagnostic(Diagnostic::UnsupportedCommand {
            command: "program_flow"
        })]
    );
}

#[test]
fn commands_without_a_protocol_are_diagnosed() {
    let mut t = TestHub::new(TransportKind::Ble);
    t.hub.send(Command::Brake { port: Port(0) });
    assert_eq!(
        t.events(),
        vec![HubEvent::Diagnostic(Diagnostic::UnsupportedCommand {
            command: "brake"
        })]
    );
}

#[test]
fn accessory_line_telemetry_flows_into_the_model() {
    let _guard = subscribe();
    let mut t = TestHub::new(TransportKind::Line);
    t.connect_line();

    // one line delivered in two pieces
    t.line(r#"{"m":0,"p":[[49,[75,0,"#);
    assert_eq!(t.events(), vec![]);
    t.line("360]],[62,[12]],[0,[]],[0,[]],[0,[]],[0,[]]]}\r");
    let events = t.events();
    assert!(events.contains(&HubEvent::DeviceDataChanged));
    assert!(events.contains(&HubEvent::AttachedDevicesChanged));

    let snapshot = t.hub.snapshot();
    assert_eq!(snapshot.motors[&Port(0)].speed, 75);
    assert_eq!(snapshot.motors[&Port(0)].position, 360);
    assert_eq!(snapshot.distances[&Port(1)], 120);
    assert_eq!(snapshot.attached[&Port(1)].device_type, DeviceType(62));

    t.line("{\"m\":2,\"p\":[8.3,79]}\n");
    assert_eq!(t.events(), vec![HubEvent::BatteryChanged(79)]);
    assert_eq!(t.hub.snapshot().battery, Some(79));

    t.line("{\"m\":4,\"p\":\"tapped\"}\r");
    assert!(t.events().contains(&HubEvent::DeviceDataChanged));
    assert_eq!(t.hub.snapshot().gesture.as_deref(), Some("tapped"));
}

#[test]
fn accessory_outbound_translation() {
    let mut t = TestHub::new(TransportKind::Line);
    t.connect_line();

    t.hub.send(Command::StartSpeed {
        port: Port(0),
        speed: 50,
        max_power: 100,
        use_profile: 0,
    });
    let io = t.io();
    let transmit = match &io[0] {
        IoAction::Write(w) => w,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(transmit.mode, WriteMode::Line);
    assert_eq!(transmit.tag, None);
    assert_eq!(*transmit.payload.last().unwrap(), b'\r');
    let value: serde_json::Value =
        serde_json::from_slice(&transmit.payload[..transmit.payload.len() - 1]).unwrap();
    assert_eq!(value["m"], "scratch.motor_start");
    assert_eq!(value["p"]["port"], "A");
    assert_eq!(value["p"]["speed"], 50);

    // zero speed is a stop, not a zero-speed start
    t.hub.send(Command::StartSpeed {
        port: Port(0),
        speed: 0,
        max_power: 100,
        use_profile: 0,
    });
    let writes = t.writes();
    let value: serde_json::Value =
        serde_json::from_slice(&writes[0][..writes[0].len() - 1]).unwrap();
    assert_eq!(value["m"], "scratch.motor_stop");
    assert_eq!(value["p"]["stop"], 1);

    t.hub.send(Command::GotoAbsolutePosition {
        port: Port(0),
        position: 90,
        speed: 50,
        max_power: 100,
        end_state: lwp3::EndState::Brake,
    });
    assert_eq!(
        t.events(),
        vec![HubEvent::Diagnostic(Diagnostic::UnsupportedCommand {
            command: "goto_absolute_position"
        })]
    );
}

#[test]
fn rssi_polling_cadence() {
    let mut t = TestHub::new(TransportKind::Ble);
    t.connect_lwp3();
    assert_eq!(t.hub.poll_timeout(), Some(t.now + Duration::from_secs(5)));

    t.advance(Duration::from_secs(5));
    assert_matches!(t.io()[..], [IoAction::ReadRssi]);
    assert_eq!(t.hub.poll_timeout(), Some(t.now + Duration::from_secs(5)));

    t.event(TransportEvent::RssiUpdate(-55));
    assert_eq!(t.events(), vec![HubEvent::RssiChanged(-55)]);
    assert_eq!(t.hub.rssi(), Some(-55));
    // unchanged readings stay quiet
    t.event(TransportEvent::RssiUpdate(-55));
    assert_eq!(t.events(), vec![]);

    t.hub.disconnect().unwrap();
    t.event(TransportEvent::Disconnected { reason: None });
    assert_eq!(t.hub.poll_timeout(), None);
}

#[test]
fn transport_loss_while_connecting_reports_reason() {
    let mut t = TestHub::new(TransportKind::Ble);
    t.hub.connect(t.now).unwrap();
    t.io();
    t.events();
    t.event(TransportEvent::Disconnected {
        reason: Some("peer vanished".into()),
    });
    let events = t.events();
    assert!(events.contains(&HubEvent::ConnectFailed(ConnectFailure::Transport(Some(
        "peer vanished".into()
    )))));
    assert_eq!(t.hub.state(), HubState::Disconnected);
}
