//! End-to-end behaviour of the virtual serial port

mod common;

use std::time::{Duration, Instant};

use bambulink_communication::{frame, PrinterCommand, ReadOutcome, SessionConfig, SessionState};
use bambulink_core::{DeviceUpdate, PrintStage, StateEvent, TransportError};
use common::{Harness, HALT_LINE};

#[test]
fn test_first_query_returns_default_state() {
    let h = Harness::open();
    h.send(&frame(1, "M105"));
    assert_eq!(h.reply(), vec!["ok T:0/0 B:0/0"]);
}

#[test]
fn test_pushed_temperatures_are_reported() {
    let h = Harness::open();
    h.link
        .push(StateEvent::Update(DeviceUpdate::nozzle(210.0, 210.0)));

    h.send(&frame(1, "M105"));
    assert_eq!(h.reply(), vec!["ok T:210/210 B:0/0"]);
}

#[test]
fn test_chamber_reported_when_enabled() {
    let h = Harness::open_with(SessionConfig {
        report_chamber: true,
        ..SessionConfig::default()
    });
    h.send("M105");
    assert_eq!(h.reply(), vec!["ok T:0/0 B:0/0 C:0/0"]);
}

#[test]
fn test_gap_requests_single_resend() {
    let h = Harness::open();
    h.send(&frame(1, "M105"));
    assert_eq!(h.reply(), vec!["ok T:0/0 B:0/0"]);

    h.send(&frame(3, "M105"));
    assert_eq!(
        h.reply(),
        vec![
            "Error:Line Number is not Last Line Number+1, Last Line: 1",
            "Resend: 2",
            "ok"
        ]
    );

    // Out-of-order lines are dropped until N2 arrives
    h.send(&frame(4, "M105"));
    h.assert_quiet();

    h.send(&frame(2, "M105"));
    assert_eq!(h.reply(), vec!["ok T:0/0 B:0/0"]);
    h.send(&frame(3, "M105"));
    assert_eq!(h.reply(), vec!["ok T:0/0 B:0/0"]);
}

#[test]
fn test_checksum_error_requests_resend() {
    let h = Harness::open();
    h.send("N1 M105*0");
    assert_eq!(
        h.reply(),
        vec!["Error:checksum mismatch, Last Line: 0", "Resend: 1", "ok"]
    );
}

#[test]
fn test_device_command_acknowledged_without_confirmation() {
    let h = Harness::open();
    h.send("M140 S60");
    assert_eq!(h.reply(), vec!["ok"]);
    assert!(h
        .link
        .sent()
        .contains(&PrinterCommand::GcodeLine("M140 S60".to_string())));
}

#[test]
fn test_device_command_acknowledged_when_link_down() {
    let h = Harness::open();
    h.link.set_offline(true);
    h.send("M25");
    let reply = h.reply();
    assert_eq!(reply.last().map(String::as_str), Some("ok"));
    assert!(reply[0].starts_with("echo:"));
}

#[test]
fn test_identical_queries_identical_replies() {
    let h = Harness::open();
    h.link.push(StateEvent::Update(DeviceUpdate::bed(59.94, 60.0)));

    h.send("M105");
    let first = h.reply();
    h.send("M105");
    let second = h.reply();
    assert_eq!(first, second);
    assert_eq!(first, vec!["ok T:0/0 B:59.9/60"]);
}

#[test]
fn test_readline_times_out_when_idle() {
    let h = Harness::open();
    let started = Instant::now();
    assert_eq!(
        h.serial.readline(Duration::from_millis(100)).unwrap(),
        ReadOutcome::Timeout
    );
    assert!(started.elapsed() >= Duration::from_millis(80));
}

#[test]
fn test_write_accumulates_partial_lines() {
    let h = Harness::open();
    h.serial.write(b"M1").unwrap();
    h.serial.write(b"05\r\n").unwrap();
    assert_eq!(h.reply(), vec!["ok T:0/0 B:0/0"]);
}

#[test]
fn test_malformed_line_keeps_session_open() {
    let h = Harness::open();
    h.send("N1*127");
    let reply = h.reply();
    assert!(reply[0].starts_with("Error:"));
    assert_eq!(reply.last().map(String::as_str), Some("ok"));

    h.send("M105");
    assert_eq!(h.reply(), vec!["ok T:0/0 B:0/0"]);
}

#[test]
fn test_closed_port_rejects_io() {
    let h = Harness::open();
    h.serial.close();
    h.serial.close();

    assert_eq!(h.serial.state(), SessionState::Closed);
    assert_eq!(h.serial.write(b"M105\n"), Err(TransportError::PortClosed));
    assert_eq!(
        h.serial.readline(Duration::from_millis(10)),
        Err(TransportError::PortClosed)
    );
    assert_eq!(TransportError::PortClosed.to_string(), "port closed");
}

#[test]
fn test_close_releases_mirror_listener() {
    let h = Harness::open();
    assert_eq!(h.mirror.listener_count(), 1);
    h.serial.close();
    assert_eq!(h.mirror.listener_count(), 0);
}

#[test]
fn test_emergency_stop_halts_session() {
    let h = Harness::open();
    h.send("M112");
    assert_eq!(h.reply(), vec![HALT_LINE]);
    assert_eq!(h.serial.state(), SessionState::Killed);
    assert_eq!(h.serial.write(b"M105\n"), Err(TransportError::Halted));
    assert!(h.link.sent().contains(&PrinterCommand::Stop));
}

#[test]
fn test_status_requested_on_open() {
    let h = Harness::open();
    assert_eq!(h.link.sent().first(), Some(&PrinterCommand::PushAll));
}

#[test]
fn test_state_returns_to_idle_after_reply() {
    let h = Harness::open();
    assert_eq!(h.serial.state(), SessionState::Open);

    h.send("M105");
    h.reply();
    let deadline = Instant::now() + Duration::from_secs(1);
    while h.serial.state() != SessionState::Idle && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(h.serial.state(), SessionState::Idle);
}

#[test]
fn test_stage_changes_are_announced() {
    let h = Harness::open();
    h.link
        .push(StateEvent::Update(DeviceUpdate::stage(PrintStage::Printing)));
    h.link
        .push(StateEvent::Update(DeviceUpdate::stage(PrintStage::Paused)));
    assert_eq!(h.read().as_deref(), Some("// action:paused"));

    h.link
        .push(StateEvent::Update(DeviceUpdate::stage(PrintStage::Printing)));
    assert_eq!(h.read().as_deref(), Some("// action:resumed"));

    h.link
        .push(StateEvent::Update(DeviceUpdate::stage(PrintStage::Finished)));
    assert_eq!(h.read().as_deref(), Some("Done printing file"));
}

#[test]
fn test_link_down_keeps_last_known_values() {
    let h = Harness::open();
    h.link
        .push(StateEvent::Update(DeviceUpdate::nozzle(220.0, 220.0)));
    h.link.push(StateEvent::LinkDown {
        reason: "connection reset".to_string(),
    });

    h.send("M105");
    assert_eq!(h.reply(), vec!["ok T:220/220 B:0/0"]);
}

#[test]
fn test_auto_temperature_report() {
    let h = Harness::open();
    h.send("M155 S1");
    assert_eq!(h.reply(), vec!["ok"]);

    let line = h
        .serial
        .readline(Duration::from_secs(3))
        .unwrap()
        .text();
    assert_eq!(line.as_deref(), Some("T:0/0 B:0/0"));
}

#[test]
fn test_auto_sd_progress_report() {
    let h = Harness::open();
    std::fs::write(h.card.path().join("cube.gcode"), vec![0u8; 400]).unwrap();
    h.send("M23 cube.gcode");
    h.reply();

    let mut update = DeviceUpdate::stage(PrintStage::Printing);
    update.progress_percent = Some(50.0);
    h.link.push(StateEvent::Update(update));

    h.send("M27 S1");
    assert_eq!(h.reply(), vec!["ok"]);

    let line = h
        .serial
        .readline(Duration::from_secs(3))
        .unwrap()
        .text();
    assert_eq!(line.as_deref(), Some("SD printing byte 200/400"));
}

#[test]
fn test_oversized_report_interval_keeps_session_alive() {
    let h = Harness::open();
    h.send("M155 S99999999999999999999");
    assert_eq!(h.reply(), vec!["ok"]);

    h.send("M105");
    assert_eq!(h.reply(), vec!["ok T:0/0 B:0/0"]);
}

#[test]
fn test_readline_without_deadline() {
    let h = Harness::open();
    h.send("M105");
    assert_eq!(
        h.serial.readline(Duration::MAX).unwrap().text().as_deref(),
        Some("ok T:0/0 B:0/0")
    );
}

#[test]
fn test_firmware_info_advertises_capabilities() {
    let h = Harness::open();
    h.send("M115");
    let reply = h.reply();
    assert!(reply[0].starts_with("FIRMWARE_NAME:Bambulink"));
    assert!(reply.contains(&"Cap:EXTENDED_M20:1".to_string()));
    assert_eq!(reply.last().map(String::as_str), Some("ok"));
}

#[test]
fn test_sd_card_workflow() {
    let h = Harness::open();
    std::fs::write(h.card.path().join("benchy.3mf"), vec![0u8; 2048]).unwrap();

    h.send("M21");
    assert_eq!(h.reply(), vec!["SD card ok", "ok"]);

    h.send("M20");
    assert_eq!(
        h.reply(),
        vec!["Begin file list", "BENCHY~1.3MF 2048", "End file list", "ok"]
    );

    h.send("M23 BENCHY~1.3MF");
    assert_eq!(
        h.reply(),
        vec!["File opened: benchy.3mf Size: 2048", "File selected", "ok"]
    );

    h.send("M24");
    assert_eq!(h.reply(), vec!["ok"]);
    assert!(h.link.sent().iter().any(|c| matches!(
        c,
        PrinterCommand::PrintFile { filename, .. } if filename == "benchy.3mf"
    )));

    h.link
        .push(StateEvent::Update(DeviceUpdate::stage(PrintStage::Printing)));
    let mut progress = DeviceUpdate::new();
    progress.progress_percent = Some(50.0);
    h.link.push(StateEvent::Update(progress));

    h.send("M27");
    assert_eq!(h.reply(), vec!["SD printing byte 1024/2048", "ok"]);
}
