//! End-to-end runs of the whole box on simulated hardware.

use core::net::{Ipv4Addr, SocketAddrV4};

use powerbox_core::App;
use powerbox_core::arbiter::ChannelId;
use powerbox_core::board::UiAction;
use powerbox_core::graph::{GraphEngine, GraphSettings, Refresh, Series, Tab};
use powerbox_core::net::InitState;
use powerbox_core::script::{ChannelTiming, ScriptPlan, library};
use powerbox_core::sensors::Snapshot;
use powerbox_core::sim::SimBoard;
use powerbox_core::time::Clock;
use serde_json::Value;

const GSE1: usize = 0;

fn boot() -> (App<SimBoard>, SimBoard) {
    let board = SimBoard::new();
    let handles = board.clone();
    (App::new(board), handles)
}

/// Send one serial line and return the parsed JSON reply.
fn command(app: &mut App<SimBoard>, board: &SimBoard, line: &str) -> Value {
    board.serial.type_line(line);
    app.step();
    let out = board.serial.take_output();
    let first = out.lines().next().unwrap_or_default();
    serde_json::from_str(first).unwrap_or_else(|e| panic!("bad reply {:?}: {}", out, e))
}

/// Run the loop in 50 ms steps for `ms`.
fn run_for(app: &mut App<SimBoard>, board: &SimBoard, ms: u64) {
    for _ in 0..ms / 50 {
        board.clock.advance(50);
        app.step();
    }
}

fn bring_up_network(app: &mut App<SimBoard>, board: &SimBoard) {
    for _ in 0..20 {
        app.step();
        board.clock.advance(10);
        if app.network_state() == InitState::Initialized {
            return;
        }
    }
    panic!("network stuck in {:?}", app.network_state());
}

fn pulse_plan(name: &str) -> ScriptPlan {
    let mut plan = ScriptPlan::new(name);
    plan.t_start = -5;
    plan.t_end = 10;
    plan.use_record = true;
    plan.channels[GSE1] = ChannelTiming {
        enabled: true,
        on_time: 0,
        off_time: 5,
    };
    plan
}

#[test]
fn test_lock_denies_set_output() {
    let (mut app, board) = boot();
    let r = command(&mut app, &board, r#"{"cmd":"lock","state":true}"#);
    assert_eq!(r["state"], true);

    let r = command(&mut app, &board, r#"{"cmd":"set_output","device":"GSE-1","state":"on"}"#);
    assert_eq!(r["success"], false);
    assert_eq!(r["reason"], "locked");
    assert!(!board.outputs[GSE1].is_high(), "GSE-1 stays off");
    assert!(board.lock_led.is_high(), "lock LED follows the lock");
}

#[test]
fn test_safety_stop_preserves_lock() {
    let (mut app, board) = boot();
    command(&mut app, &board, r#"{"cmd":"set_output","device":"TE-2","state":true}"#);
    command(&mut app, &board, r#"{"cmd":"lock","state":true}"#);

    let r = command(&mut app, &board, r#"{"cmd":"safety_stop","state":true}"#);
    assert_eq!(r["state"], true);
    assert!(board.outputs.iter().all(|p| !p.is_high()), "every output off");
    assert!(app.arbiter().locked());

    command(&mut app, &board, r#"{"cmd":"safety_stop","state":false}"#);
    assert!(!app.arbiter().safety_stop());
    assert!(app.arbiter().locked(), "lock restored to its pre-stop value");

    let (mut app, board) = boot();
    command(&mut app, &board, r#"{"cmd":"safety_stop","state":true}"#);
    command(&mut app, &board, r#"{"cmd":"safety_stop","state":false}"#);
    assert!(!app.arbiter().locked(), "unlocked box comes back unlocked");
}

#[test]
fn test_recorded_script_run() {
    let (mut app, board) = boot();
    let mut internal = board.internal_sd.clone();
    library::save(&mut internal, &pulse_plan("Pulse test")).unwrap();
    board.serial.type_line("csv off");
    app.step();
    board.serial.take_output();

    let r = command(&mut app, &board, r#"{"cmd":"load_script","name":"Pulse test"}"#);
    assert_eq!(r["success"], true, "{}", r);
    let r = command(&mut app, &board, r#"{"cmd":"start_script"}"#);
    assert_eq!(r["success"], true, "{}", r);
    assert!(app.recorder().is_script_owned());
    assert!(app.arbiter().locked(), "panel locked during the run");

    let gse1 = &board.outputs[GSE1];
    run_for(&mut app, &board, 4000);
    assert!(!gse1.is_high(), "off before T+0");
    run_for(&mut app, &board, 1500);
    assert!(gse1.is_high(), "on from T+0");
    run_for(&mut app, &board, 5000);
    assert!(!gse1.is_high(), "off from T+5");
    run_for(&mut app, &board, 5000);

    assert!(!app.script().is_active(), "run ended at t_end");
    assert!(!app.recorder().is_recording());
    assert!(!app.arbiter().locked(), "lock handed back");

    let path = board
        .external_sd
        .paths()
        .into_iter()
        .find(|p| p.starts_with("/Pulse_test"))
        .expect("session file named after the script");
    let bytes = board.external_sd.file(&path).unwrap();
    let session: Value = serde_json::from_slice(&bytes).expect("closed JSON session");
    assert_eq!(session["using_script"], 1);
    assert_eq!(session["script_config"]["tstart"], -5);
    assert_eq!(session["script_ended_early"], false);
    let duration = session["duration_sec"].as_u64().unwrap();
    assert!((14..=15).contains(&duration), "duration {}", duration);
    let rows = session["data"].as_array().unwrap();
    assert!(rows.iter().any(|row| row["GSE-1_stat"] == 1));
}

#[test]
fn test_safety_stop_ends_recorded_script() {
    let (mut app, board) = boot();
    library::save(&mut board.internal_sd.clone(), &pulse_plan("Abort")).unwrap();
    board.serial.type_line("csv off");
    app.step();
    board.serial.take_output();
    command(&mut app, &board, r#"{"cmd":"load_script","name":"Abort"}"#);
    command(&mut app, &board, r#"{"cmd":"start_script"}"#);
    assert!(app.recorder().is_script_owned());

    run_for(&mut app, &board, 3000);
    let r = command(&mut app, &board, r#"{"cmd":"safety_stop","state":true}"#);
    assert_eq!(r["state"], true);
    assert!(!app.script().is_active(), "stop aborts the run");
    assert!(!app.recorder().is_recording(), "stop closes the session");
    assert!(!app.arbiter().script_owned());
    assert!(!app.arbiter().locked(), "script lock handed back");
    assert!(board.outputs.iter().all(|p| !p.is_high()));

    let path = board
        .external_sd
        .paths()
        .into_iter()
        .find(|p| p.starts_with("/Abort"))
        .expect("session file named after the script");
    let session: Value = serde_json::from_slice(&board.external_sd.file(&path).unwrap())
        .expect("closed JSON session");
    assert_eq!(session["using_script"], 1);
    assert_eq!(session["script_ended_early"], true);
    assert_eq!(session["duration_sec"], 3);

    command(&mut app, &board, r#"{"cmd":"safety_stop","state":false}"#);
    assert!(!app.arbiter().safety_stop());
    assert!(app.arbiter().locked(), "release restores the lock seen at engage time");
}

#[test]
fn test_script_runs_without_card() {
    let (mut app, board) = boot();
    library::save(&mut board.internal_sd.clone(), &pulse_plan("No card")).unwrap();
    board.external_sd.eject();
    command(&mut app, &board, r#"{"cmd":"load_script","name":"No card"}"#);
    let r = command(&mut app, &board, r#"{"cmd":"start_script"}"#);
    assert_eq!(r["success"], true, "{}", r);
    assert!(app.script().is_active());
    assert!(!app.recorder().is_recording(), "nowhere to record");

    run_for(&mut app, &board, 5500);
    assert!(board.outputs[GSE1].is_high(), "timeline still drives outputs");
}

#[test]
fn test_pause_shifts_off_edge() {
    let (mut app, board) = boot();
    let mut plan = pulse_plan("pause");
    plan.use_record = false;
    library::save(&mut board.internal_sd.clone(), &plan).unwrap();
    app.load_script("pause").unwrap();
    app.start_script().unwrap();
    let start = 0;

    run_for(&mut app, &board, 7000);
    assert_eq!(app.script().script_seconds(board.clock.now_ms()), Some(2));
    app.pause_script().unwrap();
    run_for(&mut app, &board, 3000);
    assert_eq!(app.script().script_seconds(board.clock.now_ms()), Some(2), "clock frozen");
    app.resume_script().unwrap();

    let gse1 = &board.outputs[GSE1];
    let mut off_at = None;
    for _ in 0..200 {
        board.clock.advance(50);
        app.step();
        if !gse1.is_high() {
            off_at = Some(board.clock.now_ms());
            break;
        }
    }
    let off_at = off_at.expect("GSE-1 switched off");
    assert_eq!(app.script().script_seconds(off_at), Some(5));
    let wall = off_at - start;
    assert!((12_400..=12_600).contains(&wall), "off edge at {} ms", wall);
}

#[test]
fn test_long_ramp_draws_only_window() {
    let mut settings = GraphSettings::default();
    assert_eq!(settings.time_range_s, 30.0);
    settings.auto_fit = false;
    let mut graph = GraphEngine::new(settings, 0);
    let gse1 = ChannelId::ALL[GSE1];
    graph.set_tab(Tab::Channel(gse1));

    let mut now = 0;
    while now <= 120_000 {
        let mut snap = Snapshot::default();
        snap.current_ma[GSE1] = now as f32 / 10.0;
        graph.record(now, None, &snap);
        now += 50;
    }
    let now = now - 50;

    let ring = graph.ring(gse1, Series::Current);
    assert_eq!(ring.len(), ring.capacity(), "older history overwritten");
    let window = graph.window(now, None);
    assert!(window.t_max - window.t_min > 29.9 && window.t_max - window.t_min < 30.1);
    let in_window = ring.iter().filter(|s| window.contains_time(s.t)).count();
    assert!(in_window < ring.len(), "history reaches past the window");

    match graph.refresh(now, None) {
        Refresh::Full { points } => assert_eq!(points, in_window),
        other => panic!("expected a full regenerate, got {:?}", other),
    }
    assert_eq!(graph.refresh(now + 50, None), Refresh::Partial);
}

#[test]
fn test_card_pulled_mid_session() {
    let (mut app, board) = boot();
    board.serial.type_line("start log");
    app.step();
    assert!(board.serial.take_output().starts_with("Logging STARTED"));
    run_for(&mut app, &board, 1000);

    board.external_sd.eject();
    run_for(&mut app, &board, 100);
    assert!(!app.recorder().is_recording(), "session ended on the next write");
    run_for(&mut app, &board, 300);
    assert!(
        board.panel.notices().iter().any(|n| n.contains("invalid")),
        "failure shown on the panel: {:?}",
        board.panel.notices()
    );

    let r = command(&mut app, &board, r#"{"cmd":"set_output","device":"TE-3","state":true}"#);
    assert_eq!(r["success"], true);
    assert!(board.outputs[5].is_high());
}

#[test]
fn test_tcp_peer_session() {
    let (mut app, board) = boot();
    bring_up_network(&mut app, &board);
    let peer = board.ethernet.connect_peer();
    app.step();
    let welcome: Value = serde_json::from_str(board.ethernet.take_peer_output(peer).trim()).unwrap();
    assert_eq!(welcome["type"], "connection");

    board.ethernet.peer_send(peer, b"{\"cmd\":\"get_status\"}\n");
    app.step();
    let status: Value = serde_json::from_str(board.ethernet.take_peer_output(peer).trim()).unwrap();
    assert_eq!(status["type"], "status");
    assert_eq!(status["ethernet_connected"], true);
    assert_eq!(status["tcp_port"], 8080);

    board.ethernet.peer_send(peer, b"te1 on\n");
    app.step();
    assert_eq!(board.ethernet.take_peer_output(peer), "TE-1 turned ON\n");
    assert!(board.outputs[3].is_high());
}

#[test]
fn test_udp_stream_goes_to_configured_target() {
    let (mut app, board) = boot();
    bring_up_network(&mut app, &board);
    let sender = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 7), 40000);
    board.ethernet.udp_inject(
        sender,
        br#"{"cmd":"start_stream","interval":200,"udp_target_ip":"10.0.0.9","udp_target_port":9000}"#,
    );
    app.step();
    let sent = board.ethernet.take_udp_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, sender, "reply goes to the sender");

    run_for(&mut app, &board, 1000);
    let sent = board.ethernet.take_udp_sent();
    let target = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 9), 9000);
    assert_eq!(sent.len(), 5);
    assert!(sent.iter().all(|(to, line)| *to == target && line.contains("live_data")));
}

#[test]
fn test_switch_follows_when_idle() {
    let (mut app, board) = boot();
    board.switches[2].set_closed(true);
    run_for(&mut app, &board, 500);
    assert!(board.outputs[2].is_high(), "rocker drives TE-R");

    app.handle_ui(UiAction::ToggleLock);
    board.switches[2].set_closed(false);
    run_for(&mut app, &board, 500);
    assert!(board.outputs[2].is_high(), "rocker ignored while locked");
}
