//! Bus transport integration tests: an engine and an operator in separate bus
//! clients talking through an embedded hub.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use typecast::bus::{Bus, BusHub, Command, Event, NetBus, Subscription, Topic};
use typecast::engine::Engine;
use typecast::focus::NullLens;
use typecast::input::{InputAction, RecordingSimulator};
use typecast::playback::{ConfigStore, PlaybackConfig, RunState};
use typecast::timing::SystemClock;

const WAIT: Duration = Duration::from_secs(3);

fn wait_for(sub: &Subscription, want: impl Fn(&Event) -> bool) -> bool {
    let end = Instant::now() + Duration::from_secs(5);
    while Instant::now() < end {
        let event = sub
            .recv_timeout(Duration::from_millis(50))
            .ok()
            .and_then(|(_, message)| message.into_event());
        if let Some(event) = event {
            if want(&event) {
                return true;
            }
        }
    }
    false
}

/// A script loaded and played by a remote operator completes over the bus.
#[test]
fn remote_operator_drives_engine() {
    let hub = BusHub::bind(0).unwrap();
    let engine_bus: Arc<dyn Bus> = Arc::new(NetBus::connect(hub.local_addr(), WAIT).unwrap());
    let operator = NetBus::connect(hub.local_addr(), WAIT).unwrap();
    let events = operator.subscribe(&[Topic::Events]);

    let commands = engine_bus.subscribe(&[Topic::Commands, Topic::Focus]);
    let sim = RecordingSimulator::new();
    let config = PlaybackConfig {
        start_delay_ms: 0,
        speed_ms: 1,
        pause_on_newline: false,
        seed: Some(9),
        ..PlaybackConfig::default()
    };
    let engine = Engine::new(
        engine_bus.clone(),
        Box::new(sim.clone()),
        Arc::new(NullLens),
        ConfigStore::new(config),
        Arc::new(SystemClock::new()),
    );
    let worker = thread::spawn(move || engine.run(commands));
    // Let both subscriptions reach the hub.
    thread::sleep(Duration::from_millis(150));

    operator.publish(
        Topic::Commands,
        Command::LoadText {
            text: "hi\nyo".to_string(),
        }
        .into(),
    );
    assert!(wait_for(&events, |e| matches!(
        e,
        Event::Loaded { total: 5, .. }
    )));

    operator.publish(Topic::Commands, Command::Play.into());
    assert!(wait_for(&events, |e| *e == Event::PlaybackCompleted));
    assert_eq!(sim.len(), 5);
    assert_eq!(sim.actions()[0], InputAction::TypeChar('h'));

    operator.publish(Topic::Commands, Command::Shutdown.into());
    worker.join().unwrap();
}

/// Commands on the focus topic reach the engine like operator commands.
#[test]
fn focus_topic_reaches_engine() {
    let hub = BusHub::bind(0).unwrap();
    let engine_bus: Arc<dyn Bus> = Arc::new(NetBus::connect(hub.local_addr(), WAIT).unwrap());
    let operator = NetBus::connect(hub.local_addr(), WAIT).unwrap();
    let events = operator.subscribe(&[Topic::Events]);

    let commands = engine_bus.subscribe(&[Topic::Commands, Topic::Focus]);
    let config = PlaybackConfig {
        start_delay_ms: 60_000,
        ..PlaybackConfig::default()
    };
    let engine = Engine::new(
        engine_bus.clone(),
        Box::new(RecordingSimulator::new()),
        Arc::new(NullLens),
        ConfigStore::new(config),
        Arc::new(SystemClock::new()),
    );
    let worker = thread::spawn(move || engine.run(commands));
    thread::sleep(Duration::from_millis(150));

    operator.publish(
        Topic::Commands,
        Command::LoadText {
            text: "abc".to_string(),
        }
        .into(),
    );
    operator.publish(Topic::Commands, Command::Play.into());
    assert!(wait_for(&events, |e| *e
        == Event::StateChanged {
            state: RunState::Playing
        }));

    operator.publish(Topic::Focus, Command::FocusLost.into());
    assert!(wait_for(&events, |e| *e
        == Event::StateChanged {
            state: RunState::PausedByFocusLoss
        }));

    operator.publish(Topic::Commands, Command::Shutdown.into());
    worker.join().unwrap();
}

fn next_local_command(sub: &Subscription, want: &Command) -> bool {
    let end = Instant::now() + Duration::from_secs(8);
    while Instant::now() < end {
        let command = sub
            .recv_timeout(Duration::from_millis(100))
            .ok()
            .and_then(|(_, message)| message.into_command());
        if let Some(command) = command {
            if command == *want {
                return true;
            }
        }
    }
    false
}

/// Losing the hub suspends playback; a hub coming back on the same port
/// resumes it.
#[test]
fn hub_loss_suspends_and_restart_resumes() {
    let mut hub = BusHub::bind(0).unwrap();
    let port = hub.local_addr().port();
    let engine_bus: Arc<dyn Bus> = Arc::new(NetBus::connect(hub.local_addr(), WAIT).unwrap());
    let commands = engine_bus.subscribe(&[Topic::Commands, Topic::Focus]);

    let config = PlaybackConfig {
        start_delay_ms: 60_000,
        ..PlaybackConfig::default()
    };
    let mut engine = Engine::new(
        engine_bus.clone(),
        Box::new(RecordingSimulator::new()),
        Arc::new(NullLens),
        ConfigStore::new(config),
        Arc::new(SystemClock::new()),
    );
    engine.handle(Command::LoadText {
        text: "abc".to_string(),
    });
    engine.handle(Command::Play);

    hub.stop();
    assert!(next_local_command(&commands, &Command::TransportLost));
    engine.handle(Command::TransportLost);
    assert_eq!(
        engine.machine().run_state(),
        Some(RunState::PausedByFocusLoss)
    );

    // Operator input cannot lift a transport suspension.
    engine.handle(Command::Play);
    assert_eq!(
        engine.machine().run_state(),
        Some(RunState::PausedByFocusLoss)
    );

    let _hub = BusHub::bind(port).unwrap();
    assert!(next_local_command(&commands, &Command::TransportRestored));
    engine.handle(Command::TransportRestored);
    assert_eq!(engine.machine().run_state(), Some(RunState::Playing));
}

// --- Throughput ---

/// Every message of a long burst arrives, in publish order.
#[test]
fn burst_arrives_complete_and_in_order() {
    const COUNT: usize = 20_000;

    let hub = BusHub::bind(0).unwrap();
    let receiver = NetBus::connect(hub.local_addr(), WAIT).unwrap();
    let sender = NetBus::connect(hub.local_addr(), WAIT).unwrap();
    let inbox = receiver.subscribe(&[Topic::Commands]);
    thread::sleep(Duration::from_millis(150));

    for n in 0..COUNT {
        sender.publish(
            Topic::Commands,
            Command::LoadText {
                text: n.to_string(),
            }
            .into(),
        );
    }

    let mut received = Vec::with_capacity(COUNT);
    let end = Instant::now() + Duration::from_secs(30);
    while received.len() < COUNT && Instant::now() < end {
        if let Ok((_, message)) = inbox.recv_timeout(Duration::from_millis(100)) {
            if let Some(Command::LoadText { text }) = message.into_command() {
                received.push(text);
            }
        }
    }
    let expected: Vec<String> = (0..COUNT).map(|n| n.to_string()).collect();
    assert_eq!(received.len(), COUNT);
    assert_eq!(received, expected);
}

/// A fast script reports every keystroke and completes.
#[test]
fn long_script_reports_every_keystroke() {
    const LEN: usize = 3_000;

    let hub = BusHub::bind(0).unwrap();
    let engine_bus: Arc<dyn Bus> = Arc::new(NetBus::connect(hub.local_addr(), WAIT).unwrap());
    let operator = NetBus::connect(hub.local_addr(), WAIT).unwrap();
    let events = operator.subscribe(&[Topic::Events]);

    let commands = engine_bus.subscribe(&[Topic::Commands, Topic::Focus]);
    let sim = RecordingSimulator::new();
    let config = PlaybackConfig {
        start_delay_ms: 0,
        speed_ms: 0,
        pause_on_newline: false,
        seed: Some(3),
        ..PlaybackConfig::default()
    };
    let engine = Engine::new(
        engine_bus.clone(),
        Box::new(sim.clone()),
        Arc::new(NullLens),
        ConfigStore::new(config),
        Arc::new(SystemClock::new()),
    );
    let worker = thread::spawn(move || engine.run(commands));
    thread::sleep(Duration::from_millis(150));

    operator.publish(
        Topic::Commands,
        Command::LoadText {
            text: "x".repeat(LEN),
        }
        .into(),
    );
    operator.publish(Topic::Commands, Command::Play.into());

    let mut cursors = Vec::new();
    let mut completed = false;
    let end = Instant::now() + Duration::from_secs(30);
    while !completed && Instant::now() < end {
        match events
            .recv_timeout(Duration::from_millis(100))
            .ok()
            .and_then(|(_, message)| message.into_event())
        {
            Some(Event::ProgressChanged { cursor, total: LEN }) if cursor > 0 => {
                cursors.push(cursor)
            }
            Some(Event::PlaybackCompleted) => completed = true,
            _ => {}
        }
    }

    assert!(completed);
    assert_eq!(sim.len(), LEN);
    assert_eq!(cursors, (1..=LEN).collect::<Vec<_>>());

    operator.publish(Topic::Commands, Command::Shutdown.into());
    worker.join().unwrap();
}
