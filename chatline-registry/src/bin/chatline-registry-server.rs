use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arrrg::CommandLine;
use chatline_registry::{RegistryState, COLLECTOR};
use chatline_transport::inproc::Hub;
use chatline_transport::Transport;
use indicio::{clue, stdio::StdioEmitter, ALWAYS, INFO};

#[derive(Debug, Default, Eq, PartialEq, arrrg_derive::CommandLine)]
struct Options {
    #[arrrg(optional, "Endpoint the Registry's ROUTER socket binds to.")]
    bind: String,
}

impl Options {
    fn bind_or_default(&self) -> String {
        if self.bind.is_empty() {
            "tcp://*:5560".to_string()
        } else {
            self.bind.clone()
        }
    }
}

fn main() {
    minimal_signals::block();
    let (options, free) = Options::from_command_line("Usage: chatline-registry-server [OPTIONS]");
    if !free.is_empty() {
        eprintln!("command takes no positional arguments");
        std::process::exit(1);
    }

    let emitter = Arc::new(StdioEmitter);
    COLLECTOR.register(emitter);
    COLLECTOR.set_verbosity(INFO);
    clue!(COLLECTOR, ALWAYS, {
        new_process: std::env::args().map(String::from).collect::<Vec<_>>(),
    });

    std::thread::spawn(|| {
        let collector = biometrics::Collector::new();
        chatline_registry::register_biometrics(&collector);
        let fout = std::fs::File::create("/dev/stdout").unwrap();
        let mut emit = biometrics::PlainTextEmitter::new(fout);
        loop {
            if let Err(e) = collector.emit(&mut emit) {
                eprintln!("collector error: {e}");
            }
            std::thread::sleep(Duration::from_millis(5_000));
        }
    });

    let cancelled = Arc::new(AtomicBool::new(false));
    let signal_cancelled = Arc::clone(&cancelled);
    std::thread::spawn(move || {
        loop {
            let signal_set = minimal_signals::SignalSet::new().fill();
            let signal = minimal_signals::wait(signal_set);
            if signal != Some(minimal_signals::SIGCHLD) {
                break;
            }
        }
        signal_cancelled.store(true, Ordering::SeqCst);
    });

    // The in-process reference transport has no independent peer to bind
    // against in a standalone process, so this binary demonstrates the
    // Registry's own serve loop against a `Hub` of its own. A real
    // deployment supplies a `Transport` backed by an actual ROUTER socket
    // here instead.
    let hub = Hub::new();
    let mut router = hub.bind_router(&options.bind_or_default()).expect("bind registry router");
    let registry = RegistryState::new();
    registry.serve(router.as_mut(), Duration::from_millis(250), || {
        !cancelled.load(Ordering::SeqCst)
    });

    clue!(COLLECTOR, ALWAYS, {
        goodbye: std::env::args().map(String::from).collect::<Vec<_>>(),
    });
}
