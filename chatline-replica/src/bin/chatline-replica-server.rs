use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arrrg::CommandLine;
use chatline_replica::{Replica, ReplicaConfig, ReplicaId};
use chatline_storage::{FileWriteLog, InMemoryWriteLog, WriteLog};
use chatline_transport::inproc::Hub;
use chatline_transport::Transport;
use indicio::{clue, stdio::StdioEmitter, ALWAYS, INFO};

static COLLECTOR: indicio::Collector = indicio::Collector::new();

#[derive(Debug, Default, Eq, PartialEq, arrrg_derive::CommandLine)]
struct Options {
    #[arrrg(optional, "Endpoint this replica's P2P ROUTER socket binds to.")]
    p2p_bind: String,
    #[arrrg(optional, "Endpoint this replica's client-facing ROUTER socket binds to.")]
    command_bind: String,
    #[arrrg(optional, "Endpoint of the Registry's ROUTER socket.")]
    registry: String,
    #[arrrg(optional, "Directory to persist users/channels/messages under. Empty keeps everything in memory (non-goal: durability across restarts).")]
    data_dir: String,
}

impl Options {
    fn config(&self) -> ReplicaConfig {
        let p2p_endpoint = if self.p2p_bind.is_empty() {
            "tcp://*:5570".to_string()
        } else {
            self.p2p_bind.clone()
        };
        let mut config = ReplicaConfig::with_defaults(p2p_endpoint);
        if !self.command_bind.is_empty() {
            config.command_endpoint = self.command_bind.clone();
        }
        if !self.registry.is_empty() {
            config.registry_endpoint = self.registry.clone();
        }
        config
    }

    fn write_log(&self) -> Arc<dyn WriteLog> {
        if self.data_dir.is_empty() {
            Arc::new(InMemoryWriteLog::new())
        } else {
            Arc::new(FileWriteLog::open(self.data_dir.clone()).expect("open data_dir write log"))
        }
    }
}

fn main() {
    minimal_signals::block();
    let (options, free) = Options::from_command_line("Usage: chatline-replica-server [OPTIONS]");
    if !free.is_empty() {
        eprintln!("command takes no positional arguments");
        std::process::exit(1);
    }

    let emitter = Arc::new(StdioEmitter);
    COLLECTOR.register(emitter.clone());
    COLLECTOR.set_verbosity(INFO);
    chatline_replica::register_logging(emitter, INFO);
    clue!(COLLECTOR, ALWAYS, {
        new_process: std::env::args().map(String::from).collect::<Vec<_>>(),
    });

    std::thread::spawn(|| {
        let collector = biometrics::Collector::new();
        chatline_replica::register_biometrics(&collector);
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
    // against in a standalone process, so this binary demonstrates a
    // replica's own serve loop against a `Hub` of its own. A real
    // deployment supplies a `Transport` backed by actual ROUTER/PUB/SUB
    // sockets reachable by the Registry and by other replicas.
    let hub = Hub::new();
    let transport: Arc<dyn Transport> = Arc::new(hub.clone());

    let id = ReplicaId::from_env_or_generate();
    let config = options.config();
    let command_endpoint = config.command_endpoint.clone();
    let replica = Replica::bind(id, config, transport.clone(), options.write_log()).expect("bind replica sockets");
    let mut router = transport.bind_router(&command_endpoint).expect("bind command router");

    replica.run(&mut *router, cancelled);

    clue!(COLLECTOR, ALWAYS, {
        goodbye: std::env::args().map(String::from).collect::<Vec<_>>(),
    });
}
