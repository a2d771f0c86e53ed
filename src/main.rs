//! Operator console: a line-oriented menu for driving a single peer by hand.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use ricart_mutex::config::Config;
use ricart_mutex::naming::StaticTable;
use ricart_mutex::rpc::transport::TcpTransport;
use ricart_mutex::Peer;

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let name = match args.next() {
        Some(n) => n,
        None => {
            eprintln!("usage: ricart_mutex <PeerName> [config.toml]");
            std::process::exit(1);
        }
    };

    let config = match args.next() {
        Some(path) => Config::from_file(&path).unwrap_or_else(|e| {
            eprintln!("failed to load config {path}: {e}");
            std::process::exit(1);
        }),
        None => Config::demo(&name),
    };

    if config.bind_addr().is_none() {
        eprintln!("{name} has no entry in the peer table");
        std::process::exit(1);
    }

    let naming = Arc::new(StaticTable::from_map(config.peers.clone()));
    let transport = Arc::new(TcpTransport::new(config.rpc_timeout()));
    let peer = Peer::new(config, naming, transport);

    peer.start_background_workers();
    let _server_thread = peer.serve().unwrap_or_else(|e| {
        eprintln!("failed to bind {name}'s RPC endpoint: {e}");
        std::process::exit(1);
    });

    println!("Peer {} ready. Status: RELEASED", peer.name());
    run_menu(&peer);
    peer.shutdown();
    println!("{}: stopped.", peer.name());
}

fn run_menu(peer: &Arc<Peer>) {
    let stdin = io::stdin();
    loop {
        println!(
            "\n{}:\n1: Request resource (10s)\n2: Release resource\n3: List active peers\n4: Quit",
            peer.name()
        );
        print!("> ");
        io::stdout().flush().ok();

        let mut line = String::new();
        if stdin.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        match line.trim() {
            "1" => {
                let granted = peer.request_access(Duration::from_secs(10));
                println!("{}: request_access -> {granted}", peer.name());
            }
            "2" => peer.release_access(),
            "3" => {
                let active = peer.active_peers();
                if active.is_empty() {
                    println!("No other peer currently detected as active.");
                } else {
                    for name in active {
                        println!("- {name}");
                    }
                }
            }
            "4" => break,
            other => println!("invalid command: {other}"),
        }
    }
}
