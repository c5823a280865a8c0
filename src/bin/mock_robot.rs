//! Mock robot endpoint for manual and integration testing
//!
//! Speaks the line protocol of the robot endpoint without driving any ECU:
//! directives are logged and never answered, every other command is answered
//! with `<verb> success`, except commands mentioning `fail`, which get
//! `<verb> failed simulated failure`.
//!
//! Usage: `mock_robot [ADDR]` (default `127.0.0.1:4490`). The first line on
//! stdout is `listening on <addr>`.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};

const DIRECTIVES: &[&str] = &[
    "newFile",
    "clearFile",
    "connectAllEcu",
    "disconnectAllEcu",
    "connectEcu",
    "disconnectEcu",
    "marker",
];

fn main() {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:4490".to_string());

    let listener = match TcpListener::bind(&addr) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("mock_robot: cannot listen on {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or(addr);
    println!("listening on {}", local);
    std::io::stdout().flush().ok();

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                std::thread::spawn(move || serve(stream));
            }
            Err(e) => eprintln!("mock_robot: accept failed: {}", e),
        }
    }
}

fn serve(stream: TcpStream) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    eprintln!("mock_robot: {} connected", peer);

    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(_) => return,
    };
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let verb = line.split_whitespace().next().unwrap_or("");
        if DIRECTIVES.contains(&verb) {
            eprintln!("mock_robot: directive {}", line);
            continue;
        }

        let reply = reply_for(verb, line);
        eprintln!("mock_robot: {} -> {}", line, reply);
        if writeln!(writer, "{}", reply).is_err() || writer.flush().is_err() {
            break;
        }
    }

    eprintln!("mock_robot: {} disconnected", peer);
}

fn reply_for(verb: &str, line: &str) -> String {
    if line.to_lowercase().contains("fail") {
        format!("{} failed simulated failure", verb)
    } else {
        format!("{} success", verb)
    }
}
