//! Connect to a running interpreter and print what it sends.
//!
//! ```sh
//! cargo run --example connect -- 127.0.0.1 4502
//! ```
//!
//! The handshake runs automatically once the stream is up; every command
//! the interpreter pushes afterward is printed. Ctrl-C disconnects.

use serde_json::Value;

use ride_client::{Connection, RideError, Session};

struct PrintSession;

impl Session for PrintSession {
    fn recv(&mut self, command: &str, args: Value) {
        println!("{command}: {args}");
    }
    fn handle_connection_open(&mut self) {
        println!("-- connected, handshake complete --");
    }
    fn handle_connection_error(&mut self, err: &RideError) {
        eprintln!("-- connection error: {err} --");
    }
    fn handle_connection_close(&mut self, closed_before_handshake: bool) {
        if closed_before_handshake {
            eprintln!("-- closed before the handshake finished --");
        } else {
            println!("-- connection closed --");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = args.next().as_deref().unwrap_or("4502").parse()?;

    let mut connection = Connection::new(1, PrintSession);
    connection.connect(&host, port).await?;

    tokio::signal::ctrl_c().await?;
    connection.disconnect().await;
    Ok(())
}
