//! Echo - a server and a client in one process.
//!
//! This example demonstrates:
//! - Serving typed methods with a [`MethodRouter`]
//! - Pushing a notification from inside a handler
//! - Blocking calls and fire-and-forget calls from the client
//!
//! Runs over a local socket on unix and the in-memory hub elsewhere.
//!
//! ```sh
//! RUST_LOG=mprpc=debug cargo run --example echo
//! ```

use std::sync::mpsc;
use std::time::Duration;

use mprpc::handler::{CallContext, MethodRouter};
use mprpc::{CallId, ClientCallback, ClientSession, Message, ServerSession};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Input structure for the echo method.
#[derive(Deserialize, Debug)]
struct EchoInput {
    message: String,
}

/// Output structure for the echo method.
#[derive(Serialize, Deserialize, Debug)]
struct EchoOutput {
    echo: String,
}

/// Prints everything the session reports.
struct Printer {
    done: parking_lot::Mutex<mpsc::Sender<()>>,
}

impl ClientCallback for Printer {
    fn on_connected(&self) {
        println!("connected");
    }

    fn on_disconnected(&self) {
        println!("disconnected");
    }

    fn on_notification(&self, msg: Message) {
        println!("notification {:?}: {:?}", msg.method(), msg.params());
    }

    fn on_call_result(&self, id: CallId, msg: Message) {
        println!("async call {id} -> {:?}", msg.into_result());
        let _ = self.done.lock().send(());
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let router = MethodRouter::new()
        .method("echo", |data: EchoInput, ctx: &CallContext| {
            ctx.notify("echoing", &data.message)?;
            Ok(EchoOutput { echo: data.message })
        })
        .method("sum", |values: Vec<i64>, _ctx: &CallContext| Ok(values.iter().sum::<i64>()))
        .close_hook(|conn| println!("server: {} closed", conn.id()));

    let (done_tx, done_rx) = mpsc::channel();
    let printer = Printer {
        done: parking_lot::Mutex::new(done_tx),
    };

    #[cfg(unix)]
    let (server, client) = {
        use mprpc::transport::{generate_pipe_path, PipeAcceptor, PipeConnector};

        let path = generate_pipe_path();
        let server = ServerSession::listen(PipeAcceptor::new(), &path, router)?;
        let client = ClientSession::connect(PipeConnector::new(), &path, printer)?;
        (server, client)
    };
    #[cfg(not(unix))]
    let (server, client) = {
        let hub = mprpc::transport::MemHub::new();
        let server = ServerSession::listen(hub.acceptor(), "echo", router)?;
        let client = ClientSession::connect(hub.connector(), "echo", printer)?;
        (server, client)
    };

    let reply = client.call("echo", &serde_json::json!({ "message": "hello" }))?;
    let output: EchoOutput = reply.result_as()?;
    println!("echo -> {}", output.echo);

    let reply = client.call("missing", &())?;
    println!("missing -> {:?}", reply.into_result());

    client.async_call("sum", &[1, 2, 3, 4])?;
    done_rx.recv_timeout(Duration::from_secs(5))?;

    client.close();
    server.close();
    Ok(())
}
