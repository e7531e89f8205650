//! A peer vanishing mid-request must resolve every outstanding message with
//! a single disconnect, never leave it pending forever. Exercised here over
//! a real torn-down socket instead of `Connection::close` called in-process.

use blip_core::ConnectionConfig;
use blip_harness::SimOutcome;
use blip_proto::MessageBuilder;
use tokio::sync::mpsc;
use turmoil::net::{TcpListener, TcpStream};

#[test]
fn dropped_peer_disconnects_a_pending_request() {
    let mut sim = turmoil::Builder::new().build();

    sim.host("server", || async {
        let listener = TcpListener::bind("0.0.0.0:443").await?;
        let (stream, _addr) = listener.accept().await?;
        // Accept the connection, never install a handler, then vanish:
        // the client's request sits unanswered and the socket itself dies.
        drop(stream);
        Ok(())
    });

    sim.client("client", async {
        let stream = TcpStream::connect("server:443").await?;
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let (handle, _task) =
            blip_harness::spawn(stream, ConnectionConfig::default(), |_| {}, events_tx);

        let outcome = handle
            .send_request(MessageBuilder::new().profile("Unanswered"))
            .await
            .expect("the actor resolves the request rather than hanging");

        match outcome {
            SimOutcome::Response(_) => panic!("expected a disconnect, got a response"),
            SimOutcome::Disconnected => {},
        }

        Ok(())
    });

    sim.run().expect("simulation failed");
}
