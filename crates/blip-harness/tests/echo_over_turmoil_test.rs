//! End-to-end BLIP request/response over `turmoil`'s virtual network
//!, driving two real [`blip_core::Connection`]s
//! through [`blip_harness::spawn`] instead of pumping frames in-process.

use blip_core::{ConnectionConfig, HandlerOutcome};
use blip_proto::{CompletedMessage, MessageBuilder};
use blip_harness::SimOutcome;
use bytes::Bytes;
use tokio::sync::mpsc;
use turmoil::net::{TcpListener, TcpStream};

#[test]
fn echo_request_round_trips_over_simulated_network() {
    let mut sim = turmoil::Builder::new().build();

    sim.host("server", || async {
        let listener = TcpListener::bind("0.0.0.0:443").await?;
        let (stream, _addr) = listener.accept().await?;
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let (_handle, task) = blip_harness::spawn(
            stream,
            ConnectionConfig::default(),
            |connection| {
                connection.set_request_handler("Echo", |request: &CompletedMessage| {
                    Ok(HandlerOutcome::Respond(MessageBuilder::new().body(request.body.clone())))
                });
            },
            events_tx,
        );
        let _ = task.await;
        Ok(())
    });

    sim.client("client", async {
        let stream = TcpStream::connect("server:443").await?;
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let (handle, _task) =
            blip_harness::spawn(stream, ConnectionConfig::default(), |_| {}, events_tx);

        let outcome = handle
            .send_request(MessageBuilder::new().profile("Echo").body(Bytes::from_static(b"hi")))
            .await
            .expect("request completes");

        match outcome {
            SimOutcome::Response(response) => assert_eq!(response.body, Bytes::from_static(b"hi")),
            SimOutcome::Disconnected => panic!("expected a response, got a disconnect"),
        }

        handle.close(1000, "done");
        Ok(())
    });

    sim.run().expect("simulation failed");
}

#[test]
fn compressed_echo_round_trips_over_simulated_network() {
    let mut sim = turmoil::Builder::new().build();

    sim.host("server", || async {
        let listener = TcpListener::bind("0.0.0.0:443").await?;
        let (stream, _addr) = listener.accept().await?;
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let (_handle, task) = blip_harness::spawn(
            stream,
            ConnectionConfig::default(),
            |connection| {
                connection.set_request_handler("Echo", |request: &CompletedMessage| {
                    Ok(HandlerOutcome::Respond(MessageBuilder::new().body(request.body.clone())))
                });
            },
            events_tx,
        );
        let _ = task.await;
        Ok(())
    });

    sim.client("client", async {
        let stream = TcpStream::connect("server:443").await?;
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let (handle, _task) =
            blip_harness::spawn(stream, ConnectionConfig::default(), |_| {}, events_tx);

        let body = Bytes::from(vec![b'z'; 4096]);
        let outcome = handle
            .send_request(MessageBuilder::new().profile("Echo").body(body.clone()).compressed())
            .await
            .expect("request completes");

        match outcome {
            SimOutcome::Response(response) => assert_eq!(response.body, body),
            SimOutcome::Disconnected => panic!("expected a response, got a disconnect"),
        }

        handle.close(1000, "done");
        Ok(())
    });

    sim.run().expect("simulation failed");
}
