//! The client request multiplexer (`Connection`), exercised as a library
//! consumer would: many concurrent calls share one connection and each
//! gets back exactly its own response, however the peer orders replies.

use sftp::client::Connection;
use sftp::protocol::packet::{Fstat, Status};
use sftp::protocol::StatusCode;
use sftp::Packet;

#[tokio::test]
async fn concurrent_calls_never_get_a_response_meant_for_another_id() {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let (client_r, client_w) = tokio::io::split(client_io);
    let connection = Connection::new(client_r, client_w);

    let (mut server_r, server_w) = tokio::io::split(server_io);
    tokio::spawn(async move {
        let writer = sftp::framer::WriteHalf::new(server_w);
        // Reply to every request, deliberately out of arrival order: hold
        // the first one back until the second and third have replied.
        let mut held = None;
        for _ in 0..3 {
            let frame = sftp::framer::read_frame(&mut server_r).await.unwrap();
            let req = Packet::decode(&frame.body).unwrap();
            let id = req.id().unwrap();
            if held.is_none() {
                held = Some(id);
                continue;
            }
            writer.write_packet(&Packet::Status(Status::ok(id))).await.unwrap();
        }
        if let Some(id) = held {
            writer.write_packet(&Packet::Status(Status::ok(id))).await.unwrap();
        }
    });

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(connection.next_id());
    }
    assert_eq!(ids.len(), 3);
    assert_ne!(ids[0], ids[1]);
    assert_ne!(ids[1], ids[2]);

    let calls = ids.iter().map(|&id| {
        let connection = connection.clone();
        async move {
            let response = connection
                .call(id, &Packet::Fstat(Fstat { id, handle: vec![] }))
                .await
                .unwrap();
            match response {
                Packet::Status(status) => {
                    assert_eq!(status.id, id, "response id must match the request it answers");
                    assert_eq!(StatusCode::from(status.code), StatusCode::Ok);
                }
                other => panic!("unexpected response: {other:?}"),
            }
        }
    });
    futures_join_all(calls).await;
}

async fn futures_join_all<I>(iter: I)
where
    I: IntoIterator,
    I::Item: std::future::Future<Output = ()>,
{
    let mut set = tokio::task::JoinSet::new();
    for fut in iter {
        set.spawn(fut);
    }
    while let Some(result) = set.join_next().await {
        result.unwrap();
    }
}

#[tokio::test]
async fn in_flight_count_tracks_outstanding_requests() {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let (client_r, client_w) = tokio::io::split(client_io);
    let connection = Connection::new(client_r, client_w);
    let (mut server_r, _server_w) = tokio::io::split(server_io);

    assert_eq!(connection.in_flight_count().await, 0);

    let id = connection.next_id();
    let waiting = connection.clone();
    let call = tokio::spawn(async move {
        let _ = waiting
            .call(id, &Packet::Fstat(Fstat { id, handle: vec![] }))
            .await;
    });

    // Give the call a moment to register its waiter before we observe it.
    let frame = sftp::framer::read_frame(&mut server_r).await.unwrap();
    assert_eq!(Packet::decode(&frame.body).unwrap().id(), Some(id));
    assert_eq!(connection.in_flight_count().await, 1);

    drop(server_r);
    let _ = call.await;
}
