//! Connection-loss behavior observed through the public `Client` API: a
//! dropped peer must resolve every in-flight call with an error exactly
//! once, never hang.

use sftp::{ClientConfig, ClientOptions};

#[tokio::test]
async fn in_flight_calls_resolve_with_an_error_when_the_server_vanishes() {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);

    tokio::spawn(async move {
        let (mut reader, mut writer) = tokio::io::split(server_io);
        sftp::framer::write_packet(
            &mut writer,
            &sftp::Packet::Version(sftp::protocol::packet::Version {
                version: 3,
                extensions: vec![],
            }),
        )
        .await
        .unwrap();
        // Read and drop the client's first request, then vanish.
        let _ = sftp::framer::read_frame(&mut reader).await;
    });

    let client = sftp::Client::connect(client_io, ClientOptions::with_config(ClientConfig::default()))
        .await
        .unwrap();

    let a = client.stat("/a");
    let b = client.stat("/b");
    let (ra, rb) = tokio::join!(a, b);
    assert!(ra.is_err());
    assert!(rb.is_err());

    // A call issued after the loss is detected also fails promptly rather
    // than hanging forever.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let after = tokio::time::timeout(std::time::Duration::from_secs(1), client.stat("/c"))
        .await
        .expect("call must not hang after connection loss");
    assert!(after.is_err());
}
