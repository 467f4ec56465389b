//! Wire-level codec properties driven through the public `framer`/`Packet`
//! API, over a real in-memory duplex pipe rather than bare byte slices.

use bytes::Bytes;
use sftp::protocol::attrs::FileAttrs;
use sftp::protocol::packet::{
    Attrs, Data, Extended, ExtendedReply, Handle, Name, NameEntry, Open, OpenFlags, Status, Write,
};
use sftp::protocol::{Packet, StatusCode};
use sftp::{framer, SFTP_VERSION};

async fn round_trip_over_pipe(packet: Packet) -> Packet {
    let (mut client, mut server) = tokio::io::duplex(1 << 16);
    let to_send = packet.clone();
    tokio::spawn(async move {
        framer::write_packet(&mut client, &to_send).await.unwrap();
    });
    let frame = framer::read_frame(&mut server).await.unwrap();
    Packet::decode(&frame.body).unwrap()
}

#[tokio::test]
async fn open_with_attrs_round_trips_over_a_pipe() {
    let packet = Packet::Open(Open {
        id: 4,
        filename: "/home/alice/report.csv".into(),
        pflags: OpenFlags(OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::TRUNC),
        attrs: FileAttrs {
            permissions: Some(0o644),
            ..FileAttrs::default()
        },
    });
    assert_eq!(round_trip_over_pipe(packet.clone()).await, packet);
}

#[tokio::test]
async fn large_write_payload_survives_the_split_encode_path() {
    let data = vec![0xAB; 256 * 1024];
    let packet = Packet::Write(Write {
        id: 11,
        handle: b"7".to_vec(),
        offset: 1 << 20,
        data: Bytes::from(data),
    });
    assert_eq!(round_trip_over_pipe(packet.clone()).await, packet);
}

#[tokio::test]
async fn name_listing_with_several_entries_round_trips() {
    let packet = Packet::Name(Name {
        id: 3,
        entries: vec![
            NameEntry {
                filename: "a.txt".into(),
                longname: "-rw-r--r-- 1 alice staff 12 a.txt".into(),
                attrs: FileAttrs::with_size(12),
            },
            NameEntry {
                filename: "sub".into(),
                longname: "drwxr-xr-x 2 alice staff 4096 sub".into(),
                attrs: FileAttrs {
                    permissions: Some(sftp::protocol::attrs::file_type::DIRECTORY | 0o755),
                    ..FileAttrs::default()
                },
            },
        ],
    });
    assert_eq!(round_trip_over_pipe(packet.clone()).await, packet);
}

#[tokio::test]
async fn extended_request_and_reply_round_trip() {
    let request = Packet::Extended(Extended {
        id: 9,
        request: "statvfs@openssh.com".into(),
        data: b"/mnt/data".to_vec(),
    });
    assert_eq!(round_trip_over_pipe(request.clone()).await, request);

    let reply = Packet::ExtendedReply(ExtendedReply {
        id: 9,
        data: vec![1, 2, 3, 4],
    });
    assert_eq!(round_trip_over_pipe(reply.clone()).await, reply);
}

#[tokio::test]
async fn status_and_handle_and_data_round_trip() {
    let status = Packet::Status(Status::new(1, StatusCode::NoSuchFile, "no such file"));
    assert_eq!(round_trip_over_pipe(status.clone()).await, status);

    let handle = Packet::Handle(Handle {
        id: 2,
        handle: b"42".to_vec(),
    });
    assert_eq!(round_trip_over_pipe(handle.clone()).await, handle);

    let data = Packet::Data(Data {
        id: 5,
        data: Bytes::from_static(b"hello"),
    });
    assert_eq!(round_trip_over_pipe(data.clone()).await, data);

    let attrs = Packet::Attrs(Attrs {
        id: 6,
        attrs: FileAttrs::with_size(99),
    });
    assert_eq!(round_trip_over_pipe(attrs.clone()).await, attrs);
}

#[tokio::test]
async fn reading_a_zero_length_frame_is_a_protocol_error_not_a_panic() {
    use tokio::io::AsyncWriteExt;
    let (mut client, mut server) = tokio::io::duplex(64);
    tokio::spawn(async move {
        client.write_all(&0u32.to_be_bytes()).await.unwrap();
    });
    assert!(framer::read_frame(&mut server).await.is_err());
}

#[tokio::test]
async fn peer_disconnecting_mid_frame_surfaces_as_an_error() {
    use tokio::io::AsyncWriteExt;
    let (mut client, mut server) = tokio::io::duplex(64);
    tokio::spawn(async move {
        client.write_all(&100u32.to_be_bytes()).await.unwrap();
        client.write_all(b"not even close to 100 bytes").await.unwrap();
        drop(client);
    });
    assert!(framer::read_frame(&mut server).await.is_err());
}

#[test]
fn sftp_version_constant_is_three() {
    assert_eq!(SFTP_VERSION, 3);
}
