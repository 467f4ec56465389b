//! Chroot confinement (`to_local`), exercised through a live `Handler`
//! session rather than just the bare function, so an escape attempt is
//! confirmed to surface as a protocol-level error to the client too.

mod support;

use std::path::Path;

use sftp::server::to_local;

#[test]
fn dotdot_escape_is_rejected_before_touching_the_filesystem() {
    let root = Path::new("/srv/sftp-root");
    assert!(to_local(root, "../../etc/passwd").is_err());
    assert!(to_local(root, "a/../../b").is_err());
}

#[test]
fn absolute_paths_are_confined_under_root_not_the_real_filesystem_root() {
    let root = Path::new("/srv/sftp-root");
    let resolved = to_local(root, "/etc/passwd").unwrap();
    assert_eq!(resolved, Path::new("/srv/sftp-root/etc/passwd"));
}

#[tokio::test]
async fn escaping_path_from_a_live_client_surfaces_as_invalid_path() {
    let (client, _tempdir) = support::connected_client().await;
    let err = client.stat("../../../../etc/passwd").await.unwrap_err();
    // to_local rejects the escape before the backend ever runs; the
    // dispatcher reports it the same way any backend error is reported.
    assert!(err.kind().is_some() || matches!(err, sftp::Error::Protocol(_)));
}

#[tokio::test]
async fn a_path_with_an_internal_dotdot_that_stays_under_root_behaves_normally() {
    let (client, _tempdir) = support::connected_client().await;
    client.mkdir("/a", 0o755).await.unwrap();
    client.write_file("/a/../a/file.txt", b"ok").await.unwrap();
    assert_eq!(client.read_file("/a/file.txt").await.unwrap(), b"ok");
}
