//! Server dispatcher (`spec.md` §4.5): decodes requests off one
//! connection, routes them to a worker pool, and hands completed
//! responses to the [`OrderingManager`] so they leave in arrival order.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::framer::{self, WriteHalf};
use crate::protocol::extensions;
use crate::protocol::packet::{self, *};
use crate::protocol::{FileAttrs, MessageType, Packet, StatusCode, SFTP_VERSION};

use super::handler::{DirHandler, FileHandler, Handler};
use super::handles::HandleTable;
use super::ordering::OrderingManager;

enum HandleKind<F, D> {
    File(F),
    Dir(D),
}

/// An open handle's back-end state plus the reader-writer lock that
/// implements the "CLOSE waits for outstanding reads/writes to drain"
/// routing rule: READ/WRITE/FSTAT take the read side, CLOSE takes the
/// write side before tearing the handle down.
struct HandleEntry<F, D> {
    kind: HandleKind<F, D>,
    drain: RwLock<()>,
    /// The path this handle was opened with, kept so `fstatvfs@openssh.com`
    /// can resolve a handle back to a path for the backend's by-path
    /// `statvfs` call.
    path: String,
}

fn error_to_status(id: u32, err: &Error) -> Packet {
    Packet::Status(Status::new(id, err.to_status_code(), err.to_string()))
}

/// Drives one connection against a [`Handler`] back-end.
///
/// `Dispatcher::serve` owns the connection until the stream closes or a
/// fatal protocol error occurs; it never returns early for an individual
/// request's failure, those are reported as `STATUS` responses instead.
pub struct Dispatcher<H: Handler> {
    handler: Arc<H>,
    config: ServerConfig,
}

type Entry<H> = HandleEntry<<H as Handler>::File, <H as Handler>::Dir>;

enum Job {
    Packet(Packet),
}

impl<H> Dispatcher<H>
where
    H: Handler + Send + Sync + 'static,
    H::File: Send + Sync + 'static,
    H::Dir: Send + Sync + 'static,
{
    /// Build a dispatcher over `handler`, tuned by `config`.
    pub fn new(handler: H, config: ServerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            handler: Arc::new(handler),
            config,
        })
    }

    /// Serve one connection to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial `INIT`/`VERSION` handshake fails
    /// or the underlying stream errors before any packet is read.
    pub async fn serve<S>(self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (mut reader, writer) = tokio::io::split(stream);
        let writer = Arc::new(WriteHalf::new(writer));
        let handles: Arc<HandleTable<Entry<H>>> =
            Arc::new(HandleTable::with_max(self.config.max_handles));
        let (ordering, mut outbound) = OrderingManager::new();

        let writer_for_pump = writer.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(packet) = outbound.recv().await {
                if let Err(err) = writer_for_pump.write_packet(&packet).await {
                    warn!(%err, "failed writing response, connection dead");
                    break;
                }
            }
        });

        // `fstatvfs@openssh.com` reuses the backend's by-path `statvfs`
        // call (via the handle's recorded open path), so any handler that
        // supports `statvfs@openssh.com` gets it for free.
        let mut extension_names: Vec<&'static str> = self.handler.supported_extensions().to_vec();
        if extension_names.contains(&extensions::STATVFS) && !extension_names.contains(&extensions::FSTATVFS) {
            extension_names.push(extensions::FSTATVFS);
        }

        // Handshake: the first frame must be INIT.
        let frame = framer::read_frame(&mut reader).await?;
        let init = Packet::decode(&frame.body)?;
        let Packet::Init(Init { version }) = init else {
            return Err(Error::Protocol("expected INIT as first packet".into()));
        };
        info!(client_version = version, "SFTP session starting");

        let advertised: Vec<(String, String)> = extension_names
            .iter()
            .map(|name| (name.to_string(), extensions::VERSION_STRING.to_string()))
            .collect();
        writer
            .write_packet(&Packet::Version(Version {
                version: SFTP_VERSION,
                extensions: advertised,
            }))
            .await?;

        let command_workers = (self.config.worker_count / 4).max(1);
        let rw_workers = self.config.worker_count.saturating_sub(command_workers).max(1);

        let (cmd_tx, cmd_rx) = mpsc::channel::<Job>(self.config.worker_count);
        let (rw_tx, rw_rx) = mpsc::channel::<Job>(self.config.worker_count);
        let cmd_rx = Arc::new(Mutex::new(cmd_rx));
        let rw_rx = Arc::new(Mutex::new(rw_rx));

        let mut worker_tasks = Vec::with_capacity(command_workers + rw_workers);
        for _ in 0..command_workers {
            worker_tasks.push(spawn_worker(
                cmd_rx.clone(),
                self.handler.clone(),
                handles.clone(),
                ordering.clone(),
            ));
        }
        for _ in 0..rw_workers {
            worker_tasks.push(spawn_worker(
                rw_rx.clone(),
                self.handler.clone(),
                handles.clone(),
                ordering.clone(),
            ));
        }

        // True once an OPEN has routed subsequent traffic to the
        // read/write channel; CLOSE switches it back.
        let routing_is_rw = AtomicBool::new(false);

        let read_loop = async {
            loop {
                let frame = match framer::read_frame(&mut reader).await {
                    Ok(frame) => frame,
                    Err(err) => {
                        debug!(%err, "reader loop exiting");
                        break;
                    }
                };
                let packet = match Packet::decode(&frame.body) {
                    Ok(packet) => packet,
                    Err(err) => {
                        warn!(%err, "framing desynchronization, closing connection");
                        break;
                    }
                };
                if matches!(packet, Packet::Init(_)) {
                    warn!("duplicate INIT, ignoring");
                    continue;
                }
                let Some(id) = packet.id() else {
                    warn!("response-shaped packet from client, ignoring");
                    continue;
                };

                ordering.register_arrival(id).await;

                let target = match packet.message_type() {
                    MessageType::Open => {
                        routing_is_rw.store(true, AtomicOrdering::SeqCst);
                        &cmd_tx
                    }
                    MessageType::Close => {
                        routing_is_rw.store(false, AtomicOrdering::SeqCst);
                        &cmd_tx
                    }
                    _ if routing_is_rw.load(AtomicOrdering::SeqCst) => &rw_tx,
                    _ => &cmd_tx,
                };

                if target.send(Job::Packet(packet)).await.is_err() {
                    break;
                }
            }
        };
        read_loop.await;

        ordering.close().await;
        drop(cmd_rx);
        drop(rw_rx);
        for task in worker_tasks {
            let _ = task.await;
        }
        drop(ordering);
        let _ = writer_task.await;

        for entry in handles.drain().await {
            match &entry.kind {
                HandleKind::File(f) => {
                    let _ = f.close().await;
                }
                HandleKind::Dir(d) => {
                    let _ = d.close().await;
                }
            }
        }

        Ok(())
    }
}

fn spawn_worker<H>(
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    handler: Arc<H>,
    handles: Arc<HandleTable<Entry<H>>>,
    ordering: OrderingManager,
) -> tokio::task::JoinHandle<()>
where
    H: Handler + Send + Sync + 'static,
    H::File: Send + Sync + 'static,
    H::Dir: Send + Sync + 'static,
{
    tokio::spawn(async move {
        loop {
            let job = {
                let mut guard = rx.lock().await;
                guard.recv().await
            };
            let Some(Job::Packet(packet)) = job else {
                break;
            };
            let Some(id) = packet.id() else { continue };
            let response = dispatch_one(packet, &handler, &handles).await;
            ordering.complete(id, response).await;
        }
    })
}

async fn dispatch_one<H>(packet: Packet, handler: &H, handles: &HandleTable<Entry<H>>) -> Packet
where
    H: Handler,
{
    match packet {
        Packet::Open(p) => match handler.open(&p.filename, p.pflags, &p.attrs).await {
            Ok(file) => {
                let allocated = handles
                    .allocate(HandleEntry {
                        kind: HandleKind::File(file),
                        drain: RwLock::new(()),
                        path: p.filename.clone(),
                    })
                    .await;
                match allocated {
                    Ok(handle) => Packet::Handle(packet::Handle { id: p.id, handle }),
                    Err(err) => error_to_status(p.id, &err),
                }
            }
            Err(err) => error_to_status(p.id, &err),
        },
        Packet::Opendir(p) => match handler.open_dir(&p.path).await {
            Ok(dir) => {
                let allocated = handles
                    .allocate(HandleEntry {
                        kind: HandleKind::Dir(dir),
                        drain: RwLock::new(()),
                        path: p.path.clone(),
                    })
                    .await;
                match allocated {
                    Ok(handle) => Packet::Handle(packet::Handle { id: p.id, handle }),
                    Err(err) => error_to_status(p.id, &err),
                }
            }
            Err(err) => error_to_status(p.id, &err),
        },
        Packet::Close(p) => match handles.release(&p.handle).await {
            Ok(entry) => {
                let _guard = entry.drain.write().await;
                let result = match &entry.kind {
                    HandleKind::File(f) => f.close().await,
                    HandleKind::Dir(d) => d.close().await,
                };
                match result {
                    Ok(()) => Packet::Status(Status::ok(p.id)),
                    Err(err) => error_to_status(p.id, &err),
                }
            }
            Err(err) => error_to_status(p.id, &err),
        },
        Packet::Read(p) => read_file(p, handles).await,
        Packet::Write(p) => write_file(p, handles).await,
        Packet::Fstat(p) => match handles.lookup(&p.handle).await {
            Ok(entry) => {
                let _guard = entry.drain.read().await;
                match &entry.kind {
                    HandleKind::File(f) => match f.stat().await {
                        Ok(attrs) => Packet::Attrs(Attrs { id: p.id, attrs }),
                        Err(err) => error_to_status(p.id, &err),
                    },
                    HandleKind::Dir(_) => error_to_status(p.id, &Error::InvalidHandle),
                }
            }
            Err(err) => error_to_status(p.id, &err),
        },
        Packet::Fsetstat(p) => match handles.lookup(&p.handle).await {
            Ok(entry) => {
                let _guard = entry.drain.read().await;
                match &entry.kind {
                    HandleKind::File(f) => match f.set_stat(&p.attrs).await {
                        Ok(()) => Packet::Status(Status::ok(p.id)),
                        Err(err) => error_to_status(p.id, &err),
                    },
                    HandleKind::Dir(_) => error_to_status(p.id, &Error::InvalidHandle),
                }
            }
            Err(err) => error_to_status(p.id, &err),
        },
        Packet::Readdir(p) => match handles.lookup(&p.handle).await {
            Ok(entry) => {
                let _guard = entry.drain.read().await;
                match &entry.kind {
                    HandleKind::Dir(d) => match d.read_dir(4096).await {
                        Ok(entries) if entries.is_empty() => {
                            Packet::Status(Status::new(p.id, StatusCode::Eof, "end of directory"))
                        }
                        Ok(entries) => Packet::Name(Name { id: p.id, entries }),
                        Err(err) => error_to_status(p.id, &err),
                    },
                    HandleKind::File(_) => error_to_status(p.id, &Error::InvalidHandle),
                }
            }
            Err(err) => error_to_status(p.id, &err),
        },
        Packet::Lstat(p) => match handler.lstat(&p.path).await {
            Ok(attrs) => Packet::Attrs(Attrs { id: p.id, attrs }),
            Err(err) => error_to_status(p.id, &err),
        },
        Packet::Stat(p) => match handler.stat(&p.path).await {
            Ok(attrs) => Packet::Attrs(Attrs { id: p.id, attrs }),
            Err(err) => error_to_status(p.id, &err),
        },
        Packet::Setstat(p) => match handler.set_stat(&p.path, &p.attrs).await {
            Ok(()) => Packet::Status(Status::ok(p.id)),
            Err(err) => error_to_status(p.id, &err),
        },
        Packet::Remove(p) => match handler.remove(&p.filename).await {
            Ok(()) => Packet::Status(Status::ok(p.id)),
            Err(err) => error_to_status(p.id, &err),
        },
        Packet::Mkdir(p) => match handler.mkdir(&p.path, &p.attrs).await {
            Ok(()) => Packet::Status(Status::ok(p.id)),
            Err(err) => error_to_status(p.id, &err),
        },
        Packet::Rmdir(p) => match handler.rmdir(&p.path).await {
            Ok(()) => Packet::Status(Status::ok(p.id)),
            Err(err) => error_to_status(p.id, &err),
        },
        Packet::Realpath(p) => match handler.real_path(&p.path).await {
            Ok(resolved) => Packet::Name(Name {
                id: p.id,
                entries: vec![NameEntry {
                    filename: resolved,
                    longname: String::new(),
                    attrs: FileAttrs::default(),
                }],
            }),
            Err(err) => error_to_status(p.id, &err),
        },
        Packet::Rename(p) => match handler.rename(&p.oldpath, &p.newpath).await {
            Ok(()) => Packet::Status(Status::ok(p.id)),
            Err(err) => error_to_status(p.id, &err),
        },
        Packet::Readlink(p) => match handler.read_link(&p.path).await {
            Ok(target) => Packet::Name(Name {
                id: p.id,
                entries: vec![NameEntry {
                    filename: target,
                    longname: String::new(),
                    attrs: FileAttrs::default(),
                }],
            }),
            Err(err) => error_to_status(p.id, &err),
        },
        Packet::Symlink(p) => match handler.symlink(&p.linkpath, &p.targetpath).await {
            Ok(()) => Packet::Status(Status::ok(p.id)),
            Err(err) => error_to_status(p.id, &err),
        },
        Packet::Extended(p) => dispatch_extended(p, handler, handles).await,
        other => {
            let id = other.id().unwrap_or_default();
            error_to_status(
                id,
                &Error::Protocol(format!("unexpected request packet {:?}", other.message_type())),
            )
        }
    }
}

async fn read_file<H: Handler>(p: Read, handles: &HandleTable<Entry<H>>) -> Packet {
    match handles.lookup(&p.handle).await {
        Ok(entry) => {
            let _guard = entry.drain.read().await;
            match &entry.kind {
                HandleKind::File(f) => match f.read_at(p.offset, p.len).await {
                    Ok(data) if data.is_empty() => {
                        Packet::Status(Status::new(p.id, StatusCode::Eof, "end of file"))
                    }
                    Ok(data) => Packet::Data(Data {
                        id: p.id,
                        data: data.into(),
                    }),
                    Err(err) => error_to_status(p.id, &err),
                },
                HandleKind::Dir(_) => error_to_status(p.id, &Error::InvalidHandle),
            }
        }
        Err(err) => error_to_status(p.id, &err),
    }
}

async fn write_file<H: Handler>(p: Write, handles: &HandleTable<Entry<H>>) -> Packet {
    match handles.lookup(&p.handle).await {
        Ok(entry) => {
            let _guard = entry.drain.read().await;
            match &entry.kind {
                HandleKind::File(f) => match f.write_at(p.offset, &p.data).await {
                    Ok(()) => Packet::Status(Status::ok(p.id)),
                    Err(err) => error_to_status(p.id, &err),
                },
                HandleKind::Dir(_) => error_to_status(p.id, &Error::InvalidHandle),
            }
        }
        Err(err) => error_to_status(p.id, &err),
    }
}

async fn dispatch_extended<H: Handler>(
    p: Extended,
    handler: &H,
    handles: &HandleTable<Entry<H>>,
) -> Packet {
    match p.request.as_str() {
        extensions::FSYNC => {
            let Ok(handle) = extensions::decode_fsync(&p.data) else {
                return error_to_status(p.id, &Error::Protocol("bad fsync payload".into()));
            };
            match handles.lookup(&handle).await {
                Ok(entry) => {
                    let _guard = entry.drain.read().await;
                    match &entry.kind {
                        HandleKind::File(f) => match f.sync().await {
                            Ok(()) => Packet::Status(Status::ok(p.id)),
                            Err(err) => error_to_status(p.id, &err),
                        },
                        HandleKind::Dir(_) => error_to_status(p.id, &Error::InvalidHandle),
                    }
                }
                Err(err) => error_to_status(p.id, &err),
            }
        }
        extensions::HARDLINK => {
            let Ok((oldpath, newpath)) = extensions::decode_hardlink(&p.data) else {
                return error_to_status(p.id, &Error::Protocol("bad hardlink payload".into()));
            };
            match handler.hardlink(&oldpath, &newpath).await {
                Ok(()) => Packet::Status(Status::ok(p.id)),
                Err(err) => error_to_status(p.id, &err),
            }
        }
        extensions::POSIX_RENAME => {
            let Ok((oldpath, newpath)) = extensions::decode_posix_rename(&p.data) else {
                return error_to_status(p.id, &Error::Protocol("bad posix-rename payload".into()));
            };
            match handler.posix_rename(&oldpath, &newpath).await {
                Ok(()) => Packet::Status(Status::ok(p.id)),
                Err(err) => error_to_status(p.id, &err),
            }
        }
        extensions::STATVFS => {
            let Ok(path) = extensions::decode_statvfs_path(&p.data) else {
                return error_to_status(p.id, &Error::Protocol("bad statvfs payload".into()));
            };
            match handler.statvfs(&path).await {
                Ok(stat) => Packet::ExtendedReply(ExtendedReply {
                    id: p.id,
                    data: stat.encode(),
                }),
                Err(err) => error_to_status(p.id, &err),
            }
        }
        extensions::FSTATVFS => {
            let Ok(handle) = extensions::decode_fstatvfs_handle(&p.data) else {
                return error_to_status(p.id, &Error::Protocol("bad fstatvfs payload".into()));
            };
            let path = match handles.lookup(&handle).await {
                Ok(entry) => entry.path.clone(),
                Err(err) => return error_to_status(p.id, &err),
            };
            match handler.statvfs(&path).await {
                Ok(stat) => Packet::ExtendedReply(ExtendedReply {
                    id: p.id,
                    data: stat.encode(),
                }),
                Err(err) => error_to_status(p.id, &err),
            }
        }
        _ => Packet::Status(Status::new(
            p.id,
            StatusCode::OpUnsupported,
            format!("unsupported extension: {}", p.request),
        )),
    }
}
