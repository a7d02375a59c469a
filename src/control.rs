// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Unix-domain control channel. Exists only to hand a reader the ring's fd
// and size via one `SCM_RIGHTS` handshake; carries no further data traffic
// except shutdown notice and disconnect detection.

use std::io;
use std::mem::{size_of, MaybeUninit};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::SetupError;

const SOCKET_PATH_FIELD_LEN: usize = 108;
const MSG_TYPE_HANDSHAKE: u8 = 0x01;
const MSG_TYPE_SHUTDOWN: u8 = 0x03;

/// Wire body sent with the handshake (and, with no ancillary fd, with
/// shutdown). `memfd_fd` is always zero on the wire — the real fd travels as
/// `SCM_RIGHTS` ancillary data alongside this struct, never in the body.
/// `packed` holds the body to the spec's 124 bytes exactly; a default
/// `repr(C)` layout would tail-pad to 128 to satisfy `u64`'s 8-byte
/// alignment, which the wire contract does not allow.
#[repr(C, packed)]
struct ControlMessage {
    msg_type: u8,
    reserved: [u8; 3],
    memfd_fd: u32,
    ring_buffer_size: u64,
    socket_path: [u8; SOCKET_PATH_FIELD_LEN],
}

const _: () = assert!(size_of::<ControlMessage>() == 124);

impl ControlMessage {
    fn handshake(ring_buffer_size: u64, path: &Path) -> Self {
        let mut socket_path = [0u8; SOCKET_PATH_FIELD_LEN];
        let bytes = path.to_string_lossy();
        let bytes = bytes.as_bytes();
        let n = bytes.len().min(SOCKET_PATH_FIELD_LEN - 1);
        socket_path[..n].copy_from_slice(&bytes[..n]);
        Self {
            msg_type: MSG_TYPE_HANDSHAKE,
            reserved: [0; 3],
            memfd_fd: 0,
            ring_buffer_size,
            socket_path,
        }
    }

    fn shutdown() -> Self {
        Self {
            msg_type: MSG_TYPE_SHUTDOWN,
            reserved: [0; 3],
            memfd_fd: 0,
            ring_buffer_size: 0,
            socket_path: [0; SOCKET_PATH_FIELD_LEN],
        }
    }
}

fn sockaddr_for(path: &Path) -> io::Result<(libc::sockaddr_un, libc::socklen_t)> {
    let bytes = path.as_os_str().as_bytes();
    if bytes.len() >= 108 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "socket path too long for sun_path",
        ));
    }
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    for (dst, &src) in addr.sun_path.iter_mut().zip(bytes.iter()) {
        *dst = src as libc::c_char;
    }
    let len = (size_of::<libc::sa_family_t>() + bytes.len() + 1) as libc::socklen_t;
    Ok((addr, len))
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Sends `msg` plus, if present, one ancillary file descriptor, in a single
/// `sendmsg()` call.
fn send_with_fd(fd: RawFd, msg: &ControlMessage, ancillary_fd: Option<RawFd>) -> io::Result<()> {
    let mut iov = libc::iovec {
        iov_base: msg as *const ControlMessage as *mut libc::c_void,
        iov_len: size_of::<ControlMessage>(),
    };

    let mut control_buf = [0u8; 64];
    let mut hdr: libc::msghdr = unsafe { std::mem::zeroed() };
    hdr.msg_iov = &mut iov;
    hdr.msg_iovlen = 1;

    if let Some(pass_fd) = ancillary_fd {
        let space = unsafe { libc::CMSG_SPACE(size_of::<RawFd>() as u32) } as usize;
        hdr.msg_control = control_buf.as_mut_ptr() as *mut libc::c_void;
        hdr.msg_controllen = space;
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&hdr);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(size_of::<RawFd>() as u32) as usize;
            std::ptr::copy_nonoverlapping(&pass_fd, libc::CMSG_DATA(cmsg) as *mut RawFd, 1);
            hdr.msg_controllen = (*cmsg).cmsg_len;
        }
    }

    let sent = unsafe { libc::sendmsg(fd, &hdr, 0) };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Receives a `ControlMessage` plus up to one ancillary fd in a single
/// `recvmsg()` call. This crate intentionally does not split the read into a
/// plain `recv()` followed by a separate `recvmsg()` — ancillary data is
/// scoped to the `sendmsg()` call that produced it, so a later, independent
/// `recvmsg()` is not guaranteed to still see it.
fn recv_with_fd(fd: RawFd) -> io::Result<(ControlMessage, Option<OwnedFd>)> {
    let mut msg = MaybeUninit::<ControlMessage>::zeroed();
    let mut iov = libc::iovec {
        iov_base: msg.as_mut_ptr() as *mut libc::c_void,
        iov_len: size_of::<ControlMessage>(),
    };

    let space = unsafe { libc::CMSG_SPACE(size_of::<RawFd>() as u32) } as usize;
    let mut control_buf = vec![0u8; space];
    let mut hdr: libc::msghdr = unsafe { std::mem::zeroed() };
    hdr.msg_iov = &mut iov;
    hdr.msg_iovlen = 1;
    hdr.msg_control = control_buf.as_mut_ptr() as *mut libc::c_void;
    hdr.msg_controllen = space;

    let n = unsafe { libc::recvmsg(fd, &mut hdr, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    if n == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "control channel closed"));
    }

    let mut received_fd = None;
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&hdr);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let mut raw: RawFd = -1;
                std::ptr::copy_nonoverlapping(libc::CMSG_DATA(cmsg) as *const RawFd, &mut raw, 1);
                received_fd = Some(OwnedFd::from_raw_fd(raw));
                break;
            }
            cmsg = libc::CMSG_NXTHDR(&hdr, cmsg);
        }
    }

    Ok((unsafe { msg.assume_init() }, received_fd))
}

struct Client {
    fd: OwnedFd,
}

/// Runs inside the writer process: accepts reader connections and hands
/// each one the ring's fd and size via a single `sendmsg()`.
pub struct ControlServer {
    listener: OwnedFd,
    path: PathBuf,
    ring_buffer_size: u64,
    clients: Vec<Client>,
}

impl ControlServer {
    pub fn start(path: &Path, ring_buffer_size: u64) -> Result<Self, SetupError> {
        let _ = std::fs::remove_file(path);

        let raw = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
        if raw < 0 {
            return Err(SetupError::SocketCreate(io::Error::last_os_error()));
        }
        let listener = unsafe { OwnedFd::from_raw_fd(raw) };
        set_nonblocking(listener.as_raw_fd()).map_err(SetupError::SocketCreate)?;

        let (addr, len) = sockaddr_for(path).map_err(|e| SetupError::Bind {
            path: path.to_path_buf(),
            source: e,
        })?;
        let rc = unsafe {
            libc::bind(
                listener.as_raw_fd(),
                &addr as *const libc::sockaddr_un as *const libc::sockaddr,
                len,
            )
        };
        if rc < 0 {
            return Err(SetupError::Bind {
                path: path.to_path_buf(),
                source: io::Error::last_os_error(),
            });
        }

        if unsafe { libc::listen(listener.as_raw_fd(), 5) } < 0 {
            return Err(SetupError::Listen(io::Error::last_os_error()));
        }

        tracing::info!(path = %path.display(), "control server listening");

        Ok(Self {
            listener,
            path: path.to_path_buf(),
            ring_buffer_size,
            clients: Vec::new(),
        })
    }

    /// Accepts at most one pending connection, sends it the handshake
    /// (ring fd + size), and prunes clients that have disconnected. Never
    /// blocks; call this once per writer tick.
    pub fn service(&mut self, ring_fd: RawFd) {
        loop {
            let raw = unsafe { libc::accept(self.listener.as_raw_fd(), std::ptr::null_mut(), std::ptr::null_mut()) };
            if raw < 0 {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::WouldBlock {
                    tracing::warn!(error = %err, "control server accept failed");
                }
                break;
            }
            let client_fd = unsafe { OwnedFd::from_raw_fd(raw) };
            if let Err(e) = set_nonblocking(client_fd.as_raw_fd()) {
                tracing::warn!(error = %e, "failed to set client socket non-blocking");
                continue;
            }

            let message = ControlMessage::handshake(self.ring_buffer_size, &self.path);
            match send_with_fd(client_fd.as_raw_fd(), &message, Some(ring_fd)) {
                Ok(()) => {
                    tracing::info!(size = self.ring_buffer_size, "sent handshake to new client");
                    self.clients.push(Client { fd: client_fd });
                }
                Err(e) => tracing::warn!(error = %e, "failed to send handshake, dropping client"),
            }
        }

        self.clients.retain(|c| {
            let mut buf = [0u8; 1];
            let n = unsafe { libc::recv(c.fd.as_raw_fd(), buf.as_mut_ptr() as *mut libc::c_void, 1, libc::MSG_PEEK) };
            if n == 0 {
                tracing::info!("control client disconnected");
                false
            } else if n < 0 {
                let err = io::Error::last_os_error();
                err.kind() == io::ErrorKind::WouldBlock
            } else {
                true
            }
        });
    }

    /// Sends a shutdown record (no ancillary fd) to every connected client.
    pub fn shutdown(&mut self) {
        let message = ControlMessage::shutdown();
        for client in &self.clients {
            let _ = send_with_fd(client.fd.as_raw_fd(), &message, None);
        }
        self.clients.clear();
        let _ = std::fs::remove_file(&self.path);
        tracing::info!("control server stopped");
    }
}

/// Runs inside a reader process: connects and waits for the one handshake
/// record carrying the ring's fd and size.
pub struct ControlClient;

impl ControlClient {
    pub fn connect(path: &Path, timeout_ms: u64) -> Result<(OwnedFd, u64), SetupError> {
        let raw = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
        if raw < 0 {
            return Err(SetupError::SocketCreate(io::Error::last_os_error()));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let (addr, len) = sockaddr_for(path).map_err(|e| SetupError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
        let rc = unsafe {
            libc::connect(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_un as *const libc::sockaddr,
                len,
            )
        };
        if rc < 0 {
            return Err(SetupError::Connect {
                path: path.to_path_buf(),
                source: io::Error::last_os_error(),
            });
        }

        set_nonblocking(fd.as_raw_fd()).map_err(|e| SetupError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            match recv_with_fd(fd.as_raw_fd()) {
                Ok((message, received_fd)) => {
                    if message.msg_type != MSG_TYPE_HANDSHAKE {
                        return Err(SetupError::UnexpectedRecordType(message.msg_type));
                    }
                    let ring_fd = received_fd.ok_or(SetupError::NoFileDescriptorReceived)?;
                    return Ok((ring_fd, message.ring_buffer_size));
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(SetupError::HandshakeClosed);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(SetupError::HandshakeTimeout(timeout_ms));
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => {
                    return Err(SetupError::Connect {
                        path: path.to_path_buf(),
                        source: e,
                    })
                }
            }
        }
    }
}
