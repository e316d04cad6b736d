//! C6: validating and taking ownership of externally provided sockets
//! (§4.6). Validation never touches a flag on the fd — callers rely on
//! file-status flags and blocking mode being unchanged afterward (P8).

use std::collections::HashSet;
use std::net::SocketAddr;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use socket2::{Domain as SockDomain, Socket, Type as SockType};

use crate::destination::Destination;
use crate::error::{Error, Result};
use crate::label::Label;
use crate::protocol::{Domain, Protocol};

/// The destination a validated socket belongs to, plus its stable
/// display cookie.
pub struct ValidatedSocket {
    pub destination: Destination,
    pub cookie: u64,
    pub fd: OwnedFd,
}

/// Runs every rule in §4.6's table against `fd`, deriving the
/// destination it should register under.
pub fn validate(fd: OwnedFd, label: Label) -> Result<ValidatedSocket> {
    let borrowed: BorrowedFd = fd.as_fd();
    let socket = socket_view(&borrowed)?;

    let domain = socket.domain().map_err(Error::NotSocket)?;
    let af = if domain == SockDomain::IPV4 {
        Domain::V4
    } else if domain == SockDomain::IPV6 {
        Domain::V6
    } else {
        return Err(Error::BadSocketDomain);
    };

    let ty = socket.r#type().map_err(Error::NotSocket)?;
    let protocol = if ty == SockType::STREAM {
        Protocol::Tcp
    } else if ty == SockType::DGRAM {
        Protocol::Udp
    } else {
        return Err(Error::BadSocketType);
    };

    if let Ok(Some(sock_protocol)) = socket.protocol() {
        let matches = match protocol {
            Protocol::Tcp => sock_protocol == socket2::Protocol::TCP,
            Protocol::Udp => sock_protocol == socket2::Protocol::UDP,
        };
        if !matches {
            return Err(Error::BadSocketProtocol);
        }
    }

    match protocol {
        Protocol::Tcp => {
            if !is_listening(&borrowed)? {
                return Err(Error::BadSocketState("TCP socket is not listening"));
            }
        }
        Protocol::Udp => {
            if socket.peer_addr().is_ok() {
                return Err(Error::BadSocketState("UDP socket has a connected peer"));
            }
        }
    }

    if af == Domain::V6 && !socket.only_v6().unwrap_or(false) {
        return Err(Error::BadSocketState("IPv6 socket is dual-stack (IPV6_ONLY not set)"));
    }

    let cookie = socket_cookie(&borrowed)?;

    Ok(ValidatedSocket {
        destination: Destination::new(label, af, protocol),
        cookie,
        fd,
    })
}

/// Deduplicates fds belonging to the same reuseport group — identical
/// protocol and bound `(address, port)` — keeping only the first. Used
/// by the systemd-activation pathway, which passes every socket in a
/// reuseport group at once.
pub fn dedup_reuseport(sockets: Vec<ValidatedSocket>) -> Vec<ValidatedSocket> {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(sockets.len());
    for socket in sockets {
        let borrowed = socket.fd.as_fd();
        let Ok(local) = socket_view(&borrowed).and_then(|s| local_addr(&s)) else {
            kept.push(socket);
            continue;
        };
        let group_key = (socket.destination.protocol, local);
        if seen.insert(group_key) {
            kept.push(socket);
        }
    }
    kept
}

fn local_addr(socket: &Socket) -> Result<SocketAddr> {
    socket
        .local_addr()
        .ok()
        .and_then(|a| a.as_socket())
        .ok_or_else(|| Error::BadSocketState("socket has no bound local address"))
}

fn socket_view(fd: &BorrowedFd) -> Result<Socket> {
    // `Socket::from(dup)` takes ownership; we dup so the caller's fd is
    // never consumed by inspection.
    let dup: OwnedFd = fd.try_clone_to_owned().map_err(Error::NotSocket)?;
    Ok(Socket::from(dup))
}

fn is_listening(fd: &BorrowedFd) -> Result<bool> {
    let mut value: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_ACCEPTCONN,
            &mut value as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc != 0 {
        return Err(Error::NotSocket(std::io::Error::last_os_error()));
    }
    Ok(value != 0)
}

fn socket_cookie(fd: &BorrowedFd) -> Result<u64> {
    let mut value: u64 = 0;
    let mut len = std::mem::size_of::<u64>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_COOKIE,
            &mut value as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc != 0 {
        return Err(Error::NotSocket(std::io::Error::last_os_error()));
    }
    Ok(value)
}
