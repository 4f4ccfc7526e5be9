//! Raw IPv6 socket with `recvmmsg`/`sendmmsg` straight into slot memory.
//!
//! Per slot the kernel sees:
//! - receive: `msg_name` at the slot base (a `sockaddr_in6` fits in the first
//!   28 bytes) and one iovec over `[DATA_OFFSET, slot_size)`; the datagram
//!   length is copied into the slot's length field afterwards.
//! - send: a `sockaddr_in6` built from the address at `ADDR_OFFSET`, and one
//!   iovec of `length` bytes at `DATA_OFFSET`.
//!
//! Message headers are allocated once per socket and re-pointed on each call.

use crate::{Transport, TransportError};
use quarry_wire::PacketSlotBuffer;
use quarry_wire::layout::DATA_OFFSET;
use std::io;
use std::mem::{size_of, zeroed};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::time::Duration;

pub struct RawSocket6 {
    fd: OwnedFd,
    headers: Vec<libc::mmsghdr>,
    iovecs: Vec<libc::iovec>,
    names: Vec<libc::sockaddr_in6>,
}

// SAFETY: the raw pointers inside `headers`/`iovecs` are scratch space,
// rewritten before every syscall from the buffer passed to that call; they
// never outlive the call and are never shared between threads.
unsafe impl Send for RawSocket6 {}

impl RawSocket6 {
    /// Opens `AF_INET6`/`SOCK_RAW` for `protocol`, sized for batches of `max_batch`.
    pub fn open(protocol: i32, max_batch: usize) -> Result<Self, TransportError> {
        // SAFETY: plain socket(2) call; the result is checked before use.
        let fd = unsafe { libc::socket(libc::AF_INET6, libc::SOCK_RAW, protocol) };
        if fd < 0 {
            return Err(TransportError::Open {
                protocol,
                source: io::Error::last_os_error(),
            });
        }
        // SAFETY: fd was just returned by socket(2) and is owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        let max_batch = max_batch.max(1);
        Ok(Self {
            fd,
            // SAFETY: all-zero is a valid mmsghdr / sockaddr_in6.
            headers: vec![unsafe { zeroed() }; max_batch],
            iovecs: vec![
                libc::iovec {
                    iov_base: std::ptr::null_mut(),
                    iov_len: 0,
                };
                max_batch
            ],
            names: vec![unsafe { zeroed() }; max_batch],
        })
    }

    fn set_int_option(&self, name: libc::c_int, option: &'static str, value: libc::c_int) -> Result<(), TransportError> {
        // SAFETY: value is a live c_int and the length matches it.
        let rc = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_SOCKET,
                name,
                &value as *const libc::c_int as *const libc::c_void,
                size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(TransportError::Option {
                option,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    pub fn set_send_buffer_size(&self, bytes: usize) -> Result<(), TransportError> {
        self.set_int_option(libc::SO_SNDBUF, "SO_SNDBUF", bytes.min(i32::MAX as usize) as libc::c_int)
    }

    pub fn set_receive_buffer_size(&self, bytes: usize) -> Result<(), TransportError> {
        self.set_int_option(libc::SO_RCVBUF, "SO_RCVBUF", bytes.min(i32::MAX as usize) as libc::c_int)
    }

    /// Bounds how long a receive blocks with nothing queued, so the caller's
    /// loop gets to check its stop flag.
    pub fn set_receive_timeout(&self, timeout: Duration) -> Result<(), TransportError> {
        let tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        // SAFETY: tv is a live timeval and the length matches it.
        let rc = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const libc::timeval as *const libc::c_void,
                size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(TransportError::Option {
                option: "SO_RCVTIMEO",
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Closes the socket, reporting the close(2) result. Dropping closes too,
    /// silently.
    pub fn close(self) -> Result<(), TransportError> {
        let fd = self.fd.into_raw_fd();
        // SAFETY: ownership of fd was just released from OwnedFd.
        if unsafe { libc::close(fd) } != 0 {
            return Err(TransportError::Close(io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl Transport for RawSocket6 {
    fn recv_batch(&mut self, buf: &mut PacketSlotBuffer, max: usize) -> Result<usize, TransportError> {
        let n = max.min(buf.slots()).min(self.headers.len());
        let slot_size = buf.slot_size();
        let base = buf.as_mut_ptr();

        for i in 0..n {
            // SAFETY: i < slots, so the slot lies inside the buffer.
            let slot = unsafe { base.add(i * slot_size) };
            self.iovecs[i] = libc::iovec {
                iov_base: unsafe { slot.add(DATA_OFFSET) } as *mut libc::c_void,
                iov_len: slot_size - DATA_OFFSET,
            };
            let hdr = &mut self.headers[i];
            hdr.msg_hdr.msg_name = slot as *mut libc::c_void;
            hdr.msg_hdr.msg_namelen = size_of::<libc::sockaddr_in6>() as libc::socklen_t;
            hdr.msg_hdr.msg_iov = &mut self.iovecs[i];
            hdr.msg_hdr.msg_iovlen = 1;
            hdr.msg_hdr.msg_control = std::ptr::null_mut();
            hdr.msg_hdr.msg_controllen = 0;
            hdr.msg_hdr.msg_flags = 0;
            hdr.msg_len = 0;
        }

        // SAFETY: headers 0..n point into `buf`, which is borrowed mutably
        // for the whole call.
        let got = unsafe {
            libc::recvmmsg(
                self.fd.as_raw_fd(),
                self.headers.as_mut_ptr(),
                n as libc::c_uint,
                libc::MSG_WAITFORONE,
                std::ptr::null_mut(),
            )
        };
        if got < 0 {
            let err = TransportError::last_os("recvmmsg");
            return match err.code() {
                Some(libc::EAGAIN) | Some(libc::EINTR) => Ok(0),
                _ => Err(err),
            };
        }

        let got = got as usize;
        for i in 0..got {
            let len = self.headers[i].msg_len as i32;
            buf.write_length(i, len);
        }
        Ok(got)
    }

    fn send_batch(&mut self, buf: &PacketSlotBuffer, count: usize) -> Result<usize, TransportError> {
        let n = count.min(buf.slots()).min(self.headers.len());
        let slot_size = buf.slot_size();
        let base = buf.as_ptr();

        for i in 0..n {
            let addr = buf.read_address(i);
            let name = &mut self.names[i];
            name.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            name.sin6_addr = libc::in6_addr {
                s6_addr: addr.octets(),
            };
            let len = buf.read_length(i).max(0) as usize;
            self.iovecs[i] = libc::iovec {
                // SAFETY: i < slots; the kernel only reads through this pointer.
                iov_base: unsafe { base.add(i * slot_size + DATA_OFFSET) } as *mut libc::c_void,
                iov_len: len.min(slot_size - DATA_OFFSET),
            };
            let hdr = &mut self.headers[i];
            hdr.msg_hdr.msg_name = name as *mut libc::sockaddr_in6 as *mut libc::c_void;
            hdr.msg_hdr.msg_namelen = size_of::<libc::sockaddr_in6>() as libc::socklen_t;
            hdr.msg_hdr.msg_iov = &mut self.iovecs[i];
            hdr.msg_hdr.msg_iovlen = 1;
            hdr.msg_hdr.msg_control = std::ptr::null_mut();
            hdr.msg_hdr.msg_controllen = 0;
            hdr.msg_hdr.msg_flags = 0;
            hdr.msg_len = 0;
        }

        // SAFETY: headers 0..n point into `buf` and `self.names`, both alive
        // for the whole call.
        let sent = unsafe {
            libc::sendmmsg(
                self.fd.as_raw_fd(),
                self.headers.as_mut_ptr(),
                n as libc::c_uint,
                0,
            )
        };
        if sent < 0 {
            return Err(TransportError::last_os("sendmmsg"));
        }
        Ok(sent as usize)
    }
}
