//! Native transport over the QNX Neutrino kernel message-passing calls.

use std::ffi::CString;
use std::io;
use std::ptr;

use libc::{c_char, c_int, c_long, c_uint, c_void, size_t};

use super::{Channel, Coid, Received, Transport, TransportError};

#[repr(C)]
struct NameAttach {
    dpp: *mut c_void,
    chid: c_int,
    mntid: c_int,
    zero: [c_int; 2],
}

/// `struct _msg_info` as filled in by `MsgReceive`.
#[repr(C)]
#[derive(Debug, Default)]
#[allow(dead_code)]
struct MsgInfo {
    nd: u32,
    srcnd: u32,
    pid: libc::pid_t,
    tid: i32,
    chid: i32,
    scoid: i32,
    coid: i32,
    /// Bytes actually copied into the receive buffer.
    msglen: i32,
    srcmsglen: i32,
    dstmsglen: i32,
    priority: i16,
    flags: i16,
    reserved: u32,
}

unsafe extern "C" {
    fn name_open(name: *const c_char, flags: c_int) -> c_int;
    fn name_close(coid: c_int) -> c_int;
    fn name_attach(dpp: *mut c_void, path: *const c_char, flags: c_uint) -> *mut NameAttach;
    fn MsgSend(
        coid: c_int,
        smsg: *const c_void,
        sbytes: size_t,
        rmsg: *mut c_void,
        rbytes: size_t,
    ) -> c_long;
    fn MsgSendAsyncGbl(coid: c_int, smsg: *const c_void, sbytes: size_t, msg_prio: c_uint)
    -> c_int;
    fn MsgSendPulse(coid: c_int, priority: c_int, code: c_int, value: c_int) -> c_int;
    fn MsgReceive(chid: c_int, msg: *mut c_void, bytes: size_t, info: *mut c_void) -> c_int;
    fn MsgReply(rcvid: c_int, status: c_long, msg: *const c_void, bytes: size_t) -> c_int;
}

fn c_name(name: &str) -> io::Result<CString> {
    CString::new(name).map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))
}

#[derive(Debug, Default)]
pub struct QnxTransport;

impl QnxTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for QnxTransport {
    type Channel = QnxChannel;

    fn open(&self, name: &str) -> Result<Coid, TransportError> {
        let open_err = |source| TransportError::Open {
            name: name.to_string(),
            source,
        };
        let path = c_name(name).map_err(open_err)?;
        // SAFETY: `path` is a valid NUL-terminated string for the duration of the call.
        let coid = unsafe { name_open(path.as_ptr(), 0) };
        if coid == -1 {
            return Err(open_err(io::Error::last_os_error()));
        }
        Ok(Coid(coid))
    }

    fn close(&self, coid: Coid) -> Result<(), TransportError> {
        // SAFETY: closing an id this process opened; an unknown id only yields EBADF.
        if unsafe { name_close(coid.0) } == -1 {
            return Err(TransportError::Close {
                coid,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    fn send_sync(&self, coid: Coid, payload: &[u8]) -> Result<i64, TransportError> {
        // SAFETY: the send buffer is valid for `payload.len()` bytes and no reply buffer is used.
        let status = unsafe {
            MsgSend(
                coid.0,
                payload.as_ptr().cast(),
                payload.len(),
                ptr::null_mut(),
                0,
            )
        };
        if status == -1 {
            return Err(TransportError::Send {
                coid,
                source: io::Error::last_os_error(),
            });
        }
        Ok(i64::from(status))
    }

    fn send_async(&self, coid: Coid, payload: &[u8]) -> Result<(), TransportError> {
        // SAFETY: the send buffer is valid for `payload.len()` bytes.
        let rc = unsafe { MsgSendAsyncGbl(coid.0, payload.as_ptr().cast(), payload.len(), 0) };
        if rc == -1 {
            return Err(TransportError::Send {
                coid,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    fn send_pulse(&self, coid: Coid, code: i8, value: i32) -> Result<(), TransportError> {
        // SAFETY: plain integer arguments.
        if unsafe { MsgSendPulse(coid.0, 0, c_int::from(code), value) } == -1 {
            return Err(TransportError::Pulse {
                coid,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    fn attach(&self, name: &str) -> Result<QnxChannel, TransportError> {
        let attach_err = |source| TransportError::Attach {
            name: name.to_string(),
            source,
        };
        let path = c_name(name).map_err(attach_err)?;
        // SAFETY: a null dispatch handle asks the kernel to create one for us.
        let attach = unsafe { name_attach(ptr::null_mut(), path.as_ptr(), 0) };
        if attach.is_null() {
            return Err(attach_err(io::Error::last_os_error()));
        }
        // SAFETY: name_attach returned a non-null pointer to a live name_attach_t
        // that stays valid until name_detach, which is never called.
        let chid = unsafe { (*attach).chid };
        Ok(QnxChannel { chid })
    }
}

#[derive(Debug)]
pub struct QnxChannel {
    chid: c_int,
}

impl Channel for QnxChannel {
    fn chid(&self) -> i32 {
        self.chid
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<Received, TransportError> {
        let mut info = MsgInfo::default();
        // SAFETY: `buf` is writable for `buf.len()` bytes and `info` matches the
        // kernel's `struct _msg_info`.
        let rcvid = unsafe {
            MsgReceive(
                self.chid,
                buf.as_mut_ptr().cast(),
                buf.len(),
                ptr::from_mut(&mut info).cast(),
            )
        };
        match rcvid {
            -1 => Err(TransportError::Receive {
                chid: self.chid,
                source: io::Error::last_os_error(),
            }),
            0 => Ok(Received::Pulse),
            rcvid => Ok(Received::message(rcvid, info.msglen, buf.len())),
        }
    }

    fn discard(&mut self, received: Received) -> Result<(), TransportError> {
        let Received::Message { rcvid, .. } = received else {
            return Ok(());
        };
        // SAFETY: empty reply to a receive id obtained from MsgReceive on this channel.
        if unsafe { MsgReply(rcvid, 0, ptr::null(), 0) } == -1 {
            return Err(TransportError::Reply {
                rcvid,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "qnx_tests.rs"]
mod tests;
