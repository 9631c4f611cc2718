//! Pseudo-terminal backed serial line.
//!
//! The master side is held by this process; the slave side is what another
//! program (for instance `slattach`, or a second instance of this stack) opens
//! as its serial device.

use std::ffi::CStr;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::{mem, ptr};

use super::SerialLine;
use crate::{Result, errno};

/// Maximum bytes read from the master side in one call.
pub const READ_CHUNK_SIZE: usize = 4096;

/// Master side of a pseudo-terminal configured as a raw serial line.
///
/// Frames the master cannot take right away are queued and written by
/// [Pty::flush] once the line drains.
#[derive(Debug)]
pub struct Pty {
    master: File,
    /// Kept open so the master does not see a hang-up while no process has
    /// the slave open.
    _slave: File,
    slave_name: String,
    /// Framed bytes the master has not accepted yet.
    pending: Vec<u8>,
}

impl Pty {
    /// Opens a new pseudo-terminal pair, puts it in raw mode, and makes the
    /// master non-blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if no pseudo-terminal can be allocated or configured.
    pub fn open() -> Result<Self> {
        let mut master_fd: libc::c_int = -1;
        let mut slave_fd: libc::c_int = -1;
        let mut name = [0 as libc::c_char; 64];

        if unsafe {
            libc::openpty(
                &mut master_fd,
                &mut slave_fd,
                name.as_mut_ptr(),
                ptr::null(),
                ptr::null(),
            )
        } == -1
        {
            return Err(errno!("failed to open pseudo-terminal"));
        }

        // SAFETY: `openpty` succeeded, so both descriptors are open and owned
        // by nobody else.
        let master = unsafe { File::from_raw_fd(master_fd) };
        let slave = unsafe { File::from_raw_fd(slave_fd) };

        // SAFETY: `openpty` writes a NUL-terminated path into `name`.
        let slave_name = unsafe { CStr::from_ptr(name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let pty = Self {
            master,
            _slave: slave,
            slave_name,
            pending: Vec::new(),
        };

        pty.set_raw()?;
        pty.set_non_blocking()?;

        Ok(pty)
    }

    /// Returns the path of the slave device, e.g. `/dev/pts/3`.
    pub fn slave_name(&self) -> &str {
        &self.slave_name
    }

    /// Returns the raw file descriptor of the master side.
    pub fn fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }

    /// Reads whatever bytes are available on the line.
    ///
    /// Returns `Ok(0)` when nothing is available.
    ///
    /// # Errors
    ///
    /// Returns an error if reading from the master side fails.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        match (&self.master).read(buf) {
            Ok(nbytes) => Ok(nbytes),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    /// Writes as much of the outbound queue as the master accepts.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails for a reason other than the master
    /// being full.
    pub fn flush(&mut self) -> io::Result<()> {
        drain(&mut self.master, &mut self.pending)
    }

    /// Returns `true` if queued bytes wait for the master to accept them.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Disables line discipline processing (echo, canonical mode, and
    /// character translation) so bytes pass through unchanged.
    fn set_raw(&self) -> Result<()> {
        let fd = self._slave.as_raw_fd();
        let mut termios: libc::termios = unsafe { mem::zeroed() };

        if unsafe { libc::tcgetattr(fd, &mut termios) } == -1 {
            return Err(errno!("failed to get pseudo-terminal attributes"));
        }

        unsafe { libc::cfmakeraw(&mut termios) };

        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) } == -1 {
            return Err(errno!("failed to set pseudo-terminal to raw mode"));
        }

        Ok(())
    }

    fn set_non_blocking(&self) -> Result<()> {
        let fd = self.fd();

        // Get the current flags so they can be combined with `O_NONBLOCK`.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags == -1 {
            return Err(errno!("failed to get flags for pseudo-terminal"));
        }

        if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
            return Err(errno!("failed to configure pseudo-terminal as non-blocking"));
        }

        Ok(())
    }
}

impl SerialLine for Pty {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.pending.extend_from_slice(bytes);
        self.flush()
    }
}

impl AsRawFd for Pty {
    fn as_raw_fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }
}

/// Writes the front of `pending` to `out` until it is empty or `out` would
/// block. Written bytes are removed from `pending`.
fn drain<W: Write>(out: &mut W, pending: &mut Vec<u8>) -> io::Result<()> {
    while !pending.is_empty() {
        match out.write(pending) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(nbytes) => {
                pending.drain(..nbytes);
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }

    Ok(())
}
