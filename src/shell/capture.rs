//! Output capture: a PTY (or pipe) pair whose slave side replaces the
//! shell-default stdout/stderr handed to child processes. A copier thread
//! reads the master and forwards every chunk to the real stream and to the
//! current execution's buffer, which is what the model later reads.

use std::fs::File;
use std::io::Read;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::state::ShellState;
use crate::util;

pub struct Capture {
    slave: Arc<File>,
    poll_fd: OwnedFd,
    copying: Arc<AtomicBool>,
    is_pty: bool,
}

impl Capture {
    /// Open a capture channel mirroring into `real`. A PTY is used when the
    /// real stream is a terminal (children keep TTY size and colors); a
    /// plain pipe otherwise.
    pub fn open(real: Arc<File>, state: Arc<ShellState>) -> std::io::Result<Capture> {
        let is_pty = util::is_terminal(&real);
        let (master, slave) = if is_pty { open_pty()? } else { os_pipe()? };

        if is_pty {
            inherit_winsize(libc::STDIN_FILENO, slave.as_raw_fd());
        }

        let poll_fd = dup_fd(master.as_raw_fd())?;
        let copying = Arc::new(AtomicBool::new(false));

        let thread_copying = copying.clone();
        std::thread::spawn(move || copy_loop(master, real, state, thread_copying));

        Ok(Capture {
            slave: Arc::new(slave),
            poll_fd,
            copying,
            is_pty,
        })
    }

    /// The descriptor handed to children as stdout/stderr.
    pub fn slave(&self) -> Arc<File> {
        self.slave.clone()
    }

    /// Propagate the terminal size of `from` onto the capture channel.
    pub fn inherit_size(&self, from: RawFd) {
        if self.is_pty {
            inherit_winsize(from, self.slave.as_raw_fd());
        }
    }

    /// Wait (bounded) until output already written to the channel has been
    /// copied into the buffer. Two consecutive quiet observations are
    /// required because a chunk is briefly in flight between the master
    /// read returning and the copier flagging itself busy.
    pub async fn settle(&self) {
        let deadline = Instant::now() + Duration::from_millis(150);
        let mut quiet = 0;

        loop {
            if !self.pending() && !self.copying.load(Ordering::Acquire) {
                quiet += 1;
                if quiet >= 2 {
                    return;
                }
            } else {
                quiet = 0;
            }
            if Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    fn pending(&self) -> bool {
        let mut pfd = libc::pollfd {
            fd: self.poll_fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let r = unsafe { libc::poll(&mut pfd, 1, 0) };
        r > 0 && (pfd.revents & libc::POLLIN) != 0
    }
}

fn copy_loop(mut master: File, real: Arc<File>, state: Arc<ShellState>, copying: Arc<AtomicBool>) {
    use std::io::Write;

    let mut buf = [0u8; 8192];
    loop {
        match master.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                copying.store(true, Ordering::Release);
                let chunk = &buf[..n];
                let mut writer: &File = &real;
                if writer.write_all(chunk).and_then(|_| writer.flush()).is_err() {
                    copying.store(false, Ordering::Release);
                    break;
                }
                if let Some(ce) = state.current_execution() {
                    if !ce.terminated() {
                        ce.write_buffer(chunk);
                    }
                }
                copying.store(false, Ordering::Release);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            // A PTY master reports EIO once every slave is closed.
            Err(_) => break,
        }
    }
}

fn open_pty() -> std::io::Result<(File, File)> {
    let mut master: libc::c_int = 0;
    let mut slave: libc::c_int = 0;
    let r = unsafe {
        libc::openpty(
            &mut master,
            &mut slave,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
    };
    if r != 0 {
        return Err(std::io::Error::last_os_error());
    }
    unsafe {
        Ok((
            File::from(OwnedFd::from_raw_fd(master)),
            File::from(OwnedFd::from_raw_fd(slave)),
        ))
    }
}

/// (read end, write end)
pub fn os_pipe() -> std::io::Result<(File, File)> {
    let mut fds = [0i32; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    unsafe {
        Ok((
            File::from(OwnedFd::from_raw_fd(fds[0])),
            File::from(OwnedFd::from_raw_fd(fds[1])),
        ))
    }
}

fn dup_fd(fd: RawFd) -> std::io::Result<OwnedFd> {
    let duped = unsafe { libc::dup(fd) };
    if duped < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(duped) })
}

fn inherit_winsize(from: RawFd, to: RawFd) {
    unsafe {
        let mut ws: libc::winsize = std::mem::zeroed();
        if libc::ioctl(from, libc::TIOCGWINSZ, &mut ws) == 0 {
            libc::ioctl(to, libc::TIOCSWINSZ, &ws);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio_util::sync::CancellationToken;

    use crate::shell::execution::CommandExecution;

    #[tokio::test]
    async fn mirrors_bytes_into_the_current_execution_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let real = Arc::new(File::create(dir.path().join("out")).unwrap());
        let state = Arc::new(ShellState::new());

        let capture = Capture::open(real, state.clone()).unwrap();

        let ce = Arc::new(CommandExecution::new(CancellationToken::new(), false));
        state.set_current_execution(Some(ce.clone()));

        let slave = capture.slave();
        let mut writer: &File = &slave;
        writer.write_all(b"captured text").unwrap();
        capture.settle().await;

        assert_eq!(ce.answer_text(), "captured text");

        // the real stream got the same bytes
        let written = std::fs::read_to_string(dir.path().join("out")).unwrap();
        assert_eq!(written, "captured text");
    }

    #[tokio::test]
    async fn no_buffer_writes_without_a_current_execution() {
        let dir = tempfile::tempdir().unwrap();
        let real = Arc::new(File::create(dir.path().join("out")).unwrap());
        let state = Arc::new(ShellState::new());

        let capture = Capture::open(real, state.clone()).unwrap();
        let slave = capture.slave();
        let mut writer: &File = &slave;
        writer.write_all(b"orphan").unwrap();
        capture.settle().await;

        let written = std::fs::read_to_string(dir.path().join("out")).unwrap();
        assert_eq!(written, "orphan");
    }
}
