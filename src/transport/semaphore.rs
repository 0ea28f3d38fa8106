//! POSIX named semaphores (`sem_open` family) shared between processes.

use std::ffi::CString;
use std::io;
use std::time::Duration;

use tracing::trace;

pub struct NamedSemaphore {
    name: CString,
    sem: *mut libc::sem_t,
}

// sem_t operations are process-shared and thread-safe by definition
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

fn c_name(name: &str) -> io::Result<CString> {
    CString::new(name).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "semaphore name contains NUL"))
}

impl NamedSemaphore {
    /// Open `name`, creating it with `initial` permits if it does not exist.
    pub fn open_or_create(name: &str, initial: u32) -> io::Result<Self> {
        let name = c_name(name)?;
        // SAFETY: `name` is a valid C string; mode and value are passed as c_uint per sem_open(3)
        let sem = unsafe { libc::sem_open(name.as_ptr(), libc::O_CREAT, 0o600 as libc::c_uint, initial as libc::c_uint) };
        Self::checked(name, sem)
    }

    /// Open an existing semaphore; fails with `NotFound` otherwise.
    pub fn open_existing(name: &str) -> io::Result<Self> {
        let name = c_name(name)?;
        // SAFETY: `name` is a valid C string
        let sem = unsafe { libc::sem_open(name.as_ptr(), 0) };
        Self::checked(name, sem)
    }

    /// Replace any existing semaphore called `name` with a fresh one holding `initial` permits.
    pub fn recreate(name: &str, initial: u32) -> io::Result<Self> {
        Self::unlink(name)?;
        Self::open_or_create(name, initial)
    }

    fn checked(name: CString, sem: *mut libc::sem_t) -> io::Result<Self> {
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { name, sem })
    }

    pub fn name(&self) -> &str {
        self.name.to_str().unwrap_or_default()
    }

    pub fn wait(&self) -> io::Result<()> {
        loop {
            // SAFETY: self.sem is a live handle returned by sem_open
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Non-blocking acquire. Returns false when no permit is available.
    pub fn try_wait(&self) -> io::Result<bool> {
        loop {
            // SAFETY: self.sem is a live handle returned by sem_open
            if unsafe { libc::sem_trywait(self.sem) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }

    /// Acquire within `timeout`. Returns false on timeout.
    #[cfg(target_os = "linux")]
    pub fn wait_timeout(&self, timeout: Duration) -> io::Result<bool> {
        // SAFETY: timespec is plain data; zeroed is a valid value
        let mut now: libc::timespec = unsafe { std::mem::zeroed() };
        // SAFETY: `now` is a valid out pointer
        if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let nanos = now.tv_nsec as u64 + u64::from(timeout.subsec_nanos());
        let mut deadline = now;
        deadline.tv_sec += timeout.as_secs() as libc::time_t + (nanos / 1_000_000_000) as libc::time_t;
        deadline.tv_nsec = (nanos % 1_000_000_000) as _;
        loop {
            // SAFETY: self.sem is live and `deadline` outlives the call
            if unsafe { libc::sem_timedwait(self.sem, &deadline) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ETIMEDOUT) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }

    /// Acquire within `timeout`. Returns false on timeout.
    #[cfg(not(target_os = "linux"))]
    pub fn wait_timeout(&self, timeout: Duration) -> io::Result<bool> {
        // no sem_timedwait here: poll
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if self.try_wait()? {
                return Ok(true);
            }
            if std::time::Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_micros(200));
        }
    }

    pub fn post(&self) -> io::Result<()> {
        // SAFETY: self.sem is a live handle returned by sem_open
        if unsafe { libc::sem_post(self.sem) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Hold one permit until the guard drops; used as a cross-process mutex.
    pub fn lock(&self) -> io::Result<SemaphoreGuard<'_>> {
        self.wait()?;
        Ok(SemaphoreGuard { sem: self })
    }

    /// Remove `name` from the system. Missing names are not an error.
    pub fn unlink(name: &str) -> io::Result<()> {
        let name = c_name(name)?;
        // SAFETY: `name` is a valid C string
        if unsafe { libc::sem_unlink(name.as_ptr()) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::NotFound {
            Ok(())
        } else {
            Err(err)
        }
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        // SAFETY: handle came from sem_open and is closed exactly once
        unsafe {
            libc::sem_close(self.sem);
        }
        trace!(name = ?self.name, "semaphore closed");
    }
}

pub struct SemaphoreGuard<'a> {
    sem: &'a NamedSemaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.sem.post() {
            tracing::warn!(name = self.sem.name(), error = %e, "failed to release semaphore lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(tag: &str) -> String {
        format!("/mdagg_t_{}_{}_{}", tag, std::process::id(), crate::engine::types::now_nanos() % 1_000_000)
    }

    #[test]
    fn counts_permits() {
        let name = unique("cnt");
        let sem = NamedSemaphore::recreate(&name, 2).unwrap();
        assert!(sem.try_wait().unwrap());
        assert!(sem.try_wait().unwrap());
        assert!(!sem.try_wait().unwrap());
        sem.post().unwrap();
        assert!(sem.wait_timeout(Duration::from_millis(10)).unwrap());
        assert!(!sem.wait_timeout(Duration::from_millis(10)).unwrap());
        NamedSemaphore::unlink(&name).unwrap();
    }

    #[test]
    fn guard_releases_on_drop() {
        let name = unique("lock");
        let sem = NamedSemaphore::recreate(&name, 1).unwrap();
        {
            let _guard = sem.lock().unwrap();
            assert!(!sem.try_wait().unwrap());
        }
        assert!(sem.try_wait().unwrap());
        NamedSemaphore::unlink(&name).unwrap();
    }

    #[test]
    fn open_existing_requires_creator() {
        let name = unique("none");
        assert!(NamedSemaphore::open_existing(&name).is_err());
    }
}
