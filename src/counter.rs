use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, thiserror::Error)]
pub enum CounterError {
    #[error("counter {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("counter file {path} holds {raw:?}, expected a non-negative integer")]
    Corrupt { path: PathBuf, raw: String },
    #[error("timed out after {waited:?} waiting for counter lock {path}")]
    LockTimeout { path: PathBuf, waited: Duration },
    #[error("counter {0} is exhausted")]
    Exhausted(PathBuf),
}

impl CounterError {
    fn io(path: &Path, source: io::Error) -> Self {
        CounterError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Durable deployment sequence number.
///
/// The file holds the last value handed out as a plain decimal integer; a
/// missing file reads as 0. Read, increment and write happen under an
/// exclusive `flock` on `<path>.lock`, which serialises callers across
/// threads and processes.
#[derive(Debug, Clone)]
pub struct SequenceCounter {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl SequenceCounter {
    pub fn new(path: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        let path = path.into();
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_path),
            lock_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last value handed out, read without taking the lock.
    pub fn current(&self) -> Result<u64, CounterError> {
        self.read()
    }

    /// Runs `build` with the next sequence number and persists that number
    /// only if `build` succeeds. A failed build leaves the counter untouched.
    pub fn advance<T, E, F>(&self, build: F) -> Result<T, E>
    where
        F: FnOnce(u64) -> Result<T, E>,
        E: From<CounterError>,
    {
        let _guard = self.lock()?;
        let next = self
            .read()?
            .checked_add(1)
            .ok_or_else(|| CounterError::Exhausted(self.path.clone()))?;
        let output = build(next)?;
        self.write(next)?;
        tracing::debug!(path = %self.path.display(), value = next, "counter advanced");
        Ok(output)
    }

    fn read(&self) -> Result<u64, CounterError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(CounterError::io(&self.path, err)),
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(0);
        }
        trimmed.parse::<u64>().map_err(|_| CounterError::Corrupt {
            path: self.path.clone(),
            raw: trimmed.to_string(),
        })
    }

    fn write(&self, value: u64) -> Result<(), CounterError> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = File::create(&tmp).map_err(|err| CounterError::io(&tmp, err))?;
        file.write_all(value.to_string().as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|err| CounterError::io(&tmp, err))?;
        fs::rename(&tmp, &self.path).map_err(|err| CounterError::io(&self.path, err))?;
        Ok(())
    }

    fn lock(&self) -> Result<LockGuard, CounterError> {
        if let Some(parent) = self.lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| CounterError::io(parent, err))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(|err| CounterError::io(&self.lock_path, err))?;

        let started = Instant::now();
        loop {
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if rc == 0 {
                return Ok(LockGuard { file });
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(code) if code == libc::EWOULDBLOCK || code == libc::EINTR => {}
                _ => return Err(CounterError::io(&self.lock_path, err)),
            }
            let waited = started.elapsed();
            if waited >= self.lock_timeout {
                return Err(CounterError::LockTimeout {
                    path: self.lock_path.clone(),
                    waited,
                });
            }
            std::thread::sleep(LOCK_POLL_INTERVAL);
        }
    }
}

struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}
