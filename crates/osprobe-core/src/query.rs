//! Two-phase kernel queries.
//!
//! Many kernel interfaces report the buffer size they need and then fill
//! a caller-supplied buffer in a second call. The amount of data can
//! change between the two calls (processes start and exit), so:
//!
//! - an undersized-buffer error on the fetch re-probes and retries,
//!   bounded by `max_retries` (16 by default, 17 fetches in total);
//! - a fetch returning fewer bytes than requested is authoritative and
//!   the buffer is truncated to it.
//!
//! [`read_growing`] is the other growth strategy, for calls that cannot
//! report a size up front (readlink): double the buffer until the result
//! no longer fills it exactly.

use core::fmt;

use crate::error::{is_permission_code, ErrorClass, NativeError, NativeResult, ENOMEM};
use crate::kprint::Logger;
use crate::process::Pid;
use crate::ktrace;

/// Default bound on re-probe/fetch cycles.
pub const DEFAULT_MAX_RETRIES: u32 = 16;

/// Which kernel datum to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKey {
    /// Concatenated process-table records for every visible process.
    AllProcesses,
    /// Raw argument/environment area of one process.
    ProcessArguments(Pid),
}

impl QueryKey {
    pub fn op_name(&self) -> &'static str {
        match self {
            QueryKey::AllProcesses => "kern.proc.all",
            QueryKey::ProcessArguments(_) => "kern.procargs2",
        }
    }
}

/// Failure of a single probe or fetch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Buffer too small for the current data (ENOMEM on sysctl).
    Undersized,
    /// Any other OS error code.
    Os(i32),
}

impl QueryError {
    pub fn class(&self) -> ErrorClass {
        match self {
            QueryError::Undersized => ErrorClass::TransientRetryable,
            QueryError::Os(code) if is_permission_code(*code) => ErrorClass::PermissionDenied,
            QueryError::Os(_) => ErrorClass::Fatal,
        }
    }
}

/// A kernel interface answering sized queries.
///
/// Implementations only translate a key into the OS call; retry policy
/// lives in [`SizedQuery`].
pub trait KernelQuery: Send + Sync {
    /// Number of bytes the kernel currently needs for `key`.
    fn required_size(&self, key: QueryKey) -> Result<usize, QueryError>;

    /// Fill `buf`, returning the number of bytes written.
    fn fetch(&self, key: QueryKey, buf: &mut [u8]) -> Result<usize, QueryError>;
}

/// Transient state of one sized query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizedQueryState {
    pub requested_size: usize,
    pub returned_size: usize,
    pub retry_count: u32,
}

impl fmt::Display for SizedQueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requested={} returned={} retries={}",
            self.requested_size, self.returned_size, self.retry_count
        )
    }
}

/// Retry policy for two-phase queries.
#[derive(Debug, Clone, Copy)]
pub struct SizedQuery {
    max_retries: u32,
    /// Extra bytes added to every probed size.
    slack: usize,
    log: Logger,
}

impl SizedQuery {
    pub fn new(log: Logger) -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            slack: 0,
            log,
        }
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn slack(mut self, bytes: usize) -> Self {
        self.slack = bytes;
        self
    }

    /// Probe, allocate, fetch. Returns the bytes the kernel actually wrote.
    pub fn run<Q>(&self, query: &Q, key: QueryKey) -> NativeResult<Vec<u8>>
    where
        Q: KernelQuery + ?Sized,
    {
        let op = key.op_name();
        let mut state = SizedQueryState::default();

        loop {
            let size = query
                .required_size(key)
                .map_err(|e| query_error(op, e))?;
            state.requested_size = size + self.slack;

            let mut buf = vec![0u8; state.requested_size];
            match query.fetch(key, &mut buf) {
                Ok(n) => {
                    state.returned_size = n.min(buf.len());
                    buf.truncate(state.returned_size);
                    ktrace!(self.log, "{}: {}", op, state);
                    return Ok(buf);
                }
                Err(e)
                    if e.class() == ErrorClass::TransientRetryable
                        && state.retry_count < self.max_retries =>
                {
                    state.retry_count += 1;
                    ktrace!(
                        self.log,
                        "{}: undersized at {} bytes, retry {}",
                        op,
                        state.requested_size,
                        state.retry_count
                    );
                }
                Err(QueryError::Undersized) => {
                    return Err(NativeError::RetriesExhausted { op, state });
                }
                Err(QueryError::Os(code)) => return Err(NativeError::os(op, code)),
            }
        }
    }
}

fn query_error(op: &'static str, e: QueryError) -> NativeError {
    match e {
        // A probe never legitimately reports undersized; treat it as the
        // kernel's ENOMEM.
        QueryError::Undersized => NativeError::os(op, ENOMEM),
        QueryError::Os(code) => NativeError::os(op, code),
    }
}

/// Outcome of one read into a fixed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowRead {
    /// `n` bytes were written.
    Filled(usize),
    /// The object does not exist in the queried form (not a symlink).
    Absent,
}

/// Read with a doubling buffer.
///
/// Starts at `min` bytes; a read that fills the buffer exactly is
/// ambiguous with truncation, so the buffer doubles and the read is
/// repeated. Buffers larger than `max` are never tried; reaching that
/// point fails with `PathTooLong`.
pub fn read_growing<F>(what: &str, min: usize, max: usize, mut read: F) -> NativeResult<Option<Vec<u8>>>
where
    F: FnMut(&mut [u8]) -> NativeResult<GrowRead>,
{
    let mut size = min.max(1);
    while size <= max {
        let mut buf = vec![0u8; size];
        match read(&mut buf)? {
            GrowRead::Absent => return Ok(None),
            GrowRead::Filled(n) if n >= size => match grown(size) {
                Some(next) => size = next,
                None => break,
            },
            GrowRead::Filled(n) => {
                buf.truncate(n);
                return Ok(Some(buf));
            }
        }
    }
    Err(NativeError::PathTooLong {
        path: what.to_string(),
        limit: max,
    })
}

/// Next buffer size, `None` once doubling would overflow.
#[inline]
fn grown(size: usize) -> Option<usize> {
    size.checked_mul(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted kernel: each fetch pops the next outcome.
    struct ScriptedQuery {
        data: Vec<u8>,
        script: Mutex<VecDeque<Result<usize, QueryError>>>,
        probes: AtomicUsize,
        fetches: AtomicUsize,
        last_len: AtomicUsize,
    }

    impl ScriptedQuery {
        fn new(data: &[u8], script: Vec<Result<usize, QueryError>>) -> Self {
            Self {
                data: data.to_vec(),
                script: Mutex::new(script.into()),
                probes: AtomicUsize::new(0),
                fetches: AtomicUsize::new(0),
                last_len: AtomicUsize::new(0),
            }
        }

        fn always_undersized(data: &[u8]) -> Self {
            Self::new(data, vec![Err(QueryError::Undersized); 64])
        }
    }

    impl KernelQuery for ScriptedQuery {
        fn required_size(&self, _key: QueryKey) -> Result<usize, QueryError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok(self.data.len())
        }

        fn fetch(&self, _key: QueryKey, buf: &mut [u8]) -> Result<usize, QueryError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.last_len.store(buf.len(), Ordering::SeqCst);
            let outcome = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(self.data.len()));
            let n = outcome?;
            let n = n.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            Ok(n)
        }
    }

    fn quiet() -> SizedQuery {
        SizedQuery::new(Logger::silent())
    }

    #[test]
    fn first_fetch_succeeds() {
        let q = ScriptedQuery::new(b"abcdef", vec![]);
        let out = quiet().run(&q, QueryKey::AllProcesses).unwrap();
        assert_eq!(out, b"abcdef");
        assert_eq!(q.probes.load(Ordering::SeqCst), 1);
        assert_eq!(q.fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn undersized_once_then_success() {
        let q = ScriptedQuery::new(b"process-table", vec![Err(QueryError::Undersized)]);
        let out = quiet().run(&q, QueryKey::AllProcesses).unwrap();
        assert_eq!(out, b"process-table");
        // Re-probed before the retry.
        assert_eq!(q.probes.load(Ordering::SeqCst), 2);
        assert_eq!(q.fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn undersized_forever_stops_after_sixteen_retries() {
        let q = ScriptedQuery::always_undersized(b"xyz");
        let err = quiet().run(&q, QueryKey::AllProcesses).unwrap_err();
        match err {
            NativeError::RetriesExhausted { op, state } => {
                assert_eq!(op, "kern.proc.all");
                assert_eq!(state.retry_count, 16);
            }
            other => panic!("unexpected {:?}", other),
        }
        // One initial fetch plus sixteen retries; never a seventeenth retry.
        assert_eq!(q.fetches.load(Ordering::SeqCst), 17);
    }

    #[test]
    fn custom_retry_bound() {
        let q = ScriptedQuery::always_undersized(b"xyz");
        let err = quiet().max_retries(2).run(&q, QueryKey::AllProcesses).unwrap_err();
        assert!(matches!(err, NativeError::RetriesExhausted { .. }));
        assert_eq!(q.fetches.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn short_fetch_is_authoritative() {
        // Data shrank between probe and fetch: 4 of 10 bytes returned.
        let q = ScriptedQuery::new(b"0123456789", vec![Ok(4)]);
        let out = quiet().run(&q, QueryKey::ProcessArguments(42)).unwrap();
        assert_eq!(out, b"0123");
        assert_eq!(q.fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn slack_enlarges_request() {
        let q = ScriptedQuery::new(b"abc", vec![]);
        let out = quiet().slack(1).run(&q, QueryKey::ProcessArguments(1)).unwrap();
        assert_eq!(out, b"abc");
        assert_eq!(q.last_len.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn os_error_is_fatal_without_retry() {
        let q = ScriptedQuery::new(b"abc", vec![Err(QueryError::Os(1))]);
        let err = quiet().run(&q, QueryKey::ProcessArguments(1)).unwrap_err();
        assert_eq!(err.code(), Some(1));
        assert_eq!(q.fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn growing_read_doubles_until_it_fits() {
        let target = vec![b'a'; 1500];
        let mut sizes = Vec::new();
        let out = read_growing("/link", 512, 65536, |buf| {
            sizes.push(buf.len());
            let n = target.len().min(buf.len());
            buf[..n].copy_from_slice(&target[..n]);
            Ok(GrowRead::Filled(n))
        })
        .unwrap()
        .unwrap();
        assert_eq!(out.len(), 1500);
        assert_eq!(sizes, vec![512, 1024, 2048]);
    }

    #[test]
    fn growing_read_absent() {
        let out = read_growing("/file", 512, 65536, |_| Ok(GrowRead::Absent)).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn growing_read_gives_up_past_bound() {
        let mut largest = 0;
        let err = read_growing("/deep", 512, 65536, |buf| {
            largest = buf.len();
            Ok(GrowRead::Filled(buf.len()))
        })
        .unwrap_err();
        assert!(matches!(err, NativeError::PathTooLong { limit: 65536, .. }));
        assert_eq!(largest, 65536);
    }

    #[test]
    fn only_undersized_is_retryable() {
        assert_eq!(QueryError::Undersized.class(), ErrorClass::TransientRetryable);
        assert_eq!(QueryError::Os(22).class(), ErrorClass::Fatal);
        #[cfg(unix)]
        assert_eq!(QueryError::Os(1).class(), ErrorClass::PermissionDenied);
        // The retry layer absorbs the transient class entirely.
        let q = ScriptedQuery::always_undersized(b"xyz");
        let err = quiet().max_retries(1).run(&q, QueryKey::AllProcesses).unwrap_err();
        assert_ne!(err.class(), ErrorClass::TransientRetryable);
    }

    #[test]
    fn growth_stops_instead_of_overflowing() {
        assert_eq!(grown(512), Some(1024));
        assert_eq!(grown(usize::MAX / 2 + 1), None);
        assert_eq!(grown(usize::MAX), None);
    }
}
