//! Process descriptors.
//!
//! An enumeration returns one `ProcessDescriptor` per process. pid and
//! ppid are fixed at construction. Arguments and environment are fetched
//! from the descriptor's [`ArgumentSource`] on first access and memoized:
//!
//! - the fetch runs at most once per descriptor, even under concurrent
//!   first access (the `OnceLock` serializes initializers of this one
//!   instance; other descriptors are unaffected);
//! - a failed fetch is memoized as an empty result. Failure mostly means
//!   "not allowed to inspect this process", which is not exceptional.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::NativeResult;
use crate::kdebug;
use crate::kprint::Logger;
use crate::procargs::ProcessArgs;

/// Process identifier as the kernel reports it.
pub type Pid = i32;

/// Loads the argument vector and environment of a process.
pub trait ArgumentSource: Send + Sync {
    fn load(&self, pid: Pid) -> NativeResult<ProcessArgs>;
}

/// Source for platforms that cannot report arguments at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoArguments;

impl ArgumentSource for NoArguments {
    fn load(&self, _pid: Pid) -> NativeResult<ProcessArgs> {
        Ok(ProcessArgs::default())
    }
}

pub struct ProcessDescriptor {
    pid: Pid,
    /// `None` where the platform cannot report a parent.
    ppid: Option<Pid>,
    source: Arc<dyn ArgumentSource>,
    args: OnceLock<ProcessArgs>,
    log: Logger,
}

impl ProcessDescriptor {
    pub fn new(pid: Pid, ppid: Option<Pid>, source: Arc<dyn ArgumentSource>, log: Logger) -> Self {
        Self {
            pid,
            ppid,
            source,
            args: OnceLock::new(),
            log,
        }
    }

    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    #[inline]
    pub fn ppid(&self) -> Option<Pid> {
        self.ppid
    }

    /// Ordered argument vector. Empty if the process could not be read.
    pub fn arguments(&self) -> &[String] {
        &self.decoded().arguments
    }

    /// Environment mapping. Empty if the process could not be read.
    pub fn environment(&self) -> &HashMap<String, String> {
        &self.decoded().environment
    }

    /// Arguments joined by single spaces.
    pub fn command_line(&self) -> String {
        self.decoded().command_line()
    }

    pub fn exec_path(&self) -> Option<&str> {
        self.decoded().exec_path.as_deref()
    }

    /// True once the first decode has completed.
    pub fn is_decoded(&self) -> bool {
        self.args.get().is_some()
    }

    fn decoded(&self) -> &ProcessArgs {
        self.args.get_or_init(|| match self.source.load(self.pid) {
            Ok(args) => args,
            Err(e) => {
                kdebug!(self.log, "pid {}: arguments unavailable: {}", self.pid, e);
                ProcessArgs::default()
            }
        })
    }
}

impl fmt::Debug for ProcessDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessDescriptor")
            .field("pid", &self.pid)
            .field("ppid", &self.ppid)
            .field("decoded", &self.is_decoded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NativeError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    /// Counts loads; sleeps to widen the race window.
    struct CountingSource {
        loads: AtomicUsize,
        fail: bool,
    }

    impl CountingSource {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                loads: AtomicUsize::new(0),
                fail,
            })
        }
    }

    impl ArgumentSource for CountingSource {
        fn load(&self, pid: Pid) -> NativeResult<ProcessArgs> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            if self.fail {
                return Err(NativeError::os("kern.procargs2", 1));
            }
            let mut env = HashMap::new();
            env.insert("LOAD".to_string(), n.to_string());
            Ok(ProcessArgs {
                exec_path: Some("/bin/sh".into()),
                arguments: vec!["sh".into(), format!("--pid={}", pid)],
                environment: env,
            })
        }
    }

    #[test]
    fn lazy_and_memoized() {
        let src = CountingSource::new(false);
        let d = ProcessDescriptor::new(42, Some(1), src.clone(), Logger::silent());
        assert!(!d.is_decoded());
        assert_eq!(src.loads.load(Ordering::SeqCst), 0);

        assert_eq!(d.arguments(), ["sh", "--pid=42"]);
        assert_eq!(d.environment()["LOAD"], "0");
        assert_eq!(d.command_line(), "sh --pid=42");
        assert_eq!(d.exec_path(), Some("/bin/sh"));
        assert_eq!(src.loads.load(Ordering::SeqCst), 1);
        assert_eq!((d.pid(), d.ppid()), (42, Some(1)));
    }

    #[test]
    fn failure_is_empty_and_not_retried() {
        let src = CountingSource::new(true);
        let d = ProcessDescriptor::new(1, None, src.clone(), Logger::silent());
        assert!(d.arguments().is_empty());
        assert!(d.environment().is_empty());
        assert_eq!(d.command_line(), "");
        assert_eq!(src.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_first_access_loads_once() {
        let src = CountingSource::new(false);
        let d = Arc::new(ProcessDescriptor::new(7, Some(1), src.clone(), Logger::silent()));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let d = Arc::clone(&d);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    (d.arguments().to_vec(), d.environment().clone())
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(src.loads.load(Ordering::SeqCst), 1);
        for r in &results {
            assert_eq!(r, &results[0]);
        }
    }

    #[test]
    fn descriptors_decode_independently() {
        let src = CountingSource::new(false);
        let a = Arc::new(ProcessDescriptor::new(10, Some(1), src.clone(), Logger::silent()));
        let b = Arc::new(ProcessDescriptor::new(11, Some(1), src.clone(), Logger::silent()));

        let ta = {
            let a = Arc::clone(&a);
            thread::spawn(move || a.command_line())
        };
        let tb = {
            let b = Arc::clone(&b);
            thread::spawn(move || b.command_line())
        };
        assert_eq!(ta.join().unwrap(), "sh --pid=10");
        assert_eq!(tb.join().unwrap(), "sh --pid=11");
        assert_eq!(src.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn no_arguments_source() {
        let d = ProcessDescriptor::new(4, None, Arc::new(NoArguments), Logger::silent());
        assert!(d.arguments().is_empty());
        assert!(d.is_decoded());
    }
}
