//! Process snapshots from a fixed-stride kernel process table.
//!
//! The table and each process's argument area come from a
//! [`KernelQuery`]; on Darwin that is `sysctl`. Everything here is
//! independent of the OS call itself.

use std::sync::Arc;

use osprobe_core::error::NativeResult;
use osprobe_core::kprint::Logger;
use osprobe_core::layout::ProcTableLayout;
use osprobe_core::procargs::{self, ProcessArgs};
use osprobe_core::process::{ArgumentSource, Pid, ProcessDescriptor};
use osprobe_core::query::{KernelQuery, QueryKey, SizedQuery};
use osprobe_core::{kdebug, kwarn};

use crate::config::{defaults, SupportConfig};

/// Lists processes from `QueryKey::AllProcesses`.
pub struct TableEnumerator<Q> {
    query: Arc<Q>,
    layout: ProcTableLayout,
    max_retries: u32,
    log: Logger,
}

impl<Q: KernelQuery + 'static> TableEnumerator<Q> {
    /// Fails if `layout` cannot describe a record.
    pub fn new(query: Arc<Q>, layout: ProcTableLayout, config: &SupportConfig) -> NativeResult<Self> {
        layout.validate()?;
        Ok(Self {
            query,
            layout,
            max_retries: config.query_max_retries,
            log: config.log.tag("snapshot"),
        })
    }

    pub fn layout(&self) -> ProcTableLayout {
        self.layout
    }

    /// One descriptor per whole record, in kernel order. Any failure of
    /// the table query yields an empty snapshot.
    pub fn snapshot(&self) -> Vec<ProcessDescriptor> {
        let table = SizedQuery::new(self.log)
            .max_retries(self.max_retries)
            .run(&*self.query, QueryKey::AllProcesses);
        let buf = match table {
            Ok(buf) => buf,
            Err(e) => {
                kwarn!(self.log, "process table unavailable: {}", e);
                return Vec::new();
            }
        };
        if buf.len() % self.layout.stride != 0 {
            kdebug!(
                self.log,
                "process table: {} trailing bytes ignored",
                buf.len() % self.layout.stride
            );
        }

        let source: Arc<dyn ArgumentSource> = Arc::new(QueryArguments {
            query: Arc::clone(&self.query),
            max_retries: self.max_retries,
            log: self.log,
        });
        self.layout
            .records(&buf)
            .map(|(pid, ppid)| ProcessDescriptor::new(pid, Some(ppid), Arc::clone(&source), self.log))
            .collect()
    }
}

/// Decodes `QueryKey::ProcessArguments` blobs.
pub struct QueryArguments<Q> {
    query: Arc<Q>,
    max_retries: u32,
    log: Logger,
}

impl<Q: KernelQuery> ArgumentSource for QueryArguments<Q> {
    fn load(&self, pid: Pid) -> NativeResult<ProcessArgs> {
        let blob = SizedQuery::new(self.log)
            .max_retries(self.max_retries)
            .slack(defaults::PROCARGS_SLACK)
            .run(&*self.query, QueryKey::ProcessArguments(pid))?;
        procargs::decode(&blob)
    }
}
