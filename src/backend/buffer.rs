//! Writable in-memory backend.
//!
//! `BufferBackend` holds sparse regions of owned bytes, hands out scratch
//! memory from a bump allocator and routes calls to a user-supplied handler.
//! It stands in for a live target in tests and offline emulation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

use super::{CallArguments, MemoryBackend, Permissions, RawReturn};
use crate::error::{MemscopeError, Result};

/// Default base of the scratch heap.
pub const DEFAULT_HEAP_BASE: u64 = 0x7100_0000;

const HEAP_ALIGN: u64 = 16;

/// One call as seen by the handler.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub target: u64,
    pub integer: Vec<u64>,
    pub vector: Vec<u128>,
    pub float: Vec<[u32; 2]>,
    /// False for calls dispatched with `call_start`.
    pub synchronous: bool,
}

type CallHandler = dyn Fn(&BufferBackend, &CallRequest) -> Result<RawReturn> + Send + Sync;

/// Counters for scratch allocations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationStats {
    pub allocations: usize,
    pub frees: usize,
    pub live: usize,
}

#[derive(Debug)]
struct Region {
    permissions: Permissions,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    regions: BTreeMap<u64, Region>,
    live: HashMap<u64, u64>,
    heap_next: u64,
    stats: AllocationStats,
    calls: Vec<CallRequest>,
}

impl State {
    fn region_containing(&self, address: u64) -> Option<(u64, &Region)> {
        self.regions
            .range(..=address)
            .next_back()
            .filter(|(start, r)| address - **start < r.data.len() as u64)
            .map(|(start, r)| (*start, r))
    }
}

pub struct BufferBackend {
    identifier: String,
    state: Mutex<State>,
    handler: Option<Arc<CallHandler>>,
}

impl BufferBackend {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            state: Mutex::new(State {
                heap_next: DEFAULT_HEAP_BASE,
                ..State::default()
            }),
            handler: None,
        }
    }

    pub fn with_heap_base(self, base: u64) -> Self {
        self.lock().heap_next = base;
        self
    }

    /// Route `call`/`start` through `handler`.
    pub fn with_call_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&BufferBackend, &CallRequest) -> Result<RawReturn> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Map `data` at `address`, replacing any region starting there.
    pub fn map(&self, address: u64, data: Vec<u8>, permissions: Permissions) {
        trace!(address, len = data.len(), %permissions, "Mapping region");
        self.lock()
            .regions
            .insert(address, Region { permissions, data });
    }

    /// Map `size` zero bytes at `address`.
    pub fn map_zeroed(&self, address: u64, size: u64, permissions: Permissions) {
        self.map(address, vec![0u8; size as usize], permissions);
    }

    pub fn stats(&self) -> AllocationStats {
        self.lock().stats
    }

    /// Calls received so far, oldest first.
    pub fn calls(&self) -> Vec<CallRequest> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves plain bytes behind; keep going.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn dispatch(&self, request: CallRequest) -> Result<RawReturn> {
        self.lock().calls.push(request.clone());
        let handler = self
            .handler
            .clone()
            .ok_or_else(|| self.unsupported(if request.synchronous { "call" } else { "start" }))?;
        handler(self, &request)
    }
}

impl std::fmt::Debug for BufferBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferBackend")
            .field("identifier", &self.identifier)
            .field("stats", &self.stats())
            .finish()
    }
}

impl MemoryBackend for BufferBackend {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn read(&self, address: u64, length: u64) -> Result<Vec<u8>> {
        let state = self.lock();
        let mut out = Vec::new();
        let mut cursor = address;
        let end = address
            .checked_add(length)
            .ok_or_else(|| MemscopeError::unmapped(address, length))?;
        if state.region_containing(address).is_none() {
            return Err(MemscopeError::unmapped(address, length));
        }
        while cursor < end {
            let (start, region) = state
                .region_containing(cursor)
                .ok_or_else(|| MemscopeError::unmapped(address, length))?;
            let from = (cursor - start) as usize;
            let take = ((end - cursor) as usize).min(region.data.len() - from);
            out.extend_from_slice(&region.data[from..from + take]);
            cursor += take as u64;
        }
        Ok(out)
    }

    fn write(&self, address: u64, bytes: &[u8]) -> Result<()> {
        let mut state = self.lock();
        let length = bytes.len() as u64;
        let mut cursor = address;
        let mut written = 0usize;
        while written < bytes.len() {
            let start = state
                .region_containing(cursor)
                .map(|(start, _)| start)
                .ok_or_else(|| MemscopeError::unmapped(address, length))?;
            let region = state
                .regions
                .get_mut(&start)
                .ok_or_else(|| MemscopeError::unmapped(address, length))?;
            if !region.permissions.contains(Permissions::WRITE) {
                return Err(MemscopeError::ReadOnly {
                    address: cursor,
                    backend: self.identifier.clone(),
                });
            }
            let from = (cursor - start) as usize;
            let take = (bytes.len() - written).min(region.data.len() - from);
            region.data[from..from + take].copy_from_slice(&bytes[written..written + take]);
            written += take;
            cursor += take as u64;
        }
        Ok(())
    }

    fn malloc(&self, size: u64) -> Result<u64> {
        let mut state = self.lock();
        let address = state.heap_next;
        let span = size.max(1).div_ceil(HEAP_ALIGN) * HEAP_ALIGN;
        state.heap_next += span;
        state.regions.insert(
            address,
            Region {
                permissions: Permissions::READ | Permissions::WRITE,
                data: vec![0u8; size.max(1) as usize],
            },
        );
        state.live.insert(address, size);
        state.stats.allocations += 1;
        state.stats.live += 1;
        debug!(address, size, backend = %self.identifier, "Allocated scratch memory");
        Ok(address)
    }

    fn free(&self, address: u64) -> Result<()> {
        let mut state = self.lock();
        if state.live.remove(&address).is_none() {
            return Err(MemscopeError::unmapped(address, 0));
        }
        state.regions.remove(&address);
        state.stats.frees += 1;
        state.stats.live -= 1;
        Ok(())
    }

    fn query_permissions(&self, address: u64) -> Result<Permissions> {
        self.lock()
            .region_containing(address)
            .map(|(_, r)| r.permissions)
            .ok_or_else(|| MemscopeError::unmapped(address, 1))
    }

    fn call_synchronous(&self, target: u64, args: CallArguments<'_>) -> Result<RawReturn> {
        self.dispatch(CallRequest {
            target,
            integer: args.integer.to_vec(),
            vector: args.vector.to_vec(),
            float: args.float.to_vec(),
            synchronous: true,
        })
    }

    fn call_start(&self, target: u64, args: CallArguments<'_>) -> Result<()> {
        self.dispatch(CallRequest {
            target,
            integer: args.integer.to_vec(),
            vector: args.vector.to_vec(),
            float: args.float.to_vec(),
            synchronous: false,
        })
        .map(|_| ())
    }
}
