//! # Coordinator
//!
//! Owns the bookkeeping of the server pool and the scaling algorithm.
//!
//! ## Key Concepts
//! - **Partition**: the records are kept in one sequence; exactly the active
//!   servers occupy `[0, active)`, terminating and terminated records follow
//! - **Index**: an id -> position map, updated on every swap, so lookups
//!   never scan
//! - **Reaping**: servers announce termination on the retirement channel;
//!   the coordinator drains it lazily, marks the records terminated and joins
//!   their threads after releasing the lock
//!
//! ## Locking
//! One `RwLock` guards the bookkeeping. Lookups take the read lock; scaling,
//! reaping and shutdown take the write lock. Seeding a new server locks the
//! database while the write lock is held, never the other way around.

use std::collections::HashMap;
use std::fmt;
use std::thread::JoinHandle;

use parking_lot::{MappedRwLockWriteGuard, RwLock, RwLockWriteGuard};
use rand::Rng;
use ticket_sale_api::ServerId;
use tracing::debug;

use crate::error::SystemError;
use crate::mailbox::Mailbox;
use crate::server::{Server, ServerEnv, ServerMessage, ServerStatus};
use crate::{log_error, log_lifecycle, log_system};

/// Bookkeeping entry of one server.
pub struct ServerRecord {
    id: ServerId,
    mailbox: Mailbox<ServerMessage>,
    status: ServerStatus,
    handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for ServerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerRecord")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl ServerRecord {
    fn new(id: ServerId, mailbox: Mailbox<ServerMessage>, handle: JoinHandle<()>) -> Self {
        Self {
            id,
            mailbox,
            status: ServerStatus::Active,
            handle: Some(handle),
        }
    }

    #[inline]
    pub fn id(&self) -> ServerId {
        self.id
    }

    #[inline]
    pub fn status(&self) -> ServerStatus {
        self.status
    }

    #[inline]
    pub fn mailbox(&self) -> &Mailbox<ServerMessage> {
        &self.mailbox
    }

    fn to_ref(&self) -> ServerRef {
        ServerRef {
            id: self.id,
            status: self.status,
            mailbox: self.mailbox.clone(),
        }
    }
}

/// A copy of a record taken under the read lock.
#[derive(Clone, Debug)]
pub struct ServerRef {
    pub id: ServerId,
    pub status: ServerStatus,
    pub mailbox: Mailbox<ServerMessage>,
}

/// Counts of records per status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolSummary {
    pub active: usize,
    pub terminating: usize,
    pub terminated: usize,
}

#[derive(Debug, Default)]
struct Pool {
    records: Vec<ServerRecord>,
    active: usize,
    index: HashMap<ServerId, usize>,
}

impl Pool {
    fn get(&self, id: ServerId) -> Option<&ServerRecord> {
        self.index.get(&id).map(|&i| &self.records[i])
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.records.swap(a, b);
        self.index.insert(self.records[a].id, a);
        self.index.insert(self.records[b].id, b);
    }

    fn push(&mut self, record: ServerRecord) -> usize {
        let position = self.records.len();
        self.index.insert(record.id, position);
        self.records.push(record);
        position
    }

    /// Move the record at `position` to the active boundary and extend the
    /// active range over it.
    fn activate(&mut self, position: usize) {
        debug_assert!(position >= self.active);
        let boundary = self.active;
        self.swap(position, boundary);
        self.active += 1;
    }

    fn find_terminated(&self) -> Option<usize> {
        (self.active..self.records.len()).find(|&i| self.records[i].status == ServerStatus::Terminated)
    }

    /// Mark a server terminated and hand back its thread handle.
    fn retire(&mut self, id: ServerId) -> Result<Option<JoinHandle<()>>, SystemError> {
        let Some(&position) = self.index.get(&id) else {
            return Err(SystemError::Bookkeeping(format!("retired server {id} has no record")));
        };
        match self.records[position].status {
            ServerStatus::Terminated => return Ok(None),
            ServerStatus::Terminating => {}
            ServerStatus::Active => {
                log_error!(
                    SystemError::Bookkeeping(format!("server {id} terminated while active")),
                    server = %id
                );
                // Move it out of the active range so the partition holds.
                let last = self.active - 1;
                self.swap(position, last);
                self.active -= 1;
                let record = &mut self.records[last];
                record.status = ServerStatus::Terminated;
                return Ok(record.handle.take());
            }
        }
        let record = &mut self.records[position];
        record.status = ServerStatus::Terminated;
        Ok(record.handle.take())
    }

    /// Drop terminated records beyond `limit`. Removal only swaps within the
    /// tail region, so the active range is untouched.
    fn trim_spares(&mut self, limit: usize) -> usize {
        let mut removed = 0;
        let mut spares = self.records[self.active..]
            .iter()
            .filter(|record| record.status == ServerStatus::Terminated)
            .count();
        let mut position = self.records.len();
        while spares > limit && position > self.active {
            position -= 1;
            if self.records[position].status != ServerStatus::Terminated {
                continue;
            }
            let record = self.records.swap_remove(position);
            self.index.remove(&record.id);
            if position < self.records.len() {
                let moved = self.records[position].id;
                self.index.insert(moved, position);
            }
            spares -= 1;
            removed += 1;
        }
        removed
    }

    fn summary(&self) -> PoolSummary {
        let mut summary = PoolSummary {
            active: self.active,
            ..PoolSummary::default()
        };
        for record in &self.records[self.active..] {
            match record.status {
                ServerStatus::Terminating => summary.terminating += 1,
                ServerStatus::Terminated => summary.terminated += 1,
                ServerStatus::Active => {}
            }
        }
        summary
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        assert_eq!(self.index.len(), self.records.len());
        for (i, record) in self.records.iter().enumerate() {
            assert_eq!(self.index[&record.id], i);
            assert_eq!(record.status == ServerStatus::Active, i < self.active, "record {i}");
        }
    }
}

type Reaped = Vec<(ServerId, JoinHandle<()>)>;

/// The server pool.
#[derive(Debug)]
pub struct Coordinator {
    pool: RwLock<Pool>,
    env: ServerEnv,
    retired: flume::Receiver<ServerId>,
    spare_records: usize,
}

impl Coordinator {
    /// `retired` must receive what servers send on `env.retired`.
    pub fn new(env: ServerEnv, retired: flume::Receiver<ServerId>, spare_records: usize) -> Self {
        Self {
            pool: RwLock::new(Pool::default()),
            env,
            retired,
            spare_records,
        }
    }

    pub fn num_active(&self) -> usize {
        self.pool.read().active
    }

    /// Ids of the active servers.
    pub fn active_servers(&self) -> Vec<ServerId> {
        let pool = self.pool.read();
        pool.records[..pool.active].iter().map(ServerRecord::id).collect()
    }

    /// Every server that still has to be probed: active and terminating ones.
    pub fn estimator_servers(&self) -> Vec<ServerRef> {
        let pool = self.pool.read();
        pool.records
            .iter()
            .filter(|record| record.status != ServerStatus::Terminated)
            .map(ServerRecord::to_ref)
            .collect()
    }

    /// A uniformly chosen active server.
    pub fn random_server(&self) -> Option<ServerRef> {
        let pool = self.pool.read();
        if pool.active == 0 {
            return None;
        }
        let position = rand::rng().random_range(0..pool.active);
        Some(pool.records[position].to_ref())
    }

    pub fn server(&self, id: ServerId) -> Option<ServerRef> {
        self.pool.read().get(id).map(ServerRecord::to_ref)
    }

    /// Exclusive access to one record. The whole pool stays write-locked
    /// while the guard lives.
    pub fn server_mut(&self, id: ServerId) -> Option<MappedRwLockWriteGuard<'_, ServerRecord>> {
        RwLockWriteGuard::try_map(self.pool.write(), |pool| {
            let position = *pool.index.get(&id)?;
            pool.records.get_mut(position)
        })
        .ok()
    }

    pub fn summary(&self) -> PoolSummary {
        self.pool.read().summary()
    }

    /// Scale to `target` active servers and return the resulting count.
    ///
    /// Growth reactivates terminated records before creating new servers.
    /// Shrinking signals the servers at the tail of the active range; it never
    /// waits for them to drain.
    pub fn scale(&self, target: usize) -> Result<usize, SystemError> {
        let mut reaped = Vec::new();
        let result = {
            let mut pool = self.pool.write();
            self.reap_locked(&mut pool, &mut reaped);
            let before = pool.active;
            let result = self.grow(&mut pool, target).map(|()| {
                self.shrink(&mut pool, target);
                pool.trim_spares(self.spare_records);
                pool.active
            });
            log_system!("scale", "completed", before = before, target = target, active = pool.active);
            result
        };
        join_reaped(reaped);
        result
    }

    fn grow(&self, pool: &mut Pool, target: usize) -> Result<(), SystemError> {
        while pool.active < target {
            match pool.find_terminated() {
                Some(position) => {
                    let id = pool.records[position].id;
                    let mailbox = Mailbox::new();
                    let handle = Server::new(id, mailbox.clone(), self.env.clone()).spawn()?;
                    let record = &mut pool.records[position];
                    record.mailbox = mailbox;
                    record.status = ServerStatus::Active;
                    record.handle = Some(handle);
                    pool.activate(position);
                    log_lifecycle!("server", id, "reactivated");
                }
                None => {
                    let id = ServerId::random();
                    let mailbox = Mailbox::new();
                    let handle = Server::seeded(id, mailbox.clone(), self.env.clone()).spawn()?;
                    let position = pool.push(ServerRecord::new(id, mailbox, handle));
                    pool.activate(position);
                    log_lifecycle!("server", id, "created");
                }
            }
        }
        Ok(())
    }

    fn shrink(&self, pool: &mut Pool, target: usize) {
        while pool.active > target {
            let position = pool.active - 1;
            let record = &mut pool.records[position];
            record.status = ServerStatus::Terminating;
            if record.mailbox.send_high_priority(ServerMessage::Shutdown).is_err() {
                log_error!(
                    SystemError::Bookkeeping(format!("active server {} has a closed mailbox", record.id)),
                    server = %record.id
                );
            }
            pool.active -= 1;
        }
    }

    fn reap_locked(&self, pool: &mut Pool, reaped: &mut Reaped) {
        for id in self.retired.try_iter() {
            match pool.retire(id) {
                Ok(Some(handle)) => reaped.push((id, handle)),
                Ok(None) => {}
                Err(err) => log_error!(err, server = %id),
            }
        }
    }

    /// Reap servers that announced their termination. Cheap when none did.
    pub fn reap_retired(&self) {
        if self.retired.is_empty() {
            return;
        }
        let mut reaped = Vec::new();
        {
            let mut pool = self.pool.write();
            self.reap_locked(&mut pool, &mut reaped);
            pool.trim_spares(self.spare_records);
        }
        join_reaped(reaped);
    }

    /// Halt every server that is still running and wait for all server
    /// threads to exit.
    pub fn shutdown(&self) -> Result<(), SystemError> {
        let mut handles = Vec::new();
        {
            let mut pool = self.pool.write();
            self.reap_locked(&mut pool, &mut handles);
            for record in pool.records.iter_mut() {
                if record.status != ServerStatus::Terminated {
                    let _ = record.mailbox.send_high_priority(ServerMessage::Halt);
                    record.status = ServerStatus::Terminated;
                }
                if let Some(handle) = record.handle.take() {
                    handles.push((record.id, handle));
                }
            }
            pool.active = 0;
        }
        let mut result = Ok(());
        for (id, handle) in handles {
            if let Err(err) = join_server(id, handle) {
                log_error!(err, server = %id);
                result = result.and(Err(err));
            }
        }
        // Everything still announced belongs to threads joined above.
        let drained = self.retired.drain().count();
        debug!(drained = drained, "retirement channel drained");
        log_system!("shutdown", "servers stopped");
        result
    }
}

fn join_server(id: ServerId, handle: JoinHandle<()>) -> Result<(), SystemError> {
    handle.join().map_err(|_| SystemError::ActorPanicked(format!("server {id}")))
}

fn join_reaped(reaped: Reaped) {
    for (id, handle) in reaped {
        match join_server(id, handle) {
            Ok(()) => debug!(server = %id, "server thread joined"),
            Err(err) => log_error!(err, server = %id),
        }
    }
}
