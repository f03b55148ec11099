//! Catalog of the teams, threads and wait objects seen in a trace.
//!
//! Every collection is a vector kept sorted by its key, so lookups are
//! binary searches and insertion is a binary search plus a shift. Wait
//! objects live in an append-only arena and are referenced by
//! [`WaitObjectRef`]; groups only hold those references, so inserting a
//! group never invalidates a reference held elsewhere.

use tracing::warn;

use crate::error::{try_reserve, ModelError, Result};
use crate::model::io::IoRequest;
use crate::model::stats::ThreadStats;
use crate::model::{TeamId, ThreadId};
use crate::trace::WaitObjectType;

/// Name given to wait objects that were waited on before (or without)
/// their info record.
pub const UNNAMED_WAIT_OBJECT: &str = "?";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub creation_time: i64,
    pub deletion_time: Option<i64>,
    /// Member threads as `(creation_time, id)`, sorted.
    threads: Vec<(i64, ThreadId)>,
}

impl Team {
    /// Member thread IDs ordered by creation time, then ID.
    pub fn thread_ids(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.threads.iter().map(|&(_, id)| id)
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Thread {
    pub id: ThreadId,
    pub name: String,
    pub team: TeamId,
    pub creation_time: i64,
    pub deletion_time: Option<i64>,
    pub stats: ThreadStats,
    wait_object_groups: Vec<ThreadWaitObjectGroup>,
    pub(crate) io_requests: Vec<IoRequest>,
}

impl Thread {
    fn new(id: ThreadId, team: TeamId, name: &str, creation_time: i64) -> Self {
        Self {
            id,
            name: name.to_string(),
            team,
            creation_time,
            deletion_time: None,
            stats: ThreadStats::default(),
            wait_object_groups: Vec::new(),
            io_requests: Vec::new(),
        }
    }

    /// Wait object groups sorted by `(type, address)`.
    pub fn wait_object_groups(&self) -> &[ThreadWaitObjectGroup] {
        &self.wait_object_groups
    }

    pub fn wait_object_group_for(
        &self,
        kind: WaitObjectType,
        object: u64,
    ) -> Option<&ThreadWaitObjectGroup> {
        self.find_wait_object_group(kind, object)
            .ok()
            .map(|index| &self.wait_object_groups[index])
    }

    /// I/O requests issued by the thread, sorted by scheduling time.
    pub fn io_requests(&self) -> &[IoRequest] {
        &self.io_requests
    }

    /// Index of the first request scheduled at or after `time`.
    pub fn closest_request_start_index(&self, time: i64) -> usize {
        self.io_requests
            .partition_point(|request| request.scheduled_time < time)
    }

    fn find_wait_object_group(
        &self,
        kind: WaitObjectType,
        object: u64,
    ) -> std::result::Result<usize, usize> {
        self.wait_object_groups
            .binary_search_by(|group| (group.kind, group.object).cmp(&(kind, object)))
    }
}

/// Stable handle to a [`WaitObject`] in the catalog's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WaitObjectRef(pub(crate) usize);

/// One incarnation of a kernel wait object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WaitObject {
    pub kind: WaitObjectType,
    pub object: u64,
    pub name: String,
    pub referenced_object: u64,
    pub wait_count: u64,
    pub total_wait_time: i64,
}

/// All incarnations of the wait object at one `(type, address)`, oldest
/// first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WaitObjectGroup {
    pub kind: WaitObjectType,
    pub object: u64,
    members: Vec<WaitObjectRef>,
}

impl WaitObjectGroup {
    pub fn members(&self) -> &[WaitObjectRef] {
        &self.members
    }

    pub fn most_recent(&self) -> Option<WaitObjectRef> {
        self.members.last().copied()
    }
}

/// One thread's waits on one wait object incarnation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreadWaitObject {
    pub wait_object: WaitObjectRef,
    pub wait_count: u64,
    pub total_wait_time: i64,
}

/// One thread's wait objects at one `(type, address)`, oldest first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadWaitObjectGroup {
    pub kind: WaitObjectType,
    pub object: u64,
    members: Vec<ThreadWaitObject>,
}

impl ThreadWaitObjectGroup {
    pub fn members(&self) -> &[ThreadWaitObject] {
        &self.members
    }

    pub fn most_recent(&self) -> Option<&ThreadWaitObject> {
        self.members.last()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IoScheduler {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Default)]
pub struct EntityCatalog {
    teams: Vec<Team>,
    threads: Vec<Thread>,
    wait_objects: Vec<WaitObject>,
    wait_object_groups: Vec<WaitObjectGroup>,
    io_schedulers: Vec<IoScheduler>,
}

impl EntityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a team. A duplicate ID is logged and the existing team returned.
    pub fn add_team(&mut self, id: TeamId, name: &str, time: i64) -> Result<&Team> {
        let index = match self.teams.binary_search_by_key(&id, |team| team.id) {
            Ok(index) => {
                warn!("{}", ModelError::DuplicateTeam(id));
                index
            }
            Err(index) => {
                try_reserve(&mut self.teams, 1, "adding a team")?;
                self.teams.insert(
                    index,
                    Team {
                        id,
                        name: name.to_string(),
                        creation_time: time,
                        deletion_time: None,
                        threads: Vec::new(),
                    },
                );
                index
            }
        };
        Ok(&self.teams[index])
    }

    /// Add a thread to an existing team. Fails for an unknown team; a
    /// duplicate thread ID is logged and the existing thread returned.
    pub fn add_thread(
        &mut self,
        id: ThreadId,
        team: TeamId,
        name: &str,
        time: i64,
    ) -> Result<&Thread> {
        let team_index = self
            .teams
            .binary_search_by_key(&team, |t| t.id)
            .map_err(|_| ModelError::UnknownTeam { team, thread: id })?;

        let thread_index = match self.threads.binary_search_by_key(&id, |thread| thread.id) {
            Ok(index) => {
                warn!("{}", ModelError::DuplicateThread(id));
                return Ok(&self.threads[index]);
            }
            Err(index) => index,
        };

        // Reserve everything up front so a failure leaves both lists as
        // they were.
        let team_threads = &mut self.teams[team_index].threads;
        try_reserve(team_threads, 1, "adding a thread to its team")?;
        try_reserve(&mut self.threads, 1, "adding a thread")?;

        let key = (time, id);
        let position = team_threads.partition_point(|entry| *entry < key);
        team_threads.insert(position, key);
        self.threads
            .insert(thread_index, Thread::new(id, team, name, time));
        Ok(&self.threads[thread_index])
    }

    pub fn remove_team(&mut self, id: TeamId, time: i64) -> Result<()> {
        let team = self
            .team_by_id_mut(id)
            .ok_or(ModelError::UnknownTeam { team: id, thread: -1 })?;
        team.deletion_time = Some(time);
        Ok(())
    }

    pub fn remove_thread(&mut self, id: ThreadId, time: i64) -> Result<()> {
        let thread = self
            .thread_by_id_mut(id)
            .ok_or(ModelError::UnknownThread(id))?;
        thread.deletion_time = Some(time);
        Ok(())
    }

    /// Record a wait object incarnation. It becomes the most recent member
    /// of its `(type, address)` group.
    pub fn add_wait_object(
        &mut self,
        kind: WaitObjectType,
        object: u64,
        referenced_object: u64,
        name: &str,
    ) -> Result<WaitObjectRef> {
        let object = kind.normalize_object(object);
        let group = self.find_wait_object_group(kind, object);

        try_reserve(&mut self.wait_objects, 1, "adding a wait object")?;
        match group {
            Ok(index) => try_reserve(
                &mut self.wait_object_groups[index].members,
                1,
                "adding a wait object",
            )?,
            Err(_) => try_reserve(&mut self.wait_object_groups, 1, "adding a wait object group")?,
        }

        let wait_object = WaitObjectRef(self.wait_objects.len());
        self.wait_objects.push(WaitObject {
            kind,
            object,
            name: name.to_string(),
            referenced_object,
            wait_count: 0,
            total_wait_time: 0,
        });
        match group {
            Ok(index) => self.wait_object_groups[index].members.push(wait_object),
            Err(index) => self.wait_object_groups.insert(
                index,
                WaitObjectGroup {
                    kind,
                    object,
                    members: vec![wait_object],
                },
            ),
        }
        Ok(wait_object)
    }

    /// The most recent incarnation at `(type, address)`, creating an
    /// unnamed one if the trace never described it.
    pub fn current_wait_object(&mut self, kind: WaitObjectType, object: u64) -> Result<WaitObjectRef> {
        let object = kind.normalize_object(object);
        match self
            .wait_object_group_for(kind, object)
            .and_then(WaitObjectGroup::most_recent)
        {
            Some(wait_object) => Ok(wait_object),
            None => self.add_wait_object(kind, object, 0, UNNAMED_WAIT_OBJECT),
        }
    }

    /// Attach `wait_object` to the thread's group for its `(type, address)`.
    /// Returns the existing entry if it is already the group's most recent.
    pub fn add_thread_wait_object(
        &mut self,
        thread_id: ThreadId,
        wait_object: WaitObjectRef,
    ) -> Result<&ThreadWaitObject> {
        let (kind, object) = {
            let wo = self.wait_object(wait_object);
            (wo.kind, wo.object)
        };
        let thread = self
            .thread_by_id_mut(thread_id)
            .ok_or(ModelError::UnknownThread(thread_id))?;

        let group_index = match thread.find_wait_object_group(kind, object) {
            Ok(index) => {
                let group = &mut thread.wait_object_groups[index];
                if group.most_recent().map(|m| m.wait_object) != Some(wait_object) {
                    try_reserve(&mut group.members, 1, "adding a thread wait object")?;
                    group.members.push(ThreadWaitObject {
                        wait_object,
                        wait_count: 0,
                        total_wait_time: 0,
                    });
                }
                index
            }
            Err(index) => {
                try_reserve(
                    &mut thread.wait_object_groups,
                    1,
                    "adding a thread wait object group",
                )?;
                thread.wait_object_groups.insert(
                    index,
                    ThreadWaitObjectGroup {
                        kind,
                        object,
                        members: vec![ThreadWaitObject {
                            wait_object,
                            wait_count: 0,
                            total_wait_time: 0,
                        }],
                    },
                );
                index
            }
        };

        let group = &thread.wait_object_groups[group_index];
        group
            .members
            .last()
            .ok_or(ModelError::UnknownThread(thread_id))
    }

    /// Account one wait of `duration` on `wait_object` to the thread and
    /// to the wait object itself.
    pub fn add_thread_wait(
        &mut self,
        thread_id: ThreadId,
        wait_object: WaitObjectRef,
        duration: i64,
    ) -> Result<()> {
        self.add_thread_wait_object(thread_id, wait_object)?;

        let (kind, object) = {
            let wo = &mut self.wait_objects[wait_object.0];
            wo.wait_count += 1;
            wo.total_wait_time += duration;
            (wo.kind, wo.object)
        };

        let thread = self
            .thread_by_id_mut(thread_id)
            .ok_or(ModelError::UnknownThread(thread_id))?;
        if let Ok(index) = thread.find_wait_object_group(kind, object) {
            if let Some(member) = thread.wait_object_groups[index].members.last_mut() {
                member.wait_count += 1;
                member.total_wait_time += duration;
            }
        }
        Ok(())
    }

    pub fn add_io_scheduler(&mut self, id: i32, name: &str) -> Result<&IoScheduler> {
        let index = match self.io_schedulers.binary_search_by_key(&id, |s| s.id) {
            Ok(index) => index,
            Err(index) => {
                try_reserve(&mut self.io_schedulers, 1, "adding an I/O scheduler")?;
                self.io_schedulers.insert(
                    index,
                    IoScheduler {
                        id,
                        name: name.to_string(),
                    },
                );
                index
            }
        };
        Ok(&self.io_schedulers[index])
    }

    pub fn team_by_id(&self, id: TeamId) -> Option<&Team> {
        let index = self.teams.binary_search_by_key(&id, |team| team.id).ok()?;
        Some(&self.teams[index])
    }

    fn team_by_id_mut(&mut self, id: TeamId) -> Option<&mut Team> {
        let index = self.teams.binary_search_by_key(&id, |team| team.id).ok()?;
        Some(&mut self.teams[index])
    }

    pub fn thread_by_id(&self, id: ThreadId) -> Option<&Thread> {
        self.thread_index(id).map(|index| &self.threads[index])
    }

    pub(crate) fn thread_by_id_mut(&mut self, id: ThreadId) -> Option<&mut Thread> {
        self.thread_index(id).map(|index| &mut self.threads[index])
    }

    /// Position of the thread in [`EntityCatalog::threads`].
    pub fn thread_index(&self, id: ThreadId) -> Option<usize> {
        self.threads.binary_search_by_key(&id, |thread| thread.id).ok()
    }

    pub fn wait_object_group_for(&self, kind: WaitObjectType, object: u64) -> Option<&WaitObjectGroup> {
        self.find_wait_object_group(kind, kind.normalize_object(object))
            .ok()
            .map(|index| &self.wait_object_groups[index])
    }

    pub fn thread_wait_object_group_for(
        &self,
        thread_id: ThreadId,
        kind: WaitObjectType,
        object: u64,
    ) -> Option<&ThreadWaitObjectGroup> {
        self.thread_by_id(thread_id)?
            .wait_object_group_for(kind, kind.normalize_object(object))
    }

    pub fn wait_object(&self, wait_object: WaitObjectRef) -> &WaitObject {
        &self.wait_objects[wait_object.0]
    }

    pub fn io_scheduler_by_id(&self, id: i32) -> Option<&IoScheduler> {
        let index = self.io_schedulers.binary_search_by_key(&id, |s| s.id).ok()?;
        Some(&self.io_schedulers[index])
    }

    pub fn teams(&self) -> &[Team] {
        &self.teams
    }

    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    pub(crate) fn threads_mut(&mut self) -> &mut [Thread] {
        &mut self.threads
    }

    pub fn wait_object_groups(&self) -> &[WaitObjectGroup] {
        &self.wait_object_groups
    }

    pub fn wait_object_count(&self) -> usize {
        self.wait_objects.len()
    }

    fn find_wait_object_group(
        &self,
        kind: WaitObjectType,
        object: u64,
    ) -> std::result::Result<usize, usize> {
        self.wait_object_groups
            .binary_search_by(|group| (group.kind, group.object).cmp(&(kind, object)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_sorted_by_key<T, K: Ord>(items: &[T], key: impl Fn(&T) -> K) -> bool {
        items.windows(2).all(|w| key(&w[0]) < key(&w[1]))
    }

    #[test]
    fn test_teams_stay_sorted() {
        let mut catalog = EntityCatalog::new();
        for id in [5, 1, 9, 3, 7] {
            catalog.add_team(id, &format!("team {id}"), 0).unwrap();
        }
        assert!(is_sorted_by_key(catalog.teams(), |t| t.id));
        assert_eq!(catalog.team_by_id(9).unwrap().name, "team 9");
        assert!(catalog.team_by_id(4).is_none());
    }

    #[test]
    fn test_duplicate_team_keeps_first() {
        let mut catalog = EntityCatalog::new();
        catalog.add_team(1, "first", 10).unwrap();
        let team = catalog.add_team(1, "second", 20).unwrap();
        assert_eq!(team.name, "first");
        assert_eq!(team.creation_time, 10);
        assert_eq!(catalog.teams().len(), 1);
    }

    #[test]
    fn test_orphan_thread_is_rejected() {
        let mut catalog = EntityCatalog::new();
        let err = catalog.add_thread(10, 1, "orphan", 0).unwrap_err();
        assert_eq!(err, ModelError::UnknownTeam { team: 1, thread: 10 });
        assert!(catalog.threads().is_empty());
    }

    #[test]
    fn test_duplicate_thread_is_not_double_counted() {
        let mut catalog = EntityCatalog::new();
        catalog.add_team(1, "team", 0).unwrap();
        catalog.add_thread(10, 1, "worker", 5).unwrap();
        let again = catalog.add_thread(10, 1, "impostor", 6).unwrap();
        assert_eq!(again.name, "worker");
        assert_eq!(again.creation_time, 5);
        assert_eq!(catalog.threads().len(), 1);
        assert_eq!(catalog.team_by_id(1).unwrap().thread_count(), 1);
    }

    #[test]
    fn test_team_threads_ordered_by_creation_then_id() {
        let mut catalog = EntityCatalog::new();
        catalog.add_team(1, "team", 0).unwrap();
        catalog.add_thread(30, 1, "c", 100).unwrap();
        catalog.add_thread(20, 1, "b", 50).unwrap();
        catalog.add_thread(10, 1, "a", 100).unwrap();

        let ids: Vec<_> = catalog.team_by_id(1).unwrap().thread_ids().collect();
        assert_eq!(ids, vec![20, 10, 30]);
        assert!(is_sorted_by_key(catalog.threads(), |t| t.id));
        assert_eq!(catalog.thread_index(20), Some(1));
    }

    #[test]
    fn test_wait_object_recreation_groups() {
        let mut catalog = EntityCatalog::new();
        let first = catalog
            .add_wait_object(WaitObjectType::SEMAPHORE, 0x100, 0, "old sem")
            .unwrap();
        catalog
            .add_wait_object(WaitObjectType::MUTEX, 0x100, 0, "lock")
            .unwrap();
        let second = catalog
            .add_wait_object(WaitObjectType::SEMAPHORE, 0x100, 0, "new sem")
            .unwrap();

        assert_eq!(catalog.wait_object_groups().len(), 2);
        let group = catalog
            .wait_object_group_for(WaitObjectType::SEMAPHORE, 0x100)
            .unwrap();
        assert_eq!(group.members(), &[first, second]);
        assert_eq!(group.most_recent(), Some(second));
        assert_eq!(catalog.wait_object(second).name, "new sem");
        assert!(catalog
            .wait_object_group_for(WaitObjectType::SEMAPHORE, 0x200)
            .is_none());
    }

    #[test]
    fn test_thread_waits_follow_most_recent_object() {
        let mut catalog = EntityCatalog::new();
        catalog.add_team(1, "team", 0).unwrap();
        catalog.add_thread(10, 1, "waiter", 0).unwrap();

        let old = catalog
            .current_wait_object(WaitObjectType::SEMAPHORE, 0x40)
            .unwrap();
        assert_eq!(catalog.wait_object(old).name, UNNAMED_WAIT_OBJECT);
        catalog.add_thread_wait(10, old, 100).unwrap();
        catalog.add_thread_wait(10, old, 50).unwrap();

        let new = catalog
            .add_wait_object(WaitObjectType::SEMAPHORE, 0x40, 0, "reborn")
            .unwrap();
        catalog.add_thread_wait(10, new, 25).unwrap();

        let group = catalog
            .thread_wait_object_group_for(10, WaitObjectType::SEMAPHORE, 0x40)
            .unwrap();
        assert_eq!(group.members().len(), 2);
        assert_eq!(group.members()[0].wait_count, 2);
        assert_eq!(group.members()[0].total_wait_time, 150);
        assert_eq!(group.most_recent().unwrap().wait_object, new);
        assert_eq!(catalog.wait_object(new).total_wait_time, 25);
        assert_eq!(catalog.wait_object(old).wait_count, 2);
    }

    #[test]
    fn test_snooze_objects_share_one_group() {
        let mut catalog = EntityCatalog::new();
        let a = catalog
            .current_wait_object(WaitObjectType::SNOOZE, 0x1234)
            .unwrap();
        let b = catalog
            .current_wait_object(WaitObjectType::SNOOZE, 0x5678)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(catalog.wait_object(a).object, 0);
    }

    #[test]
    fn test_thread_wait_object_for_unknown_thread() {
        let mut catalog = EntityCatalog::new();
        let wo = catalog
            .add_wait_object(WaitObjectType::MUTEX, 1, 0, "m")
            .unwrap();
        assert_eq!(
            catalog.add_thread_wait_object(99, wo).unwrap_err(),
            ModelError::UnknownThread(99)
        );
    }
}
