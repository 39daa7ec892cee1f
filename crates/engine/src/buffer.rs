//! In-memory album buffer for pull mode.
//!
//! History is scanned linearly, so albums never interleave: at most one group
//! is open at a time and a change of group identifier closes the open one.

use std::path::PathBuf;

use {
    albumrelay_common::{
        sink::{MAX_UNIT_FILES, UnitFile},
        types::{GroupId, MessageId},
    },
    tokio::time::Instant,
    tracing::debug,
};

use crate::scratch::remove_quietly;

/// One downloaded image waiting to be relayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayItem {
    pub message_id: MessageId,
    pub path: PathBuf,
    pub file_name: String,
    pub caption: String,
    pub group_id: Option<GroupId>,
}

impl RelayItem {
    fn into_file(self) -> UnitFile {
        UnitFile {
            path: self.path,
            file_name: self.file_name,
            message_id: self.message_id,
        }
    }
}

/// A closed group (or standalone image) ready to dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUnit {
    pub group_id: Option<GroupId>,
    pub caption: String,
    /// At most [`MAX_UNIT_FILES`] files, ascending by message identifier.
    pub files: Vec<UnitFile>,
    /// Members beyond the cap. Never relayed; their local copies are deleted.
    pub overflow: Vec<UnitFile>,
}

impl PendingUnit {
    /// Sort members by message identifier and cap the unit at
    /// [`MAX_UNIT_FILES`] files.
    pub fn assemble(group_id: Option<GroupId>, caption: String, mut members: Vec<UnitFile>) -> Self {
        members.sort_by_key(|f| f.message_id);
        let overflow = if members.len() > MAX_UNIT_FILES {
            members.split_off(MAX_UNIT_FILES)
        } else {
            Vec::new()
        };
        Self {
            group_id,
            caption,
            files: members,
            overflow,
        }
    }

    pub fn singleton(item: RelayItem) -> Self {
        let caption = item.caption.clone();
        Self::assemble(None, caption, vec![item.into_file()])
    }

    /// Highest message identifier among all members, overflow included.
    pub fn highest_id(&self) -> MessageId {
        self.files
            .iter()
            .chain(&self.overflow)
            .map(|f| f.message_id)
            .max()
            .unwrap_or_default()
    }

    /// Delete the local copy of every member.
    pub fn discard(self) {
        for file in self.files.iter().chain(&self.overflow) {
            remove_quietly(&file.path);
        }
    }
}

struct OpenGroup {
    group_id: GroupId,
    caption: String,
    members: Vec<UnitFile>,
    opened_at: Instant,
}

/// Holds the single open album while the scan is inside it.
#[derive(Default)]
pub struct GroupBuffer {
    open: Option<OpenGroup>,
}

impl GroupBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn open_group(&self) -> Option<&GroupId> {
        self.open.as_ref().map(|g| &g.group_id)
    }

    /// Number of members in the open group.
    pub fn len(&self) -> usize {
        self.open.as_ref().map_or(0, |g| g.members.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Route one item. Returns the units closed by this item, in dispatch order.
    ///
    /// An item from a different group closes the open group first. An item
    /// without a group closes the open group and is returned as its own unit.
    pub fn offer(&mut self, item: RelayItem) -> Vec<PendingUnit> {
        let mut closed = Vec::with_capacity(2);

        let Some(group_id) = item.group_id.clone() else {
            closed.extend(self.close());
            closed.push(PendingUnit::singleton(item));
            return closed;
        };

        if self.open_group().is_some_and(|open| *open != group_id) {
            closed.extend(self.close());
        }

        let group = self.open.get_or_insert_with(|| OpenGroup {
            group_id,
            caption: String::new(),
            members: Vec::new(),
            opened_at: Instant::now(),
        });
        if group.caption.is_empty() && !item.caption.is_empty() {
            group.caption = item.caption.clone();
        }
        group.members.push(item.into_file());
        closed
    }

    /// Close the open group, if any, producing its unit.
    pub fn close(&mut self) -> Option<PendingUnit> {
        let group = self.open.take()?;
        debug!(
            group_id = %group.group_id,
            members = group.members.len(),
            open_for_ms = group.opened_at.elapsed().as_millis() as u64,
            "closing group"
        );
        if group.members.is_empty() {
            return None;
        }
        Some(PendingUnit::assemble(
            Some(group.group_id),
            group.caption,
            group.members,
        ))
    }

    /// Drop the open group and delete its members' local copies.
    pub fn discard(&mut self) -> usize {
        let Some(group) = self.open.take() else {
            return 0;
        };
        for member in &group.members {
            remove_quietly(&member.path);
        }
        group.members.len()
    }
}
