//! Per-session mailbox snapshot and the process-wide UID registry.

use super::command::SequenceSet;
use crate::model::{Folder, Message};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug)]
struct FolderUids {
    next: u32,
    by_id: HashMap<String, u32>,
}

impl Default for FolderUids {
    fn default() -> Self {
        Self {
            next: 1,
            by_id: HashMap::new(),
        }
    }
}

/// Stable UIDs for upstream message ids.
///
/// A message gets a UID the first time any session sees it and keeps it for the
/// lifetime of the process, so UIDs survive EXPUNGE and re-SELECT.
#[derive(Debug)]
pub struct UidRegistry {
    uid_validity: u32,
    folders: Mutex<HashMap<Folder, FolderUids>>,
}

impl UidRegistry {
    pub fn new(uid_validity: u32) -> Self {
        Self {
            uid_validity,
            folders: Mutex::new(HashMap::new()),
        }
    }

    pub fn uid_validity(&self) -> u32 {
        self.uid_validity
    }

    /// UIDs for `messages`, in order, assigning new ones in listing order.
    ///
    /// Upstream lists most recent first; new UIDs still follow the listing so
    /// the first listing of a folder yields 1..=n.
    pub fn assign(&self, folder: Folder, messages: &[Message]) -> Vec<u32> {
        let mut folders = self.folders.lock().unwrap_or_else(|e| e.into_inner());
        let uids = folders.entry(folder).or_default();
        messages
            .iter()
            .map(|m| {
                if let Some(uid) = uids.by_id.get(&m.id) {
                    return *uid;
                }
                let uid = uids.next;
                uids.next += 1;
                uids.by_id.insert(m.id.clone(), uid);
                uid
            })
            .collect()
    }

    pub fn uid_next(&self, folder: Folder) -> u32 {
        let folders = self.folders.lock().unwrap_or_else(|e| e.into_inner());
        folders.get(&folder).map(|f| f.next).unwrap_or(1)
    }
}

/// A message in the snapshot with its UID
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub uid: u32,
    pub message: Message,
}

/// Ordered, 1-based view of a folder taken at SELECT/EXAMINE time
#[derive(Debug)]
pub struct MailboxSnapshot {
    pub folder: Folder,
    pub read_only: bool,
    pub uid_validity: u32,
    pub uid_next: u32,
    entries: Vec<SnapshotEntry>,
}

impl MailboxSnapshot {
    pub fn new(
        folder: Folder,
        messages: Vec<Message>,
        registry: &UidRegistry,
        read_only: bool,
    ) -> Self {
        let uids = registry.assign(folder, &messages);
        let entries = messages
            .into_iter()
            .zip(uids)
            .map(|(message, uid)| SnapshotEntry { uid, message })
            .collect();

        Self {
            folder,
            read_only,
            uid_validity: registry.uid_validity(),
            uid_next: registry.uid_next(folder),
            entries,
        }
    }

    pub fn exists(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn recent(&self) -> u32 {
        self.entries
            .iter()
            .filter(|e| e.message.flags.recent)
            .count() as u32
    }

    pub fn unseen(&self) -> u32 {
        self.entries
            .iter()
            .filter(|e| !e.message.flags.seen)
            .count() as u32
    }

    /// Sequence number of the first message without \Seen
    pub fn first_unseen(&self) -> Option<u32> {
        self.entries
            .iter()
            .position(|e| !e.message.flags.seen)
            .map(|i| i as u32 + 1)
    }

    pub fn max_uid(&self) -> u32 {
        self.entries.iter().map(|e| e.uid).max().unwrap_or(0)
    }

    pub fn get(&self, seq: u32) -> Option<&SnapshotEntry> {
        let idx = (seq as usize).checked_sub(1)?;
        self.entries.get(idx)
    }

    pub fn get_mut(&mut self, seq: u32) -> Option<&mut SnapshotEntry> {
        let idx = (seq as usize).checked_sub(1)?;
        self.entries.get_mut(idx)
    }

    pub fn entries(&self) -> impl Iterator<Item = (u32, &SnapshotEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i as u32 + 1, e))
    }

    /// Sequence numbers addressed by `set`, ascending; `by_uid` reads the set as UIDs
    pub fn resolve(&self, set: &SequenceSet, by_uid: bool) -> Vec<u32> {
        if by_uid {
            let max_uid = self.max_uid();
            self.entries()
                .filter(|(_, e)| set.contains(e.uid, max_uid))
                .map(|(seq, _)| seq)
                .collect()
        } else {
            set.expand(self.exists())
        }
    }

    /// Sequence numbers of messages flagged \Deleted, ascending
    pub fn deleted(&self) -> Vec<u32> {
        self.entries()
            .filter(|(_, e)| e.message.flags.deleted)
            .map(|(seq, _)| seq)
            .collect()
    }

    /// Remove every \Deleted message; returns the removed sequence numbers in
    /// descending order, each valid at the moment it is reported
    pub fn expunge(&mut self) -> Vec<u32> {
        let mut removed = self.deleted();
        removed.reverse();
        for seq in &removed {
            self.entries.remove(*seq as usize - 1);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MessageFlags, MessageStatus};
    use chrono::Utc;

    fn message(id: &str) -> Message {
        Message {
            id: id.to_string(),
            subject: format!("Subject {}", id),
            sender: "AE:PL-11111-22222-33333-44".to_string(),
            sender_name: None,
            recipients: vec!["AE:PL-55555-66666-77777-88".to_string()],
            content: "body".to_string(),
            content_html: None,
            attachments: Vec::new(),
            received_at: Utc::now(),
            status: MessageStatus::Received,
            folder: Folder::Inbox,
            flags: MessageFlags::default(),
        }
    }

    #[test]
    fn test_registry_is_stable() {
        let registry = UidRegistry::new(42);
        let first = registry.assign(Folder::Inbox, &[message("a"), message("b")]);
        assert_eq!(first, vec![1, 2]);

        // A new message arrives at the top of the listing
        let second = registry.assign(Folder::Inbox, &[message("c"), message("a"), message("b")]);
        assert_eq!(second, vec![3, 1, 2]);
        assert_eq!(registry.uid_next(Folder::Inbox), 4);

        // Folders are independent
        assert_eq!(registry.assign(Folder::Sent, &[message("a")]), vec![1]);
        assert_eq!(registry.uid_next(Folder::Archive), 1);
    }

    #[test]
    fn test_snapshot_status() {
        let registry = UidRegistry::new(7);
        let mut seen = message("b");
        seen.flags.seen = true;
        let snapshot = MailboxSnapshot::new(
            Folder::Inbox,
            vec![seen, message("a")],
            &registry,
            false,
        );
        assert_eq!(snapshot.exists(), 2);
        assert_eq!(snapshot.recent(), 0);
        assert_eq!(snapshot.unseen(), 1);
        assert_eq!(snapshot.first_unseen(), Some(2));
        assert_eq!(snapshot.uid_validity, 7);
        assert_eq!(snapshot.uid_next, 3);
    }

    #[test]
    fn test_resolve_by_uid() {
        let registry = UidRegistry::new(1);
        registry.assign(Folder::Inbox, &[message("x"), message("y"), message("z")]);
        // "x" disappeared upstream; remaining UIDs are 2 and 3
        let snapshot = MailboxSnapshot::new(
            Folder::Inbox,
            vec![message("y"), message("z")],
            &registry,
            false,
        );

        let set = SequenceSet::parse("3").unwrap();
        assert_eq!(snapshot.resolve(&set, true), vec![2]);
        let set = SequenceSet::parse("*").unwrap();
        assert_eq!(snapshot.resolve(&set, true), vec![2]);
        assert_eq!(snapshot.resolve(&set, false), vec![2]);
        let set = SequenceSet::parse("1:*").unwrap();
        assert_eq!(snapshot.resolve(&set, true), vec![1, 2]);
    }

    #[test]
    fn test_expunge_descending() {
        let registry = UidRegistry::new(1);
        let messages: Vec<Message> = ["a", "b", "c", "d", "e"]
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let mut m = message(id);
                m.flags.deleted = i % 2 == 0;
                m
            })
            .collect();
        let mut snapshot = MailboxSnapshot::new(Folder::Inbox, messages, &registry, false);

        assert_eq!(snapshot.expunge(), vec![5, 3, 1]);
        assert_eq!(snapshot.exists(), 2);
        assert_eq!(snapshot.get(1).unwrap().message.id, "b");
        assert_eq!(snapshot.get(2).unwrap().message.id, "d");
        assert_eq!(snapshot.get(2).unwrap().uid, 4);
        assert!(snapshot.get(3).is_none());
        assert!(snapshot.expunge().is_empty());
    }
}
