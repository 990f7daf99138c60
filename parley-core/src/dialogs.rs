//! In-memory dialog list: dialogs first, then contacts that have no dialog.
//!
//! Rows live in an arena and are addressed by `RowHandle`. Removing a row
//! leaves a tombstone; handles stay valid until `compact` runs between
//! scheduler ticks. The core only appends at the tail of a section and never
//! re-sorts.

use std::collections::{HashMap, HashSet};

use crate::api::{Dialog, Peer, PeerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowHandle(usize);

impl RowHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Dialogs,
    Contacts,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub peer: Peer,
    pub unread_count: u32,
    pub section: Section,
    names: Vec<String>,
}

impl Row {
    fn new(peer: Peer, unread_count: u32, section: Section) -> Self {
        let names = name_components(&peer);
        Self {
            peer,
            unread_count,
            section,
            names,
        }
    }

    /// Lowercased words of the display name and username.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    fn first_chars(&self) -> Vec<char> {
        let mut chars: Vec<char> = self
            .names
            .iter()
            .filter_map(|name| name.chars().next())
            .collect();
        chars.sort_unstable();
        chars.dedup();
        chars
    }

    fn matches(&self, tokens: &[String]) -> bool {
        tokens.iter().all(|token| {
            self.names
                .iter()
                .any(|name| name.starts_with(token.as_str()))
        })
    }
}

#[derive(Debug, Default)]
struct SectionIndex {
    rows: Vec<RowHandle>,
    by_char: HashMap<char, Vec<RowHandle>>,
}

impl SectionIndex {
    fn push(&mut self, handle: RowHandle, first_chars: &[char]) {
        self.rows.push(handle);
        for ch in first_chars {
            self.by_char.entry(*ch).or_default().push(handle);
        }
    }

    fn remove(&mut self, handle: RowHandle, first_chars: &[char]) {
        self.rows.retain(|row| *row != handle);
        for ch in first_chars {
            if let Some(bucket) = self.by_char.get_mut(ch) {
                bucket.retain(|row| *row != handle);
                if bucket.is_empty() {
                    self.by_char.remove(ch);
                }
            }
        }
    }

    fn remap(&mut self, remap: &[Option<usize>]) {
        remap_handles(&mut self.rows, remap);
        for bucket in self.by_char.values_mut() {
            remap_handles(bucket, remap);
        }
    }

    /// Smallest bucket among the tokens' first characters. Bucket order is
    /// insertion order, which is list order.
    fn candidates(&self, tokens: &[String]) -> &[RowHandle] {
        let mut best: Option<&[RowHandle]> = None;
        for token in tokens {
            let Some(first) = token.chars().next() else {
                continue;
            };
            let bucket = self.by_char.get(&first).map_or(&[][..], Vec::as_slice);
            if best.is_none_or(|current| bucket.len() < current.len()) {
                best = Some(bucket);
            }
        }
        best.unwrap_or(&[])
    }
}

#[derive(Debug)]
struct FilterView {
    tokens: Vec<String>,
    matches: Vec<RowHandle>,
}

#[derive(Debug, Default)]
pub struct DialogList {
    slots: Vec<Option<Row>>,
    tombstones: usize,
    dialogs: SectionIndex,
    contacts: SectionIndex,
    by_peer: HashMap<PeerId, RowHandle>,
    /// Every peer known to be a contact, whichever section it shows in.
    contact_ids: HashSet<PeerId>,
    filter: Option<FilterView>,
}

impl DialogList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a page of dialogs at the tail of the dialogs section.
    ///
    /// A dialog already present is updated in place. A peer listed among
    /// contacts moves to the dialogs section. Returns the number of rows
    /// added to the dialogs section.
    pub fn append_dialogs(&mut self, dialogs: Vec<Dialog>) -> usize {
        let mut added = 0;
        for dialog in dialogs {
            match self.by_peer.get(&dialog.peer.id).copied() {
                Some(handle) if self.section_of(handle) == Some(Section::Dialogs) => {
                    self.update_in_place(handle, dialog);
                }
                Some(handle) => {
                    self.detach(handle);
                    self.insert(Row::new(dialog.peer, dialog.unread_count, Section::Dialogs));
                    added += 1;
                }
                None => {
                    self.insert(Row::new(dialog.peer, dialog.unread_count, Section::Dialogs));
                    added += 1;
                }
            }
        }
        self.refilter();
        added
    }

    /// Append contacts that are neither dialogs nor already listed.
    pub fn append_contacts(&mut self, contacts: Vec<Peer>) -> usize {
        let mut added = 0;
        for peer in contacts {
            self.contact_ids.insert(peer.id);
            if self.by_peer.contains_key(&peer.id) {
                continue;
            }
            self.insert(Row::new(peer, 0, Section::Contacts));
            added += 1;
        }
        self.refilter();
        added
    }

    /// Record a new contact and return its position in the unfiltered
    /// sequence. Clears the filter. A contact that already has a dialog keeps
    /// its dialog row.
    pub fn add_contact(&mut self, peer: Peer) -> Option<usize> {
        self.filter = None;
        let id = peer.id;
        self.contact_ids.insert(id);
        if !self.by_peer.contains_key(&id) {
            self.insert(Row::new(peer, 0, Section::Contacts));
        }
        self.position_of(id)
    }

    /// Forget a contact. Its contacts row goes away; a dialog row stays.
    /// Clears the filter.
    pub fn remove_contact(&mut self, peer: PeerId) -> bool {
        self.filter = None;
        let known = self.contact_ids.remove(&peer);
        if let Some(handle) = self.by_peer.get(&peer).copied()
            && self.section_of(handle) == Some(Section::Contacts)
        {
            self.detach(handle);
            return true;
        }
        known
    }

    /// Remove a peer's row. Clears the filter. A removed dialog whose peer is
    /// a contact falls back to the contacts section.
    pub fn remove_peer(&mut self, peer: PeerId) -> Option<Row> {
        self.filter = None;
        let handle = self.by_peer.get(&peer).copied()?;
        let row = self.detach(handle)?;
        if row.section == Section::Dialogs && self.contact_ids.contains(&peer) {
            self.insert(Row::new(row.peer.clone(), 0, Section::Contacts));
        }
        Some(row)
    }

    pub fn is_contact(&self, peer: PeerId) -> bool {
        self.contact_ids.contains(&peer)
    }

    /// Index of `peer` in the unfiltered sequence: dialogs, then contacts.
    pub fn position_of(&self, peer: PeerId) -> Option<usize> {
        let handle = self.by_peer.get(&peer).copied()?;
        match self.section_of(handle)? {
            Section::Dialogs => self.dialogs.rows.iter().position(|row| *row == handle),
            Section::Contacts => self
                .contacts
                .rows
                .iter()
                .position(|row| *row == handle)
                .map(|at| self.dialogs.rows.len() + at),
        }
    }

    pub fn row(&self, handle: RowHandle) -> Option<&Row> {
        self.slots.get(handle.0).and_then(Option::as_ref)
    }

    pub fn handle_of(&self, peer: PeerId) -> Option<RowHandle> {
        self.by_peer.get(&peer).copied()
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.by_peer.contains_key(&peer)
    }

    pub fn section_len(&self, section: Section) -> usize {
        self.index(section).rows.len()
    }

    pub fn len(&self) -> usize {
        self.by_peer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_peer.is_empty()
    }

    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    /// The visible sequence: filter matches when a filter is active,
    /// otherwise dialogs followed by contacts.
    pub fn entries(&self) -> Vec<&Row> {
        self.visible()
            .into_iter()
            .filter_map(|handle| self.row(handle))
            .collect()
    }

    pub fn filter_query(&self) -> Option<String> {
        self.filter.as_ref().map(|view| view.tokens.join(" "))
    }

    /// Apply a filter. Returns `false` when the normalised query is unchanged.
    pub fn set_filter(&mut self, text: &str) -> bool {
        let tokens = normalize_query(text);
        let current = self.filter.as_ref().map(|view| view.tokens.as_slice());
        if current.unwrap_or(&[]) == tokens.as_slice() {
            return false;
        }
        if tokens.is_empty() {
            self.filter = None;
        } else {
            let matches = self.evaluate(&tokens);
            self.filter = Some(FilterView { tokens, matches });
        }
        true
    }

    pub fn clear_filter(&mut self) -> bool {
        self.filter.take().is_some()
    }

    pub fn peer_before(&self, peer: PeerId) -> Option<PeerId> {
        let visible = self.visible_peers();
        let at = visible.iter().position(|id| *id == peer)?;
        at.checked_sub(1).map(|prev| visible[prev])
    }

    pub fn peer_after(&self, peer: PeerId) -> Option<PeerId> {
        let visible = self.visible_peers();
        let at = visible.iter().position(|id| *id == peer)?;
        visible.get(at + 1).copied()
    }

    /// Drop tombstones and renumber handles. Returns the slots reclaimed.
    pub fn compact(&mut self) -> usize {
        if self.tombstones == 0 {
            return 0;
        }

        let mut remap = Vec::with_capacity(self.slots.len());
        let mut live = Vec::with_capacity(self.slots.len() - self.tombstones);
        for slot in self.slots.drain(..) {
            match slot {
                Some(row) => {
                    remap.push(Some(live.len()));
                    live.push(Some(row));
                }
                None => remap.push(None),
            }
        }
        self.slots = live;

        self.dialogs.remap(&remap);
        self.contacts.remap(&remap);
        for handle in self.by_peer.values_mut() {
            if let Some(Some(new)) = remap.get(handle.0) {
                *handle = RowHandle(*new);
            }
        }
        if let Some(view) = self.filter.as_mut() {
            remap_handles(&mut view.matches, &remap);
        }

        let reclaimed = self.tombstones;
        self.tombstones = 0;
        reclaimed
    }

    fn index(&self, section: Section) -> &SectionIndex {
        match section {
            Section::Dialogs => &self.dialogs,
            Section::Contacts => &self.contacts,
        }
    }

    fn index_mut(&mut self, section: Section) -> &mut SectionIndex {
        match section {
            Section::Dialogs => &mut self.dialogs,
            Section::Contacts => &mut self.contacts,
        }
    }

    fn section_of(&self, handle: RowHandle) -> Option<Section> {
        self.row(handle).map(|row| row.section)
    }

    fn insert(&mut self, row: Row) -> RowHandle {
        let handle = RowHandle(self.slots.len());
        let first_chars = row.first_chars();
        self.by_peer.insert(row.peer.id, handle);
        self.index_mut(row.section).push(handle, &first_chars);
        self.slots.push(Some(row));
        handle
    }

    fn detach(&mut self, handle: RowHandle) -> Option<Row> {
        let row = self.slots.get_mut(handle.0)?.take()?;
        self.tombstones += 1;
        self.by_peer.remove(&row.peer.id);
        let first_chars = row.first_chars();
        self.index_mut(row.section).remove(handle, &first_chars);
        Some(row)
    }

    fn update_in_place(&mut self, handle: RowHandle, dialog: Dialog) {
        let Some(row) = self.slots.get_mut(handle.0).and_then(Option::as_mut) else {
            return;
        };
        row.unread_count = dialog.unread_count;
        if row.peer == dialog.peer {
            return;
        }
        let old_chars = row.first_chars();
        row.peer = dialog.peer;
        row.names = name_components(&row.peer);
        let new_chars = row.first_chars();

        let SectionIndex { rows, by_char } = &mut self.dialogs;
        for ch in &old_chars {
            if let Some(bucket) = by_char.get_mut(ch) {
                bucket.retain(|existing| *existing != handle);
            }
        }
        by_char.retain(|_, bucket| !bucket.is_empty());
        for ch in &new_chars {
            let bucket = by_char.entry(*ch).or_default();
            bucket.push(handle);
            bucket.sort_by_key(|existing| rows.iter().position(|row| row == existing));
        }
    }

    fn visible(&self) -> Vec<RowHandle> {
        match &self.filter {
            Some(view) => view.matches.clone(),
            None => self
                .dialogs
                .rows
                .iter()
                .chain(self.contacts.rows.iter())
                .copied()
                .collect(),
        }
    }

    fn visible_peers(&self) -> Vec<PeerId> {
        self.entries().into_iter().map(|row| row.peer.id).collect()
    }

    fn evaluate(&self, tokens: &[String]) -> Vec<RowHandle> {
        let mut matches = Vec::new();
        for index in [&self.dialogs, &self.contacts] {
            matches.extend(
                index
                    .candidates(tokens)
                    .iter()
                    .copied()
                    .filter(|handle| self.row(*handle).is_some_and(|row| row.matches(tokens))),
            );
        }
        matches
    }

    fn refilter(&mut self) {
        if let Some(tokens) = self.filter.as_ref().map(|view| view.tokens.clone()) {
            let matches = self.evaluate(&tokens);
            self.filter = Some(FilterView { tokens, matches });
        }
    }
}

fn remap_handles(handles: &mut Vec<RowHandle>, remap: &[Option<usize>]) {
    handles.retain_mut(|handle| match remap.get(handle.0) {
        Some(Some(new)) => {
            *handle = RowHandle(*new);
            true
        }
        _ => false,
    });
}

fn split_words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
}

pub fn normalize_query(text: &str) -> Vec<String> {
    split_words(text.trim()).collect()
}

fn name_components(peer: &Peer) -> Vec<String> {
    let mut names: Vec<String> = split_words(&peer.name)
        .chain(peer.username.iter().flat_map(|username| split_words(username)))
        .collect();
    names.sort_unstable();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: PeerId, name: &str) -> Peer {
        Peer {
            id,
            name: name.to_owned(),
            username: None,
        }
    }

    fn dialog(id: PeerId, name: &str) -> Dialog {
        Dialog {
            peer: peer(id, name),
            unread_count: 0,
        }
    }

    fn names(list: &DialogList) -> Vec<String> {
        list.entries()
            .into_iter()
            .map(|row| row.peer.name.clone())
            .collect()
    }

    #[test]
    fn prefix_filter_keeps_list_order_and_is_idempotent() {
        let mut list = DialogList::new();
        list.append_dialogs(vec![
            dialog(1, "John Smith"),
            dialog(2, "Mary Jones"),
            dialog(3, "Bob"),
        ]);

        assert!(list.set_filter("jo"));
        assert_eq!(names(&list), vec!["John Smith", "Mary Jones"]);
        assert!(!list.set_filter("  JO "));
        assert_eq!(names(&list), vec!["John Smith", "Mary Jones"]);
    }

    #[test]
    fn every_token_must_match_some_component() {
        let mut list = DialogList::new();
        list.append_dialogs(vec![
            dialog(1, "John Smith"),
            dialog(2, "Mary Jones"),
            dialog(3, "Johanna Jones-Smart"),
        ]);

        list.set_filter("jo, sm");
        assert_eq!(names(&list), vec!["John Smith", "Johanna Jones-Smart"]);
        list.set_filter("mary xyz");
        assert!(list.entries().is_empty());
    }

    #[test]
    fn username_is_a_name_component() {
        let mut list = DialogList::new();
        list.append_dialogs(vec![Dialog {
            peer: Peer {
                id: 7,
                name: "Support".into(),
                username: Some("helpdesk_bot".into()),
            },
            unread_count: 2,
        }]);
        list.set_filter("help");
        assert_eq!(names(&list), vec!["Support"]);
    }

    #[test]
    fn filter_spans_dialogs_then_contacts() {
        let mut list = DialogList::new();
        list.append_contacts(vec![peer(10, "Jonas Contact")]);
        list.append_dialogs(vec![dialog(1, "John Smith")]);
        list.set_filter("jo");
        assert_eq!(names(&list), vec!["John Smith", "Jonas Contact"]);
    }

    #[test]
    fn filter_is_reapplied_after_new_pages() {
        let mut list = DialogList::new();
        list.append_dialogs(vec![dialog(1, "John Smith")]);
        list.set_filter("jo");
        list.append_dialogs(vec![dialog(2, "Joan Baez"), dialog(3, "Carl")]);
        assert_eq!(names(&list), vec!["John Smith", "Joan Baez"]);
    }

    #[test]
    fn empty_query_clears_filter() {
        let mut list = DialogList::new();
        list.append_dialogs(vec![dialog(1, "John"), dialog(2, "Carl")]);
        list.set_filter("jo");
        assert!(list.set_filter("   "));
        assert_eq!(list.filter_query(), None);
        assert_eq!(names(&list), vec!["John", "Carl"]);
    }

    #[test]
    fn dialog_moves_contact_out_of_contacts_section() {
        let mut list = DialogList::new();
        list.append_contacts(vec![peer(5, "Eve"), peer(6, "Frank")]);
        assert_eq!(list.append_dialogs(vec![dialog(5, "Eve")]), 1);

        assert_eq!(list.section_len(Section::Dialogs), 1);
        assert_eq!(list.section_len(Section::Contacts), 1);
        assert_eq!(names(&list), vec!["Eve", "Frank"]);
        assert_eq!(list.tombstones(), 1);
    }

    #[test]
    fn contacts_do_not_duplicate_dialogs() {
        let mut list = DialogList::new();
        list.append_dialogs(vec![dialog(1, "Alice")]);
        assert_eq!(list.append_contacts(vec![peer(1, "Alice"), peer(2, "Bob")]), 1);
        assert_eq!(names(&list), vec!["Alice", "Bob"]);
    }

    #[test]
    fn repeated_dialog_updates_in_place() {
        let mut list = DialogList::new();
        list.append_dialogs(vec![dialog(1, "Alice"), dialog(2, "Bob")]);
        let added = list.append_dialogs(vec![Dialog {
            peer: peer(1, "Alicia"),
            unread_count: 4,
        }]);
        assert_eq!(added, 0);
        assert_eq!(names(&list), vec!["Alicia", "Bob"]);
        assert_eq!(list.entries()[0].unread_count, 4);

        list.set_filter("ali");
        assert_eq!(names(&list), vec!["Alicia"]);
    }

    #[test]
    fn compaction_preserves_order_and_lookup() {
        let mut list = DialogList::new();
        list.append_dialogs(vec![dialog(1, "A"), dialog(2, "B"), dialog(3, "C")]);
        list.append_contacts(vec![peer(4, "D")]);
        list.remove_peer(2).unwrap();
        list.set_filter("c");

        assert_eq!(list.compact(), 1);
        assert_eq!(list.compact(), 0);
        assert_eq!(names(&list), vec!["C"]);
        list.clear_filter();
        assert_eq!(names(&list), vec!["A", "C", "D"]);
        let handle = list.handle_of(3).unwrap();
        assert_eq!(list.row(handle).unwrap().peer.name, "C");
    }

    #[test]
    fn added_contact_lands_after_dialogs_and_clears_filter() {
        let mut list = DialogList::new();
        list.append_dialogs(vec![dialog(1, "Ann"), dialog(2, "Bob")]);
        list.append_contacts(vec![peer(3, "Cid")]);
        list.set_filter("bo");

        assert_eq!(list.add_contact(peer(4, "Dora")), Some(3));
        assert_eq!(list.filter_query(), None);
        assert_eq!(names(&list), vec!["Ann", "Bob", "Cid", "Dora"]);

        // A contact that already has a dialog keeps its dialog row.
        assert_eq!(list.add_contact(peer(2, "Bob")), Some(1));
        assert_eq!(list.section_len(Section::Contacts), 2);
        assert!(list.is_contact(2));
    }

    #[test]
    fn removing_contacts_and_dialogs() {
        let mut list = DialogList::new();
        list.append_dialogs(vec![dialog(1, "Ann"), dialog(2, "Bob")]);
        list.append_contacts(vec![peer(2, "Bob"), peer(3, "Cid")]);

        list.set_filter("ci");
        assert!(list.remove_contact(3));
        assert_eq!(list.filter_query(), None);
        assert_eq!(names(&list), vec!["Ann", "Bob"]);

        // Bob is still a contact, so dropping the dialog moves him down.
        list.set_filter("bo");
        assert_eq!(
            list.remove_peer(2).map(|row| row.section),
            Some(Section::Dialogs)
        );
        assert_eq!(list.filter_query(), None);
        assert_eq!(names(&list), vec!["Ann", "Bob"]);
        assert_eq!(list.position_of(2), Some(1));
        let handle = list.handle_of(2).unwrap();
        assert_eq!(list.row(handle).unwrap().section, Section::Contacts);

        assert_eq!(list.remove_peer(1).map(|row| row.peer.id), Some(1));
        assert!(!list.contains(1));
        assert!(!list.remove_contact(1));
    }

    #[test]
    fn neighbours_follow_visible_sequence() {
        let mut list = DialogList::new();
        list.append_dialogs(vec![dialog(1, "Jo"), dialog(2, "Ann"), dialog(3, "Joy")]);
        assert_eq!(list.peer_after(1), Some(2));
        assert_eq!(list.peer_before(1), None);

        list.set_filter("jo");
        assert_eq!(list.peer_after(1), Some(3));
        assert_eq!(list.peer_before(3), Some(1));
        assert_eq!(list.peer_after(3), None);
        assert_eq!(list.peer_after(2), None);
    }
}
