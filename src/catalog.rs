use std::collections::HashSet;

use crate::formats::BookManifest;

/// Starter entries in their original order, then every user entry whose id the
/// starter list does not already contain, in user order.
///
/// On an id conflict the starter copy wins. Entries are cloned, never altered.
pub fn reconcile(starter: &[BookManifest], user: &[BookManifest]) -> Vec<BookManifest> {
    let starter_ids = starter
        .iter()
        .map(|book| book.id.as_str())
        .collect::<HashSet<_>>();

    let mut merged = Vec::with_capacity(starter.len() + user.len());
    merged.extend(starter.iter().cloned());

    merged.extend(
        user.iter()
            .filter(|book| !starter_ids.contains(book.id.as_str()))
            .cloned(),
    );

    merged
}

/// Owns both catalog sources and the merged view shown to the reader.
///
/// Every mutation of a source recomputes the merged view before returning, so
/// `books()` always reflects the latest starter + user state.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    starter: Vec<BookManifest>,
    user: Vec<BookManifest>,
    merged: Vec<BookManifest>,
}

impl Catalog {
    pub fn new(starter: Vec<BookManifest>, user: Vec<BookManifest>) -> Self {
        let merged = reconcile(&starter, &user);
        Self {
            starter,
            user,
            merged,
        }
    }

    pub fn books(&self) -> &[BookManifest] {
        &self.merged
    }

    pub fn starter(&self) -> &[BookManifest] {
        &self.starter
    }

    pub fn user(&self) -> &[BookManifest] {
        &self.user
    }

    pub fn find(&self, book_id: &str) -> Option<&BookManifest> {
        self.merged.iter().find(|book| book.id == book_id)
    }

    pub fn set_starter(&mut self, starter: Vec<BookManifest>) {
        self.starter = starter;
        self.recompute();
    }

    pub fn set_user(&mut self, user: Vec<BookManifest>) {
        self.user = user;
        self.recompute();
    }

    /// Replaces the user entry with the same id, or appends the book.
    pub fn upsert_user_book(&mut self, book: BookManifest) {
        match self.user.iter_mut().find(|existing| existing.id == book.id) {
            Some(existing) => *existing = book,
            None => self.user.push(book),
        }
        self.recompute();
    }

    /// Writes back a book that gained scenes or media. A starter book is
    /// updated in place; anything else goes to the user list.
    pub fn upsert_book(&mut self, book: BookManifest) {
        if let Some(existing) = self.starter.iter_mut().find(|existing| existing.id == book.id) {
            *existing = book;
            self.recompute();
        } else {
            self.upsert_user_book(book);
        }
    }

    /// Gives starter books without scenes the scenes cached in `cached`, the
    /// user's stored copies. Starter metadata is kept. Returns how many
    /// books were filled.
    pub fn attach_cached_scenes(&mut self, cached: &[BookManifest]) -> usize {
        let mut attached = 0;
        for book in self.starter.iter_mut().filter(|book| book.scenes.is_empty()) {
            let Some(copy) = cached
                .iter()
                .find(|copy| copy.id == book.id && !copy.scenes.is_empty())
            else {
                continue;
            };
            book.scenes = copy.scenes.clone();
            if book.reader_content.is_none() {
                book.reader_content = copy.reader_content.clone();
            }
            attached += 1;
        }
        if attached > 0 {
            self.recompute();
        }
        attached
    }

    fn recompute(&mut self) {
        self.merged = reconcile(&self.starter, &self.user);
        tracing::debug!(
            starter = self.starter.len(),
            user = self.user.len(),
            merged = self.merged.len(),
            "catalog reconciled"
        );
    }
}
