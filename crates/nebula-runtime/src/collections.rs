//! History and favorite entries plus their upsert rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of entries returned by a history search.
pub const SEARCH_LIMIT: usize = 50;

/// A source the user has analysed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Sequential identifier.
    pub id: u64,
    /// Source descriptor; unique across entries.
    pub magnet_link: String,
    /// Display name.
    pub torrent_name: String,
    /// Number of files in the transfer.
    pub file_count: usize,
    /// Total size in bytes.
    pub total_size: u64,
    /// Last time the source was accessed.
    pub accessed_at: DateTime<Utc>,
}

/// A source the user has bookmarked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteEntry {
    /// Sequential identifier.
    pub id: u64,
    /// Source descriptor; unique across entries.
    pub magnet_link: String,
    /// Display name.
    pub torrent_name: String,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free-text note.
    #[serde(default)]
    pub notes: String,
    /// When the favorite was first added.
    pub added_at: DateTime<Utc>,
    /// Last time tags or notes changed.
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when recording a history access.
#[derive(Debug, Clone)]
pub struct HistoryAccess {
    /// Source descriptor.
    pub magnet_link: String,
    /// Display name.
    pub torrent_name: String,
    /// Number of files.
    pub file_count: usize,
    /// Total size in bytes.
    pub total_size: u64,
}

/// Fields supplied when adding a favorite.
#[derive(Debug, Clone)]
pub struct NewFavorite {
    /// Source descriptor.
    pub magnet_link: String,
    /// Display name.
    pub torrent_name: String,
    /// Tags to store.
    pub tags: Vec<String>,
    /// Note to store.
    pub notes: String,
}

trait Identified {
    fn id(&self) -> u64;
}

impl Identified for HistoryEntry {
    fn id(&self) -> u64 {
        self.id
    }
}

impl Identified for FavoriteEntry {
    fn id(&self) -> u64 {
        self.id
    }
}

fn next_id<T: Identified>(entries: &[T]) -> u64 {
    entries.iter().map(Identified::id).max().unwrap_or(0) + 1
}

/// Insert or refresh the entry for `access.magnet_link`.
pub(crate) fn upsert_history(
    entries: &mut Vec<HistoryEntry>,
    access: HistoryAccess,
    now: DateTime<Utc>,
) -> HistoryEntry {
    if let Some(entry) = entries
        .iter_mut()
        .find(|entry| entry.magnet_link == access.magnet_link)
    {
        entry.torrent_name = access.torrent_name;
        entry.file_count = access.file_count;
        entry.total_size = access.total_size;
        entry.accessed_at = now;
        return entry.clone();
    }
    let entry = HistoryEntry {
        id: next_id(entries),
        magnet_link: access.magnet_link,
        torrent_name: access.torrent_name,
        file_count: access.file_count,
        total_size: access.total_size,
        accessed_at: now,
    };
    entries.push(entry.clone());
    entry
}

/// Insert or refresh the favorite for `favorite.magnet_link`.
pub(crate) fn upsert_favorite(
    entries: &mut Vec<FavoriteEntry>,
    favorite: NewFavorite,
    now: DateTime<Utc>,
) -> FavoriteEntry {
    if let Some(entry) = entries
        .iter_mut()
        .find(|entry| entry.magnet_link == favorite.magnet_link)
    {
        entry.tags = favorite.tags;
        entry.notes = favorite.notes;
        entry.updated_at = now;
        return entry.clone();
    }
    let entry = FavoriteEntry {
        id: next_id(entries),
        magnet_link: favorite.magnet_link,
        torrent_name: favorite.torrent_name,
        tags: favorite.tags,
        notes: favorite.notes,
        added_at: now,
        updated_at: now,
    };
    entries.push(entry.clone());
    entry
}

/// Case-insensitive match on name or source, most recent first, capped.
pub(crate) fn search_history(entries: &[HistoryEntry], query: &str) -> Vec<HistoryEntry> {
    let needle = query.to_lowercase();
    let mut matches: Vec<HistoryEntry> = entries
        .iter()
        .filter(|entry| {
            entry.torrent_name.to_lowercase().contains(&needle)
                || entry.magnet_link.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect();
    matches.sort_by(|left, right| right.accessed_at.cmp(&left.accessed_at));
    matches.truncate(SEARCH_LIMIT);
    matches
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn access(magnet: &str, name: &str, file_count: usize) -> HistoryAccess {
        HistoryAccess {
            magnet_link: magnet.to_string(),
            torrent_name: name.to_string(),
            file_count,
            total_size: 10,
        }
    }

    #[test]
    fn history_upsert_refreshes_in_place() {
        let now = Utc::now();
        let mut entries = Vec::new();
        let first = upsert_history(&mut entries, access("m1", "One", 1), now);
        let second = upsert_history(&mut entries, access("m2", "Two", 2), now);
        assert_eq!((first.id, second.id), (1, 2));

        let later = now + Duration::seconds(5);
        let refreshed = upsert_history(&mut entries, access("m1", "One", 7), later);
        assert_eq!(entries.len(), 2);
        assert_eq!(refreshed.id, 1);
        assert_eq!(refreshed.file_count, 7);
        assert_eq!(refreshed.accessed_at, later);
    }

    #[test]
    fn ids_follow_the_current_maximum() {
        let now = Utc::now();
        let mut entries = Vec::new();
        upsert_history(&mut entries, access("m1", "One", 1), now);
        upsert_history(&mut entries, access("m2", "Two", 1), now);
        entries.remove(0);
        let next = upsert_history(&mut entries, access("m3", "Three", 1), now);
        assert_eq!(next.id, 3);
    }

    #[test]
    fn favorite_upsert_keeps_added_at() {
        let now = Utc::now();
        let mut entries = Vec::new();
        let favorite = |tags: Vec<&str>, notes: &str| NewFavorite {
            magnet_link: "m1".to_string(),
            torrent_name: "One".to_string(),
            tags: tags.into_iter().map(str::to_string).collect(),
            notes: notes.to_string(),
        };
        upsert_favorite(&mut entries, favorite(vec!["a"], "first"), now);
        let later = now + Duration::seconds(1);
        let updated = upsert_favorite(&mut entries, favorite(vec!["b"], "second"), later);
        assert_eq!(entries.len(), 1);
        assert_eq!(updated.added_at, now);
        assert_eq!(updated.updated_at, later);
        assert_eq!(updated.tags, vec!["b".to_string()]);
        assert_eq!(updated.notes, "second");
    }

    #[test]
    fn search_is_case_insensitive_and_capped() {
        let now = Utc::now();
        let mut entries = Vec::new();
        for index in 0..60 {
            upsert_history(
                &mut entries,
                access(&format!("magnet:{index}"), &format!("Ubuntu {index}"), 1),
                now + Duration::seconds(index),
            );
        }
        upsert_history(&mut entries, access("other", "Debian", 1), now);

        let results = search_history(&entries, "UBUNTU");
        assert_eq!(results.len(), SEARCH_LIMIT);
        assert_eq!(results[0].torrent_name, "Ubuntu 59");
        assert_eq!(search_history(&entries, "debian").len(), 1);
    }
}
