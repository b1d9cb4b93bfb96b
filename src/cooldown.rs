//! Cooldown tracking of submitting clients.
//!
//! The backing set has no per-member expiry, so one member of the set is a sentinel
//! holding the Unix-millisecond deadline of the current batch. The first reader that
//! finds the deadline in the past clears the whole set, identities included.

use crate::error::Error;
use crate::store::CooldownStore;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A member of the cooldown set, as interpreted by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CooldownEntry {
    /// Deadline of the current batch in Unix milliseconds.
    Sentinel(u64),
    /// A client that submitted during the current batch.
    Identity(String),
}

impl CooldownEntry {
    /// Members that parse fully as an unsigned integer are sentinels.
    pub fn parse(member: &str) -> Self {
        match member.parse::<u64>() {
            Ok(deadline) => CooldownEntry::Sentinel(deadline),
            Err(_) => CooldownEntry::Identity(member.to_string()),
        }
    }
}

impl std::fmt::Display for CooldownEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CooldownEntry::Sentinel(deadline) => write!(f, "{deadline}"),
            CooldownEntry::Identity(identity) => f.write_str(identity),
        }
    }
}

/// Point-in-time view of the cooldown set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: HashSet<CooldownEntry>,
}

impl Snapshot {
    pub fn from_members(members: impl IntoIterator<Item = String>) -> Self {
        Self {
            entries: members
                .into_iter()
                .map(|m| CooldownEntry::parse(&m))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_identity(&self, identity: &str) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e, CooldownEntry::Identity(i) if i == identity))
    }

    pub fn has_sentinel(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e, CooldownEntry::Sentinel(_)))
    }

    /// Returns a sentinel whose deadline is strictly before `now`, if any.
    pub fn stale_sentinel(&self, now: u64) -> Option<u64> {
        self.entries.iter().find_map(|e| match e {
            CooldownEntry::Sentinel(deadline) if *deadline < now => Some(*deadline),
            _ => None,
        })
    }
}

/// Tracks which identities are cooling down, on top of a [`CooldownStore`].
pub struct CooldownTracker {
    store: Arc<dyn CooldownStore>,
    window: Duration,
}

impl CooldownTracker {
    pub fn new(store: Arc<dyn CooldownStore>, window: Duration) -> Self {
        Self { store, window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub async fn snapshot(&self) -> Result<Snapshot, Error> {
        Ok(Snapshot::from_members(self.store.members().await?))
    }

    /// Records `identity` as cooling down until the current batch expires.
    pub async fn track(&self, identity: &str) -> Result<(), Error> {
        self.store.add(identity).await
    }

    /// Clears the whole set if `snapshot` holds an expired sentinel.
    ///
    /// Returns whether a clear was issued.
    pub async fn reset_if_expired(&self, snapshot: &Snapshot, now: u64) -> Result<bool, Error> {
        let Some(deadline) = snapshot.stale_sentinel(now) else {
            return Ok(false);
        };
        log::info!("Cooldown batch expired at {deadline}, clearing tracked clients");
        self.store.clear().await?;
        Ok(true)
    }

    /// Opens a batch by inserting a sentinel, if `snapshot` is empty.
    pub async fn ensure_sentinel(&self, snapshot: &Snapshot, now: u64) -> Result<(), Error> {
        if snapshot.is_empty() {
            self.insert_sentinel(now).await?;
        }
        Ok(())
    }

    async fn insert_sentinel(&self, now: u64) -> Result<(), Error> {
        let window_ms = u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX);
        let sentinel = CooldownEntry::Sentinel(now.saturating_add(window_ms));
        log::debug!("Opening cooldown batch until {sentinel}");
        self.store.add(&sentinel.to_string()).await
    }

    /// Brings the set up to date for a submission arriving at `now`.
    ///
    /// Returns the view of tracked identities the submission is checked against:
    /// the snapshot taken on entry, or an empty one if the batch just expired.
    pub async fn prepare(&self, now: u64) -> Result<Snapshot, Error> {
        let snapshot = self.snapshot().await?;
        self.ensure_sentinel(&snapshot, now).await?;

        if self.reset_if_expired(&snapshot, now).await? {
            // The clear also removed the deadline, open the next batch right away.
            self.insert_sentinel(now).await?;
            return Ok(Snapshot::default());
        }

        // A clear racing a concurrent add can leave identities without any deadline.
        if !snapshot.is_empty() && !snapshot.has_sentinel() {
            log::warn!("Cooldown set has no sentinel, opening a new batch");
            self.insert_sentinel(now).await?;
        }

        Ok(snapshot)
    }
}

/// Current time in Unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rstest::*;
    use testresult::TestResult;

    const NOW: u64 = 1_700_000_000_000;
    const WINDOW: Duration = Duration::from_secs(2 * 60 * 60);
    const WINDOW_MS: u64 = 2 * 60 * 60 * 1000;

    fn tracker(store: &Arc<MemoryStore>) -> CooldownTracker {
        CooldownTracker::new(store.clone(), WINDOW)
    }

    #[rstest]
    #[case("1700000000000", CooldownEntry::Sentinel(1_700_000_000_000))]
    #[case("0", CooldownEntry::Sentinel(0))]
    #[case("1.2.3.4", CooldownEntry::Identity("1.2.3.4".to_string()))]
    #[case("2001:db8::1", CooldownEntry::Identity("2001:db8::1".to_string()))]
    #[case("-5", CooldownEntry::Identity("-5".to_string()))]
    #[case("12abc", CooldownEntry::Identity("12abc".to_string()))]
    #[case("", CooldownEntry::Identity(String::new()))]
    fn test_parse_entry(#[case] member: &str, #[case] expected: CooldownEntry) {
        assert_eq!(CooldownEntry::parse(member), expected);
    }

    #[rstest]
    #[case::past(NOW - 1, Some(NOW - 1))]
    #[case::exactly_now(NOW, None)]
    #[case::future(NOW + 1, None)]
    fn test_stale_sentinel(#[case] deadline: u64, #[case] expected: Option<u64>) {
        let snapshot = Snapshot::from_members([deadline.to_string(), "1.2.3.4".to_string()]);
        assert_eq!(snapshot.stale_sentinel(NOW), expected);
    }

    #[tokio::test]
    async fn test_ensure_sentinel_on_empty() -> TestResult {
        let store = Arc::new(MemoryStore::default());
        let tracker = tracker(&store);

        tracker.ensure_sentinel(&Snapshot::default(), NOW).await?;

        let snapshot = tracker.snapshot().await?;
        assert_eq!(
            snapshot,
            Snapshot::from_members([(NOW + WINDOW_MS).to_string()])
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_ensure_sentinel_noop_when_populated() -> TestResult {
        let store = Arc::new(MemoryStore::with_members(["1.2.3.4"]));
        let tracker = tracker(&store);

        let snapshot = tracker.snapshot().await?;
        tracker.ensure_sentinel(&snapshot, NOW).await?;

        assert_eq!(tracker.snapshot().await?, snapshot);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_ensure_sentinel() -> TestResult {
        let store = Arc::new(MemoryStore::default());
        let tracker = tracker(&store);
        let empty = tracker.snapshot().await?;

        let (a, b) = tokio::join!(
            tracker.ensure_sentinel(&empty, NOW),
            tracker.ensure_sentinel(&empty, NOW)
        );
        a?;
        b?;

        let members = store.members().await?;
        assert!(!members.is_empty());
        assert!(members.iter().all(|m| *m == (NOW + WINDOW_MS).to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_if_expired_clears_batch() -> TestResult {
        let stale = (NOW - 1).to_string();
        let store = Arc::new(MemoryStore::with_members([stale.as_str(), "1.2.3.4"]));
        let tracker = tracker(&store);

        let snapshot = tracker.snapshot().await?;
        assert!(tracker.reset_if_expired(&snapshot, NOW).await?);
        assert!(store.members().await?.is_empty());
        Ok(())
    }

    #[rstest]
    #[case::exactly_now(NOW)]
    #[case::future(NOW + 1000)]
    #[tokio::test]
    async fn test_reset_if_expired_keeps_current_batch(#[case] deadline: u64) -> TestResult {
        let deadline = deadline.to_string();
        let store = Arc::new(MemoryStore::with_members([deadline.as_str(), "1.2.3.4"]));
        let tracker = tracker(&store);

        let snapshot = tracker.snapshot().await?;
        assert!(!tracker.reset_if_expired(&snapshot, NOW).await?);
        assert!(store.members().await?.contains("1.2.3.4"));
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_if_expired_empty_is_noop() -> TestResult {
        let store = Arc::new(MemoryStore::default());
        let tracker = tracker(&store);
        assert!(!tracker.reset_if_expired(&Snapshot::default(), NOW).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_prepare_opens_first_batch() -> TestResult {
        let store = Arc::new(MemoryStore::default());
        let tracker = tracker(&store);

        let view = tracker.prepare(NOW).await?;

        assert!(view.is_empty());
        let members = store.members().await?;
        assert_eq!(members.len(), 1);
        assert!(members.contains(&(NOW + WINDOW_MS).to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_prepare_expired_batch_starts_fresh() -> TestResult {
        let stale = (NOW - 1).to_string();
        let store = Arc::new(MemoryStore::with_members([stale.as_str(), "1.2.3.4"]));
        let tracker = tracker(&store);

        let view = tracker.prepare(NOW).await?;

        assert!(!view.contains_identity("1.2.3.4"));
        let members = store.members().await?;
        assert_eq!(members.len(), 1);
        assert!(members.contains(&(NOW + WINDOW_MS).to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_prepare_keeps_current_batch() -> TestResult {
        let deadline = (NOW + 60_000).to_string();
        let store = Arc::new(MemoryStore::with_members([deadline.as_str(), "1.2.3.4"]));
        let tracker = tracker(&store);

        let view = tracker.prepare(NOW).await?;

        assert!(view.contains_identity("1.2.3.4"));
        assert_eq!(store.members().await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_prepare_adopts_orphaned_identities() -> TestResult {
        let store = Arc::new(MemoryStore::with_members(["1.2.3.4"]));
        let tracker = tracker(&store);

        let view = tracker.prepare(NOW).await?;

        assert!(view.contains_identity("1.2.3.4"));
        let after = tracker.snapshot().await?;
        assert!(after.has_sentinel());
        assert!(after.contains_identity("1.2.3.4"));
        Ok(())
    }

    #[tokio::test]
    async fn test_track_is_idempotent() -> TestResult {
        let store = Arc::new(MemoryStore::default());
        let tracker = tracker(&store);

        tracker.track("9.9.9.9").await?;
        tracker.track("9.9.9.9").await?;

        let snapshot = tracker.snapshot().await?;
        assert!(snapshot.contains_identity("9.9.9.9"));
        assert_eq!(store.members().await?.len(), 1);
        Ok(())
    }
}
