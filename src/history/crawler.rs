//! Graph search over a commit history.
//!
//! The crawler is anchored at a head and loads states lazily into an arena
//! keyed by hash. Edges only point from a state to its parents, so anything
//! that moves "toward head" is computed from head downward.
//!
//! ```text
//!        head
//!        /  \            previous[0] = left parent
//!      s3    s2          previous[1] = right parent
//!        \  /
//!         s1
//! ```

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, warn};

use crate::error::{HydraError, HydraResult};
use crate::history::path::{Path, Step};
use crate::history::state::State;
use crate::storage::{Fingerprint, Repository, StorageError};

/// States that searches must treat as absent.
pub type Blacklist = HashSet<Fingerprint>;

/// Walks one committable element's history.
pub struct HistoryCrawler {
    repo: Repository,
    head: Option<Fingerprint>,
    arena: HashMap<Fingerprint, State>,
    children: Option<HashMap<Fingerprint, Vec<Fingerprint>>>,
}

impl HistoryCrawler {
    pub fn new(repo: Repository, head: Option<Fingerprint>) -> Self {
        Self {
            repo,
            head,
            arena: HashMap::new(),
            children: None,
        }
    }

    pub fn head(&self) -> Option<&Fingerprint> {
        self.head.as_ref()
    }

    /// Load a state through the arena.
    ///
    /// A missing blob is a dangling reference and reads as `None`; an
    /// unparsable one is an error.
    pub fn state(&mut self, hash: &Fingerprint) -> HydraResult<Option<&State>> {
        if !self.arena.contains_key(hash) {
            match State::load(&self.repo, hash) {
                Ok(state) => {
                    self.arena.insert(hash.clone(), state);
                }
                Err(HydraError::Storage(StorageError::BlobNotFound(_))) => {
                    warn!(hash = hash.short(), "commit graph references a missing state");
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(self.arena.get(hash))
    }

    fn parents(&mut self, hash: &Fingerprint) -> HydraResult<Option<Vec<Fingerprint>>> {
        Ok(self.state(hash)?.map(|s| s.previous().to_vec()))
    }

    /// Immediate parents of `hash`; empty if it is unknown.
    pub fn list_previous_commits(&mut self, hash: &Fingerprint) -> HydraResult<Vec<Fingerprint>> {
        Ok(self.parents(hash)?.unwrap_or_default())
    }

    /// Immediate children of `hash` among the states reachable from head.
    pub fn list_following_commits(&mut self, hash: &Fingerprint) -> HydraResult<Vec<Fingerprint>> {
        if self.children.is_none() {
            let index = self.build_child_index()?;
            self.children = Some(index);
        }
        Ok(self
            .children
            .as_ref()
            .and_then(|index| index.get(hash).cloned())
            .unwrap_or_default())
    }

    fn build_child_index(&mut self) -> HydraResult<HashMap<Fingerprint, Vec<Fingerprint>>> {
        let mut index: HashMap<Fingerprint, Vec<Fingerprint>> = HashMap::new();
        for node in self.reachable(true)? {
            for parent in self.list_previous_commits(&node)? {
                let children = index.entry(parent).or_default();
                if !children.contains(&node) {
                    children.push(node.clone());
                }
            }
        }
        Ok(index)
    }

    // ==================== Search ====================

    /// Resolve one [`Step`] from `origin`.
    pub fn find_commit_relative(
        &mut self,
        origin: &Fingerprint,
        step: Step,
        blacklist: Option<&Blacklist>,
    ) -> HydraResult<Option<Fingerprint>> {
        let banned = |hash: &Fingerprint| blacklist.map(|b| b.contains(hash)).unwrap_or(false);
        if step.branch() == 0 || banned(origin) || self.state(origin)?.is_none() {
            return Ok(None);
        }

        let distance = step.distance();
        if distance == 0 {
            return Ok(Some(origin.clone()));
        }

        if distance < 0 {
            let Some(route) = self.route_from_head(origin, blacklist)? else {
                return Ok(None);
            };
            // route[0] is head, route.last() is origin
            let back = distance.unsigned_abs() as usize;
            return Ok(route.len().checked_sub(1 + back).map(|i| route[i].clone()));
        }

        let mut cursor = origin.clone();
        for hop in 0..distance {
            let index = if hop == 0 { step.branch() - 1 } else { 0 };
            let Some(next) = self.parents(&cursor)?.and_then(|p| p.get(index).cloned()) else {
                return Ok(None);
            };
            if banned(&next) || self.state(&next)?.is_none() {
                return Ok(None);
            }
            cursor = next;
        }
        Ok(Some(cursor))
    }

    /// Resolve a [`Path`] step by step, starting at head.
    pub fn find_commit_path(
        &mut self,
        path: &Path,
        blacklist: Option<&Blacklist>,
    ) -> HydraResult<Option<Fingerprint>> {
        let Some(mut cursor) = self.head.clone() else {
            return Ok(None);
        };
        for step in path.steps() {
            match self.find_commit_relative(&cursor, *step, blacklist)? {
                Some(next) => cursor = next,
                None => {
                    debug!(%path, %step, "path does not resolve");
                    return Ok(None);
                }
            }
        }
        Ok(Some(cursor))
    }

    /// Search for `target` among the ancestors of `origin` (inclusive).
    pub fn find_commit_hash(
        &mut self,
        origin: &Fingerprint,
        target: &Fingerprint,
        blacklist: Option<&Blacklist>,
        depth_first: bool,
    ) -> HydraResult<Option<Fingerprint>> {
        let banned = |hash: &Fingerprint| blacklist.map(|b| b.contains(hash)).unwrap_or(false);
        let mut visited = HashSet::new();
        let mut frontier = VecDeque::from([origin.clone()]);

        loop {
            let next = if depth_first {
                frontier.pop_back()
            } else {
                frontier.pop_front()
            };
            let Some(hash) = next else {
                break;
            };
            if banned(&hash) || !visited.insert(hash.clone()) {
                continue;
            }
            let Some(parents) = self.parents(&hash)? else {
                continue;
            };
            if &hash == target {
                return Ok(Some(hash));
            }
            if depth_first {
                // parent #0 ends up on top of the stack
                frontier.extend(parents.into_iter().rev());
            } else {
                frontier.extend(parents);
            }
        }
        debug!(target = target.short(), origin = origin.short(), "commit not reachable");
        Ok(None)
    }

    /// Shortest previous-link route from head to `target`, head first.
    fn route_from_head(
        &mut self,
        target: &Fingerprint,
        blacklist: Option<&Blacklist>,
    ) -> HydraResult<Option<Vec<Fingerprint>>> {
        let Some(head) = self.head.clone() else {
            return Ok(None);
        };
        let Some(hops) = self.bfs_from_head(&head, target, blacklist)? else {
            return Ok(None);
        };
        let mut route = vec![head];
        route.extend(hops.into_iter().map(|(hash, _)| hash));
        Ok(Some(route))
    }

    /// Breadth-first search from head recording, for each hop, the state
    /// reached and the parent index used to reach it.
    fn bfs_from_head(
        &mut self,
        head: &Fingerprint,
        target: &Fingerprint,
        blacklist: Option<&Blacklist>,
    ) -> HydraResult<Option<Vec<(Fingerprint, usize)>>> {
        let banned = |hash: &Fingerprint| blacklist.map(|b| b.contains(hash)).unwrap_or(false);
        if banned(head) {
            return Ok(None);
        }
        let mut came_from: HashMap<Fingerprint, (Fingerprint, usize)> = HashMap::new();
        let mut seen = HashSet::from([head.clone()]);
        let mut queue = VecDeque::from([head.clone()]);

        while let Some(hash) = queue.pop_front() {
            if &hash == target {
                let mut hops = Vec::new();
                let mut cursor = hash;
                while let Some((parent, index)) = came_from.get(&cursor) {
                    hops.push((cursor.clone(), *index));
                    cursor = parent.clone();
                }
                hops.reverse();
                return Ok(Some(hops));
            }
            for (index, parent) in self.list_previous_commits(&hash)?.into_iter().enumerate() {
                if banned(&parent) || !seen.insert(parent.clone()) {
                    continue;
                }
                came_from.insert(parent.clone(), (hash.clone(), index));
                queue.push_back(parent);
            }
        }
        Ok(None)
    }

    /// A [`Path`] from head that resolves to `target`, if it is reachable.
    pub fn derive_path(&mut self, target: &Fingerprint) -> HydraResult<Option<Path>> {
        let Some(head) = self.head.clone() else {
            return Ok(None);
        };
        let Some(hops) = self.bfs_from_head(&head, target, None)? else {
            return Ok(None);
        };
        let mut path = Path::default();
        for (_, index) in hops {
            // further hops along parent #0 extend the trailing step
            if index == 0 {
                if let Some(last) = path.last_mut() {
                    last.advance();
                    continue;
                }
            }
            path.push(Step::new(index + 1, 1));
        }
        Ok(Some(path))
    }

    // ==================== History ====================

    /// Hashes reachable from head.
    ///
    /// With `system_path` every reachable state is listed once, depth
    /// first with parent #0 explored first. Otherwise only the curated
    /// chain of valid-path parents is followed.
    pub fn reachable(&mut self, system_path: bool) -> HydraResult<Vec<Fingerprint>> {
        let Some(head) = self.head.clone() else {
            return Ok(Vec::new());
        };
        let mut order = Vec::new();

        if !system_path {
            let mut seen = HashSet::new();
            let mut cursor = Some(head);
            while let Some(hash) = cursor {
                if !seen.insert(hash.clone()) {
                    break;
                }
                let Some(state) = self.state(&hash)? else {
                    break;
                };
                cursor = state.valid_path_previous().cloned();
                order.push(hash);
            }
            return Ok(order);
        }

        let mut visited = HashSet::new();
        let mut stack = vec![head];
        while let Some(hash) = stack.pop() {
            if !visited.insert(hash.clone()) {
                continue;
            }
            let Some(parents) = self.parents(&hash)? else {
                continue;
            };
            order.push(hash);
            stack.extend(parents.into_iter().rev());
        }
        Ok(order)
    }

    /// States reachable from head, in [`HistoryCrawler::reachable`] order.
    pub fn history(&mut self, system_path: bool) -> HydraResult<Vec<(Fingerprint, State)>> {
        let mut result = Vec::new();
        for hash in self.reachable(system_path)? {
            if let Some(state) = self.state(&hash)? {
                result.push((hash, state.clone()));
            }
        }
        Ok(result)
    }

    /// One log line per state, newest first.
    pub fn history_log(&mut self, system_path: bool) -> HydraResult<String> {
        let mut log = String::new();
        for (_, state) in self.history(system_path)? {
            log.push_str(&state.log_entry());
            log.push('\n');
        }
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageStrategy;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::open(dir.path(), StorageStrategy::Direct).unwrap();
        (dir, repo)
    }

    fn commit(repo: &Repository, previous: &[&Fingerprint], message: &str) -> Fingerprint {
        let previous = previous.iter().map(|h| (*h).clone()).collect();
        let mut state = State::new(previous, Some(Fingerprint::empty()), "tester", message).unwrap();
        state.store(repo).unwrap()
    }

    /// ```text
    ///   d ── c ── a
    ///    \       /
    ///     ── b ──
    /// ```
    /// d has parents [c, b]; c and b both have parent a.
    fn diamond(repo: &Repository) -> [Fingerprint; 4] {
        let a = commit(repo, &[], "a");
        let b = commit(repo, &[&a], "b");
        let c = commit(repo, &[&a], "c");
        let d = commit(repo, &[&c, &b], "d");
        [a, b, c, d]
    }

    #[test]
    fn test_relative_steps() {
        let (_dir, repo) = setup();
        let [a, b, c, d] = diamond(&repo);
        let mut crawler = HistoryCrawler::new(repo, Some(d.clone()));

        assert_eq!(crawler.find_commit_relative(&d, Step::new(1, 0), None).unwrap(), Some(d.clone()));
        assert_eq!(crawler.find_commit_relative(&d, Step::new(1, 1), None).unwrap(), Some(c.clone()));
        assert_eq!(crawler.find_commit_relative(&d, Step::new(2, 1), None).unwrap(), Some(b.clone()));
        assert_eq!(crawler.find_commit_relative(&d, Step::new(2, 2), None).unwrap(), Some(a.clone()));
        assert_eq!(crawler.find_commit_relative(&d, Step::new(1, 3), None).unwrap(), None);
        assert_eq!(crawler.find_commit_relative(&d, Step::new(3, 1), None).unwrap(), None);
        assert_eq!(crawler.find_commit_relative(&d, Step::new(0, 1), None).unwrap(), None);

        // toward head
        assert_eq!(crawler.find_commit_relative(&a, Step::new(1, -1), None).unwrap(), Some(c.clone()));
        assert_eq!(crawler.find_commit_relative(&a, Step::new(1, -2), None).unwrap(), Some(d.clone()));
        assert_eq!(crawler.find_commit_relative(&a, Step::new(1, -3), None).unwrap(), None);

        let blacklist = Blacklist::from([c.clone()]);
        assert_eq!(crawler.find_commit_relative(&d, Step::new(1, 1), Some(&blacklist)).unwrap(), None);
        // with c banned, the route to a goes through b
        assert_eq!(
            crawler.find_commit_relative(&a, Step::new(1, -1), Some(&blacklist)).unwrap(),
            Some(b)
        );
    }

    #[test]
    fn test_two_commit_scenario() {
        let (_dir, repo) = setup();
        let first = commit(&repo, &[], "first");
        let second = commit(&repo, &[&first], "second");
        let mut crawler = HistoryCrawler::new(repo, Some(second.clone()));

        assert_eq!(crawler.find_commit_relative(&second, Step::new(1, 0), None).unwrap(), Some(second.clone()));
        assert_eq!(crawler.find_commit_relative(&second, Step::new(1, 1), None).unwrap(), Some(first));

        let back_to_head = Path::parse("*1+0*1+0*1+0").unwrap();
        assert_eq!(crawler.find_commit_path(&back_to_head, None).unwrap(), Some(second));
    }

    #[test]
    fn test_find_commit_hash() {
        let (_dir, repo) = setup();
        let [a, b, c, d] = diamond(&repo);
        let mut crawler = HistoryCrawler::new(repo, Some(d.clone()));

        for depth_first in [true, false] {
            assert_eq!(crawler.find_commit_hash(&d, &a, None, depth_first).unwrap(), Some(a.clone()));
            assert_eq!(crawler.find_commit_hash(&d, &d, None, depth_first).unwrap(), Some(d.clone()));
            assert_eq!(crawler.find_commit_hash(&c, &b, None, depth_first).unwrap(), None);

            let both = Blacklist::from([b.clone(), c.clone()]);
            assert_eq!(crawler.find_commit_hash(&d, &a, Some(&both), depth_first).unwrap(), None);
        }
        let unknown = Fingerprint::of_str("unknown");
        assert_eq!(crawler.find_commit_hash(&d, &unknown, None, true).unwrap(), None);
    }

    #[test]
    fn test_neighbours() {
        let (_dir, repo) = setup();
        let [a, b, c, d] = diamond(&repo);
        let mut crawler = HistoryCrawler::new(repo, Some(d.clone()));

        assert_eq!(crawler.list_previous_commits(&d).unwrap(), vec![c.clone(), b.clone()]);
        let mut following = crawler.list_following_commits(&a).unwrap();
        following.sort();
        let mut expected = vec![b, c];
        expected.sort();
        assert_eq!(following, expected);
        assert!(crawler.list_following_commits(&d).unwrap().is_empty());
    }

    #[test]
    fn test_derive_path_round_trip() {
        let (_dir, repo) = setup();
        let [a, b, c, d] = diamond(&repo);
        let mut crawler = HistoryCrawler::new(repo, Some(d.clone()));

        for target in [&a, &b, &c, &d] {
            let path = crawler.derive_path(target).unwrap().unwrap();
            assert_eq!(crawler.find_commit_path(&path, None).unwrap().as_ref(), Some(target));
            // resolving again gives the same answer
            assert_eq!(crawler.find_commit_path(&path, None).unwrap().as_ref(), Some(target));
        }
        assert_eq!(crawler.derive_path(&b).unwrap().unwrap().to_string(), "*1+0*2+1");
        assert!(crawler.derive_path(&Fingerprint::of_str("x")).unwrap().is_none());
    }

    #[test]
    fn test_history_orders() {
        let (_dir, repo) = setup();
        let a = commit(&repo, &[], "a");
        let b = commit(&repo, &[&a], "b");
        let c = commit(&repo, &[&a], "c");
        let mut d = State::new(vec![c.clone(), b.clone()], Some(Fingerprint::empty()), "t", "d")
            .unwrap()
            .with_valid_path_previous(Some(b.clone()));
        let d = d.store(&repo).unwrap();

        let mut crawler = HistoryCrawler::new(repo, Some(d.clone()));
        assert_eq!(crawler.reachable(true).unwrap(), vec![d.clone(), c, a, b.clone()]);
        // b has no valid-path parent, so the curated chain stops there
        assert_eq!(crawler.reachable(false).unwrap(), vec![d, b]);

        let log = crawler.history_log(true).unwrap();
        assert_eq!(log.lines().count(), 4);
        assert!(log.lines().next().unwrap().ends_with("[invalid] d"));
    }

    #[test]
    fn test_missing_parent_is_a_miss() {
        let (_dir, repo) = setup();
        let ghost = Fingerprint::of_str("never stored");
        let child = commit(&repo, &[&ghost], "child");
        let mut crawler = HistoryCrawler::new(repo, Some(child.clone()));
        assert_eq!(crawler.find_commit_relative(&child, Step::new(1, 1), None).unwrap(), None);
        assert_eq!(crawler.reachable(true).unwrap(), vec![child]);
    }

    #[test]
    fn test_empty_history() {
        let (_dir, repo) = setup();
        let mut crawler = HistoryCrawler::new(repo, None);
        assert!(crawler.reachable(true).unwrap().is_empty());
        assert_eq!(crawler.find_commit_path(&Path::default(), None).unwrap(), None);
        assert_eq!(crawler.history_log(false).unwrap(), "");
    }
}
