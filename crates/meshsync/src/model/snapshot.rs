//! Key-sorted snapshots of one kind and the merge diff between them.

use std::cmp::Ordering;

use super::config::{Config, Event};

/// Sorts a listing by key. The sort is stable, so equal keys keep their order.
pub fn normalize(mut configs: Vec<Config>) -> Vec<Config> {
    configs.sort_by(|a, b| a.key.cmp(&b.key));
    configs
}

/// Computes the ordered events that turn `old` into `new`.
///
/// Both snapshots must be sorted by key. Keys present in both produce an
/// `Update` only when the records differ. Events follow key order, and each
/// key produces at most one event.
pub fn diff(old: &[Config], new: &[Config]) -> Vec<(Event, Config)> {
    diff_with(old, new, |o, n| o != n)
}

/// Like [`diff`], with a custom test for whether a record present in both
/// snapshots changed.
pub fn diff_with<F>(old: &[Config], new: &[Config], changed: F) -> Vec<(Event, Config)>
where
    F: Fn(&Config, &Config) -> bool,
{
    let mut events = Vec::new();
    let (mut i, mut j) = (0, 0);

    while i < old.len() && j < new.len() {
        let (o, n) = (&old[i], &new[j]);
        match o.key.cmp(&n.key) {
            Ordering::Equal => {
                if changed(o, n) {
                    events.push((Event::Update, n.clone()));
                }
                i += 1;
                j += 1;
            }
            Ordering::Less => {
                events.push((Event::Delete, o.clone()));
                i += 1;
            }
            Ordering::Greater => {
                events.push((Event::Add, n.clone()));
                j += 1;
            }
        }
    }

    events.extend(old[i..].iter().map(|c| (Event::Delete, c.clone())));
    events.extend(new[j..].iter().map(|c| (Event::Add, c.clone())));
    events
}
