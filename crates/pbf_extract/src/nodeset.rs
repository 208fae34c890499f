use crossbeam_channel::Receiver;
use hashbrown::HashSet;
use nohash_hasher::BuildNoHashHasher;

/// Node ids referenced by at least one matched way. Built by a single
/// aggregation thread during way discovery, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct NodeIdSet {
    ids: HashSet<i64, BuildNoHashHasher<i64>>,
}

impl NodeIdSet {
    #[inline]
    pub fn contains(&self, id: i64) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.ids.iter().copied()
    }
}

/// Messages to the aggregation thread.
#[derive(Debug)]
pub enum Aggregate {
    Refs(Vec<i64>),
    /// Every blob has been processed; nothing more will arrive.
    Close,
}

/// Unions incoming refs until `Close` (or until every sender is gone).
pub fn collect_node_ids(messages: Receiver<Aggregate>) -> NodeIdSet {
    let mut set = NodeIdSet::default();

    for message in messages {
        match message {
            Aggregate::Refs(refs) => set.ids.extend(refs),
            Aggregate::Close => break,
        }
    }

    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn unions_until_close() {
        let (tx, rx) = unbounded();
        tx.send(Aggregate::Refs(vec![1, 2, 3])).unwrap();
        tx.send(Aggregate::Refs(vec![3, 4])).unwrap();
        tx.send(Aggregate::Close).unwrap();
        tx.send(Aggregate::Refs(vec![99])).unwrap();

        let set = collect_node_ids(rx);
        assert_eq!(set.len(), 4);
        assert!(set.contains(4));
        assert!(!set.contains(99));
    }

    #[test]
    fn disconnect_also_ends_collection() {
        let (tx, rx) = unbounded();
        tx.send(Aggregate::Refs(vec![-7])).unwrap();
        drop(tx);

        let set = collect_node_ids(rx);
        assert!(set.contains(-7));
        let mut ids: Vec<i64> = set.iter().collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![-7]);
    }
}
