//! Request records and the combined per-shard view

use crate::core::ShardIndex;
use serde::Serialize;
use std::collections::BTreeMap;

/// Identifier of one stored request
pub type RequestId = u64;

/// One request as persisted in a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestRecord {
    pub shard: ShardIndex,
    pub request_id: RequestId,
}

impl RequestRecord {
    pub fn new(shard: ShardIndex, request_id: RequestId) -> Self {
        Self { shard, request_id }
    }
}

/// Requests held by both stores for a single shard
///
/// `None` means the read against that store failed for this shard;
/// `Some(vec![])` means the read succeeded and found nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardRequests {
    pub store_a_requests: Option<Vec<RequestId>>,
    pub store_b_requests: Option<Vec<RequestId>>,
}

/// Shard -> requests from both stores, rebuilt on every read
///
/// Each list keeps its store's native retrieval order. Nothing is
/// guaranteed about ordering across the two stores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CombinedView {
    shards: BTreeMap<ShardIndex, ShardRequests>,
}

impl CombinedView {
    /// View with an empty (unread) entry for each of `shards` shards
    pub fn with_shards(shards: usize) -> Self {
        let shards = (0..shards)
            .map(|s| (ShardIndex(s), ShardRequests::default()))
            .collect();
        Self { shards }
    }

    pub fn get(&self, shard: ShardIndex) -> Option<&ShardRequests> {
        self.shards.get(&shard)
    }

    pub fn entry_mut(&mut self, shard: ShardIndex) -> &mut ShardRequests {
        self.shards.entry(shard).or_default()
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ShardIndex, &ShardRequests)> {
        self.shards.iter()
    }

    /// True if any shard has data from either store
    pub fn has_data(&self) -> bool {
        self.shards
            .values()
            .any(|r| r.store_a_requests.is_some() || r.store_b_requests.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_shards_prefills_entries() {
        let view = CombinedView::with_shards(3);
        assert_eq!(view.len(), 3);
        assert!(!view.has_data());
        assert_eq!(view.get(ShardIndex(2)), Some(&ShardRequests::default()));
        assert!(view.get(ShardIndex(3)).is_none());
    }

    #[test]
    fn test_serialized_shape() {
        let mut view = CombinedView::with_shards(2);
        view.entry_mut(ShardIndex(1)).store_a_requests = Some(vec![42]);
        view.entry_mut(ShardIndex(1)).store_b_requests = Some(vec![42, 43]);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["1"]["storeARequests"], serde_json::json!([42]));
        assert_eq!(json["1"]["storeBRequests"], serde_json::json!([42, 43]));
        assert!(json["0"]["storeARequests"].is_null());
    }

    #[test]
    fn test_has_data_with_empty_success() {
        let mut view = CombinedView::with_shards(1);
        view.entry_mut(ShardIndex(0)).store_b_requests = Some(Vec::new());
        assert!(view.has_data());
    }
}
