//! Results of single-document and many-document writes.

use std::collections::HashMap;

use bson::Bson;

use crate::bulk::BulkWriteResult;

/// Result of `insert_one`.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    /// Whether the write was acknowledged.
    pub acknowledged: bool,
    /// `_id` of the inserted document.
    pub inserted_id: Bson,
}

/// Result of `insert_many`.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertManyResult {
    /// Whether the write was acknowledged.
    pub acknowledged: bool,
    /// `_id`s of the inserted documents keyed by position in the input.
    pub inserted_ids: HashMap<usize, Bson>,
}

/// Result of `update_one`, `update_many` and `replace_one`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateResult {
    /// Whether the write was acknowledged.
    pub acknowledged: bool,
    /// Documents matched.
    pub matched_count: i64,
    /// Documents modified.
    pub modified_count: i64,
    /// `_id` of the upserted document.
    pub upserted_id: Option<Bson>,
}

impl UpdateResult {
    pub(crate) fn from_bulk(result: &BulkWriteResult) -> Self {
        Self {
            acknowledged: result.acknowledged,
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id(0).cloned(),
        }
    }
}

/// Result of `delete_one` and `delete_many`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteResult {
    /// Whether the write was acknowledged.
    pub acknowledged: bool,
    /// Documents deleted.
    pub deleted_count: i64,
}

impl DeleteResult {
    pub(crate) fn from_bulk(result: &BulkWriteResult) -> Self {
        Self {
            acknowledged: result.acknowledged,
            deleted_count: result.deleted_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::BulkWriteUpsert;

    #[test]
    fn test_update_result_takes_first_upsert() {
        let bulk = BulkWriteResult {
            acknowledged: true,
            request_count: 1,
            matched_count: 0,
            upserts: vec![BulkWriteUpsert { index: 0, id: Bson::Int32(9) }],
            processed_ids: vec![0],
            ..BulkWriteResult::default()
        };
        let result = UpdateResult::from_bulk(&bulk);
        assert_eq!(result.upserted_id, Some(Bson::Int32(9)));
        assert_eq!(result.matched_count, 0);
    }
}
