//! Integration tests for the collection facade.
//!
//! These tests run the facade against a recording executor and verify:
//! - Argument validation before any session or I/O
//! - Identical descriptors from the blocking and async entry points
//! - `$out` pipelines split into a write and a deferred read
//! - Bulk failure correlation and single-write error translation
//! - Transaction constraints on reads and writes

mod common;

use std::collections::BTreeSet;

use common::{Harness, Person, processed_all};
use docforge::client::{
    BulkWriteOperationError, BulkWriteOutcome, FindCommand, MapReduceOutput, ReadCommand,
    WriteCommand, WriteError, WriteOperation, WriteRequestKind,
};
use docforge::prelude::*;
use docforge::render::RenderedUpdate;
use pretty_assertions::assert_eq;

fn duplicate_key(index: usize) -> WriteError {
    WriteError {
        index,
        code: 11000,
        message: "E11000 duplicate key error".to_string(),
        details: None,
    }
}

/// Fail the request at `position` in processing order.
fn fail_at(position: usize) -> impl FnOnce(&WriteOperation) -> ClientResult<docforge::client::OperationOutput> {
    move |operation: &WriteOperation| {
        let WriteOperation::BulkWrite(bulk) = operation else {
            panic!("expected a bulk write, got {:?}", operation);
        };
        Err(ClientError::BulkWriteOperation(Box::new(BulkWriteOperationError {
            outcome: processed_all(bulk),
            write_errors: vec![duplicate_key(position)],
            write_concern_error: None,
            unprocessed_requests: Vec::new(),
        })))
    }
}

#[test]
fn test_empty_bulk_write_rejected_before_any_session() {
    let h = Harness::new();
    let people = h.people();

    let err = people
        .bulk_write(&[], &BulkWriteOptions::default(), &OperationContext::new())
        .unwrap_err();
    assert!(err.is_argument_error());

    let err = people
        .insert_many(&[], &InsertManyOptions::default(), &OperationContext::new())
        .unwrap_err();
    assert!(err.is_argument_error());

    assert_eq!(h.cluster.started(), 0);
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn test_async_argument_errors_are_synchronous() {
    let h = Harness::new();
    let people = h.people();
    let ctx = OperationContext::new();

    let result = people.bulk_write_async(&[], &BulkWriteOptions::default(), &ctx);
    assert!(matches!(result, Err(ClientError::Argument(_))));
    assert_eq!(h.cluster.started(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sync_and_async_send_identical_descriptors() {
    let h = Harness::new();
    let people = h.people();
    let ctx = OperationContext::new();

    let filter = FilterDefinition::gte("age", 18);
    let options = FindOptions::<Person>::default()
        .sort(SortDefinition::descending("name"))
        .limit(10);

    people.find(&filter, &options, &ctx).unwrap();
    people.find_async(&filter, &options, &ctx).unwrap().await.unwrap();

    let update = UpdateDefinition::set("name", "Ada L.");
    people
        .update_one(&filter, &update, &UpdateOptions::default(), &ctx)
        .unwrap();
    people
        .update_one_async(&filter, &update, &UpdateOptions::default(), &ctx)
        .unwrap()
        .await
        .unwrap();

    let calls = h.executor.calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[0].read(), calls[1].read());
    assert_eq!(calls[2].write(), calls[3].write());

    let ReadCommand::Find(find) = &calls[0].read().command else {
        panic!("expected find");
    };
    assert_eq!(find.filter, doc! { "age": { "$gte": 18 } });
    assert_eq!(find.sort, Some(doc! { "n": -1 }));
    assert_eq!(find.limit, Some(10));
}

#[test]
fn test_update_renders_serialized_element_names() {
    let h = Harness::new();
    let people = h.people();

    people
        .update_many(
            &FilterDefinition::eq("name", "Ada"),
            &UpdateDefinition::set("name", "Ada L.").and(UpdateDefinition::inc("age", 1)),
            &UpdateOptions::default(),
            &OperationContext::new(),
        )
        .unwrap();

    let calls = h.executor.calls();
    let WriteOperation::BulkWrite(bulk) = calls[0].write() else {
        panic!("expected a bulk write");
    };
    assert_eq!(bulk.write_concern, WriteConcern::majority());
    assert_eq!(
        bulk.requests[0].kind,
        WriteRequestKind::Update {
            filter: doc! { "n": "Ada" },
            update: RenderedUpdate::Document(doc! { "$set": { "n": "Ada L." }, "$inc": { "age": 1 } }),
            multi: true,
            upsert: false,
            array_filters: None,
            collation: None,
            hint: None,
        }
    );
}

#[test]
fn test_find_one_reads_a_single_batch() {
    let h = Harness::new();
    let people = h.people();
    h.executor
        .reply_documents(vec![doc! { "_id": 1, "n": "Ada", "age": 36 }]);

    let found = people
        .find_one(
            &FilterDefinition::eq("name", "Ada"),
            &FindOptions::<Person>::default(),
            &OperationContext::new(),
        )
        .unwrap();
    assert_eq!(found, Some(Person::new(1, "Ada", 36)));

    let calls = h.executor.calls();
    let ReadCommand::Find(find) = &calls[0].read().command else {
        panic!("expected find");
    };
    assert_eq!(find.limit, Some(1));
    assert_eq!(find.single_batch, Some(true));
}

#[test]
fn test_aggregate_out_defers_a_find_on_the_output_collection() {
    let h = Harness::new();
    let people = h.people();
    let ctx = OperationContext::new();
    let output = CollectionNamespace::parse("shop.adults").unwrap();

    let pipeline = PipelineDefinition::<Person, Person>::new()
        .append(stages::match_stage(FilterDefinition::gte("age", 18)))
        .append(stages::out(output.clone(), None));
    h.executor
        .reply_documents(vec![doc! { "_id": 1, "n": "Ada", "age": 36 }]);

    let mut cursor = people
        .aggregate(&pipeline, &AggregateOptions::default().batch_size(50), &ctx)
        .unwrap();
    assert!(cursor.is_deferred());

    let calls = h.executor.calls();
    assert_eq!(calls.len(), 1);
    let WriteOperation::Command(write) = calls[0].write() else {
        panic!("expected a command write");
    };
    let WriteCommand::AggregateToCollection(aggregate) = &write.command else {
        panic!("expected an aggregate to collection");
    };
    assert_eq!(
        aggregate.pipeline,
        vec![
            doc! { "$match": { "age": { "$gte": 18 } } },
            doc! { "$out": { "db": "shop", "coll": "adults" } },
        ]
    );

    assert_eq!(cursor.try_next().unwrap(), Some(Person::new(1, "Ada", 36)));
    assert_eq!(cursor.try_next().unwrap(), None);

    let calls = h.executor.calls();
    assert_eq!(calls.len(), 2);
    let read = calls[1].read();
    assert_eq!(read.namespace, output);
    assert_eq!(
        read.command,
        ReadCommand::Find(FindCommand {
            batch_size: Some(50),
            ..FindCommand::default()
        })
    );
    assert_eq!(calls[0].session(), calls[1].session());
}

#[test]
fn test_pipeline_with_two_output_stages_rejected() {
    let h = Harness::new();
    let people = h.people();
    let pipeline = PipelineDefinition::<Person, Person>::new()
        .append(stages::out(CollectionNamespace::parse("shop.a").unwrap(), None))
        .append(stages::out(CollectionNamespace::parse("shop.b").unwrap(), None));

    let err = people
        .aggregate(&pipeline, &AggregateOptions::default(), &OperationContext::new())
        .unwrap_err();
    assert!(err.is_argument_error());
    assert_eq!(h.cluster.started(), 0);
}

#[test]
fn test_map_reduce_to_collection_defers_read() {
    let h = Harness::new();
    let people = h.people();
    let options = MapReduceOptions::default().output(MapReduceOutput::Replace {
        collection: "totals".to_string(),
        database: None,
    });

    let cursor = people
        .map_reduce::<Document>(
            "function() { emit(this.age, 1); }",
            "function(k, v) { return Array.sum(v); }",
            &options,
            &OperationContext::new(),
        )
        .unwrap();
    assert!(cursor.is_deferred());

    let calls = h.executor.calls();
    let WriteOperation::Command(write) = calls[0].write() else {
        panic!("expected a command write");
    };
    assert!(matches!(write.command, WriteCommand::MapReduceToCollection(_)));
}

#[test]
fn test_map_reduce_requires_functions() {
    let h = Harness::new();
    let err = h
        .people()
        .map_reduce::<Document>("", "function(k, v) {}", &MapReduceOptions::default(), &OperationContext::new())
        .unwrap_err();
    assert!(err.is_argument_error());
    assert!(h.executor.calls().is_empty());
}

#[test]
fn test_unordered_bulk_failure_maps_to_request_positions() {
    let h = Harness::new();
    let people = h.people();
    let requests = vec![
        WriteModel::update_one(FilterDefinition::eq("name", "Ada"), UpdateDefinition::inc("age", 1)),
        WriteModel::insert_one(Person::new(2, "Grace", 45)),
        WriteModel::delete_one(FilterDefinition::eq("_id", 3)),
    ];
    // Unordered batches run inserts first, so the insert is processing position 0.
    h.executor.reply_write(fail_at(0));

    let err = people
        .bulk_write(&requests, &BulkWriteOptions::unordered(), &OperationContext::new())
        .unwrap_err();
    let ClientError::BulkWrite(exception) = err else {
        panic!("expected a bulk write error, got {:?}", err);
    };
    assert_eq!(exception.failed_ids(), BTreeSet::from([1]));
    assert_eq!(exception.succeeded_ids(), BTreeSet::from([0, 2]));
    assert!(exception.unprocessed_ids().is_empty());
    assert_eq!(exception.write_errors[0].code, 11000);
}

#[test]
fn test_bulk_write_result_counts() {
    let h = Harness::new();
    let requests = vec![
        WriteModel::insert_one(Person::new(1, "Ada", 36)),
        WriteModel::insert_one(Person::new(2, "Grace", 45)),
        WriteModel::delete_many(FilterDefinition::lt("age", 18)),
    ];
    let result = h
        .people()
        .bulk_write(&requests, &BulkWriteOptions::default(), &OperationContext::new())
        .unwrap();
    assert_eq!(result.request_count, 3);
    assert_eq!(result.inserted_count, 2);
    assert_eq!(result.deleted_count, 1);
    assert_eq!(result.processed_ids, vec![0, 1, 2]);
}

#[test]
fn test_ordered_bulk_failure_returns_unattempted_models() {
    let h = Harness::new();
    let requests = vec![
        WriteModel::insert_one(Person::new(1, "Ada", 36)),
        WriteModel::insert_one(Person::new(1, "Ada again", 37)),
        WriteModel::insert_one(Person::new(3, "Edsger", 72)),
        WriteModel::delete_one(FilterDefinition::eq("name", "Grace")),
    ];
    // Ordered execution stops at the duplicate; the last two never run.
    h.executor.reply_write(|operation: &WriteOperation| {
        let WriteOperation::BulkWrite(bulk) = operation else {
            panic!("expected a bulk write, got {:?}", operation);
        };
        let (processed, unprocessed) = bulk.requests.split_at(2);
        Err(ClientError::BulkWriteOperation(Box::new(BulkWriteOperationError {
            outcome: BulkWriteOutcome {
                acknowledged: true,
                inserted_count: 1,
                processed_requests: processed.to_vec(),
                ..BulkWriteOutcome::default()
            },
            write_errors: vec![duplicate_key(1)],
            write_concern_error: None,
            unprocessed_requests: unprocessed.to_vec(),
        })))
    });

    let err = h
        .people()
        .bulk_write(&requests, &BulkWriteOptions::default(), &OperationContext::new())
        .unwrap_err();
    let ClientError::BulkWrite(exception) = err else {
        panic!("expected a bulk write error, got {:?}", err);
    };
    assert_eq!(exception.failed_ids(), BTreeSet::from([1]));
    assert_eq!(exception.unprocessed_ids(), BTreeSet::from([2, 3]));

    let unprocessed = exception.unprocessed_models::<Person>().unwrap();
    assert_eq!(unprocessed.len(), 2);
    assert!(matches!(
        unprocessed[0],
        WriteModel::InsertOne(model) if model.document == Person::new(3, "Edsger", 72)
    ));
    assert!(matches!(unprocessed[1], WriteModel::DeleteOne(_)));
    assert!(matches!(
        exception.model::<Person>(1),
        Some(WriteModel::InsertOne(model)) if model.document.name == "Ada again"
    ));
}

#[test]
fn test_single_write_failure_becomes_write_error() {
    let h = Harness::new();
    h.executor.reply_write(fail_at(0));

    let err = h
        .people()
        .insert_one(&Person::new(1, "Ada", 36), &InsertOneOptions::default(), &OperationContext::new())
        .unwrap_err();
    let ClientError::Write(exception) = err else {
        panic!("expected a write error, got {:?}", err);
    };
    assert_eq!(exception.write_error, Some(duplicate_key(0)));
    assert_eq!(exception.write_concern_error, None);
}

#[test]
fn test_insert_one_reports_document_id() {
    let h = Harness::new();
    let result = h
        .people()
        .insert_one(&Person::new(7, "Ada", 36), &InsertOneOptions::default(), &OperationContext::new())
        .unwrap();
    assert_eq!(result.inserted_id, Bson::Int32(7));
}

#[test]
fn test_find_one_and_update_decodes_returned_document() {
    let h = Harness::new();
    h.executor.reply_write(|_| {
        Ok(docforge::client::OperationOutput::Document(Some(
            doc! { "_id": 1, "n": "Ada", "age": 37 },
        )))
    });

    let updated = h
        .people()
        .find_one_and_update(
            &FilterDefinition::eq("name", "Ada"),
            &UpdateDefinition::inc("age", 1),
            &FindOneAndUpdateOptions::<Person>::default().return_after(),
            &OperationContext::new(),
        )
        .unwrap();
    assert_eq!(updated, Some(Person::new(1, "Ada", 37)));
}

#[test]
fn test_transaction_rejects_non_primary_read() {
    let h = Harness::new();
    let people = h.people();
    let session = h.client.start_session(SessionOptions::default());
    session
        .start_transaction(Some(TransactionOptions {
            read_preference: Some(ReadPreference::secondary()),
            ..TransactionOptions::default()
        }))
        .unwrap();
    let ctx = OperationContext::with_session(&session);

    let err = people
        .count_documents(&FilterDefinition::empty(), &CountOptions::default(), &ctx)
        .unwrap_err();
    assert!(matches!(err, ClientError::TransactionPolicy(_)));
    assert!(h.executor.calls().is_empty());
}

#[test]
fn test_transaction_writes_use_acknowledged_concern() {
    let h = Harness::new();
    let people = h.people();
    let session = h.client.start_session(SessionOptions::default());
    session.start_transaction(None).unwrap();
    let ctx = OperationContext::with_session(&session);

    people
        .delete_one(&FilterDefinition::eq("_id", 1), &DeleteOptions::default(), &ctx)
        .unwrap();

    let calls = h.executor.calls();
    let common::Recorded::Write { operation: WriteOperation::BulkWrite(bulk), in_transaction, .. } = &calls[0]
    else {
        panic!("expected a bulk write");
    };
    assert!(*in_transaction);
    assert_eq!(bulk.write_concern, WriteConcern::acknowledged());
}

#[test]
fn test_cancelled_call_never_starts_a_session() {
    let h = Harness::new();
    let token = CancellationToken::new();
    token.cancel();
    let ctx = OperationContext::new().cancellation(token);

    let err = h
        .people()
        .count_documents(&FilterDefinition::empty(), &CountOptions::default(), &ctx)
        .unwrap_err();
    assert!(matches!(err, ClientError::Cancelled));
    assert_eq!(h.cluster.started(), 0);
}

#[test]
fn test_create_index_generates_name_from_rendered_keys() {
    let h = Harness::new();
    let people = h.people();
    let keys = IndexKeysDefinition::ascending("name").then(IndexKeysDefinition::descending("age"));

    let name = people
        .indexes()
        .create_one(
            &IndexModel::new(keys),
            &CreateIndexOptions::default(),
            &OperationContext::new(),
        )
        .unwrap();
    assert_eq!(name, "n_1_age_-1");

    let calls = h.executor.calls();
    let WriteOperation::Command(write) = calls[0].write() else {
        panic!("expected a command write");
    };
    let WriteCommand::CreateIndexes { indexes, .. } = &write.command else {
        panic!("expected createIndexes");
    };
    assert_eq!(indexes[0].get_document("key").unwrap(), &doc! { "n": 1, "age": -1 });
}

#[test]
fn test_drop_one_rejects_wildcard() {
    let h = Harness::new();
    let err = h
        .people()
        .indexes()
        .drop_one("*", &DropIndexOptions::default(), &OperationContext::new())
        .unwrap_err();
    assert!(err.is_argument_error());
    assert!(h.executor.calls().is_empty());
}

#[test]
fn test_distinct_decodes_values() {
    let h = Harness::new();
    h.executor.reply_read(|_| {
        Ok(docforge::client::OperationOutput::Values(vec![
            Bson::String("Ada".to_string()),
            Bson::String("Grace".to_string()),
        ]))
    });

    let names: Vec<String> = h
        .people()
        .distinct("name", &FilterDefinition::empty(), &DistinctOptions::default(), &OperationContext::new())
        .unwrap();
    assert_eq!(names, vec!["Ada".to_string(), "Grace".to_string()]);

    let calls = h.executor.calls();
    let ReadCommand::Distinct { key, .. } = &calls[0].read().command else {
        panic!("expected distinct");
    };
    assert_eq!(key, "n");
}
