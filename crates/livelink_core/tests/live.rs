//! Backend push hooks, pagination and entity value properties.

use livelink_core::{CollectionOptions, ConnectorError};
use livelink_testkit::prelude::*;
use proptest::prelude::*;
use std::time::Duration;

fn open() -> Filter {
    Filter::new(attributes! { "status" => "open" }).unwrap()
}

#[tokio::test(start_paused = true)]
async fn pushed_records_fan_out() {
    let (connector, _mock) = mock_connector(test_config());
    let open_notes = connector.load_collection("notes", open()).unwrap();
    open_notes.first().await.unwrap();

    let channel = connector.register_entity_by_data("notes", 7, attributes! { "status" => "open" });
    let note = channel.value().unwrap();
    assert_eq!(note.id(), &EntityId::Int(7));
    assert!(note.is_attached());
    assert!(connector.is_entity_in_store("notes", &EntityId::Int(7)));
    assert_eq!(open_notes.value().unwrap().ids(), vec![EntityId::Int(7)]);

    // a second push updates the same channel in place
    let again = connector.register_entity_by_data("notes", 7, attributes! { "status" => "open", "title" => "x" });
    assert!(Channel::same(&channel, &again));
    let collection = open_notes.value().unwrap();
    assert_eq!(collection.len(), 1);
    assert_eq!(collection.entities()[0].get("title"), Some(&Value::from("x")));
}

#[tokio::test(start_paused = true)]
async fn remote_deletes_purge_every_store() {
    let (connector, mock) = mock_connector(test_config());
    mock.insert("notes", attributes! { "status" => "open" });
    mock.insert("notes", attributes! { "status" => "open" });
    let all = connector.load_collection("notes", Filter::all()).unwrap();
    let open_notes = connector.load_collection("notes", open()).unwrap();
    all.first().await.unwrap();
    open_notes.first().await.unwrap();

    connector.unregister_entity_type_and_id("notes", 1);
    assert!(!connector.is_entity_in_store("notes", &EntityId::Int(1)));
    assert_eq!(all.value().unwrap().ids(), vec![EntityId::Int(2)]);
    assert_eq!(open_notes.value().unwrap().ids(), vec![EntityId::Int(2)]);
}

#[tokio::test(start_paused = true)]
async fn remote_deletes_of_unknown_ids_are_harmless() {
    let (connector, _mock) = mock_connector(test_config());
    let all = connector.load_collection("notes", Filter::all()).unwrap();
    all.first().await.unwrap();

    connector.unregister_entity_type_and_id("notes", 42);
    assert_eq!(all.push_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn pushed_data_reloads_matching_collections() {
    let (connector, mock) = mock_connector(test_config());
    let open_notes = connector.load_collection("notes", open()).unwrap();
    let done_notes = connector
        .load_collection("notes", Filter::new(attributes! { "status" => "done" }).unwrap())
        .unwrap();
    open_notes.first().await.unwrap();
    done_notes.first().await.unwrap();

    mock.insert("notes", attributes! { "status" => "open" });
    let reloaded = connector
        .refresh_collection_with_data("notes", &attributes! { "status" => "open" })
        .unwrap();
    assert_eq!(reloaded.len(), 1);
    assert!(Channel::same(&reloaded[0], &open_notes));

    let collection = open_notes.next_update().await.unwrap();
    assert_eq!(collection.len(), 1);
    assert_eq!(mock.calls(MockOp::LoadCollection), 3);
}

#[tokio::test(start_paused = true)]
async fn pages_load_onto_one_channel() {
    let (connector, mock) = mock_connector(test_config());
    for i in 0..5 {
        mock.insert("notes", attributes! { "n" => i });
    }

    let paged = connector
        .paginated_load_collection("notes", CollectionOptions::default().with_range(2))
        .unwrap();
    let first = paged.channel.first().await.unwrap();
    assert_eq!(first.ids(), vec![EntityId::Int(1), EntityId::Int(2)]);
    assert_eq!(paged.paginator.total(), Some(5));
    assert_eq!(paged.paginator.page(), 1);

    paged.paginator.set_page(3).unwrap();
    let last = paged.channel.next_update().await.unwrap();
    assert_eq!(last.ids(), vec![EntityId::Int(5)]);
    assert_eq!(paged.channel.push_count(), 2);
    assert_eq!(mock.calls(MockOp::LoadPage), 2);

    // page rows land in the entity store, the page is not stored
    assert!(connector.is_entity_in_store("notes", &EntityId::Int(5)));
    assert!(!connector.is_collection_in_store("notes", &Filter::all()));
}

#[tokio::test(start_paused = true)]
async fn newer_page_loads_replace_older_ones() {
    let (connector, mock) = connector_with(
        test_config(),
        MockAdapter::new().with_latency(Duration::from_millis(50)),
    );
    for i in 0..5 {
        mock.insert("notes", attributes! { "n" => i });
    }

    let paged = connector
        .paginated_load_collection("notes", CollectionOptions::default().with_range(2))
        .unwrap();
    paged.paginator.set_page(2).unwrap();

    let page = paged.channel.first().await.unwrap();
    assert_eq!(page.ids(), vec![EntityId::Int(3), EntityId::Int(4)]);
    settle().await;
    assert_eq!(paged.channel.push_count(), 1);
    assert_eq!(mock.calls(MockOp::LoadPage), 1);
}

#[tokio::test(start_paused = true)]
async fn page_errors_fail_the_channel() {
    let (connector, mock) = mock_connector(test_config());
    mock.fail_next(MockOp::LoadPage, livelink_core::InterfaceError::terminal(403, "forbidden"), 1);

    let paged = connector
        .paginated_load_collection("notes", CollectionOptions::default())
        .unwrap();
    let err = paged.channel.first().await.unwrap_err();
    assert_eq!(err.as_interface().map(|e| e.code), Some(403));

    // the paginator can retry by reloading
    paged.paginator.reload().unwrap();
    assert!(paged.channel.next_update().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn clear_fails_pages_in_flight() {
    let (connector, mock) = connector_with(
        test_config(),
        MockAdapter::new().with_latency(Duration::from_millis(50)),
    );
    let paged = connector
        .paginated_load_collection("notes", CollectionOptions::default())
        .unwrap();
    connector.clear();

    let err = paged.channel.first().await.unwrap_err();
    assert!(err.as_interface().is_some_and(|e| e.is_cancelled()));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(paged.channel.push_count(), 1);
    assert_eq!(mock.calls(MockOp::LoadPage), 0);
}

#[tokio::test(start_paused = true)]
async fn paginator_outliving_its_connector_is_detached() {
    let (connector, _mock) = mock_connector(test_config());
    let paged = connector
        .paginated_load_collection("notes", CollectionOptions::default())
        .unwrap();
    drop(connector);

    let err = paged.paginator.set_offset(10).unwrap_err();
    assert!(matches!(err, ConnectorError::Detached));
    assert_eq!(paged.paginator.offset(), 10);
}

#[tokio::test(start_paused = true)]
async fn detached_entities_cannot_save() {
    let mut note = Entity::new("notes", 1, attributes! { "title" => "a" });
    assert!(!note.is_attached());
    let err = note.save().await.unwrap_err();
    assert!(matches!(err, ConnectorError::Detached));
}

proptest! {
    #[test]
    fn clone_attributes_round_trips(attrs in attributes_strategy()) {
        let entity = Entity::new("notes", 1, attrs.clone());
        prop_assert_eq!(entity.clone_attributes(), attrs);
        prop_assert!(entity.diff().is_empty());
        prop_assert!(!entity.is_dirty());
    }

    #[test]
    fn snapshot_clears_the_diff(attrs in attributes_strategy(), key in key_strategy(), value in scalar_strategy()) {
        let mut entity = Entity::new("notes", 1, attrs);
        entity.set(key.clone(), value.clone());
        entity.snapshot();
        prop_assert!(entity.diff().is_empty());
        prop_assert_eq!(entity.get(&key), Some(&value));
    }

    #[test]
    fn filters_match_their_own_constraints(constraints in constraints_strategy()) {
        let filter = Filter::new(constraints.clone()).unwrap();
        let entity = Entity::new("notes", 1, constraints);
        prop_assert!(filter.matches(&entity));
    }
}
