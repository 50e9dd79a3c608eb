//! End-to-end publication runs against a recording corpus

mod helpers;

use serde_json::json;
use std::sync::Arc;

use helpers::{config, shared, Call, FakeCorpus, Fixture, CORPUS, WORKER_RUN};
use quorum_common::events::EventBus;
use quorum_pub::db;
use quorum_pub::models::{Annotation, AssignmentState, CampaignMode, ProcessState, Task};
use quorum_pub::publish::concatenation::ConcatenationReport;
use quorum_pub::publish::{PublicationCoordinator, TaskOutcome};
use quorum_pub::services::CorpusApi;
use quorum_pub::PublishError;

fn coordinator(fixture: &Fixture, corpus: &Arc<FakeCorpus>) -> PublicationCoordinator {
    let client: Arc<dyn CorpusApi> = corpus.clone();
    PublicationCoordinator::new(fixture.db.clone(), client, EventBus::new(100))
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn transcription(element_id: uuid::Uuid, text: &str, uncertain: bool) -> serde_json::Value {
    json!({"transcription": {element_id.to_string(): {"text": text, "uncertain": uncertain}}})
}

#[tokio::test]
async fn test_second_run_publishes_nothing() {
    let fixture = Fixture::new(CampaignMode::Transcription).await;
    let line = fixture.element_type("Line", "text_line").await;
    let element = fixture.element(&line, None, "ext-line-1").await;
    let task = fixture.task(&element).await;
    let first = fixture
        .annotate(&task, AssignmentState::Annotated, transcription(element.id, "Dear Sir", false))
        .await;
    let second = fixture
        .annotate(&task, AssignmentState::Validated, transcription(element.id, "Dear Sir", false))
        .await;

    let corpus = shared(FakeCorpus::new());
    let coordinator = coordinator(&fixture, &corpus);

    let report = coordinator.publish(fixture.campaign.id, config()).await.unwrap();
    assert_eq!(report.error, None);
    assert_eq!(report.outcome(task.id), Some(TaskOutcome::Published));
    assert_eq!(corpus.calls().len(), 1);
    assert!(fixture.is_published(&first).await);
    assert!(fixture.is_published(&second).await);

    let report = coordinator.publish(fixture.campaign.id, config()).await.unwrap();
    assert_eq!(report.outcome(task.id), Some(TaskOutcome::Skipped));
    assert_eq!(report.published, 0);
    assert_eq!(corpus.calls().len(), 1);
    assert!(fixture.is_published(&first).await);
}

#[tokio::test]
async fn test_force_republication() {
    let fixture = Fixture::new(CampaignMode::Transcription).await;
    let line = fixture.element_type("Line", "text_line").await;
    let element = fixture.element(&line, None, "ext-line-1").await;
    let task = fixture.task(&element).await;
    fixture
        .annotate(&task, AssignmentState::Annotated, transcription(element.id, "Dear Sir", false))
        .await;

    let corpus = shared(FakeCorpus::new());
    let coordinator = coordinator(&fixture, &corpus);
    coordinator.publish(fixture.campaign.id, config()).await.unwrap();

    let mut forced = config();
    forced.force_republication = true;
    let report = coordinator.publish(fixture.campaign.id, forced).await.unwrap();
    assert_eq!(report.outcome(task.id), Some(TaskOutcome::Published));
    assert_eq!(corpus.calls_named("create_transcriptions").len(), 2);
}

#[tokio::test]
async fn test_identical_transcriptions_make_one_record() {
    let fixture = Fixture::new(CampaignMode::Transcription).await;
    let line = fixture.element_type("Line", "text_line").await;
    let element = fixture.element(&line, None, "ext-line-1").await;
    let task = fixture.task(&element).await;
    for _ in 0..3 {
        fixture
            .annotate(&task, AssignmentState::Annotated, transcription(element.id, "Paris", false))
            .await;
    }

    let corpus = shared(FakeCorpus::new());
    coordinator(&fixture, &corpus)
        .publish(fixture.campaign.id, config())
        .await
        .unwrap();

    let calls = corpus.calls();
    let [Call::CreateTranscriptions(records)] = calls.as_slice() else {
        panic!("unexpected calls: {:?}", calls);
    };
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].element_id, "ext-line-1");
    assert_eq!(records[0].text, "Paris");
    assert_eq!(records[0].orientation, "horizontal-lr");
    assert!(close(records[0].confidence, 1.0));
}

#[tokio::test]
async fn test_differing_transcriptions_split_confidence() {
    let fixture = Fixture::new(CampaignMode::Transcription).await;
    let line = fixture.element_type("Line", "text_line").await;
    let element = fixture.element(&line, None, "ext-line-1").await;
    let task = fixture.task(&element).await;
    fixture
        .annotate(&task, AssignmentState::Annotated, transcription(element.id, "Paris", false))
        .await;
    fixture
        .annotate(&task, AssignmentState::Annotated, transcription(element.id, "Pans", false))
        .await;

    let corpus = shared(FakeCorpus::new());
    coordinator(&fixture, &corpus)
        .publish(fixture.campaign.id, config())
        .await
        .unwrap();

    let calls = corpus.calls_named("create_transcriptions");
    let Call::CreateTranscriptions(records) = &calls[0] else {
        unreachable!()
    };
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| close(r.confidence, 0.5)));
}

#[tokio::test]
async fn test_uncertain_transcription_weighs_half() {
    let fixture = Fixture::new(CampaignMode::Transcription).await;
    let line = fixture.element_type("Line", "text_line").await;
    let element = fixture.element(&line, None, "ext-line-1").await;
    let task = fixture.task(&element).await;
    fixture
        .annotate(&task, AssignmentState::Annotated, transcription(element.id, "Paris", false))
        .await;
    fixture
        .annotate(&task, AssignmentState::Annotated, transcription(element.id, "Paris", true))
        .await;

    let corpus = shared(FakeCorpus::new());
    coordinator(&fixture, &corpus)
        .publish(fixture.campaign.id, config())
        .await
        .unwrap();

    let calls = corpus.calls_named("create_transcriptions");
    let Call::CreateTranscriptions(records) = &calls[0] else {
        unreachable!()
    };
    assert_eq!(records.len(), 1);
    assert!(close(records[0].confidence, 0.75));
}

#[tokio::test]
async fn test_rejected_call_leaves_task_unpublished() {
    let fixture = Fixture::new(CampaignMode::Transcription).await;
    let line = fixture.element_type("Line", "text_line").await;
    let element = fixture.element(&line, None, "ext-line-1").await;
    let task = fixture.task(&element).await;
    let annotation = fixture
        .annotate(&task, AssignmentState::Annotated, transcription(element.id, "Paris", false))
        .await;

    let corpus = shared(FakeCorpus::new());
    corpus.fail("create_transcriptions");
    let report = coordinator(&fixture, &corpus)
        .publish(fixture.campaign.id, config())
        .await
        .unwrap();

    assert_eq!(report.error, None);
    assert_eq!(report.outcome(task.id), Some(TaskOutcome::Failed));
    assert!(!fixture.is_published(&annotation).await);
}

#[tokio::test]
async fn test_only_exported_states_and_latest_versions() {
    let fixture = Fixture::new(CampaignMode::Transcription).await;
    let line = fixture.element_type("Line", "text_line").await;
    let element = fixture.element(&line, None, "ext-line-1").await;
    let task = fixture.task(&element).await;

    let old = fixture
        .annotate(&task, AssignmentState::Validated, transcription(element.id, "Pans", false))
        .await;
    let latest = fixture
        .add_version(old.user_task_id, 2, transcription(element.id, "Paris", false))
        .await;
    let pending = fixture
        .annotate(&task, AssignmentState::Pending, transcription(element.id, "Rome", false))
        .await;

    let corpus = shared(FakeCorpus::new());
    coordinator(&fixture, &corpus)
        .publish(fixture.campaign.id, config())
        .await
        .unwrap();

    let calls = corpus.calls_named("create_transcriptions");
    let Call::CreateTranscriptions(records) = &calls[0] else {
        unreachable!()
    };
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].text, "Paris");
    assert!(fixture.is_published(&latest).await);
    assert!(!fixture.is_published(&old).await);
    assert!(!fixture.is_published(&pending).await);
}

#[tokio::test]
async fn test_entity_form_offsets_around_empty_field() {
    let fixture = Fixture::new(CampaignMode::EntityForm).await;
    let line = fixture.element_type("Line", "text_line").await;
    let element = fixture.element(&line, None, "ext-line-1").await;
    let task = fixture.task(&element).await;
    let annotation = fixture
        .annotate(
            &task,
            AssignmentState::Annotated,
            json!({"values": [
                {"entity_type": "first_name", "instruction": "First name", "value": "Harry"},
                {"entity_type": "middle_name", "instruction": "Middle name", "value": ""},
                {"entity_type": "last_name", "instruction": "Last name", "value": "Potter"},
            ]}),
        )
        .await;

    let corpus = shared(FakeCorpus::new().with_entity_types(&[
        ("first_name", "type-first"),
        ("middle_name", "type-middle"),
        ("last_name", "type-last"),
    ]));

    let mut run_config = config();
    run_config.entities_order = vec![
        ("first_name".to_string(), "First name".to_string()),
        ("middle_name".to_string(), "Middle name".to_string()),
        ("last_name".to_string(), "Last name".to_string()),
    ];
    let report = coordinator(&fixture, &corpus)
        .publish(fixture.campaign.id, run_config)
        .await
        .unwrap();
    assert_eq!(report.outcome(task.id), Some(TaskOutcome::Published));

    let calls = corpus.calls();
    let [Call::CreateTranscription {
        element_id,
        text,
        confidence,
        id,
    }, Call::CreateTranscriptionEntities {
        transcription_id,
        entities,
    }] = calls.as_slice()
    else {
        panic!("unexpected calls: {:?}", calls);
    };

    assert_eq!(element_id, "ext-line-1");
    assert_eq!(text, "Harry ∅ Potter");
    assert!(close(*confidence, 1.0));
    assert_eq!(transcription_id, id);

    assert_eq!(entities.len(), 2);
    assert_eq!((entities[0].offset, entities[0].length), (0, 5));
    assert_eq!(entities[0].type_id, "type-first");
    assert_eq!((entities[1].offset, entities[1].length), (8, 6));
    assert_eq!(entities[1].type_id, "type-last");
    assert!(fixture.is_published(&annotation).await);
}

#[tokio::test]
async fn test_entity_type_failure_keeps_task_unpublished() {
    let fixture = Fixture::new(CampaignMode::Entity).await;
    let line = fixture.element_type("Line", "text_line").await;
    let element = fixture
        .element_from(
            &line,
            None,
            "ext-line-1",
            helpers::PROVIDER,
            json!({"id": "tr-1", "text": "Harry Paris 1997"}),
        )
        .await;
    let task = fixture.task(&element).await;
    let annotation = fixture
        .annotate(
            &task,
            AssignmentState::Annotated,
            json!({"entities": [
                {"entity_type": "person", "offset": 0, "length": 5, "value": "Harry"},
                {"entity_type": "place", "offset": 6, "length": 5, "value": "Paris"},
                {"entity_type": "date", "offset": 12, "length": 4, "value": "1997"},
            ]}),
        )
        .await;

    let corpus = shared(FakeCorpus::new().with_entity_types(&[("person", "type-person")]));
    corpus.fail_entity_type("place");

    let report = coordinator(&fixture, &corpus)
        .publish(fixture.campaign.id, config())
        .await
        .unwrap();

    assert_eq!(report.outcome(task.id), Some(TaskOutcome::Failed));
    assert!(!fixture.is_published(&annotation).await);

    let calls = corpus.calls_named("create_transcription_entities");
    let [Call::CreateTranscriptionEntities {
        transcription_id,
        entities,
    }] = calls.as_slice()
    else {
        panic!("unexpected calls: {:?}", calls);
    };
    assert_eq!(transcription_id, "tr-1");
    assert_eq!(entities.len(), 2);
    assert_eq!(corpus.calls_named("create_entity_type").len(), 2);
}

/// Two Entity tasks on separate lines, both tagging a "place"
async fn two_place_tasks(fixture: &Fixture) -> Vec<(Task, Annotation)> {
    let line = fixture.element_type("Line", "text_line").await;
    let mut tasks = Vec::new();
    for (ext_id, transcription_id) in [("ext-line-1", "tr-1"), ("ext-line-2", "tr-2")] {
        let element = fixture
            .element_from(
                &line,
                None,
                ext_id,
                helpers::PROVIDER,
                json!({"id": transcription_id, "text": "Paris"}),
            )
            .await;
        let task = fixture.task(&element).await;
        let annotation = fixture
            .annotate(
                &task,
                AssignmentState::Annotated,
                json!({"entities": [
                    {"entity_type": "place", "offset": 0, "length": 5, "value": "Paris"},
                ]}),
            )
            .await;
        tasks.push((task, annotation));
    }
    tasks
}

#[tokio::test]
async fn test_entity_type_created_once_across_tasks() {
    let fixture = Fixture::new(CampaignMode::Entity).await;
    let tasks = two_place_tasks(&fixture).await;

    let corpus = shared(FakeCorpus::new());
    let report = coordinator(&fixture, &corpus)
        .publish(fixture.campaign.id, config())
        .await
        .unwrap();

    for (task, annotation) in &tasks {
        assert_eq!(report.outcome(task.id), Some(TaskOutcome::Published));
        assert!(fixture.is_published(annotation).await);
    }
    assert_eq!(corpus.calls_named("create_entity_type").len(), 1);

    // Both tasks reuse the type created for the first one
    let type_ids: Vec<String> = corpus
        .calls_named("create_transcription_entities")
        .into_iter()
        .flat_map(|call| match call {
            Call::CreateTranscriptionEntities { entities, .. } => {
                entities.into_iter().map(|e| e.type_id).collect::<Vec<_>>()
            }
            other => panic!("unexpected call: {:?}", other),
        })
        .collect();
    assert_eq!(type_ids.len(), 2);
    assert_eq!(type_ids[0], type_ids[1]);
}

#[tokio::test]
async fn test_failed_entity_type_not_retried_across_tasks() {
    let fixture = Fixture::new(CampaignMode::Entity).await;
    let tasks = two_place_tasks(&fixture).await;

    let corpus = shared(FakeCorpus::new());
    corpus.fail_entity_type("place");

    let report = coordinator(&fixture, &corpus)
        .publish(fixture.campaign.id, config())
        .await
        .unwrap();

    // The refused type is asked for once, then every task needing it fails
    assert_eq!(corpus.calls_named("create_entity_type").len(), 1);
    for (task, annotation) in &tasks {
        assert_eq!(report.outcome(task.id), Some(TaskOutcome::Failed));
        assert!(!fixture.is_published(annotation).await);
    }
}

#[tokio::test]
async fn test_entity_without_transcription_is_skipped() {
    let fixture = Fixture::new(CampaignMode::Entity).await;
    let line = fixture.element_type("Line", "text_line").await;
    let element = fixture.element(&line, None, "ext-line-1").await;
    let task = fixture.task(&element).await;
    let annotation = fixture
        .annotate(
            &task,
            AssignmentState::Annotated,
            json!({"entities": [{"entity_type": "person", "offset": 0, "length": 5}]}),
        )
        .await;

    let corpus = shared(FakeCorpus::new());
    let report = coordinator(&fixture, &corpus)
        .publish(fixture.campaign.id, config())
        .await
        .unwrap();

    assert_eq!(report.outcome(task.id), Some(TaskOutcome::Skipped));
    assert!(corpus.calls().is_empty());
    assert!(!fixture.is_published(&annotation).await);
}

#[tokio::test]
async fn test_regions_grouped_and_raw() {
    let fixture = Fixture::new(CampaignMode::Elements).await;
    let page = fixture.element_type("Page", "page").await;
    let zone = fixture.element_type("Zone", "text_zone").await;
    let element = fixture.element(&page, None, "ext-page-1").await;
    let task = fixture.task(&element).await;
    let region = json!({"elements": [{
        "element_type": zone.id.to_string(),
        "polygon": [[0, 0], [0, 10], [10, 10], [10, 0]],
    }]});
    fixture.annotate(&task, AssignmentState::Annotated, region.clone()).await;
    fixture.annotate(&task, AssignmentState::Annotated, region).await;

    let corpus = shared(FakeCorpus::new().with_element_types(&["page", "text_zone"]));
    let coordinator = coordinator(&fixture, &corpus);

    coordinator.publish(fixture.campaign.id, config()).await.unwrap();
    let calls = corpus.calls();
    let [Call::CreateElements { parent_id, elements }] = calls.as_slice() else {
        panic!("unexpected calls: {:?}", calls);
    };
    assert_eq!(parent_id, "ext-page-1");
    assert_eq!(elements.len(), 1);
    assert_eq!(elements[0].element_type, "text_zone");
    assert_eq!(elements[0].name, "1");
    assert!(close(elements[0].confidence, 1.0));

    corpus.clear();
    let mut raw = config();
    raw.use_raw_publication = true;
    raw.force_republication = true;
    coordinator.publish(fixture.campaign.id, raw).await.unwrap();

    let calls = corpus.calls();
    let [Call::CreateElements { elements, .. }] = calls.as_slice() else {
        panic!("unexpected calls: {:?}", calls);
    };
    assert_eq!(elements.len(), 2);
    assert!(elements.iter().all(|e| close(e.confidence, 1.0)));
    let names: Vec<&str> = elements.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["1", "2"]);
}

#[tokio::test]
async fn test_element_group_created_and_linked() {
    let mut fixture = Fixture::new(CampaignMode::ElementGroup).await;
    let page = fixture.element_type("Page", "page").await;
    let line = fixture.element_type("Line", "text_line").await;
    let group = fixture.element_type("Paragraph", "paragraph").await;
    fixture
        .configure(json!({"group_type": group.id.to_string()}))
        .await;

    let element = fixture.element(&page, None, "ext-page-1").await;
    let first = fixture.element(&line, Some(&element), "ext-line-1").await;
    let second = fixture.element(&line, Some(&element), "ext-line-2").await;
    let task = fixture.task(&element).await;
    let annotation = fixture
        .annotate(
            &task,
            AssignmentState::Annotated,
            json!({"groups": [{"elements": [first.id.to_string(), second.id.to_string()]}]}),
        )
        .await;

    let corpus = shared(
        FakeCorpus::new().with_element_types(&["page", "text_line", "paragraph"]),
    );
    let report = coordinator(&fixture, &corpus)
        .publish(fixture.campaign.id, config())
        .await
        .unwrap();
    assert_eq!(report.outcome(task.id), Some(TaskOutcome::Published));
    assert!(fixture.is_published(&annotation).await);

    let created = corpus.calls_named("create_element");
    let [Call::CreateElement(request)] = created.as_slice() else {
        panic!("unexpected calls: {:?}", created);
    };
    assert_eq!(request.name, "1");
    assert_eq!(request.element_type, "paragraph");
    assert_eq!(request.parent, "ext-page-1");
    assert_eq!(request.corpus, CORPUS);
    assert_eq!(request.worker_run_id, WORKER_RUN);

    let linked: Vec<String> = corpus
        .calls_named("create_element_parent")
        .into_iter()
        .filter_map(|call| match call {
            Call::CreateElementParent { child_id, .. } => Some(child_id),
            _ => None,
        })
        .collect();
    assert_eq!(linked, vec!["ext-line-1", "ext-line-2"]);
}

#[tokio::test]
async fn test_element_group_link_failure() {
    let mut fixture = Fixture::new(CampaignMode::ElementGroup).await;
    let page = fixture.element_type("Page", "page").await;
    let line = fixture.element_type("Line", "text_line").await;
    let group = fixture.element_type("Paragraph", "paragraph").await;
    fixture
        .configure(json!({"group_type": group.id.to_string()}))
        .await;

    let element = fixture.element(&page, None, "ext-page-1").await;
    let first = fixture.element(&line, Some(&element), "ext-line-1").await;
    let second = fixture.element(&line, Some(&element), "ext-line-2").await;
    let task = fixture.task(&element).await;
    let annotation = fixture
        .annotate(
            &task,
            AssignmentState::Annotated,
            json!({"groups": [{"elements": [first.id.to_string(), second.id.to_string()]}]}),
        )
        .await;

    let corpus = shared(
        FakeCorpus::new().with_element_types(&["page", "text_line", "paragraph"]),
    );
    corpus.fail_link("ext-line-2");

    let report = coordinator(&fixture, &corpus)
        .publish(fixture.campaign.id, config())
        .await
        .unwrap();
    assert_eq!(report.outcome(task.id), Some(TaskOutcome::Failed));
    assert!(!fixture.is_published(&annotation).await);
    // The group element itself stays on the corpus
    assert_eq!(corpus.calls_named("create_element").len(), 1);
}

#[tokio::test]
async fn test_element_group_unknown_group_type_is_fatal() {
    let mut fixture = Fixture::new(CampaignMode::ElementGroup).await;
    let page = fixture.element_type("Page", "page").await;
    fixture
        .configure(json!({"group_type": uuid::Uuid::new_v4().to_string()}))
        .await;
    let element = fixture.element(&page, None, "ext-page-1").await;
    let task = fixture.task(&element).await;
    fixture
        .annotate(&task, AssignmentState::Annotated, json!({"groups": []}))
        .await;

    let corpus = shared(FakeCorpus::new().with_element_types(&["page"]));
    let report = coordinator(&fixture, &corpus)
        .publish(fixture.campaign.id, config())
        .await
        .unwrap();

    assert!(report.error.unwrap().contains("group type"));
    assert!(report.outcomes.is_empty());
    assert!(corpus.calls().is_empty());
}

#[tokio::test]
async fn test_classifications_published_once_per_class() {
    let fixture = Fixture::new(CampaignMode::Classification).await;
    let page = fixture.element_type("Page", "page").await;
    let letter = fixture.class("Letter", "ml-letter").await;
    let map = fixture.class("Map", "ml-map").await;
    let element = fixture.element(&page, None, "ext-page-1").await;
    let task = fixture.task(&element).await;
    for class in [&letter, &letter, &map] {
        fixture
            .annotate(
                &task,
                AssignmentState::Annotated,
                json!({"classification": class.id.to_string()}),
            )
            .await;
    }

    let corpus = shared(FakeCorpus::new().with_ml_classes(&["ml-letter", "ml-map"]));
    coordinator(&fixture, &corpus)
        .publish(fixture.campaign.id, config())
        .await
        .unwrap();

    let calls = corpus.calls();
    let [Call::CreateClassifications {
        parent_id,
        classifications,
    }] = calls.as_slice()
    else {
        panic!("unexpected calls: {:?}", calls);
    };
    assert_eq!(parent_id, "ext-page-1");
    assert_eq!(classifications.len(), 2);
    let letter = classifications.iter().find(|c| c.ml_class == "ml-letter").unwrap();
    assert!(close(letter.confidence, 2.0 / 3.0));
}

#[tokio::test]
async fn test_raw_classification_refused_before_any_process() {
    let fixture = Fixture::new(CampaignMode::Classification).await;
    let corpus = shared(FakeCorpus::new().with_ml_classes(&["ml-letter"]));

    let mut raw = config();
    raw.use_raw_publication = true;
    let result = coordinator(&fixture, &corpus)
        .start(fixture.campaign.id, raw)
        .await;

    assert!(matches!(result, Err(PublishError::Configuration(_))));
    assert_eq!(db::locks::lock_holder(&fixture.db, fixture.campaign.id).await.unwrap(), None);
}

#[tokio::test]
async fn test_no_matching_class_is_fatal() {
    let fixture = Fixture::new(CampaignMode::Classification).await;
    let page = fixture.element_type("Page", "page").await;
    let letter = fixture.class("Letter", "ml-letter").await;
    let element = fixture.element(&page, None, "ext-page-1").await;
    let task = fixture.task(&element).await;
    let annotation = fixture
        .annotate(
            &task,
            AssignmentState::Annotated,
            json!({"classification": letter.id.to_string()}),
        )
        .await;

    let corpus = shared(FakeCorpus::new().with_ml_classes(&["ml-other"]));
    let report = coordinator(&fixture, &corpus)
        .publish(fixture.campaign.id, config())
        .await
        .unwrap();

    assert!(report.error.is_some());
    assert!(corpus.calls().is_empty());
    assert!(!fixture.is_published(&annotation).await);

    let process = db::processes::load_process(&fixture.db, report.process_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(process.state, ProcessState::Error);
    assert!(process.ended.is_some());
    assert_eq!(db::locks::lock_holder(&fixture.db, fixture.campaign.id).await.unwrap(), None);
}

#[tokio::test]
async fn test_no_matching_element_type_is_fatal() {
    let fixture = Fixture::new(CampaignMode::Elements).await;
    fixture.element_type("Page", "page").await;

    let corpus = shared(FakeCorpus::new().with_element_types(&["folio"]));
    let report = coordinator(&fixture, &corpus)
        .publish(fixture.campaign.id, config())
        .await
        .unwrap();

    assert!(report.error.unwrap().contains("No available matching type"));
}

#[tokio::test]
async fn test_concurrent_run_is_refused() {
    let fixture = Fixture::new(CampaignMode::Transcription).await;
    let corpus = shared(FakeCorpus::new());
    let coordinator = coordinator(&fixture, &corpus);

    let running = coordinator.start(fixture.campaign.id, config()).await.unwrap();
    assert_eq!(
        db::locks::lock_holder(&fixture.db, fixture.campaign.id).await.unwrap(),
        Some(running.process_id)
    );

    let refused = coordinator.start(fixture.campaign.id, config()).await;
    assert!(matches!(refused, Err(PublishError::RunInProgress(id)) if id == fixture.campaign.id));

    coordinator.execute(running).await.unwrap();
    assert_eq!(db::locks::lock_holder(&fixture.db, fixture.campaign.id).await.unwrap(), None);
    assert!(coordinator.publish(fixture.campaign.id, config()).await.is_ok());
}

#[tokio::test]
async fn test_lock_released_when_run_cannot_start() {
    let fixture = Fixture::new(CampaignMode::Transcription).await;
    let corpus = shared(FakeCorpus::new());
    let coordinator = coordinator(&fixture, &corpus);

    let prepared = coordinator.start(fixture.campaign.id, config()).await.unwrap();
    let process_id = prepared.process_id;

    // The database refuses to move the process to running
    sqlx::query(
        r#"
        CREATE TRIGGER refuse_running BEFORE UPDATE OF state ON processes
        WHEN NEW.state = 'running'
        BEGIN SELECT RAISE(ABORT, 'database is locked'); END
        "#,
    )
    .execute(&fixture.db)
    .await
    .unwrap();

    let report = coordinator.execute(prepared).await.unwrap();
    assert!(report.error.is_some());
    assert_eq!(db::locks::lock_holder(&fixture.db, fixture.campaign.id).await.unwrap(), None);
    let process = db::processes::load_process(&fixture.db, process_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(process.state, ProcessState::Error);
    assert!(corpus.calls().is_empty());

    sqlx::query("DROP TRIGGER refuse_running")
        .execute(&fixture.db)
        .await
        .unwrap();
    let report = coordinator.publish(fixture.campaign.id, config()).await.unwrap();
    assert!(report.error.is_none());
}

#[tokio::test]
async fn test_lock_of_crashed_run_is_taken_over() {
    let fixture = Fixture::new(CampaignMode::Transcription).await;
    let corpus = shared(FakeCorpus::new());
    let coordinator = coordinator(&fixture, &corpus);

    // A run that died after taking the lock, its process marked as failed
    let crashed = coordinator.start(fixture.campaign.id, config()).await.unwrap();
    db::processes::mark_finished(&fixture.db, crashed.process_id, ProcessState::Error)
        .await
        .unwrap();
    drop(crashed);

    let report = coordinator.publish(fixture.campaign.id, config()).await.unwrap();
    assert!(report.error.is_none());
    assert_eq!(db::locks::lock_holder(&fixture.db, fixture.campaign.id).await.unwrap(), None);
}

#[tokio::test]
async fn test_unknown_campaign() {
    let fixture = Fixture::new(CampaignMode::Transcription).await;
    let corpus = shared(FakeCorpus::new());

    let result = coordinator(&fixture, &corpus)
        .publish(uuid::Uuid::new_v4(), config())
        .await;
    assert!(matches!(result, Err(PublishError::NotFound(_))));
}

#[tokio::test]
async fn test_process_records_the_run() {
    let fixture = Fixture::new(CampaignMode::Transcription).await;
    let line = fixture.element_type("Line", "text_line").await;
    let element = fixture.element(&line, None, "ext-line-1").await;
    let task = fixture.task(&element).await;
    fixture
        .annotate(&task, AssignmentState::Annotated, transcription(element.id, "Paris", false))
        .await;

    let corpus = shared(FakeCorpus::new());
    let report = coordinator(&fixture, &corpus)
        .publish(fixture.campaign.id, config())
        .await
        .unwrap();

    let process = db::processes::load_process(&fixture.db, report.process_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(process.state, ProcessState::Completed);
    assert_eq!(process.project_id, fixture.project_id);
    assert!(process.name.starts_with("Export of campaign"));
    assert!(process.started.is_some());
    assert!(process.ended.is_some());

    let logs = process.parsed_logs();
    assert!(logs
        .iter()
        .any(|entry| entry.content.contains("Successfully published 1 transcriptions")));
}

mod concatenation {
    use super::*;

    fn form(first: &str, last: &str) -> serde_json::Value {
        json!({"values": [
            {"entity_type": "first_name", "instruction": "First name", "value": first},
            {"entity_type": "last_name", "instruction": "Last name", "value": last},
        ]})
    }

    async fn page_with_lines(
        fixture: &Fixture,
    ) -> (
        quorum_pub::models::ExternalTypeMapping,
        quorum_pub::models::Task,
        quorum_pub::models::Task,
    ) {
        let page = fixture.element_type("Page", "page").await;
        let line = fixture.element_type("Line", "text_line").await;
        let parent = fixture.element(&page, None, "ext-page-1").await;
        let first = fixture.element(&line, Some(&parent), "ext-line-1").await;
        let second = fixture.element(&line, Some(&parent), "ext-line-2").await;
        let first_task = fixture.task(&first).await;
        let second_task = fixture.task(&second).await;
        (page, first_task, second_task)
    }

    fn corpus() -> Arc<FakeCorpus> {
        shared(FakeCorpus::new().with_entity_types(&[
            ("first_name", "type-first"),
            ("last_name", "type-last"),
        ]))
    }

    #[tokio::test]
    async fn test_children_joined_on_parent() {
        let fixture = Fixture::new(CampaignMode::EntityForm).await;
        let (page, first, second) = page_with_lines(&fixture).await;
        fixture
            .annotate(&first, AssignmentState::Annotated, form("Harry", "Potter"))
            .await;
        fixture
            .annotate(&second, AssignmentState::Validated, form("Ron", "Weasley"))
            .await;

        let corpus = corpus();
        let mut run_config = config();
        run_config.concatenation_parent_type = Some(page.id);
        let report = coordinator(&fixture, &corpus)
            .publish(fixture.campaign.id, run_config)
            .await
            .unwrap();

        assert_eq!(
            report.concatenation,
            Some(ConcatenationReport {
                published: 1,
                skipped: 0,
                failed: 0
            })
        );

        let on_parent: Vec<Call> = corpus
            .calls()
            .into_iter()
            .filter(|call| {
                matches!(call, Call::CreateTranscription { element_id, .. } if element_id == "ext-page-1")
            })
            .collect();
        let [Call::CreateTranscription { text, confidence, id, .. }] = on_parent.as_slice() else {
            panic!("unexpected calls: {:?}", on_parent);
        };
        assert_eq!(text, "Harry Potter\nRon Weasley");
        assert!(close(*confidence, 1.0));

        let entities = corpus
            .calls()
            .into_iter()
            .find_map(|call| match call {
                Call::CreateTranscriptionEntities {
                    transcription_id,
                    entities,
                } if &transcription_id == id => Some(entities),
                _ => None,
            })
            .unwrap();
        let offsets: Vec<usize> = entities.iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![0, 6, 13, 17]);
    }

    #[tokio::test]
    async fn test_child_without_valid_annotation_skips_parent() {
        let fixture = Fixture::new(CampaignMode::EntityForm).await;
        let (page, first, second) = page_with_lines(&fixture).await;
        fixture
            .annotate(&first, AssignmentState::Annotated, form("Harry", "Potter"))
            .await;
        fixture
            .annotate(&second, AssignmentState::Annotated, json!({"values": []}))
            .await;

        let corpus = corpus();
        let mut run_config = config();
        run_config.concatenation_parent_type = Some(page.id);
        let report = coordinator(&fixture, &corpus)
            .publish(fixture.campaign.id, run_config)
            .await
            .unwrap();

        assert_eq!(report.outcome(first.id), Some(TaskOutcome::Published));
        assert_eq!(report.outcome(second.id), Some(TaskOutcome::Failed));
        assert_eq!(
            report.concatenation,
            Some(ConcatenationReport {
                published: 0,
                skipped: 1,
                failed: 0
            })
        );
        assert!(!corpus.calls().iter().any(|call| {
            matches!(call, Call::CreateTranscription { element_id, .. } if element_id == "ext-page-1")
        }));
    }

    #[tokio::test]
    async fn test_unknown_parent_type_is_fatal() {
        let fixture = Fixture::new(CampaignMode::EntityForm).await;
        let corpus = corpus();

        let mut run_config = config();
        run_config.concatenation_parent_type = Some(uuid::Uuid::new_v4());
        let report = coordinator(&fixture, &corpus)
            .publish(fixture.campaign.id, run_config)
            .await
            .unwrap();

        assert!(report.error.unwrap().contains("concatenation parent type"));
    }
}
