mod mock;

use std::collections::HashMap;

use mock::{Call, MockApi, provider};
use serde_json::json;
use strata_core::provider::ErrorKind;
use strata_core::resource::{Resource, State, Value};
use strata_provider_aws::api::{ApiError, PatchOp};
use strata_provider_aws::flex::to_properties;
use strata_provider_aws::resources::knowledge_base;

const TYPE_NAME: &str = "AWS::Bedrock::KnowledgeBase";

fn block(entries: Vec<(&str, Value)>) -> Value {
    Value::List(vec![Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    )])
}

fn knowledge_base() -> Resource {
    Resource::new(knowledge_base::RESOURCE_TYPE, "docs")
        .with_attribute("name", Value::string("docs"))
        .with_attribute(
            "role_arn",
            Value::string("arn:aws:iam::123456789012:role/kb"),
        )
        .with_attribute(
            "knowledge_base_configuration",
            block(vec![
                ("type", Value::string("VECTOR")),
                (
                    "vector_knowledge_base_configuration",
                    block(vec![(
                        "embedding_model_arn",
                        Value::string(
                            "arn:aws:bedrock:us-west-2::foundation-model/amazon.titan-embed-text-v2:0",
                        ),
                    )]),
                ),
            ]),
        )
        .with_attribute(
            "storage_configuration",
            block(vec![
                ("type", Value::string("RDS")),
                (
                    "rds_configuration",
                    block(vec![
                        (
                            "resource_arn",
                            Value::string("arn:aws:rds:us-west-2:123456789012:cluster:kb"),
                        ),
                        (
                            "credentials_secret_arn",
                            Value::string("arn:aws:secretsmanager:us-west-2:123456789012:secret:kb"),
                        ),
                        ("database_name", Value::string("postgres")),
                        ("table_name", Value::string("bedrock_integration.bedrock_kb")),
                        (
                            "field_mapping",
                            block(vec![
                                ("primary_key_field", Value::string("id")),
                                ("vector_field", Value::string("embedding")),
                                ("text_field", Value::string("chunks")),
                                ("metadata_field", Value::string("metadata")),
                            ]),
                        ),
                    ]),
                ),
            ]),
        )
}

/// Remote view of the resource in the given status
fn remote(resource: &Resource, status: &str, failure_reasons: &[&str]) -> serde_json::Value {
    let kb = knowledge_base::expand(&resource.attributes).unwrap();
    let mut properties = to_properties(&kb).unwrap();
    properties["KnowledgeBaseId"] = json!("KB12345678");
    properties["KnowledgeBaseArn"] =
        json!("arn:aws:bedrock:us-west-2:123456789012:knowledge-base/KB12345678");
    properties["Status"] = json!(status);
    properties["FailureReasons"] = json!(failure_reasons);
    properties
}

fn existing_state(resource: &Resource) -> State {
    let kb: knowledge_base::KnowledgeBase =
        serde_json::from_value(remote(resource, "ACTIVE", &[])).unwrap();
    State::existing(resource.id.clone(), knowledge_base::flatten(&kb)).with_identifier("KB12345678")
}

#[tokio::test(start_paused = true)]
async fn create_waits_until_active() {
    let api = MockApi::new();
    let resource = knowledge_base();
    api.on_create(Ok("KB12345678".to_string()));
    api.on_get(TYPE_NAME, "KB12345678", Some(remote(&resource, "CREATING", &[])));
    api.on_get(TYPE_NAME, "KB12345678", Some(remote(&resource, "CREATING", &[])));
    api.on_get(TYPE_NAME, "KB12345678", Some(remote(&resource, "ACTIVE", &[])));

    let state = provider(&api).create_resource(&resource).await.unwrap();

    assert!(state.exists);
    assert_eq!(state.identifier.as_deref(), Some("KB12345678"));
    assert_eq!(state.attributes["id"], Value::string("KB12345678"));
    assert_eq!(
        state.attributes["storage_configuration"],
        resource.attributes["storage_configuration"]
    );
    assert_eq!(
        api.count(|c| matches!(c, Call::Get { .. })),
        3,
        "{:?}",
        api.calls()
    );
}

#[tokio::test(start_paused = true)]
async fn create_rides_out_role_propagation() {
    let api = MockApi::new();
    let resource = knowledge_base();
    api.on_create(Err(ApiError::service(
        "ValidationException",
        "Knowledge base role arn:aws:iam::123456789012:role/kb cannot assume role",
    )));
    api.on_create(Ok("KB12345678".to_string()));
    api.on_get(TYPE_NAME, "KB12345678", Some(remote(&resource, "ACTIVE", &[])));

    let state = provider(&api).create_resource(&resource).await.unwrap();

    assert_eq!(state.identifier.as_deref(), Some("KB12345678"));
    assert_eq!(api.creates().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn create_reports_failure_reasons() {
    let api = MockApi::new();
    let resource = knowledge_base();
    api.on_create(Ok("KB12345678".to_string()));
    api.on_get(TYPE_NAME, "KB12345678", Some(remote(&resource, "CREATING", &[])));
    api.on_get(
        TYPE_NAME,
        "KB12345678",
        Some(remote(
            &resource,
            "FAILED",
            &["table not found", "missing vector index"],
        )),
    );

    let err = provider(&api).create_resource(&resource).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::UnexpectedState);
    assert!(
        err.message
            .contains("unexpected state 'FAILED', wanted target 'ACTIVE'"),
        "{}",
        err
    );
    assert!(
        err.message.contains("table not found; missing vector index"),
        "{}",
        err
    );
    assert_eq!(err.identifier.as_deref(), Some("KB12345678"));
    assert_eq!(err.resource_id, Some(resource.id.clone()));
}

#[tokio::test(start_paused = true)]
async fn create_rejects_invalid_configuration_before_calling_aws() {
    let api = MockApi::new();
    let resource = knowledge_base().with_attribute("description", Value::string(""));

    let err = provider(&api).create_resource(&resource).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(api.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn description_change_updates_in_place() {
    let api = MockApi::new();
    let resource = knowledge_base();
    let from = existing_state(&resource);
    let to = resource
        .clone()
        .with_attribute("description", Value::string("product docs"));
    let mut updated = remote(&to, "UPDATING", &[]);
    api.on_get(TYPE_NAME, "KB12345678", Some(updated.clone()));
    updated["Status"] = json!("ACTIVE");
    api.on_get(TYPE_NAME, "KB12345678", Some(updated));

    let state = provider(&api).update_resource(&from, &to).await.unwrap();

    assert_eq!(state.attributes["description"], Value::string("product docs"));
    let updates = api.updates();
    assert_eq!(updates.len(), 1);
    let description = updates[0]
        .iter()
        .find(|op| op.path == "/Description")
        .unwrap();
    assert_eq!(description.op, PatchOp::Replace);
    assert_eq!(description.value, Some(json!("product docs")));
}

#[tokio::test(start_paused = true)]
async fn tag_change_patches_only_tags() {
    let api = MockApi::new();
    let resource = knowledge_base();
    let from = existing_state(&resource);
    let to = resource.clone().with_attribute(
        "tags",
        Value::Map(HashMap::from([(
            "team".to_string(),
            Value::string("search"),
        )])),
    );
    api.on_get(TYPE_NAME, "KB12345678", Some(remote(&to, "ACTIVE", &[])));

    provider(&api).update_resource(&from, &to).await.unwrap();

    let updates = api.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].len(), 1);
    assert_eq!(updates[0][0].path, "/Tags");
    assert_eq!(updates[0][0].value, Some(json!({"team": "search"})));
}

#[tokio::test(start_paused = true)]
async fn description_and_tag_change_patches_both() {
    let api = MockApi::new();
    let resource = knowledge_base();
    let from = existing_state(&resource);
    let to = resource
        .clone()
        .with_attribute("description", Value::string("product docs"))
        .with_attribute(
            "tags",
            Value::Map(HashMap::from([(
                "team".to_string(),
                Value::string("search"),
            )])),
        );
    api.on_get(TYPE_NAME, "KB12345678", Some(remote(&to, "ACTIVE", &[])));

    provider(&api).update_resource(&from, &to).await.unwrap();

    let paths: Vec<String> = api
        .updates()
        .into_iter()
        .flatten()
        .map(|op| op.path)
        .collect();
    assert!(paths.contains(&"/Tags".to_string()), "{:?}", paths);
    assert!(paths.contains(&"/Description".to_string()), "{:?}", paths);
}

#[tokio::test(start_paused = true)]
async fn delete_waits_until_gone() {
    let api = MockApi::new();
    let resource = knowledge_base();
    api.on_get(TYPE_NAME, "KB12345678", Some(remote(&resource, "DELETING", &[])));
    api.on_get(TYPE_NAME, "KB12345678", None);

    provider(&api)
        .delete_resource(&existing_state(&resource))
        .await
        .unwrap();

    assert_eq!(
        api.count(|c| matches!(c, Call::Delete { .. })),
        1
    );
    assert_eq!(api.count(|c| matches!(c, Call::Get { .. })), 2);
}

#[tokio::test(start_paused = true)]
async fn delete_of_missing_knowledge_base_succeeds() {
    let api = MockApi::new();
    let resource = knowledge_base();
    api.on_delete(Err(mock::not_found("ResourceNotFoundException")));

    provider(&api)
        .delete_resource(&existing_state(&resource))
        .await
        .unwrap();

    assert_eq!(api.count(|c| matches!(c, Call::Get { .. })), 0);
}

#[tokio::test(start_paused = true)]
async fn read_of_missing_knowledge_base_clears_state() {
    let api = MockApi::new();
    let resource = knowledge_base();

    let state = provider(&api)
        .read_resource(&resource.id, Some("KB12345678"))
        .await
        .unwrap();

    assert!(!state.exists);
}
