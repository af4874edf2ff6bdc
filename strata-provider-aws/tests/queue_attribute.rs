mod mock;

use mock::{Call, MockApi, provider};
use strata_core::provider::ErrorKind;
use strata_core::resource::{Resource, State, Value};
use strata_provider_aws::api::ApiError;
use strata_provider_aws::resources::queue_attribute::QueueAttribute;

const QUEUE_URL: &str = "https://sqs.us-east-1.amazonaws.com/123456789012/jobs";

const POLICY: &str = r#"{
  "Version": "2012-10-17",
  "Statement": [
    {"Effect": "Allow", "Principal": "*", "Action": ["sqs:SendMessage"], "Resource": "arn:aws:sqs:us-east-1:123456789012:jobs"}
  ]
}"#;

/// The same policy as SQS reports it back: reordered keys, unwrapped arrays
const REMOTE_POLICY: &str = r#"{"Statement":{"Action":"sqs:SendMessage","Effect":"Allow","Principal":"*","Resource":"arn:aws:sqs:us-east-1:123456789012:jobs"},"Version":"2012-10-17"}"#;

fn queue_policy(policy: &str) -> Resource {
    Resource::new(QueueAttribute::Policy.resource_type(), "jobs")
        .with_attribute("queue_url", Value::string(QUEUE_URL))
        .with_attribute("policy", Value::string(policy))
}

fn policy_state(policy: &str) -> State {
    let resource = queue_policy(policy);
    State::existing(resource.id, resource.attributes).with_identifier(QUEUE_URL)
}

fn reads(api: &MockApi) -> usize {
    api.count(|c| matches!(c, Call::GetQueueAttributes { .. }))
}

#[tokio::test(start_paused = true)]
async fn create_waits_for_policy_propagation() {
    let api = MockApi::new();
    api.on_queue(QUEUE_URL, Some(&[("VisibilityTimeout", "30")]));
    api.on_queue(
        QUEUE_URL,
        Some(&[("VisibilityTimeout", "30"), ("Policy", REMOTE_POLICY)]),
    );

    let state = provider(&api)
        .create_resource(&queue_policy(POLICY))
        .await
        .unwrap();

    // The configured text is kept, not the remote rendering
    assert_eq!(state.attributes["policy"], Value::string(POLICY));
    assert_eq!(state.identifier.as_deref(), Some(QUEUE_URL));

    let writes = api.queue_writes();
    assert_eq!(writes.len(), 1);
    let sent: serde_json::Value = serde_json::from_str(&writes[0]["Policy"]).unwrap();
    assert_eq!(sent["Version"], serde_json::json!("2012-10-17"));
    // One miss, then six consecutive matching reads
    assert_eq!(reads(&api), 7);
}

#[tokio::test(start_paused = true)]
async fn create_retries_rejected_principal() {
    let api = MockApi::new();
    api.on_set_queue_attributes(Err(ApiError::service(
        "InvalidAttributeValue",
        "Invalid value for the parameter Policy.",
    )));
    api.on_queue(QUEUE_URL, Some(&[("Policy", REMOTE_POLICY)]));

    provider(&api)
        .create_resource(&queue_policy(POLICY))
        .await
        .unwrap();

    assert_eq!(api.queue_writes().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn create_rejects_malformed_document() {
    let api = MockApi::new();

    let err = provider(&api)
        .create_resource(&queue_policy("{\"Version\": "))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(api.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn equivalent_policy_update_is_a_no_op() {
    let api = MockApi::new();
    let from = policy_state(POLICY);

    let state = provider(&api)
        .update_resource(&from, &queue_policy(REMOTE_POLICY))
        .await
        .unwrap();

    assert_eq!(state.attributes["policy"], Value::string(REMOTE_POLICY));
    assert!(api.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn redrive_policy_is_set_and_read_back() {
    let api = MockApi::new();
    let redrive = r#"{"deadLetterTargetArn":"arn:aws:sqs:us-east-1:123456789012:jobs-dlq","maxReceiveCount":4}"#;
    api.on_queue(
        QUEUE_URL,
        Some(&[(
            "RedrivePolicy",
            r#"{"deadLetterTargetArn": "arn:aws:sqs:us-east-1:123456789012:jobs-dlq", "maxReceiveCount": 4}"#,
        )]),
    );
    let resource = Resource::new(QueueAttribute::RedrivePolicy.resource_type(), "jobs")
        .with_attribute("queue_url", Value::string(QUEUE_URL))
        .with_attribute("redrive_policy", Value::string(redrive));
    let sqs = provider(&api);

    sqs.create_resource(&resource).await.unwrap();
    let state = sqs.read_resource(&resource.id, Some(QUEUE_URL)).await.unwrap();

    assert!(state.exists);
    assert_eq!(state.attributes["redrive_policy"], Value::string(redrive));
    assert_eq!(api.queue_writes()[0]["RedrivePolicy"], redrive);
}

#[tokio::test(start_paused = true)]
async fn read_of_unset_attribute_clears_state() {
    let api = MockApi::new();
    api.on_queue(QUEUE_URL, Some(&[("Policy", "")]));

    let state = provider(&api)
        .read_resource(&queue_policy(POLICY).id, Some(QUEUE_URL))
        .await
        .unwrap();

    assert!(!state.exists);
}

#[tokio::test(start_paused = true)]
async fn read_of_missing_queue_clears_state() {
    let api = MockApi::new();

    let state = provider(&api)
        .read_resource(&queue_policy(POLICY).id, Some(QUEUE_URL))
        .await
        .unwrap();

    assert!(!state.exists);
    // Newly created queues can take a moment to appear
    assert!(reads(&api) > 1);
}

#[tokio::test(start_paused = true)]
async fn delete_clears_attribute_and_waits() {
    let api = MockApi::new();
    api.on_queue(QUEUE_URL, Some(&[("Policy", REMOTE_POLICY)]));
    api.on_queue(QUEUE_URL, Some(&[("VisibilityTimeout", "30")]));

    provider(&api)
        .delete_resource(&policy_state(POLICY))
        .await
        .unwrap();

    let writes = api.queue_writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0]["Policy"], "");
    assert_eq!(reads(&api), 7);
}

#[tokio::test(start_paused = true)]
async fn delete_tolerates_missing_queue() {
    let api = MockApi::new();
    api.on_set_queue_attributes(Err(mock::not_found(
        "AWS.SimpleQueueService.NonExistentQueue",
    )));

    provider(&api)
        .delete_resource(&policy_state(POLICY))
        .await
        .unwrap();

    assert_eq!(reads(&api), 0);
}
