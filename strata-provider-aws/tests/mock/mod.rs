//! Scripted in-memory CloudApi and ServiceApi for handler tests
//!
//! Each read is answered from a per-resource queue. The last entry of a queue
//! repeats forever, so a script like `[creating, creating, active]` settles on
//! `active`. Mutating calls pop scripted results and fall back to success.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use strata_core::config::ProviderConfig;
use strata_provider_aws::AwsProvider;
use strata_provider_aws::api::{
    ActivityStreamDescription, ActivityStreamRequest, ApiError, ApiResult, CloudApi, ListPage,
    PatchOperation, ResourceDescription, SearchPage, ServiceApi,
};

/// One recorded API call
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Get {
        type_name: String,
        identifier: String,
    },
    Create {
        type_name: String,
        desired_state: serde_json::Value,
    },
    Update {
        type_name: String,
        identifier: String,
        patch: Vec<PatchOperation>,
    },
    Delete {
        type_name: String,
        identifier: String,
    },
    List {
        type_name: String,
        filter: Option<serde_json::Value>,
        next_token: Option<String>,
    },
    StartActivityStream(ActivityStreamRequest),
    DescribeActivityStream {
        resource_arn: String,
    },
    StopActivityStream {
        resource_arn: String,
    },
    DeleteNeptuneCluster {
        identifier: String,
        final_snapshot: Option<String>,
    },
    GetQueueAttributes {
        queue_url: String,
    },
    SetQueueAttributes {
        queue_url: String,
        attributes: HashMap<String, String>,
    },
    Search {
        query: String,
        view_arn: Option<String>,
        next_token: Option<String>,
    },
}

type QueueAttributes = HashMap<String, String>;

#[derive(Default)]
struct Script {
    gets: HashMap<(String, String), VecDeque<ApiResult<Option<serde_json::Value>>>>,
    creates: VecDeque<ApiResult<String>>,
    updates: VecDeque<ApiResult<()>>,
    deletes: VecDeque<ApiResult<()>>,
    pages: HashMap<String, VecDeque<ListPage>>,
    streams: HashMap<String, VecDeque<ApiResult<Option<ActivityStreamDescription>>>>,
    queues: HashMap<String, VecDeque<ApiResult<Option<QueueAttributes>>>>,
    queue_writes: VecDeque<ApiResult<()>>,
    cluster_deletes: VecDeque<ApiResult<()>>,
    searches: VecDeque<ApiResult<SearchPage>>,
    calls: Vec<Call>,
}

/// Pop the head of a scripted queue, repeating its last entry
fn next_read<T: Clone>(queue: Option<&mut VecDeque<ApiResult<T>>>, default: T) -> ApiResult<T> {
    match queue {
        Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
        Some(queue) => queue.front().cloned().unwrap_or(Ok(default)),
        None => Ok(default),
    }
}

#[derive(Default)]
pub struct MockApi {
    script: Mutex<Script>,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the properties returned for `identifier`; `None` means not found
    pub fn on_get(&self, type_name: &str, identifier: &str, result: Option<serde_json::Value>) {
        self.on_get_result(type_name, identifier, Ok(result));
    }

    pub fn on_get_result(
        &self,
        type_name: &str,
        identifier: &str,
        result: ApiResult<Option<serde_json::Value>>,
    ) {
        self.script
            .lock()
            .unwrap()
            .gets
            .entry((type_name.to_string(), identifier.to_string()))
            .or_default()
            .push_back(result);
    }

    pub fn on_create(&self, result: ApiResult<String>) {
        self.script.lock().unwrap().creates.push_back(result);
    }

    pub fn on_update(&self, result: ApiResult<()>) {
        self.script.lock().unwrap().updates.push_back(result);
    }

    pub fn on_delete(&self, result: ApiResult<()>) {
        self.script.lock().unwrap().deletes.push_back(result);
    }

    pub fn on_list(&self, type_name: &str, page: ListPage) {
        self.script
            .lock()
            .unwrap()
            .pages
            .entry(type_name.to_string())
            .or_default()
            .push_back(page);
    }

    /// Queue the activity stream fields of a cluster; `None` means no cluster
    pub fn on_stream(&self, resource_arn: &str, result: Option<ActivityStreamDescription>) {
        self.script
            .lock()
            .unwrap()
            .streams
            .entry(resource_arn.to_string())
            .or_default()
            .push_back(Ok(result));
    }

    /// Queue the attributes of a queue; `None` means the queue does not exist
    pub fn on_queue(&self, queue_url: &str, attributes: Option<&[(&str, &str)]>) {
        let attributes = attributes.map(|attrs| {
            attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        });
        self.script
            .lock()
            .unwrap()
            .queues
            .entry(queue_url.to_string())
            .or_default()
            .push_back(Ok(attributes));
    }

    pub fn on_set_queue_attributes(&self, result: ApiResult<()>) {
        self.script.lock().unwrap().queue_writes.push_back(result);
    }

    pub fn on_delete_cluster(&self, result: ApiResult<()>) {
        self.script.lock().unwrap().cluster_deletes.push_back(result);
    }

    pub fn on_search(&self, page: SearchPage) {
        self.script.lock().unwrap().searches.push_back(Ok(page));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn creates(&self) -> Vec<(String, serde_json::Value)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Create {
                    type_name,
                    desired_state,
                } => Some((type_name, desired_state)),
                _ => None,
            })
            .collect()
    }

    pub fn updates(&self) -> Vec<Vec<PatchOperation>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Update { patch, .. } => Some(patch),
                _ => None,
            })
            .collect()
    }

    pub fn queue_writes(&self) -> Vec<QueueAttributes> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::SetQueueAttributes { attributes, .. } => Some(attributes),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| matches(c)).count()
    }
}

#[async_trait]
impl CloudApi for MockApi {
    async fn get_resource(
        &self,
        type_name: &str,
        identifier: &str,
    ) -> ApiResult<Option<ResourceDescription>> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Get {
            type_name: type_name.to_string(),
            identifier: identifier.to_string(),
        });
        let key = (type_name.to_string(), identifier.to_string());
        next_read(script.gets.get_mut(&key), None).map(|found| {
            found.map(|properties| ResourceDescription {
                identifier: identifier.to_string(),
                properties,
            })
        })
    }

    async fn create_resource(
        &self,
        type_name: &str,
        desired_state: serde_json::Value,
    ) -> ApiResult<String> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Create {
            type_name: type_name.to_string(),
            desired_state,
        });
        script
            .creates
            .pop_front()
            .unwrap_or_else(|| Ok("mock-id".to_string()))
    }

    async fn update_resource(
        &self,
        type_name: &str,
        identifier: &str,
        patch: Vec<PatchOperation>,
    ) -> ApiResult<()> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Update {
            type_name: type_name.to_string(),
            identifier: identifier.to_string(),
            patch,
        });
        script.updates.pop_front().unwrap_or(Ok(()))
    }

    async fn delete_resource(&self, type_name: &str, identifier: &str) -> ApiResult<()> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Delete {
            type_name: type_name.to_string(),
            identifier: identifier.to_string(),
        });
        script.deletes.pop_front().unwrap_or(Ok(()))
    }

    async fn list_resources(
        &self,
        type_name: &str,
        filter: Option<serde_json::Value>,
        next_token: Option<String>,
    ) -> ApiResult<ListPage> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::List {
            type_name: type_name.to_string(),
            filter,
            next_token,
        });
        match script.pages.get_mut(type_name) {
            Some(pages) => Ok(pages.pop_front().unwrap_or_default()),
            None => Err(ApiError::InvalidResponse(format!(
                "no pages scripted for {}",
                type_name
            ))),
        }
    }
}

#[async_trait]
impl ServiceApi for MockApi {
    async fn start_activity_stream(&self, request: ActivityStreamRequest) -> ApiResult<()> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::StartActivityStream(request));
        Ok(())
    }

    async fn describe_activity_stream(
        &self,
        resource_arn: &str,
    ) -> ApiResult<Option<ActivityStreamDescription>> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::DescribeActivityStream {
            resource_arn: resource_arn.to_string(),
        });
        next_read(script.streams.get_mut(resource_arn), None)
    }

    async fn stop_activity_stream(&self, resource_arn: &str) -> ApiResult<()> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::StopActivityStream {
            resource_arn: resource_arn.to_string(),
        });
        Ok(())
    }

    async fn delete_neptune_cluster(
        &self,
        identifier: &str,
        final_snapshot: Option<&str>,
    ) -> ApiResult<()> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::DeleteNeptuneCluster {
            identifier: identifier.to_string(),
            final_snapshot: final_snapshot.map(str::to_string),
        });
        script.cluster_deletes.pop_front().unwrap_or(Ok(()))
    }

    async fn get_queue_attributes(&self, queue_url: &str) -> ApiResult<Option<QueueAttributes>> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::GetQueueAttributes {
            queue_url: queue_url.to_string(),
        });
        next_read(script.queues.get_mut(queue_url), None)
    }

    async fn set_queue_attributes(
        &self,
        queue_url: &str,
        attributes: QueueAttributes,
    ) -> ApiResult<()> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::SetQueueAttributes {
            queue_url: queue_url.to_string(),
            attributes,
        });
        script.queue_writes.pop_front().unwrap_or(Ok(()))
    }

    async fn search(
        &self,
        query: &str,
        view_arn: Option<&str>,
        next_token: Option<String>,
    ) -> ApiResult<SearchPage> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Search {
            query: query.to_string(),
            view_arn: view_arn.map(str::to_string),
            next_token,
        });
        script
            .searches
            .pop_front()
            .unwrap_or_else(|| Ok(SearchPage::default()))
    }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn provider(api: &Arc<MockApi>) -> AwsProvider {
    init_logger();
    AwsProvider::with_api(api.clone(), api.clone(), ProviderConfig::new("us-west-2")).unwrap()
}

pub fn not_found(code: &str) -> ApiError {
    ApiError::service(code, "resource does not exist")
}
