//! Shared test doubles for the integration tests: a scripted definition
//! source with fetch accounting, a capturing publisher, and builders for
//! tasks and structural documents.

// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use exttask_relay::broker::{BrokerResult, PayloadPublisher};
use exttask_relay::engine::{
    DefinitionSource, EngineError, EngineResult, ExternalTask, FetchAndLockRequest, TaskSource,
};
use exttask_relay::messages::EnrichedPayload;

/// Definition source that serves canned XML and counts fetches per key.
pub struct ScriptedDefinitions {
    documents: Mutex<HashMap<String, String>>,
    fetches: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
    fail: bool,
}

impl ScriptedDefinitions {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            fetches: Mutex::new(HashMap::new()),
            delay: None,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Slow variant, to widen the race window in single-flight tests.
    pub fn with_delay(self, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..self
        }
    }

    pub fn insert(&self, definition_id: &str, xml: impl Into<String>) {
        self.documents
            .lock()
            .insert(definition_id.to_string(), xml.into());
    }

    pub fn fetch_count(&self, definition_id: &str) -> usize {
        self.fetches
            .lock()
            .get(definition_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.lock().values().sum()
    }
}

#[async_trait]
impl DefinitionSource for ScriptedDefinitions {
    async fn fetch_definition_xml(&self, process_definition_id: &str) -> EngineResult<String> {
        *self
            .fetches
            .lock()
            .entry(process_definition_id.to_string())
            .or_insert(0) += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(EngineError::Transport("definition source down".into()));
        }

        self.documents
            .lock()
            .get(process_definition_id)
            .cloned()
            .ok_or_else(|| EngineError::Status {
                status: 404,
                body: format!("process definition {process_definition_id} not found"),
            })
    }
}

/// Publisher that records everything it is handed.
#[derive(Default)]
pub struct CapturingPublisher {
    pub published: Mutex<Vec<(String, EnrichedPayload)>>,
}

#[async_trait]
impl PayloadPublisher for CapturingPublisher {
    async fn publish(&self, topic: &str, payload: &EnrichedPayload) -> BrokerResult<()> {
        self.published
            .lock()
            .push((topic.to_string(), payload.clone()));
        Ok(())
    }
}

/// Task source serving a fixed sequence of batches, then idling.
pub struct BatchSource {
    batches: Mutex<Vec<Vec<ExternalTask>>>,
}

impl BatchSource {
    pub fn new(batches: Vec<Vec<ExternalTask>>) -> Self {
        Self {
            batches: Mutex::new(batches),
        }
    }
}

#[async_trait]
impl TaskSource for BatchSource {
    async fn fetch_and_lock(
        &self,
        _request: &FetchAndLockRequest,
    ) -> EngineResult<Vec<ExternalTask>> {
        let next = {
            let mut batches = self.batches.lock();
            if batches.is_empty() {
                None
            } else {
                Some(batches.remove(0))
            }
        };
        match next {
            Some(batch) => Ok(batch),
            None => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(vec![])
            }
        }
    }
}

pub fn task(id: &str, topic: &str, definition: &str, activity: &str) -> ExternalTask {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "topicName": topic,
        "processInstanceId": format!("pi-{id}"),
        "processDefinitionId": definition,
        "activityId": activity,
        "businessKey": "ORDER-42",
        "variables": {}
    }))
    .unwrap()
}

pub fn tenant_task(id: &str, topic: &str, tenant: &str) -> ExternalTask {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "topicName": topic,
        "tenantId": tenant,
        "variables": {}
    }))
    .unwrap()
}

/// Minimal structural document with one external service task carrying one
/// extension property.
pub fn bpmn_with_property(activity_id: &str, name: &str, value: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<bpmn:definitions xmlns:bpmn="http://www.omg.org/spec/BPMN/20100524/MODEL"
                  xmlns:camunda="http://camunda.org/schema/1.0/bpmn">
  <bpmn:process id="proc" isExecutable="true">
    <bpmn:serviceTask id="{activity_id}" name="Step" camunda:type="external" camunda:topic="create_task">
      <bpmn:extensionElements>
        <camunda:properties>
          <camunda:property name="{name}" value="{value}" />
        </camunda:properties>
      </bpmn:extensionElements>
    </bpmn:serviceTask>
  </bpmn:process>
</bpmn:definitions>"#
    )
}

/// Keep `Arc<ScriptedDefinitions>` ergonomics out of individual tests.
pub fn definitions_with(definition_id: &str, xml: String) -> Arc<ScriptedDefinitions> {
    let definitions = ScriptedDefinitions::new();
    definitions.insert(definition_id, xml);
    Arc::new(definitions)
}
