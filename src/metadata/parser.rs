//! # Structural Document Parser
//!
//! Pull-parses a BPMN 2.0 document and extracts, for every task-like
//! activity: extension properties, field injections, input/output parameter
//! expressions, and a small activity descriptor. One malformed activity
//! never aborts extraction for the rest of the document.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{MetadataError, MetadataResult};

/// Extracted metadata for one activity, embedded verbatim into the
/// dispatched payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityMetadata {
    pub extension_properties: HashMap<String, String>,
    pub field_injections: HashMap<String, String>,
    pub input_parameters: HashMap<String, String>,
    pub output_parameters: HashMap<String, String>,
    pub activity_info: ActivityInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// BPMN element kind, e.g. "serviceTask"
    pub element: String,
    /// Declared external-task topic, when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl ActivityMetadata {
    pub fn is_empty(&self) -> bool {
        self.extension_properties.is_empty()
            && self.field_injections.is_empty()
            && self.input_parameters.is_empty()
            && self.output_parameters.is_empty()
            && self.activity_info.id.is_empty()
    }
}

/// BPMN elements treated as activities worth extracting.
const ACTIVITY_ELEMENTS: &[&[u8]] = &[
    b"serviceTask",
    b"sendTask",
    b"receiveTask",
    b"userTask",
    b"scriptTask",
    b"businessRuleTask",
    b"callActivity",
];

#[derive(Debug, Clone, Copy, PartialEq)]
enum ParamKind {
    Input,
    Output,
}

/// Parse state for the activity currently being walked.
struct ActivityBuilder {
    metadata: ActivityMetadata,
    element: Vec<u8>,
    in_extension_elements: bool,
    in_properties: bool,
    in_input_output: bool,
    current_field: Option<(String, String)>,
    current_param: Option<(ParamKind, String, String)>,
}

impl ActivityBuilder {
    fn new(info: ActivityInfo, element: Vec<u8>) -> Self {
        Self {
            metadata: ActivityMetadata {
                activity_info: info,
                ..Default::default()
            },
            element,
            in_extension_elements: false,
            in_properties: false,
            in_input_output: false,
            current_field: None,
            current_param: None,
        }
    }

    fn finish(mut self) -> (String, ActivityMetadata) {
        // Unterminated field/param bodies still count with what they had
        if let Some((name, value)) = self.current_field.take() {
            self.metadata.field_injections.insert(name, value);
        }
        if let Some((kind, name, value)) = self.current_param.take() {
            self.insert_param(kind, name, value);
        }
        (self.metadata.activity_info.id.clone(), self.metadata)
    }

    fn insert_param(&mut self, kind: ParamKind, name: String, value: String) {
        match kind {
            ParamKind::Input => self.metadata.input_parameters.insert(name, value),
            ParamKind::Output => self.metadata.output_parameters.insert(name, value),
        };
    }
}

/// Parse the whole document, returning metadata keyed by activity id.
///
/// A document-level XML error is returned as [`MetadataError::Parse`];
/// malformed attributes inside one activity degrade that activity only.
pub fn parse_definition(xml: &str) -> MetadataResult<HashMap<String, ActivityMetadata>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut activities: HashMap<String, ActivityMetadata> = HashMap::new();
    let mut current: Option<ActivityBuilder> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let local = e.local_name().as_ref().to_vec();
                if current.is_none() {
                    if let Some(builder) = open_activity(&e, &local) {
                        current = Some(builder);
                    }
                } else if let Some(builder) = current.as_mut() {
                    handle_nested_start(builder, &e, &local);
                }
            }
            Ok(Event::Empty(e)) => {
                let local = e.local_name().as_ref().to_vec();
                if current.is_none() {
                    // Activity with no body still gets a descriptor entry
                    if let Some(builder) = open_activity(&e, &local) {
                        let (id, metadata) = builder.finish();
                        if !id.is_empty() {
                            activities.insert(id, metadata);
                        }
                    }
                } else if let Some(builder) = current.as_mut() {
                    handle_nested_empty(builder, &e, &local);
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(builder) = current.as_mut() {
                    let text = match t.unescape() {
                        Ok(text) => text.into_owned(),
                        Err(_) => String::from_utf8_lossy(t.as_ref()).into_owned(),
                    };
                    if let Some((_, _, value)) = builder.current_param.as_mut() {
                        value.push_str(&text);
                    } else if let Some((_, value)) = builder.current_field.as_mut() {
                        value.push_str(&text);
                    }
                }
            }
            Ok(Event::End(e)) => {
                let local = e.local_name().as_ref().to_vec();
                match current.take() {
                    Some(builder) if builder.element == local => {
                        let (id, metadata) = builder.finish();
                        if id.is_empty() {
                            warn!("Skipping activity without id in structural document");
                        } else {
                            activities.insert(id, metadata);
                        }
                    }
                    Some(mut builder) => {
                        handle_nested_end(&mut builder, &local);
                        current = Some(builder);
                    }
                    None => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(MetadataError::Parse(format!(
                    "XML error at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
        }
    }

    Ok(activities)
}

fn open_activity(e: &BytesStart<'_>, local: &[u8]) -> Option<ActivityBuilder> {
    if !ACTIVITY_ELEMENTS.contains(&local) {
        return None;
    }
    let attrs = match attr_map(e) {
        Some(attrs) => attrs,
        None => {
            warn!(
                element = %String::from_utf8_lossy(local),
                "Malformed attributes on activity element; recording nothing for it"
            );
            return None;
        }
    };
    let info = ActivityInfo {
        id: attrs.get("id").cloned().unwrap_or_default(),
        name: attrs.get("name").cloned(),
        element: String::from_utf8_lossy(local).into_owned(),
        topic: attrs.get("topic").cloned(),
    };
    Some(ActivityBuilder::new(info, local.to_vec()))
}

fn handle_nested_start(builder: &mut ActivityBuilder, e: &BytesStart<'_>, local: &[u8]) {
    match local {
        b"extensionElements" => builder.in_extension_elements = true,
        b"properties" if builder.in_extension_elements => builder.in_properties = true,
        b"inputOutput" if builder.in_extension_elements => builder.in_input_output = true,
        b"property" if builder.in_properties => record_property(builder, e),
        b"field" if builder.in_extension_elements => {
            if let Some(attrs) = attr_map(e) {
                if let Some(name) = attrs.get("name") {
                    // Value may also arrive as attributes instead of a body
                    let inline = attrs
                        .get("stringValue")
                        .or_else(|| attrs.get("expression"))
                        .cloned()
                        .unwrap_or_default();
                    builder.current_field = Some((name.clone(), inline));
                }
            }
        }
        b"inputParameter" if builder.in_input_output => {
            if let Some(attrs) = attr_map(e) {
                if let Some(name) = attrs.get("name") {
                    builder.current_param = Some((ParamKind::Input, name.clone(), String::new()));
                }
            }
        }
        b"outputParameter" if builder.in_input_output => {
            if let Some(attrs) = attr_map(e) {
                if let Some(name) = attrs.get("name") {
                    builder.current_param = Some((ParamKind::Output, name.clone(), String::new()));
                }
            }
        }
        // camunda:string / camunda:expression bodies feed the open field
        // through text events; nothing to do on the start tag itself
        _ => {}
    }
}

fn handle_nested_empty(builder: &mut ActivityBuilder, e: &BytesStart<'_>, local: &[u8]) {
    match local {
        b"property" if builder.in_properties => record_property(builder, e),
        b"field" if builder.in_extension_elements => {
            if let Some(attrs) = attr_map(e) {
                if let Some(name) = attrs.get("name") {
                    let inline = attrs
                        .get("stringValue")
                        .or_else(|| attrs.get("expression"))
                        .cloned()
                        .unwrap_or_default();
                    builder.metadata.field_injections.insert(name.clone(), inline);
                }
            }
        }
        b"inputParameter" if builder.in_input_output => {
            if let Some(attrs) = attr_map(e) {
                if let Some(name) = attrs.get("name") {
                    builder.insert_param(ParamKind::Input, name.clone(), String::new());
                }
            }
        }
        b"outputParameter" if builder.in_input_output => {
            if let Some(attrs) = attr_map(e) {
                if let Some(name) = attrs.get("name") {
                    builder.insert_param(ParamKind::Output, name.clone(), String::new());
                }
            }
        }
        _ => {}
    }
}

fn handle_nested_end(builder: &mut ActivityBuilder, local: &[u8]) {
    match local {
        b"extensionElements" => builder.in_extension_elements = false,
        b"properties" => builder.in_properties = false,
        b"inputOutput" => builder.in_input_output = false,
        b"field" => {
            if let Some((name, value)) = builder.current_field.take() {
                builder.metadata.field_injections.insert(name, value);
            }
        }
        b"inputParameter" | b"outputParameter" => {
            if let Some((kind, name, value)) = builder.current_param.take() {
                builder.insert_param(kind, name, value);
            }
        }
        _ => {}
    }
}

fn record_property(builder: &mut ActivityBuilder, e: &BytesStart<'_>) {
    match attr_map(e) {
        Some(attrs) => {
            if let (Some(name), Some(value)) = (attrs.get("name"), attrs.get("value")) {
                builder
                    .metadata
                    .extension_properties
                    .insert(name.clone(), value.clone());
            }
        }
        None => warn!(
            activity_id = %builder.metadata.activity_info.id,
            "Malformed extension property skipped"
        ),
    }
}

/// Decode all attributes of one element; `None` when any attribute is
/// malformed, so callers can degrade that one element.
fn attr_map(e: &BytesStart<'_>) -> Option<HashMap<String, String>> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.ok()?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value().ok()?.into_owned();
        map.insert(key, value);
    }
    Some(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<bpmn:definitions xmlns:bpmn="http://www.omg.org/spec/BPMN/20100524/MODEL"
                  xmlns:camunda="http://camunda.org/schema/1.0/bpmn"
                  targetNamespace="http://bpmn.io/schema/bpmn">
  <bpmn:process id="invoice" isExecutable="true">
    <bpmn:serviceTask id="Act_1" name="Create CRM task" camunda:type="external" camunda:topic="create_task">
      <bpmn:extensionElements>
        <camunda:properties>
          <camunda:property name="region" value="east" />
          <camunda:property name="priority" value="high" />
        </camunda:properties>
        <camunda:field name="template">
          <camunda:string>ONBOARDING</camunda:string>
        </camunda:field>
        <camunda:field name="assignee">
          <camunda:expression>${starter}</camunda:expression>
        </camunda:field>
        <camunda:inputOutput>
          <camunda:inputParameter name="dueDate">${now()}</camunda:inputParameter>
          <camunda:outputParameter name="crmId">${taskResult.id}</camunda:outputParameter>
        </camunda:inputOutput>
      </bpmn:extensionElements>
    </bpmn:serviceTask>
    <bpmn:userTask id="Act_2" name="Review" />
    <bpmn:sendTask id="Act_3" name="Notify" camunda:type="external" camunda:topic="notify">
      <bpmn:extensionElements>
        <camunda:properties>
          <camunda:property name="channel" value="email" />
        </camunda:properties>
      </bpmn:extensionElements>
    </bpmn:sendTask>
  </bpmn:process>
</bpmn:definitions>"#;

    #[test]
    fn extracts_extension_properties() {
        let activities = parse_definition(SAMPLE).unwrap();
        let act = &activities["Act_1"];
        assert_eq!(act.extension_properties["region"], "east");
        assert_eq!(act.extension_properties["priority"], "high");
    }

    #[test]
    fn extracts_field_injections_string_and_expression() {
        let activities = parse_definition(SAMPLE).unwrap();
        let act = &activities["Act_1"];
        assert_eq!(act.field_injections["template"], "ONBOARDING");
        assert_eq!(act.field_injections["assignee"], "${starter}");
    }

    #[test]
    fn extracts_input_output_parameters() {
        let activities = parse_definition(SAMPLE).unwrap();
        let act = &activities["Act_1"];
        assert_eq!(act.input_parameters["dueDate"], "${now()}");
        assert_eq!(act.output_parameters["crmId"], "${taskResult.id}");
    }

    #[test]
    fn records_descriptor_for_every_activity() {
        let activities = parse_definition(SAMPLE).unwrap();
        assert_eq!(activities.len(), 3);

        let info = &activities["Act_1"].activity_info;
        assert_eq!(info.element, "serviceTask");
        assert_eq!(info.name.as_deref(), Some("Create CRM task"));
        assert_eq!(info.topic.as_deref(), Some("create_task"));

        // Empty-bodied userTask still gets a descriptor
        let review = &activities["Act_2"];
        assert!(review.extension_properties.is_empty());
        assert_eq!(review.activity_info.element, "userTask");
        assert!(review.activity_info.topic.is_none());
    }

    #[test]
    fn one_malformed_property_does_not_abort_the_rest() {
        // The bare ampersand makes "x" undecodable; every other property
        // and every other activity must still be extracted.
        let xml = r#"<?xml version="1.0"?>
<definitions xmlns:camunda="http://camunda.org/schema/1.0/bpmn">
  <process id="p">
    <serviceTask id="Act_bad" name="broken">
      <extensionElements>
        <camunda:properties>
          <camunda:property name="x" value="a & b" />
          <camunda:property name="region" value="east" />
        </camunda:properties>
      </extensionElements>
    </serviceTask>
    <serviceTask id="Act_ok" camunda:topic="create_task">
      <extensionElements>
        <camunda:properties>
          <camunda:property name="region" value="west" />
        </camunda:properties>
      </extensionElements>
    </serviceTask>
  </process>
</definitions>"#;

        let activities = parse_definition(xml).unwrap();
        assert!(activities["Act_bad"].extension_properties.get("x").is_none());
        assert_eq!(activities["Act_bad"].extension_properties["region"], "east");
        assert_eq!(activities["Act_ok"].extension_properties["region"], "west");
    }

    #[test]
    fn truly_broken_document_is_a_parse_error() {
        let result = parse_definition("<definitions><process><serviceTask id=");
        assert!(result.is_err());
    }

    #[test]
    fn unknown_activity_is_absent_not_error() {
        let activities = parse_definition(SAMPLE).unwrap();
        assert!(activities.get("Act_unknown").is_none());
    }
}
