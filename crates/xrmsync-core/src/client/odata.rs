//! OData query options and the wire shapes of the Web API collections.

use serde::Deserialize;

use crate::id::RecordId;
use crate::model::{IsolationMode, PluginAssembly, PluginImage, PluginStep, PluginType, SourceType};

/// Query options for a collection read.
///
/// Values are passed through reqwest's query serializer, which takes care of
/// URL encoding; string literals inside `$filter` must already be quoted with
/// [`crate::id::odata_literal`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ODataQuery {
    select: Vec<&'static str>,
    filter: Option<String>,
    expand: Option<String>,
    order_by: Option<String>,
    top: Option<u32>,
}

impl ODataQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, fields: &[&'static str]) -> Self {
        self.select.extend_from_slice(fields);
        self
    }

    pub fn filter(mut self, expression: impl Into<String>) -> Self {
        self.filter = Some(expression.into());
        self
    }

    pub fn expand(mut self, expression: impl Into<String>) -> Self {
        self.expand = Some(expression.into());
        self
    }

    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }

    pub fn top(mut self, top: u32) -> Self {
        self.top = Some(top);
        self
    }

    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if !self.select.is_empty() {
            pairs.push(("$select", self.select.join(",")));
        }
        if let Some(filter) = &self.filter {
            pairs.push(("$filter", filter.clone()));
        }
        if let Some(expand) = &self.expand {
            pairs.push(("$expand", expand.clone()));
        }
        if let Some(order_by) = &self.order_by {
            pairs.push(("$orderby", order_by.clone()));
        }
        if let Some(top) = self.top {
            pairs.push(("$top", top.to_string()));
        }
        pairs
    }
}

/// `{ "value": [...] }` envelope of every collection response.
#[derive(Debug, Deserialize)]
pub struct Collection<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
}

pub const ASSEMBLY_FIELDS: &[&str] = &[
    "pluginassemblyid",
    "name",
    "version",
    "isolationmode",
    "publickeytoken",
    "culture",
    "sourcetype",
];

#[derive(Debug, Deserialize)]
pub struct AssemblyRow {
    pub pluginassemblyid: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub isolationmode: Option<i32>,
    pub publickeytoken: Option<String>,
    pub culture: Option<String>,
    pub sourcetype: Option<i32>,
}

impl AssemblyRow {
    /// Rows without an id or name are dropped.
    pub fn into_model(self) -> Option<PluginAssembly> {
        let id = RecordId::parse(self.pluginassemblyid.as_deref()?)?;
        let name = self.name.filter(|n| !n.is_empty())?;
        Some(PluginAssembly {
            id,
            name,
            version: self.version,
            isolation_mode: self.isolationmode.and_then(IsolationMode::from_code),
            source_type: self.sourcetype.and_then(SourceType::from_code),
            public_key_token: self.publickeytoken,
            culture: self.culture,
        })
    }
}

pub const TYPE_FIELDS: &[&str] = &["plugintypeid", "name", "typename", "friendlyname"];

#[derive(Debug, Deserialize)]
pub struct TypeRow {
    pub plugintypeid: Option<String>,
    pub name: Option<String>,
    pub typename: Option<String>,
    pub friendlyname: Option<String>,
}

impl TypeRow {
    pub fn into_model(self) -> Option<PluginType> {
        let id = RecordId::parse(self.plugintypeid.as_deref()?)?;
        let name = self.name.filter(|n| !n.is_empty())?;
        Some(PluginType {
            id,
            name,
            friendly_name: self.friendlyname,
            type_name: self.typename,
        })
    }
}

pub const STEP_FIELDS: &[&str] = &[
    "sdkmessageprocessingstepid",
    "name",
    "stage",
    "mode",
    "rank",
    "statecode",
    "statuscode",
    "filteringattributes",
    "description",
];

pub const STEP_EXPAND: &str =
    "sdkmessageid($select=name),sdkmessagefilterid($select=primaryobjecttypecode)";

#[derive(Debug, Deserialize)]
pub struct MessageRef {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageFilterRef {
    pub primaryobjecttypecode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StepRow {
    pub sdkmessageprocessingstepid: Option<String>,
    pub name: Option<String>,
    pub stage: Option<i32>,
    pub mode: Option<i32>,
    pub rank: Option<i32>,
    pub statecode: Option<i32>,
    pub statuscode: Option<i32>,
    pub filteringattributes: Option<String>,
    pub description: Option<String>,
    pub sdkmessageid: Option<MessageRef>,
    pub sdkmessagefilterid: Option<MessageFilterRef>,
}

impl StepRow {
    pub fn into_model(self) -> Option<PluginStep> {
        let id = RecordId::parse(self.sdkmessageprocessingstepid.as_deref()?)?;
        let name = self.name.filter(|n| !n.is_empty())?;
        Some(PluginStep {
            id,
            name,
            stage: self.stage,
            mode: self.mode,
            rank: self.rank,
            status: self.statecode,
            status_reason: self.statuscode,
            message_name: self.sdkmessageid.and_then(|m| m.name),
            primary_entity: self.sdkmessagefilterid.and_then(|f| f.primaryobjecttypecode),
            filtering_attributes: self.filteringattributes,
            description: self.description,
        })
    }
}

pub const IMAGE_FIELDS: &[&str] = &[
    "sdkmessageprocessingstepimageid",
    "name",
    "imagetype",
    "entityalias",
    "attributes",
    "messagepropertyname",
];

#[derive(Debug, Deserialize)]
pub struct ImageRow {
    pub sdkmessageprocessingstepimageid: Option<String>,
    pub name: Option<String>,
    pub imagetype: Option<i32>,
    pub entityalias: Option<String>,
    pub attributes: Option<String>,
    pub messagepropertyname: Option<String>,
}

impl ImageRow {
    pub fn into_model(self) -> Option<PluginImage> {
        let id = RecordId::parse(self.sdkmessageprocessingstepimageid.as_deref()?)?;
        let name = self.name.filter(|n| !n.is_empty())?;
        Some(PluginImage {
            id,
            name,
            image_type: self.imagetype,
            entity_alias: self.entityalias,
            attributes: self.attributes,
            message_property_name: self.messagepropertyname,
        })
    }
}

/// Pull `field` out of a representation body as a normalized id.
pub fn id_from_body(body: &serde_json::Value, field: &str) -> Option<RecordId> {
    body.get(field)
        .and_then(serde_json::Value::as_str)
        .and_then(RecordId::parse)
}

/// Parse the id out of an `OData-EntityId` header value such as
/// `https://org.crm.dynamics.com/api/data/v9.2/plugintypes(00000000-...)`.
pub fn id_from_entity_url(value: &str) -> Option<RecordId> {
    let start = value.rfind('(')?;
    let end = value[start..].find(')')? + start;
    RecordId::parse(&value[start + 1..end])
}
