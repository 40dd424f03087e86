//! Dataverse Web API implementation of the registration and solution stores.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use super::odata::{
    ASSEMBLY_FIELDS, AssemblyRow, Collection, IMAGE_FIELDS, ImageRow, ODataQuery, STEP_EXPAND,
    STEP_FIELDS, StepRow, TYPE_FIELDS, TypeRow, id_from_body, id_from_entity_url,
};
use super::{RegistrationClient, SolutionStore};
use crate::error::{RemoteCategory, XrmError, XrmResult};
use crate::id::{RecordId, odata_literal};
use crate::model::{
    ImageDeclaration, NewAssembly, NewPluginType, PluginAssembly, PluginImage, PluginStep,
    PluginType, SolutionComponentType, StepDeclaration,
};

/// Path of the Web API endpoint relative to the environment URL.
pub const API_PATH: &str = "api/data/v9.2/";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// HTTP client for one environment's Web API endpoint.
#[derive(Debug, Clone)]
pub struct WebApiClient {
    http: reqwest::Client,
    api_root: Url,
}

impl WebApiClient {
    /// Creates a client rooted at `api_root` (e.g. `https://org.crm.dynamics.com/api/data/v9.2/`).
    pub fn new(api_root: Url, access_token: &str) -> XrmResult<Self> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {access_token}")).map_err(|e| {
            XrmError::remote(
                RemoteCategory::Auth,
                None,
                format!("invalid access token header value: {e}"),
            )
        })?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("OData-Version", HeaderValue::from_static("4.0"));
        headers.insert("OData-MaxVersion", HeaderValue::from_static("4.0"));

        let http = reqwest::Client::builder()
            .user_agent(concat!("xrmsync/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                XrmError::remote(
                    RemoteCategory::Network,
                    None,
                    format!("failed to build HTTP client: {e}"),
                )
            })?;

        let api_root = with_trailing_slash(api_root);
        Ok(Self { http, api_root })
    }

    /// Creates a client for an environment URL such as `https://org.crm.dynamics.com`.
    pub fn for_environment(environment_url: &Url, access_token: &str) -> XrmResult<Self> {
        let api_root = with_trailing_slash(environment_url.clone())
            .join(API_PATH)
            .map_err(|e| XrmError::InvalidResponse(format!("invalid environment URL: {e}")))?;
        Self::new(api_root, access_token)
    }

    pub fn api_root(&self) -> &Url {
        &self.api_root
    }

    fn url(&self, path: &str) -> XrmResult<Url> {
        self.api_root
            .join(path)
            .map_err(|e| XrmError::InvalidResponse(format!("invalid request path '{path}': {e}")))
    }

    async fn send(&self, request: RequestBuilder) -> XrmResult<Response> {
        let response = request.send().await.map_err(|e| {
            XrmError::remote(RemoteCategory::Network, None, format!("HTTP request failed: {e}"))
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }

    async fn get_collection<T: DeserializeOwned>(
        &self,
        entity_set: &str,
        query: &ODataQuery,
    ) -> XrmResult<Vec<T>> {
        let url = self.url(entity_set)?;
        debug!(entity_set, query = ?query.to_pairs(), "GET collection");
        let response = self
            .send(self.http.get(url).query(&query.to_pairs()))
            .await?;
        let collection: Collection<T> = response.json().await.map_err(|e| {
            XrmError::InvalidResponse(format!("failed to parse {entity_set} response: {e}"))
        })?;
        Ok(collection.value)
    }

    /// POSTs a new row and returns its id if the response carried one.
    async fn create(
        &self,
        entity_set: &str,
        id_field: &str,
        body: &Value,
    ) -> XrmResult<Option<RecordId>> {
        let url = self.url(entity_set)?;
        debug!(entity_set, "POST create");
        let response = self
            .send(
                self.http
                    .post(url)
                    .header("Prefer", "return=representation")
                    .json(body),
            )
            .await?;

        let header_id = response
            .headers()
            .get("OData-EntityId")
            .and_then(|v| v.to_str().ok())
            .and_then(id_from_entity_url);

        let text = response.text().await.unwrap_or_default();
        let body_id = if text.trim().is_empty() {
            None
        } else {
            serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| id_from_body(&v, id_field))
        };

        Ok(body_id.or(header_id))
    }

    async fn patch(&self, entity_set: &str, id: &RecordId, body: &Value) -> XrmResult<()> {
        let url = self.url(&format!("{entity_set}({id})"))?;
        debug!(entity_set, %id, "PATCH");
        self.send(self.http.patch(url).json(body)).await?;
        Ok(())
    }

    async fn delete(&self, entity_set: &str, id: &RecordId) -> XrmResult<()> {
        let url = self.url(&format!("{entity_set}({id})"))?;
        debug!(entity_set, %id, "DELETE");
        self.send(self.http.delete(url)).await?;
        Ok(())
    }

    async fn resolve_message_id(&self, message: &str) -> XrmResult<RecordId> {
        #[derive(Deserialize)]
        struct MessageRow {
            sdkmessageid: Option<String>,
        }

        let query = ODataQuery::new()
            .select(&["sdkmessageid"])
            .filter(format!("name eq {}", odata_literal(message)))
            .top(1);
        let rows: Vec<MessageRow> = self.get_collection("sdkmessages", &query).await?;
        rows.into_iter()
            .find_map(|r| r.sdkmessageid.as_deref().and_then(RecordId::parse))
            .ok_or_else(|| XrmError::not_found("message", message))
    }

    async fn resolve_message_filter_id(
        &self,
        message_id: &RecordId,
        message: &str,
        entity: &str,
    ) -> XrmResult<RecordId> {
        #[derive(Deserialize)]
        struct FilterRow {
            sdkmessagefilterid: Option<String>,
        }

        let query = ODataQuery::new()
            .select(&["sdkmessagefilterid"])
            .filter(format!(
                "_sdkmessageid_value eq {} and primaryobjecttypecode eq {}",
                message_id,
                odata_literal(entity)
            ))
            .top(1);
        let rows: Vec<FilterRow> = self.get_collection("sdkmessagefilters", &query).await?;
        rows.into_iter()
            .find_map(|r| r.sdkmessagefilterid.as_deref().and_then(RecordId::parse))
            .ok_or_else(|| XrmError::not_found("message filter", format!("{message} of {entity}")))
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Map a non-success response to a [`XrmError::Remote`].
fn status_error(status: StatusCode, body: &str) -> XrmError {
    #[derive(Deserialize)]
    struct ErrorEnvelope {
        error: ErrorBody,
    }
    #[derive(Deserialize)]
    struct ErrorBody {
        message: Option<String>,
    }

    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error.message)
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                body.trim().to_string()
            }
        });

    let category = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteCategory::Auth,
        _ => RemoteCategory::Rejected,
    };
    XrmError::remote(category, Some(status.as_u16()), message)
}

/// An undeclared description is left out so updates keep the remote one.
fn step_body(name: &str, step: &StepDeclaration) -> Value {
    let mut body = json!({
        "name": name,
        "stage": step.stage.code(),
        "mode": step.mode.code(),
        "rank": step.rank,
        "filteringattributes": step.filtering_attributes_value(),
    });
    if let Some(description) = &step.description {
        body["description"] = json!(description);
    }
    body
}

fn image_body(image: &ImageDeclaration) -> Value {
    json!({
        "name": image.name,
        "entityalias": image.alias(),
        "imagetype": image.image_type.code(),
        "attributes": image.attributes_value(),
        "messagepropertyname": image.message_property(),
    })
}

#[async_trait]
impl RegistrationClient for WebApiClient {
    async fn create_assembly(&self, assembly: &NewAssembly) -> XrmResult<Option<RecordId>> {
        let body = json!({
            "name": assembly.name,
            "content": assembly.content_base64,
            "sourcetype": assembly.source_type.code(),
            "isolationmode": assembly.isolation_mode.code(),
        });
        self.create("pluginassemblies", "pluginassemblyid", &body).await
    }

    async fn update_assembly_content(&self, id: &RecordId, content_base64: &str) -> XrmResult<()> {
        self.patch("pluginassemblies", id, &json!({ "content": content_base64 }))
            .await
    }

    async fn list_assemblies(&self) -> XrmResult<Vec<PluginAssembly>> {
        let query = ODataQuery::new().select(ASSEMBLY_FIELDS).order_by("name");
        let rows: Vec<AssemblyRow> = self.get_collection("pluginassemblies", &query).await?;
        Ok(rows.into_iter().filter_map(AssemblyRow::into_model).collect())
    }

    async fn find_assembly_by_name(&self, name: &str) -> XrmResult<Option<PluginAssembly>> {
        let query = ODataQuery::new()
            .select(ASSEMBLY_FIELDS)
            .filter(format!("name eq {}", odata_literal(name)))
            .top(1);
        let rows: Vec<AssemblyRow> = self.get_collection("pluginassemblies", &query).await?;
        Ok(rows.into_iter().find_map(AssemblyRow::into_model))
    }

    async fn list_types_for_assembly(&self, assembly_id: &RecordId) -> XrmResult<Vec<PluginType>> {
        let query = ODataQuery::new()
            .select(TYPE_FIELDS)
            .filter(format!("_pluginassemblyid_value eq {assembly_id}"));
        let rows: Vec<TypeRow> = self.get_collection("plugintypes", &query).await?;
        Ok(rows.into_iter().filter_map(TypeRow::into_model).collect())
    }

    async fn list_steps_for_type(&self, type_id: &RecordId) -> XrmResult<Vec<PluginStep>> {
        let query = ODataQuery::new()
            .select(STEP_FIELDS)
            .filter(format!("_eventhandler_value eq {type_id}"))
            .expand(STEP_EXPAND);
        let rows: Vec<StepRow> = self
            .get_collection("sdkmessageprocessingsteps", &query)
            .await?;
        Ok(rows.into_iter().filter_map(StepRow::into_model).collect())
    }

    async fn list_images_for_step(&self, step_id: &RecordId) -> XrmResult<Vec<PluginImage>> {
        let query = ODataQuery::new()
            .select(IMAGE_FIELDS)
            .filter(format!("_sdkmessageprocessingstepid_value eq {step_id}"));
        let rows: Vec<ImageRow> = self
            .get_collection("sdkmessageprocessingstepimages", &query)
            .await?;
        Ok(rows.into_iter().filter_map(ImageRow::into_model).collect())
    }

    async fn create_type(
        &self,
        assembly_id: &RecordId,
        plugin_type: &NewPluginType,
    ) -> XrmResult<Option<RecordId>> {
        let body = json!({
            "typename": plugin_type.type_name,
            "name": plugin_type.type_name,
            "friendlyname": plugin_type.friendly_name,
            "pluginassemblyid@odata.bind": format!("/pluginassemblies({assembly_id})"),
        });
        self.create("plugintypes", "plugintypeid", &body).await
    }

    async fn delete_type(&self, id: &RecordId) -> XrmResult<()> {
        self.delete("plugintypes", id).await
    }

    async fn create_step(
        &self,
        type_id: &RecordId,
        name: &str,
        step: &StepDeclaration,
    ) -> XrmResult<Option<RecordId>> {
        let message_id = self.resolve_message_id(&step.message).await?;

        let mut body = step_body(name, step);
        body["supporteddeployment"] = json!(0);
        body["eventhandler_plugintype@odata.bind"] = json!(format!("/plugintypes({type_id})"));
        body["sdkmessageid@odata.bind"] = json!(format!("/sdkmessages({message_id})"));
        if let Some(entity) = step.primary_entity.as_deref().filter(|e| !e.trim().is_empty()) {
            let filter_id = self
                .resolve_message_filter_id(&message_id, &step.message, entity)
                .await?;
            body["sdkmessagefilterid@odata.bind"] =
                json!(format!("/sdkmessagefilters({filter_id})"));
        }

        self.create("sdkmessageprocessingsteps", "sdkmessageprocessingstepid", &body)
            .await
    }

    async fn update_step(
        &self,
        id: &RecordId,
        name: &str,
        step: &StepDeclaration,
    ) -> XrmResult<()> {
        let mut body = step_body(name, step);
        let (statecode, statuscode) = step.status_codes();
        body["statecode"] = json!(statecode);
        body["statuscode"] = json!(statuscode);
        self.patch("sdkmessageprocessingsteps", id, &body).await
    }

    async fn delete_step(&self, id: &RecordId) -> XrmResult<()> {
        self.delete("sdkmessageprocessingsteps", id).await
    }

    async fn create_image(
        &self,
        step_id: &RecordId,
        image: &ImageDeclaration,
    ) -> XrmResult<Option<RecordId>> {
        let mut body = image_body(image);
        body["sdkmessageprocessingstepid@odata.bind"] =
            json!(format!("/sdkmessageprocessingsteps({step_id})"));
        self.create(
            "sdkmessageprocessingstepimages",
            "sdkmessageprocessingstepimageid",
            &body,
        )
        .await
    }

    async fn update_image(&self, id: &RecordId, image: &ImageDeclaration) -> XrmResult<()> {
        self.patch("sdkmessageprocessingstepimages", id, &image_body(image))
            .await
    }

    async fn delete_image(&self, id: &RecordId) -> XrmResult<()> {
        self.delete("sdkmessageprocessingstepimages", id).await
    }
}

#[async_trait]
impl SolutionStore for WebApiClient {
    async fn find_solution_id(&self, unique_name: &str) -> XrmResult<Option<RecordId>> {
        #[derive(Deserialize)]
        struct SolutionRow {
            solutionid: Option<String>,
        }

        let query = ODataQuery::new()
            .select(&["solutionid", "uniquename"])
            .filter(format!("uniquename eq {}", odata_literal(unique_name)))
            .top(1);
        let rows: Vec<SolutionRow> = self.get_collection("solutions", &query).await?;
        Ok(rows
            .into_iter()
            .find_map(|r| r.solutionid.as_deref().and_then(RecordId::parse)))
    }

    async fn is_component_in_solution(
        &self,
        component_id: &RecordId,
        component_type: SolutionComponentType,
        solution_id: &RecordId,
    ) -> XrmResult<bool> {
        let query = ODataQuery::new()
            .select(&["solutioncomponentid"])
            .filter(format!(
                "componenttype eq {} and objectid eq {} and _solutionid_value eq {}",
                component_type.code(),
                component_id,
                solution_id
            ))
            .top(1);
        let rows: Vec<Value> = self.get_collection("solutioncomponents", &query).await?;
        Ok(!rows.is_empty())
    }

    async fn add_solution_component(
        &self,
        component_id: &RecordId,
        component_type: SolutionComponentType,
        solution_unique_name: &str,
    ) -> XrmResult<()> {
        let url = self.url("AddSolutionComponent")?;
        let body = json!({
            "ComponentId": component_id,
            "ComponentType": component_type.code(),
            "SolutionUniqueName": solution_unique_name,
            "AddRequiredComponents": false,
        });
        debug!(
            %component_id,
            component_type = component_type.code(),
            solution_unique_name,
            "AddSolutionComponent"
        );
        self.send(self.http.post(url).json(&body)).await?;
        Ok(())
    }
}
