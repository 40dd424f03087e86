//! Remote registration store contract.
//!
//! The traits here are the only way the rest of the crate talks to an
//! environment. [`WebApiClient`] implements them over the Dataverse Web API;
//! tests substitute in-memory stores.
//!
//! Ids passed in are already normalized by the caller ([`RecordId`] cannot
//! hold anything else), and ids handed back are parsed into [`RecordId`].

pub mod odata;
pub mod web_api;

use async_trait::async_trait;

use crate::error::XrmResult;
use crate::id::RecordId;
use crate::model::{
    ImageDeclaration, NewAssembly, NewPluginType, PluginAssembly, PluginImage, PluginStep,
    PluginType, SolutionComponentType, StepDeclaration,
};

pub use odata::ODataQuery;
pub use web_api::WebApiClient;

/// Typed CRUD over assemblies, plugin types, steps and images.
///
/// Create operations return `None` when the store's response did not carry
/// the new record's id; callers recover by looking the record up.
#[async_trait]
pub trait RegistrationClient: Send + Sync {
    async fn create_assembly(&self, assembly: &NewAssembly) -> XrmResult<Option<RecordId>>;

    async fn update_assembly_content(&self, id: &RecordId, content_base64: &str) -> XrmResult<()>;

    async fn list_assemblies(&self) -> XrmResult<Vec<PluginAssembly>>;

    async fn find_assembly_by_name(&self, name: &str) -> XrmResult<Option<PluginAssembly>>;

    async fn list_types_for_assembly(&self, assembly_id: &RecordId) -> XrmResult<Vec<PluginType>>;

    async fn list_steps_for_type(&self, type_id: &RecordId) -> XrmResult<Vec<PluginStep>>;

    async fn list_images_for_step(&self, step_id: &RecordId) -> XrmResult<Vec<PluginImage>>;

    async fn create_type(
        &self,
        assembly_id: &RecordId,
        plugin_type: &NewPluginType,
    ) -> XrmResult<Option<RecordId>>;

    async fn delete_type(&self, id: &RecordId) -> XrmResult<()>;

    /// `name` is the resolved step name (see [`StepDeclaration::display_name`]).
    /// The step is created enabled whatever the declaration says.
    async fn create_step(
        &self,
        type_id: &RecordId,
        name: &str,
        step: &StepDeclaration,
    ) -> XrmResult<Option<RecordId>>;

    /// Also applies the declared enabled state. An undeclared description is
    /// left as registered.
    async fn update_step(
        &self,
        id: &RecordId,
        name: &str,
        step: &StepDeclaration,
    ) -> XrmResult<()>;

    async fn delete_step(&self, id: &RecordId) -> XrmResult<()>;

    async fn create_image(
        &self,
        step_id: &RecordId,
        image: &ImageDeclaration,
    ) -> XrmResult<Option<RecordId>>;

    async fn update_image(&self, id: &RecordId, image: &ImageDeclaration) -> XrmResult<()>;

    async fn delete_image(&self, id: &RecordId) -> XrmResult<()>;
}

/// Solution lookups and the `AddSolutionComponent` action.
#[async_trait]
pub trait SolutionStore: Send + Sync {
    async fn find_solution_id(&self, unique_name: &str) -> XrmResult<Option<RecordId>>;

    async fn is_component_in_solution(
        &self,
        component_id: &RecordId,
        component_type: SolutionComponentType,
        solution_id: &RecordId,
    ) -> XrmResult<bool>;

    /// Adds the component without pulling in its required components.
    async fn add_solution_component(
        &self,
        component_id: &RecordId,
        component_type: SolutionComponentType,
        solution_unique_name: &str,
    ) -> XrmResult<()>;
}
